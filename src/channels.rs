//! Deterministic channel selection over heterogeneous montage naming.
//!
//! A [`ChannelRuleset`] declares an exclusive set (each name present exactly
//! once) and ordered equivalence groups (exactly one alternative present).
//! Output order is fixed by the ruleset, never by the recording.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::config::RulesetKind;
use crate::constants::channels::{
    EEG_EQUIVALENCES, EEG_EXCLUSIVE, FULL_EQUIVALENCES, FULL_EXCLUSIVE,
};
use crate::errors::{ChannelConstraint, IngestError};
use crate::types::ChannelName;

/// Raw channel label reported by a recording.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel label exactly as the recording reports it.
    pub name: ChannelName,
}

impl ChannelDescriptor {
    /// Descriptor for a channel labeled `name`.
    pub fn new(name: impl Into<ChannelName>) -> Self {
        Self { name: name.into() }
    }
}

/// Canonically ordered channel names that satisfied a ruleset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSelection {
    names: Vec<ChannelName>,
}

impl ChannelSelection {
    /// Selected channel names in canonical order.
    pub fn names(&self) -> &[ChannelName] {
        &self.names
    }

    /// Number of selected channels.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Selected names as string slices, in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Exclusive set plus equivalence groups for one montage.
#[derive(Clone, Debug)]
pub struct ChannelRuleset {
    exclusive: Vec<Cow<'static, str>>,
    equivalences: Vec<Vec<Cow<'static, str>>>,
}

impl ChannelRuleset {
    /// Build a ruleset from owned tables.
    pub fn new<S: Into<Cow<'static, str>>>(
        exclusive: impl IntoIterator<Item = S>,
        equivalences: impl IntoIterator<Item = Vec<S>>,
    ) -> Self {
        Self {
            exclusive: exclusive.into_iter().map(Into::into).collect(),
            equivalences: equivalences
                .into_iter()
                .map(|group| group.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// Broad multi-signal montage.
    pub fn full_montage() -> Self {
        Self::from_static(FULL_EXCLUSIVE, FULL_EQUIVALENCES)
    }

    /// EEG-only subset.
    pub fn eeg_only() -> Self {
        Self::from_static(EEG_EXCLUSIVE, EEG_EQUIVALENCES)
    }

    /// Ruleset backing `kind`.
    pub fn for_kind(kind: RulesetKind) -> Self {
        match kind {
            RulesetKind::FullMontage => Self::full_montage(),
            RulesetKind::EegOnly => Self::eeg_only(),
        }
    }

    fn from_static(
        exclusive: &'static [&'static str],
        groups: &'static [&'static [&'static str]],
    ) -> Self {
        Self {
            exclusive: exclusive.iter().copied().map(Cow::Borrowed).collect(),
            equivalences: groups
                .iter()
                .map(|group| group.iter().copied().map(Cow::Borrowed).collect())
                .collect(),
        }
    }

    /// Number of channels every successful selection contains.
    pub fn selection_len(&self) -> usize {
        self.exclusive.len() + self.equivalences.len()
    }

    /// Pick the canonical ordered subset of `raw`.
    ///
    /// Fails with [`IngestError::ChannelConstraintUnmet`] when any exclusive
    /// member is missing or duplicated, or when an equivalence group matches
    /// zero or several raw channels.
    pub fn select(&self, raw: &[ChannelDescriptor]) -> Result<ChannelSelection, IngestError> {
        let matched = raw
            .iter()
            .filter(|channel| self.exclusive.iter().any(|name| name == &channel.name))
            .count();
        let all_once = self
            .exclusive
            .iter()
            .all(|name| occurrences(raw, name) == 1);
        if matched != self.exclusive.len() || !all_once {
            return Err(IngestError::ChannelConstraintUnmet {
                constraint: ChannelConstraint::ExclusiveSet,
                expected: self.exclusive.len(),
                matched,
            });
        }

        let mut names: Vec<ChannelName> = Vec::with_capacity(self.selection_len());
        names.extend(self.exclusive.iter().map(|name| name.to_string()));

        for (idx, group) in self.equivalences.iter().enumerate() {
            let hits: Vec<&ChannelDescriptor> = raw
                .iter()
                .filter(|channel| group.iter().any(|name| name == &channel.name))
                .collect();
            if hits.len() != 1 {
                return Err(IngestError::ChannelConstraintUnmet {
                    constraint: ChannelConstraint::EquivalenceGroup(idx),
                    expected: 1,
                    matched: hits.len(),
                });
            }
            names.push(hits[0].name.clone());
        }

        Ok(ChannelSelection { names })
    }
}

fn occurrences(raw: &[ChannelDescriptor], name: &str) -> usize {
    raw.iter().filter(|channel| channel.name == name).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(names: &[&str]) -> Vec<ChannelDescriptor> {
        names.iter().map(|name| ChannelDescriptor::new(*name)).collect()
    }

    fn small_ruleset() -> ChannelRuleset {
        ChannelRuleset::new(["C3-M2", "O1-M2"], [vec!["O1-M1", "O2-M1", "O2-M2"]])
    }

    #[test]
    fn selects_exclusive_members_then_group_match() {
        let selection = small_ruleset()
            .select(&raw(&["O2-M1", "O1-M2", "C3-M2"]))
            .unwrap();
        assert_eq!(selection.names(), &["C3-M2", "O1-M2", "O2-M1"]);
        assert_eq!(selection.len(), small_ruleset().selection_len());
    }

    #[test]
    fn missing_exclusive_member_fails() {
        let err = small_ruleset()
            .select(&raw(&["C3-M2", "O2-M1"]))
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::ChannelConstraintUnmet {
                constraint: ChannelConstraint::ExclusiveSet,
                expected: 2,
                matched: 1,
            }
        ));
    }

    #[test]
    fn removing_any_exclusive_channel_fails_selection() {
        let ruleset = ChannelRuleset::eeg_only();
        let full = raw(&["C3-M2", "O1-M2", "C4-M1", "E1-M2", "E2-M2", "F4-M1", "O2-M1", "ECG"]);
        assert!(ruleset.select(&full).is_ok());
        for exclusive in EEG_EXCLUSIVE {
            let without: Vec<ChannelDescriptor> = full
                .iter()
                .filter(|channel| channel.name != *exclusive)
                .cloned()
                .collect();
            assert!(matches!(
                ruleset.select(&without),
                Err(IngestError::ChannelConstraintUnmet {
                    constraint: ChannelConstraint::ExclusiveSet,
                    ..
                })
            ));
        }
    }

    #[test]
    fn duplicated_exclusive_member_fails() {
        let err = small_ruleset()
            .select(&raw(&["C3-M2", "C3-M2", "O1-M2", "O2-M1"]))
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::ChannelConstraintUnmet {
                constraint: ChannelConstraint::ExclusiveSet,
                matched: 3,
                ..
            }
        ));
    }

    #[test]
    fn equivalence_group_needs_exactly_one_member() {
        let ruleset = small_ruleset();
        let ambiguous = ruleset
            .select(&raw(&["C3-M2", "O1-M2", "O2-M1", "O2-M2"]))
            .unwrap_err();
        assert!(matches!(
            ambiguous,
            IngestError::ChannelConstraintUnmet {
                constraint: ChannelConstraint::EquivalenceGroup(0),
                matched: 2,
                ..
            }
        ));

        let absent = ruleset.select(&raw(&["C3-M2", "O1-M2"])).unwrap_err();
        assert!(matches!(
            absent,
            IngestError::ChannelConstraintUnmet {
                constraint: ChannelConstraint::EquivalenceGroup(0),
                matched: 0,
                ..
            }
        ));
    }

    #[test]
    fn selection_is_deterministic_across_raw_orderings() {
        let ruleset = ChannelRuleset::full_montage();
        let mut names = vec![
            "ABD", "C3-M2", "CHEST", "O1-M2", "IC", "SNORE", "AIRFLOW", "HR", "SaO2", "C4-M2",
            "Chin1-Chin2", "E1-M2", "E2-M1", "Fp2-M1", "O2-M2", "EKG", "LAT-E1", "RAT", "Pleth",
        ];
        let first = ruleset.select(&raw(&names)).unwrap();
        let again = ruleset.select(&raw(&names)).unwrap();
        assert_eq!(first, again);
        names.reverse();
        let reversed = ruleset.select(&raw(&names)).unwrap();
        assert_eq!(first, reversed);
        assert_eq!(first.len(), 18);
        assert_eq!(first.names()[9], "C4-M2");
        assert_eq!(first.names()[10], "Chin1-Chin2");
        assert_eq!(first.names()[16], "LAT-E1");
    }

    #[test]
    fn for_kind_picks_table() {
        assert_eq!(ChannelRuleset::for_kind(RulesetKind::EegOnly).selection_len(), 7);
        assert_eq!(
            ChannelRuleset::for_kind(RulesetKind::FullMontage).selection_len(),
            18
        );
    }
}
