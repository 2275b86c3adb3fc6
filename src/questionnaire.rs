//! Typed covariates from the pre-sleep questionnaire.
//!
//! The questionnaire arrives as `(key, answer)` pairs. Checkbox groups tick one
//! key with `"1"`; free-text answers (height, clock times) are parsed leniently.
//! Anything missing or unreadable becomes `None` rather than failing the record.

use std::collections::HashMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::constants::questionnaire::{
    AGE, BEDTIME, BMI, EPWORTH, EVENING_BEDTIME_HOURS, FALL_ASLEEP, HEIGHT, RISE_TIME, SEX_FEMALE,
    SEX_MALE, SMOKE_NO, SMOKE_YES, TICKED, WAKE_UPS, WEIGHT,
};

/// Self-reported sex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    /// `sexM` ticked.
    Male,
    /// `sexF` ticked.
    Female,
}

/// Usual time taken to fall asleep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SleepLatency {
    /// Up to ten minutes.
    UnderTenMinutes,
    /// Ten to thirty minutes.
    TenToThirtyMinutes,
    /// Thirty minutes to an hour.
    ThirtyToSixtyMinutes,
    /// More than an hour.
    OverAnHour,
}

/// Usual number of awakenings per night.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NightWakings {
    /// Sleeps through.
    None,
    /// One to three awakenings.
    OneToThree,
    /// More than three awakenings.
    MoreThanThree,
}

/// Covariates extracted from one pre-sleep questionnaire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreSleepCovariates {
    /// Age in years.
    pub age: Option<u32>,
    /// Self-reported sex.
    pub sex: Option<Sex>,
    /// Height in feet.
    pub height_feet: Option<f64>,
    /// Self-reported weight, in the unit the form asked for.
    pub weight: Option<f64>,
    /// Epworth sleepiness score.
    pub epworth_score: Option<u32>,
    /// Body-mass index.
    pub bmi: Option<f64>,
    /// Hours between usual bedtime and rise time.
    pub hours_in_bed: Option<f64>,
    /// Usual sleep-onset latency bucket.
    pub sleep_latency: Option<SleepLatency>,
    /// Usual night-waking bucket.
    pub night_wakings: Option<NightWakings>,
    /// Whether the respondent smokes.
    pub smoker: Option<bool>,
}

impl PreSleepCovariates {
    /// Extract covariates from `(key, answer)` pairs; later duplicates win.
    pub fn from_answers(answers: &[(String, String)]) -> Self {
        let lookup: HashMap<&str, &str> = answers
            .iter()
            .map(|(key, answer)| (key.trim(), answer.trim()))
            .collect();
        let answer = |key: &str| lookup.get(key).copied().filter(|value| !value.is_empty());
        let ticked = |key: &str| answer(key) == Some(TICKED);

        let sex = if ticked(SEX_MALE) {
            Some(Sex::Male)
        } else if ticked(SEX_FEMALE) {
            Some(Sex::Female)
        } else {
            None
        };
        let smoker = if ticked(SMOKE_YES) {
            Some(true)
        } else if ticked(SMOKE_NO) {
            Some(false)
        } else {
            None
        };

        let sleep_latency = FALL_ASLEEP
            .iter()
            .position(|key| ticked(*key))
            .and_then(|idx| {
                [
                    SleepLatency::UnderTenMinutes,
                    SleepLatency::TenToThirtyMinutes,
                    SleepLatency::ThirtyToSixtyMinutes,
                    SleepLatency::OverAnHour,
                ]
                .get(idx)
                .copied()
            });
        let night_wakings = WAKE_UPS.iter().position(|key| ticked(*key)).and_then(|idx| {
            [
                NightWakings::None,
                NightWakings::OneToThree,
                NightWakings::MoreThanThree,
            ]
            .get(idx)
            .copied()
        });

        let hours_in_bed = match (
            answer(BEDTIME).and_then(|raw| parse_clock(raw, true)),
            answer(RISE_TIME).and_then(|raw| parse_clock(raw, false)),
        ) {
            (Some(bed), Some(rise)) => {
                let minutes = (rise - bed).num_minutes().rem_euclid(24 * 60);
                Some(minutes as f64 / 60.0)
            }
            _ => None,
        };

        Self {
            age: answer(AGE).and_then(parse_whole),
            sex,
            height_feet: answer(HEIGHT).and_then(parse_height),
            weight: answer(WEIGHT).and_then(parse_weight),
            epworth_score: answer(EPWORTH).and_then(parse_whole),
            bmi: answer(BMI).and_then(|raw| raw.parse::<f64>().ok().filter(|v| v.is_finite())),
            hours_in_bed,
            sleep_latency,
            night_wakings,
            smoker,
        }
    }
}

/// Whole numbers, tolerating a `.0` suffix from spreadsheet exports.
fn parse_whole(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(v))
            .map(|v| v as u32)
    })
}

/// Height in feet from answers like `5 ft 7 in`, `5’7”`, `57` or `6`.
fn parse_height(raw: &str) -> Option<f64> {
    let normalized = raw
        .to_lowercase()
        .replace(['’', '\''], " ft ")
        .replace(['”', '"'], " in ");
    let compact = normalized.trim();

    if !compact.is_empty() && compact.bytes().all(|b| b.is_ascii_digit()) {
        // Bare digits: feet, or feet then inches.
        return match compact.as_bytes() {
            [feet] => Some(f64::from(feet - b'0')),
            [feet, inches] => Some(f64::from(feet - b'0') + f64::from(inches - b'0') / 12.0),
            _ => None,
        };
    }

    let mut last = 0.0;
    let mut feet = None;
    for part in compact.split_whitespace() {
        if let Ok(value) = part.parse::<f64>() {
            last = value;
            continue;
        }
        match part {
            "ft" | "feet" => feet = Some(last),
            "in" | "inches" => feet = feet.map(|f: f64| f + last / 12.0),
            _ => {}
        }
    }
    feet
}

fn parse_weight(raw: &str) -> Option<f64> {
    raw.replace(' ', "")
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w != 0.0)
}

/// Clock time from `10:30 pm`, `7am`, `23:15` or a range like `10-11pm`.
///
/// Ranges keep their first bound. Unsuffixed bedtimes between 4 and 12 are
/// taken as evening hours.
fn parse_clock(raw: &str, bedtime: bool) -> Option<NaiveTime> {
    let lower = raw.to_ascii_lowercase();
    let first = lower.split('-').next()?.trim();
    let (digits, pm) = if let Some(rest) = first.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = first.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (first, None)
    };

    let (hour, minute) = match digits.split_once(':') {
        Some((hour, minute)) => (hour.trim().parse::<u32>().ok()?, minute.trim().parse().ok()?),
        None => (digits.parse::<u32>().ok()?, 0),
    };
    if hour > 23 {
        return None;
    }
    let hour = match pm {
        Some(false) => hour % 12,
        Some(true) => hour % 12 + 12,
        None if bedtime && EVENING_BEDTIME_HOURS.contains(&hour) => (hour + 12) % 24,
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn full_form_yields_every_covariate() {
        let covariates = PreSleepCovariates::from_answers(&answers(&[
            ("age", "47"),
            ("sexM", "0"),
            ("sexF", "1"),
            ("height", "5 ft 6 in"),
            ("weight", "1 60"),
            ("ESS", "12.0"),
            ("BMI", "25.8"),
            ("getIntoBedAt", "10:30 pm"),
            ("getOutOfBedAt", "6:45am"),
            ("fallAsleep0_10min", "0"),
            ("fallAsleep10_30min", "1"),
            ("wakeUp0", "0"),
            ("wakeUp1_3", "0"),
            ("wakeUpMore3", "1"),
            ("smoke_yes", "0"),
            ("smoke_no", "1"),
        ]));
        assert_eq!(covariates.age, Some(47));
        assert_eq!(covariates.sex, Some(Sex::Female));
        assert_eq!(covariates.height_feet, Some(5.5));
        assert_eq!(covariates.weight, Some(160.0));
        assert_eq!(covariates.epworth_score, Some(12));
        assert_eq!(covariates.bmi, Some(25.8));
        assert_eq!(covariates.hours_in_bed, Some(8.25));
        assert_eq!(covariates.sleep_latency, Some(SleepLatency::TenToThirtyMinutes));
        assert_eq!(covariates.night_wakings, Some(NightWakings::MoreThanThree));
        assert_eq!(covariates.smoker, Some(false));
    }

    #[test]
    fn blank_form_is_all_none() {
        assert_eq!(
            PreSleepCovariates::from_answers(&answers(&[("age", ""), ("weight", "0")])),
            PreSleepCovariates::default()
        );
    }

    #[test]
    fn height_accepts_common_spellings() {
        assert_eq!(parse_height("5’9”"), Some(5.75));
        assert_eq!(parse_height("6 feet"), Some(6.0));
        assert_eq!(parse_height("6"), Some(6.0));
        assert_eq!(parse_height("53"), Some(5.25));
        assert_eq!(parse_height("170"), None);
        assert_eq!(parse_height("tall"), None);
    }

    #[test]
    fn unsuffixed_bedtimes_are_evening() {
        assert_eq!(parse_clock("11", true), NaiveTime::from_hms_opt(23, 0, 0));
        assert_eq!(parse_clock("12:30", true), NaiveTime::from_hms_opt(0, 30, 0));
        assert_eq!(parse_clock("1:00", true), NaiveTime::from_hms_opt(1, 0, 0));
        assert_eq!(parse_clock("7", false), NaiveTime::from_hms_opt(7, 0, 0));
        assert_eq!(parse_clock("10-11pm", true), NaiveTime::from_hms_opt(22, 0, 0));
        assert_eq!(parse_clock("12am", false), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_clock("25:00", false), None);
    }

    #[test]
    fn time_in_bed_wraps_past_midnight() {
        let covariates = PreSleepCovariates::from_answers(&answers(&[
            ("getIntoBedAt", "1:30am"),
            ("getOutOfBedAt", "9:00 am"),
        ]));
        assert_eq!(covariates.hours_in_bed, Some(7.5));

        let late = PreSleepCovariates::from_answers(&answers(&[
            ("getIntoBedAt", "11 pm"),
            ("getOutOfBedAt", "11pm"),
        ]));
        assert_eq!(late.hours_in_bed, Some(0.0));
    }
}
