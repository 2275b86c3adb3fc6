//! Minimal EDF/EDF+ codec for multi-channel polysomnography signals.
//!
//! Decoding yields calibrated physical samples per channel together with the
//! recording start and total duration. Embedded `EDF Annotations` channels are
//! skipped. Encoding writes one-second data records and exists mostly to build
//! fixtures for the filesystem transport.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::constants::edf::{
    ANNOTATIONS_LABEL, CENTURY_PIVOT, FIXED_HEADER_BYTES, SIGNAL_HEADER_BYTES,
};
use crate::errors::IngestError;
use crate::features::{ChannelSignal, SignalData};

/// Calibration and layout of one signal inside a data record.
#[derive(Clone, Debug, PartialEq)]
pub struct EdfSignalHeader {
    /// Channel label, trimmed.
    pub label: String,
    /// Physical value mapped to `digital_min`.
    pub physical_min: f64,
    /// Physical value mapped to `digital_max`.
    pub physical_max: f64,
    /// Lowest stored digital value.
    pub digital_min: f64,
    /// Highest stored digital value.
    pub digital_max: f64,
    /// Samples stored per data record.
    pub samples_per_record: usize,
}

impl EdfSignalHeader {
    fn is_annotation(&self) -> bool {
        self.label == ANNOTATIONS_LABEL
    }

    fn gain(&self) -> f64 {
        let digital_span = self.digital_max - self.digital_min;
        if digital_span == 0.0 {
            1.0
        } else {
            (self.physical_max - self.physical_min) / digital_span
        }
    }

    fn to_physical(&self, digital: i16) -> f64 {
        (f64::from(digital) - self.digital_min) * self.gain() + self.physical_min
    }
}

/// Parsed fixed header plus per-signal headers.
#[derive(Clone, Debug, PartialEq)]
pub struct EdfHeader {
    /// Recording start moment.
    pub start: DateTime<Utc>,
    /// Size of the fixed plus per-signal header.
    pub header_bytes: usize,
    /// Number of data records; `None` when the file declares `-1`.
    pub data_records: Option<usize>,
    /// Duration of one data record in seconds.
    pub record_seconds: f64,
    /// Per-signal headers in file order.
    pub signals: Vec<EdfSignalHeader>,
}

impl EdfHeader {
    /// Bytes per data record, or `None` when the header sizes overflow.
    fn record_bytes(&self) -> Option<usize> {
        self.signals.iter().try_fold(0usize, |total, signal| {
            total.checked_add(signal.samples_per_record.checked_mul(2)?)
        })
    }
}

/// Read and decode an EDF file from disk.
pub fn read_path(path: &Path) -> Result<SignalData, IngestError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Decode an in-memory EDF file.
pub fn decode(bytes: &[u8]) -> Result<SignalData, IngestError> {
    let header = parse_header(bytes)?;
    let record_bytes = header
        .record_bytes()
        .ok_or_else(|| decode_error("data record size overflows"))?;
    let body = bytes
        .get(header.header_bytes..)
        .ok_or_else(|| decode_error("file shorter than header"))?;

    let records = match header.data_records {
        Some(count) => count,
        None if record_bytes == 0 => 0,
        None => body.len() / record_bytes,
    };
    let body_bytes = records
        .checked_mul(record_bytes)
        .ok_or_else(|| decode_error(format!("{records} data records overflow the body size")))?;
    if body.len() < body_bytes {
        return Err(decode_error(format!(
            "expected {records} data records of {record_bytes} bytes, found {} bytes",
            body.len()
        )));
    }

    let mut samples = header
        .signals
        .iter()
        .map(|signal| {
            signal
                .samples_per_record
                .checked_mul(records)
                .map(Vec::with_capacity)
                .ok_or_else(|| decode_error(format!("signal '{}' overflows", signal.label)))
        })
        .collect::<Result<Vec<Vec<f64>>, _>>()?;
    for record in body.chunks_exact(record_bytes.max(1)).take(records) {
        let mut cursor = 0;
        for (signal, out) in header.signals.iter().zip(samples.iter_mut()) {
            let width = signal.samples_per_record * 2;
            if !signal.is_annotation() {
                out.extend(
                    record[cursor..cursor + width]
                        .chunks_exact(2)
                        .map(|pair| signal.to_physical(i16::from_le_bytes([pair[0], pair[1]]))),
                );
            }
            cursor += width;
        }
    }

    let channels = header
        .signals
        .iter()
        .zip(samples)
        .filter(|(signal, _)| !signal.is_annotation())
        .map(|(signal, samples)| {
            let sampling_rate = signal.samples_per_record as f64 / header.record_seconds;
            (
                signal.label.clone(),
                ChannelSignal {
                    samples,
                    sampling_rate,
                },
            )
        })
        .collect::<IndexMap<_, _>>();

    Ok(SignalData {
        start: header.start,
        duration_seconds: records as f64 * header.record_seconds,
        channels,
    })
}

/// Parse the fixed and per-signal headers.
pub fn parse_header(bytes: &[u8]) -> Result<EdfHeader, IngestError> {
    if bytes.len() < FIXED_HEADER_BYTES {
        return Err(decode_error("file shorter than the fixed header"));
    }
    let start = parse_start(field(bytes, 168..176)?, field(bytes, 176..184)?)?;
    let header_bytes: usize = parse_number(field(bytes, 184..192)?, "header size")?;
    let declared_records: i64 = parse_number(field(bytes, 236..244)?, "data record count")?;
    let record_seconds: f64 = parse_number(field(bytes, 244..252)?, "data record duration")?;
    let signal_count: usize = parse_number(field(bytes, 252..256)?, "signal count")?;

    if record_seconds <= 0.0 {
        return Err(decode_error("data record duration must be positive"));
    }
    if header_bytes != FIXED_HEADER_BYTES + signal_count * SIGNAL_HEADER_BYTES
        || bytes.len() < header_bytes
    {
        return Err(decode_error("header size does not match signal count"));
    }

    let block = &bytes[FIXED_HEADER_BYTES..header_bytes];
    let column = |offset: usize, width: usize, idx: usize| {
        signal_field(block, signal_count, offset, width, idx)
    };

    let mut signals = Vec::with_capacity(signal_count);
    for idx in 0..signal_count {
        signals.push(EdfSignalHeader {
            label: column(0, 16, idx)?.to_string(),
            physical_min: parse_number(column(104, 8, idx)?, "physical minimum")?,
            physical_max: parse_number(column(112, 8, idx)?, "physical maximum")?,
            digital_min: parse_number(column(120, 8, idx)?, "digital minimum")?,
            digital_max: parse_number(column(128, 8, idx)?, "digital maximum")?,
            samples_per_record: parse_number(column(216, 8, idx)?, "samples per record")?,
        });
    }

    Ok(EdfHeader {
        start,
        header_bytes,
        data_records: usize::try_from(declared_records).ok(),
        record_seconds,
        signals,
    })
}

/// Encode `signal` as EDF with one-second data records.
///
/// Every channel's sampling rate must be a positive whole number. Short
/// channels are zero-padded to the last record.
pub fn encode(signal: &SignalData) -> Result<Vec<u8>, IngestError> {
    let mut headers = Vec::with_capacity(signal.channels.len());
    for (name, channel) in &signal.channels {
        let rate = channel.sampling_rate;
        if rate <= 0.0 || rate.fract() != 0.0 {
            return Err(decode_error(format!(
                "channel '{name}' rate {rate} is not a whole number of samples per second"
            )));
        }
        let (low, high) = channel
            .samples
            .iter()
            .fold((0.0f64, 0.0f64), |(low, high), v| (low.min(*v), high.max(*v)));
        let (physical_min, mut physical_max) = (low.floor(), high.ceil());
        if physical_max <= physical_min {
            physical_max = physical_min + 1.0;
        }
        headers.push(EdfSignalHeader {
            label: name.clone(),
            physical_min,
            physical_max,
            digital_min: f64::from(i16::MIN),
            digital_max: f64::from(i16::MAX),
            samples_per_record: rate as usize,
        });
    }

    let records = signal
        .channels
        .values()
        .zip(&headers)
        .map(|(channel, header)| channel.samples.len().div_ceil(header.samples_per_record))
        .max()
        .unwrap_or(0);
    let header_bytes = FIXED_HEADER_BYTES + headers.len() * SIGNAL_HEADER_BYTES;

    let mut out = Vec::with_capacity(header_bytes);
    push_field(&mut out, "0", 8);
    push_field(&mut out, "X X X X", 80);
    push_field(&mut out, "Startdate X X X X", 80);
    push_field(&mut out, &signal.start.format("%d.%m.%y").to_string(), 8);
    push_field(&mut out, &signal.start.format("%H.%M.%S").to_string(), 8);
    push_field(&mut out, &header_bytes.to_string(), 8);
    push_field(&mut out, "", 44);
    push_field(&mut out, &records.to_string(), 8);
    push_field(&mut out, "1", 8);
    push_field(&mut out, &headers.len().to_string(), 4);

    let columns: [(usize, fn(&EdfSignalHeader) -> String); 10] = [
        (16, |h| h.label.clone()),
        (80, |_| String::new()),
        (8, |_| "uV".to_string()),
        (8, |h| h.physical_min.to_string()),
        (8, |h| h.physical_max.to_string()),
        (8, |h| h.digital_min.to_string()),
        (8, |h| h.digital_max.to_string()),
        (80, |_| String::new()),
        (8, |h| h.samples_per_record.to_string()),
        (32, |_| String::new()),
    ];
    for (width, render) in columns {
        for header in &headers {
            push_field(&mut out, &render(header), width);
        }
    }

    for record in 0..records {
        for (channel, header) in signal.channels.values().zip(&headers) {
            let begin = record * header.samples_per_record;
            for idx in begin..begin + header.samples_per_record {
                let physical = channel.samples.get(idx).copied().unwrap_or(0.0);
                let digital = ((physical - header.physical_min) / header.gain() + header.digital_min)
                    .round()
                    .clamp(header.digital_min, header.digital_max) as i16;
                out.extend_from_slice(&digital.to_le_bytes());
            }
        }
    }
    Ok(out)
}

fn push_field(out: &mut Vec<u8>, value: &str, width: usize) {
    let mut bytes = value.as_bytes().to_vec();
    bytes.truncate(width);
    bytes.resize(width, b' ');
    out.extend_from_slice(&bytes);
}

fn field(bytes: &[u8], range: Range<usize>) -> Result<&str, IngestError> {
    let raw = bytes
        .get(range.clone())
        .ok_or_else(|| decode_error(format!("header field {range:?} out of bounds")))?;
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|err| decode_error(format!("header field {range:?} is not ASCII: {err}")))
}

/// Signal header fields are stored column-wise: all labels, then all
/// transducers, and so on.
fn signal_field(
    block: &[u8],
    signal_count: usize,
    offset: usize,
    width: usize,
    idx: usize,
) -> Result<&str, IngestError> {
    let begin = offset * signal_count + idx * width;
    field(block, begin..begin + width)
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, IngestError> {
    raw.parse::<T>()
        .map_err(|_| decode_error(format!("invalid {what} '{raw}'")))
}

fn parse_start(date: &str, time: &str) -> Result<DateTime<Utc>, IngestError> {
    let parts = |raw: &str| -> Result<[u32; 3], IngestError> {
        let values: Vec<u32> = raw
            .split('.')
            .map(|part| parse_number(part, "start date/time component"))
            .collect::<Result<_, _>>()?;
        <[u32; 3]>::try_from(values)
            .map_err(|_| decode_error(format!("malformed start field '{raw}'")))
    };
    let [day, month, yy] = parts(date)?;
    let [hour, minute, second] = parts(time)?;
    let year = if yy >= CENTURY_PIVOT { 1900 + yy } else { 2000 + yy };
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| decode_error(format!("invalid start date '{date}'")))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| decode_error(format!("invalid start time '{time}'")))?;
    Ok(date.and_time(time).and_utc())
}

fn decode_error(reason: impl Into<String>) -> IngestError {
    IngestError::Decode {
        what: "edf".into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture() -> SignalData {
        let mut channels = IndexMap::new();
        channels.insert(
            "C3-M2".to_string(),
            ChannelSignal {
                samples: (0..400).map(|i| (i as f64 / 10.0).sin() * 50.0).collect(),
                sampling_rate: 200.0,
            },
        );
        channels.insert(
            "HR".to_string(),
            ChannelSignal {
                samples: vec![60.0, 61.0, 62.0],
                sampling_rate: 1.0,
            },
        );
        SignalData {
            start: Utc.with_ymd_and_hms(2021, 11, 2, 22, 14, 5).unwrap(),
            duration_seconds: 3.0,
            channels,
        }
    }

    #[test]
    fn decode_restores_layout_and_calibration() {
        let original = fixture();
        let decoded = decode(&encode(&original).unwrap()).unwrap();

        assert_eq!(decoded.start, original.start);
        assert_eq!(decoded.duration_seconds, 3.0);
        assert_eq!(
            decoded.channels.keys().collect::<Vec<_>>(),
            vec!["C3-M2", "HR"]
        );
        let eeg = &decoded.channels["C3-M2"];
        assert_eq!(eeg.sampling_rate, 200.0);
        assert_eq!(eeg.samples.len(), 600, "padded to the last record");
        for (got, want) in eeg.samples.iter().zip(&original.channels["C3-M2"].samples) {
            assert!((got - want).abs() < 0.01);
        }
        let hr = &decoded.channels["HR"];
        assert_eq!(hr.sampling_rate, 1.0);
        assert!((hr.samples[2] - 62.0).abs() < 0.01);
    }

    #[test]
    fn annotation_channels_are_skipped() {
        let mut signal = fixture();
        signal.channels.insert(
            ANNOTATIONS_LABEL.to_string(),
            ChannelSignal {
                samples: vec![0.0; 3],
                sampling_rate: 1.0,
            },
        );
        let decoded = decode(&encode(&signal).unwrap()).unwrap();
        assert!(!decoded.channels.contains_key(ANNOTATIONS_LABEL));
        assert_eq!(decoded.channels.len(), 2);
    }

    #[test]
    fn unknown_record_count_is_inferred_from_length() {
        let mut bytes = encode(&fixture()).unwrap();
        bytes[236..244].copy_from_slice(b"-1      ");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.duration_seconds, 3.0);
    }

    #[test]
    fn truncated_body_is_rejected() {
        let bytes = encode(&fixture()).unwrap();
        let err = decode(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
        assert!(decode(&bytes[..100]).is_err());
    }

    #[test]
    fn oversized_header_counts_are_rejected() {
        let mut channels = IndexMap::new();
        for idx in 0..1000 {
            channels.insert(
                format!("ch{idx}"),
                ChannelSignal {
                    samples: vec![0.0],
                    sampling_rate: 1.0,
                },
            );
        }
        let signal = SignalData {
            start: Utc.with_ymd_and_hms(2021, 11, 2, 22, 14, 5).unwrap(),
            duration_seconds: 1.0,
            channels,
        };
        let mut bytes = encode(&signal).unwrap();
        bytes[236..244].copy_from_slice(b"99999999");
        for idx in 0..1000 {
            let at = FIXED_HEADER_BYTES + 216 * 1000 + idx * 8;
            bytes[at..at + 8].copy_from_slice(b"99999999");
        }

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
    }

    #[test]
    fn two_digit_years_pivot_on_1985() {
        assert_eq!(
            parse_start("01.02.84", "00.00.00").unwrap(),
            Utc.with_ymd_and_hms(2084, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_start("01.02.85", "23.59.59").unwrap(),
            Utc.with_ymd_and_hms(1985, 2, 1, 23, 59, 59).unwrap()
        );
        assert!(parse_start("31.02.20", "00.00.00").is_err());
    }

    #[test]
    fn fractional_rates_cannot_be_encoded() {
        let mut signal = fixture();
        signal.channels["HR"].sampling_rate = 0.5;
        assert!(encode(&signal).is_err());
    }
}
