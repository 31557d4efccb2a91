//! Archive file naming: `record.<YYYYMMDDHHMMSS>.json`.
//!
//! The stamp is the first frame's timestamp in local wall-clock time. It is
//! fixed width, so lexical order of names equals chronological order and range
//! checks can compare the stamp strings directly.

use chrono::{DateTime, Local, Utc};

pub const RECORD_PREFIX: &str = "record.";
pub const RECORD_SUFFIX: &str = ".json";

/// Number of digits in a record stamp
pub const STAMP_LEN: usize = 14;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Format epoch seconds as a 14-digit local-time stamp
pub fn record_stamp(epoch_secs: f64) -> String {
    let secs = epoch_secs.floor() as i64;
    let utc = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
    utc.with_timezone(&Local).format(STAMP_FORMAT).to_string()
}

/// File name for a record whose first frame has `epoch_secs`
///
/// # Examples
///
/// ```
/// use telemetry_archiver::store::naming::{parse_record_stamp, record_file_name};
///
/// let name = record_file_name(1_700_000_000.0);
/// assert!(name.starts_with("record.") && name.ends_with(".json"));
/// assert!(parse_record_stamp(&name).is_some());
/// ```
pub fn record_file_name(epoch_secs: f64) -> String {
    format!("{}{}{}", RECORD_PREFIX, record_stamp(epoch_secs), RECORD_SUFFIX)
}

/// True if `stamp` is exactly 14 ASCII digits
pub fn is_valid_stamp(stamp: &str) -> bool {
    stamp.len() == STAMP_LEN && stamp.bytes().all(|b| b.is_ascii_digit())
}

/// Extract the stamp from a file name matching `record\.([0-9]{14})\.json`
pub fn parse_record_stamp(file_name: &str) -> Option<&str> {
    let stamp = file_name
        .strip_prefix(RECORD_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)?;

    is_valid_stamp(stamp).then_some(stamp)
}

/// True if `stamp` lies in the closed interval `[start, end]`
///
/// All three must be valid stamps; fixed width makes string order numeric order.
pub fn stamp_in_range(stamp: &str, start: &str, end: &str) -> bool {
    start <= stamp && stamp <= end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_name() {
        assert_eq!(parse_record_stamp("record.20240101120000.json"), Some("20240101120000"));
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        for name in [
            "record.2024010112000.json",   // 13 digits
            "record.202401011200000.json", // 15 digits
            "record.2024010112000a.json",
            "record.20240101120000.json.bak",
            "xrecord.20240101120000.json",
            "record.20240101120000.jsonl",
            "notes.txt",
            "",
        ] {
            assert_eq!(parse_record_stamp(name), None, "{} should not match", name);
        }
    }

    #[test]
    fn test_file_name_round_trip() {
        let name = record_file_name(1_700_000_000.75);
        let stamp = parse_record_stamp(&name).expect("generated name must parse");
        assert_eq!(stamp, record_stamp(1_700_000_000.0), "Fractional seconds are truncated");
    }

    #[test]
    fn test_stamp_matches_local_time() {
        let epoch = 1_704_067_200.0;
        let expected = DateTime::<Utc>::from_timestamp(1_704_067_200, 0)
            .unwrap()
            .with_timezone(&Local)
            .format("%Y%m%d%H%M%S")
            .to_string();
        assert_eq!(record_stamp(epoch), expected);
    }

    #[test]
    fn test_stamp_in_range_is_inclusive() {
        let start = "20240101120000";
        let end = "20240102120000";
        assert!(stamp_in_range("20240101120000", start, end));
        assert!(stamp_in_range("20240102000000", start, end));
        assert!(stamp_in_range("20240102120000", start, end));
        assert!(!stamp_in_range("20240101115959", start, end));
        assert!(!stamp_in_range("20240102120001", start, end));
    }

    #[test]
    fn test_is_valid_stamp() {
        assert!(is_valid_stamp("20240101000000"));
        assert!(!is_valid_stamp("2024-01-01 00:00"));
        assert!(!is_valid_stamp("１２３４５６７８９０１２３４"));
    }
}
