//! Capture-time extraction from embedded EXIF metadata
//!
//! Burst grouping needs the moment the shutter fired, not the moment a file
//! reached us. This reads `DateTimeOriginal` (refined by `SubSecTimeOriginal`
//! when the camera wrote it) straight from JPEG or TIFF bytes.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use rexif::{ExifTag, TagValue};
use tracing::debug;

/// `SubSecTimeOriginal`; rexif reports it as an unnamed tag.
const SUBSEC_TIME_ORIGINAL: u16 = 0x9291;

/// Read the original capture time from image bytes.
///
/// EXIF timestamps carry no zone; they are taken as UTC so that frames from
/// the same camera compare consistently. Returns `None` when the bytes hold
/// no EXIF block or the timestamp is unusable.
pub fn capture_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let (result, warnings) = rexif::parse_buffer_quiet(bytes);
    for warning in &warnings {
        debug!(%warning, "EXIF parse warning");
    }

    let exif = match result {
        Ok(exif) => exif,
        Err(e) => {
            debug!(error = %e, "no usable EXIF block");
            return None;
        }
    };

    let mut date_time_original = None;
    let mut subsec_time_original = None;

    for entry in &exif.entries {
        let TagValue::Ascii(ref value) = entry.value else {
            continue;
        };
        if entry.tag == ExifTag::DateTimeOriginal {
            date_time_original = Some(value.clone());
        } else if entry.ifd.tag == SUBSEC_TIME_ORIGINAL {
            subsec_time_original = Some(value.clone());
        }
    }

    parse_capture_time(date_time_original.as_deref(), subsec_time_original.as_deref())
}

/// Parse capture time with subsecond precision
fn parse_capture_time(date_time_original: Option<&str>, subsec_time_original: Option<&str>) -> Option<DateTime<Utc>> {
    let date_str = date_time_original?.trim();
    let naive_dt = NaiveDateTime::parse_from_str(date_str, "%Y:%m:%d %H:%M:%S").ok()?;

    let naive_dt = subsec_time_original
        .and_then(subsec_nanos)
        .and_then(|nanos| naive_dt.with_nanosecond(nanos))
        .unwrap_or(naive_dt);

    Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc))
}

/// "5" -> 500ms, "50" -> 500ms, "123" -> 123ms. At most nanosecond precision.
fn subsec_nanos(subsec: &str) -> Option<u32> {
    let digits: String = subsec.trim().chars().take(9).collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    Some(value * 10u32.pow(9 - digits.len() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::jpeg_with_exif;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_parse_capture_time() {
        let dt = parse_capture_time(Some("2024:01:15 14:30:25"), Some("50"));
        assert!(dt.is_some());
        let dt = dt.unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 25);
        assert_eq!(dt.nanosecond(), 500_000_000); // .50 seconds
    }

    #[test]
    fn test_parse_capture_time_rejects_placeholders() {
        assert_eq!(parse_capture_time(None, Some("50")), None);
        assert_eq!(parse_capture_time(Some("0000:00:00 00:00:00"), None), None);
        assert_eq!(parse_capture_time(Some("    :  :     :  :  "), None), None);
    }

    #[test]
    fn test_subsec_parsing() {
        assert_eq!(subsec_nanos("5"), Some(500_000_000));
        assert_eq!(subsec_nanos("123"), Some(123_000_000));
        assert_eq!(subsec_nanos("1234567891234"), Some(123_456_789));
        assert_eq!(subsec_nanos(""), None);
        assert_eq!(subsec_nanos("ab"), None);
    }

    #[test]
    fn test_capture_time_from_jpeg() {
        let bytes = jpeg_with_exif("2023:07:04 09:15:42", Some("25"));
        let expected = Utc.with_ymd_and_hms(2023, 7, 4, 9, 15, 42).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(capture_time(&bytes), Some(expected));
    }

    #[test]
    fn test_capture_time_without_subseconds() {
        let bytes = jpeg_with_exif("2023:07:04 09:15:42", None);
        assert_eq!(
            capture_time(&bytes),
            Some(Utc.with_ymd_and_hms(2023, 7, 4, 9, 15, 42).unwrap())
        );
    }

    #[test]
    fn test_capture_time_missing() {
        assert_eq!(capture_time(&[]), None);
        assert_eq!(capture_time(b"\x89PNG\r\n\x1a\n not really a png"), None);
    }
}
