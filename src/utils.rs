//! Utility functions for time arithmetic, formatting and sysfs access.

use std::fs;
use std::path::Path;

use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::SensorError;

/// Format a timestamp the way telemetry envelopes carry it
///
/// Converts an OffsetDateTime to YYYY-MM-DD_HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_rtc(dt: &OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]_[hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Milliseconds elapsed between two readings of the loop clock
///
/// Uses wrapping arithmetic so a clock that wraps still yields the
/// correct difference.
pub fn elapsed_ms(now_ms: u64, since_ms: u64) -> u64 {
    now_ms.wrapping_sub(since_ms)
}

/// Read a single numeric attribute from a sysfs file
///
/// # Arguments
/// * `path` - Attribute file, e.g. `in_temp_input`
///
/// # Returns
/// The trimmed file content as `f64`
pub fn read_sysfs_number(path: &Path) -> Result<f64, SensorError> {
    let raw = fs::read_to_string(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = raw.trim();
    value.parse::<f64>().map_err(|_| SensorError::Parse {
        path: path.to_path_buf(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rtc_format_is_zero_padded() {
        let dt = datetime!(2024-03-07 04:05:06 +9);
        assert_eq!(format_rtc(&dt), "2024-03-07_04:05:06");
    }

    #[test]
    fn elapsed_survives_wraparound() {
        assert_eq!(elapsed_ms(1_500, 1_000), 500);
        assert_eq!(elapsed_ms(99, u64::MAX - 100), 200);
    }

    #[test]
    fn sysfs_numbers_are_trimmed() {
        let dir = std::env::temp_dir().join(format!("envnode-utils-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("voltage_now");
        fs::write(&file, "4123000\n").unwrap();
        assert_eq!(read_sysfs_number(&file).unwrap(), 4_123_000.0);

        fs::write(&file, "n/a\n").unwrap();
        assert!(matches!(read_sysfs_number(&file), Err(SensorError::Parse { .. })));
        assert!(matches!(
            read_sysfs_number(&dir.join("missing")),
            Err(SensorError::Io { .. })
        ));
        fs::remove_dir_all(&dir).ok();
    }
}
