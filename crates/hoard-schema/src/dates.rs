//! RFC3339 timestamps with nanosecond precision.
//!
//! Claim dates and unix mtime/ctime fields use RFC3339 with optional
//! fractional seconds, trailing zeros trimmed. [`rfc3339_from_nanos`] and
//! [`nanos_from_rfc3339`] round-trip exactly for every value the formatter
//! produces; replay order of claims depends on it.

use chrono::{DateTime, Utc};

use crate::SchemaError;

/// Format epoch nanoseconds as RFC3339 UTC.
///
/// Whole seconds render without a fractional part; otherwise the fraction
/// is emitted with trailing zeros trimmed.
pub fn rfc3339_from_nanos(epoch_nanos: i64) -> String {
    let secs = epoch_nanos.div_euclid(1_000_000_000);
    let nanos = epoch_nanos.rem_euclid(1_000_000_000);
    let t = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
    let time_str = t.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    if nanos == 0 {
        return time_str;
    }
    let nano_str = format!("{nanos:09}");
    let nano_str = nano_str.trim_end_matches('0');
    format!("{}.{nano_str}Z", &time_str[..time_str.len() - 1])
}

/// Parse an RFC3339 UTC timestamp back to epoch nanoseconds.
pub fn nanos_from_rfc3339(timestr: &str) -> Result<i64, SchemaError> {
    let bad = || SchemaError::BadDate(timestr.to_owned());

    let (simple, nano_str) = match timestr.find('.') {
        Some(dot) => {
            if !timestr.ends_with('Z') {
                return Err(bad());
            }
            let mut frac = timestr[dot + 1..timestr.len() - 1].to_owned();
            if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            while frac.len() < 9 {
                frac.push('0');
            }
            (format!("{}Z", &timestr[..dot]), frac)
        }
        None => (timestr.to_owned(), String::new()),
    };

    let t = DateTime::parse_from_rfc3339(&simple).map_err(|_| bad())?;
    let nanos: i64 = if nano_str.is_empty() {
        0
    } else {
        nano_str.parse().map_err(|_| bad())?
    };
    Ok(t.timestamp() * 1_000_000_000 + nanos)
}

/// Current time as epoch nanoseconds.
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
