//! Normalizers and validators shared by resource schemas.
//!
//! A normalizer maps every accepted spelling of a value onto one canonical
//! form. Remote and desired values are both passed through it before
//! comparison, so `"5m"` configured locally and `300` reported by the API
//! do not show up as drift.

use super::FieldValue;

/// Maps a candidate value onto its canonical representation.
pub type Normalizer = fn(FieldValue) -> FieldValue;

/// Checks a desired value, returning a human readable reason on failure.
pub type Validator = fn(&FieldValue) -> Result<(), String>;

/// Converts duration strings (`"300"`, `"300s"`, `"5m"`, `"1h30m"`, `"2d"`)
/// into whole seconds. Values that do not parse are left untouched so the
/// type check reports them.
pub fn duration_seconds(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(s) => match parse_duration(&s) {
            Some(secs) => FieldValue::Int(secs),
            None => FieldValue::String(s),
        },
        other => other,
    }
}

/// Parses a Vault style duration into whole seconds.
///
/// Bare integers are seconds. Anything else goes through `humantime`, so
/// `"1h30m"`, `"1h 30m"` and `"2000ms"` are accepted. Vault stores whole
/// seconds: results with a sub-second remainder (`"1500ms"`, `"1.5s"`) are
/// rejected, as are negatives.
pub fn parse_duration(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<i64>() {
        return (secs >= 0).then_some(secs);
    }
    let duration = humantime::parse_duration(input).ok()?;
    if duration.subsec_nanos() != 0 {
        return None;
    }
    i64::try_from(duration.as_secs()).ok()
}

/// Lower-cases enum-like string values.
pub fn case_fold(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(s) => FieldValue::String(s.to_lowercase()),
        other => other,
    }
}

/// Strips leading and trailing slashes from path-like values.
pub fn trim_slashes(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(s) => FieldValue::String(s.trim_matches('/').to_string()),
        other => other,
    }
}

/// Treats a list as a set: sorted and deduplicated.
pub fn unordered(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::StringList(mut list) => {
            list.sort();
            list.dedup();
            FieldValue::StringList(list)
        }
        other => other,
    }
}

pub fn non_empty(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::String(s) if s.is_empty() => Err("must not be empty".to_string()),
        _ => Ok(()),
    }
}

pub fn non_negative(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Int(i) if *i < 0 => Err(format!("must be zero or greater, got: {}", i)),
        _ => Ok(()),
    }
}
