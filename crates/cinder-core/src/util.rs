use anyhow::{bail, Result};
use chrono::DateTime;
use serde_json::Value;

/// Round to the nearest integer, ties away from zero (not bankers rounding).
pub fn round_half_up(n: f64) -> i64 {
    if n >= 0.0 {
        (n + 0.5).floor() as i64
    } else {
        -((-n + 0.5).floor() as i64)
    }
}

/// Human-readable difference between two timezone-aware ISO-8601 dates.
///
/// Produces `-?Ns`, `Nm Ss`, or `Nh Mm` with half-up rounding of the
/// smallest unit and carry at the 60 boundary. Both inputs must carry an
/// offset.
pub fn format_isodate_difference(iso1: &str, iso2: &str) -> Result<String> {
    let d1 = parse_aware(iso1)?;
    let d2 = parse_aware(iso2)?;

    let (sign, lo, hi) = if d1 > d2 { ("-", d2, d1) } else { ("", d1, d2) };
    let diff_seconds = (hi - lo).num_milliseconds() as f64 / 1000.0;

    if diff_seconds < 60.0 {
        return Ok(format!("{sign}{}s", round_half_up(diff_seconds)));
    }

    if diff_seconds < 3600.0 {
        let mut minutes = (diff_seconds / 60.0).floor() as i64;
        let mut seconds = round_half_up(diff_seconds % 60.0);
        if seconds == 60 {
            minutes += 1;
            seconds = 0;
        }
        return Ok(format!("{sign}{minutes}m {seconds}s"));
    }

    let mut hours = (diff_seconds / 3600.0).floor() as i64;
    let remaining_seconds = diff_seconds % 3600.0;
    let mut minutes = round_half_up(remaining_seconds / 60.0);
    if minutes == 60 {
        hours += 1;
        minutes = 0;
    }
    Ok(format!("{sign}{hours}h {minutes}m"))
}

fn parse_aware(raw: &str) -> Result<DateTime<chrono::FixedOffset>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt),
        Err(_) => bail!("'{raw}' is not a timezone-aware ISO-8601 timestamp"),
    }
}

/// Coerce an operator-entered string into a JSON value for dispatch.
///
/// JSON wins when the text parses; otherwise `true`/`false`/`none`
/// (case-insensitive) map to bool/null, digit-only text (one optional
/// leading `-`, at most one `.`) parses as a number, and anything else
/// stays a string.
pub fn coerce_value(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    match raw.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "none" => return Value::Null,
        _ => {}
    }
    let cleaned = raw.trim().trim_start_matches('-').replacen('.', "", 1);
    if !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = raw.trim().parse::<i64>() {
            return Value::from(n);
        }
        if let Ok(f) = raw.trim().parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}
