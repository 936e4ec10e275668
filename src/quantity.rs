//! Kubernetes resource quantity parsing
//!
//! Quantities arrive as strings (`"4"`, `"3500m"`, `"16Gi"`, `"64Mi"`). The
//! operator needs their numeric value to score CPU models and to validate
//! live-migration bandwidth before handing it to the virtualization engine.
//! Certificate rotation periods use Go duration strings (`"48h0m0s"`) and are
//! parsed here as well.

use crate::Error;

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 8] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
];

/// Parse a quantity string into its approximate numeric value
///
/// Supports binary (`Ki`..`Ei`), decimal (`n`..`P`, `E`) suffixes and
/// decimal exponents (`1e3`).
pub fn parse_quantity(qty: &str) -> Result<f64, Error> {
    let trimmed = qty.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("quantities must match the regular expression"));
    }

    if let Some((suffix, factor)) = BINARY_SUFFIXES
        .iter()
        .find(|(suffix, _)| trimmed.ends_with(suffix))
    {
        return parse_number(&trimmed[..trimmed.len() - suffix.len()], qty).map(|n| n * factor);
    }

    // "E" is an exponent suffix only when it terminates the string
    if let Some(prefix) = trimmed.strip_suffix('E') {
        return parse_number(prefix, qty).map(|n| n * 1e18);
    }

    if let Some((suffix, factor)) = DECIMAL_SUFFIXES
        .iter()
        .find(|(suffix, _)| trimmed.ends_with(suffix))
    {
        return parse_number(&trimmed[..trimmed.len() - suffix.len()], qty).map(|n| n * factor);
    }

    parse_number(trimmed, qty)
}

fn parse_number(number: &str, original: &str) -> Result<f64, Error> {
    let valid_chars = !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e'));
    if !valid_chars {
        return Err(Error::validation(format!(
            "quantities must match the regular expression: invalid quantity '{original}'"
        )));
    }
    number.parse::<f64>().map_err(|_| {
        Error::validation(format!(
            "quantities must match the regular expression: invalid quantity '{original}'"
        ))
    })
}

const DURATION_UNITS: [(&str, f64); 7] = [
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

/// Parse a Go duration string (`"1h30m"`, `"48h0m0s"`, `"1.5s"`)
pub fn parse_duration(value: &str) -> Result<std::time::Duration, Error> {
    let invalid = || Error::validation(format!("time: invalid duration \"{value}\""));

    let mut rest = value.trim();
    if rest == "0" {
        return Ok(std::time::Duration::ZERO);
    }
    if rest.is_empty() || rest.starts_with('-') {
        return Err(invalid());
    }
    rest = rest.strip_prefix('+').unwrap_or(rest);

    let mut seconds = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let factor = DURATION_UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(invalid)?;
        seconds += number * factor;
        rest = &rest[unit_len..];
    }

    Ok(std::time::Duration::from_secs_f64(seconds))
}

/// Render a duration the way Go prints one (`"48h0m0s"`, `"90s"` is `"1m30s"`)
pub fn format_duration(duration: std::time::Duration) -> String {
    let total = duration.as_secs();
    let millis = duration.subsec_millis();
    let seconds = if millis == 0 {
        format!("{}s", total % 60)
    } else {
        let s = format!("{}.{:03}", total % 60, millis);
        format!("{}s", s.trim_end_matches('0'))
    };
    match (total / 3600, (total % 3600) / 60) {
        (0, 0) => seconds,
        (0, m) => format!("{m}m{seconds}"),
        (h, m) => format!("{h}h{m}m{seconds}"),
    }
}
