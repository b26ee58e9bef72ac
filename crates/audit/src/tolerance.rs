//! Shared numeric and identifier helpers: relative deviation, division-safe
//! rates, rounding, identifier normalization, lenient number parsing.

/// Tokens treated as "no value" in tabular cells (compared case-insensitively).
const NA_TOKENS: &[&str] = &["", "na", "n/a", "nan", "none", "null", "non disponible"];

/// `(observed - declared) / declared`.
///
/// `None` when `declared` is absent, zero, or non-finite, or when `observed`
/// is non-finite. A `None` deviation is never flagged.
pub fn relative_deviation(observed: f64, declared: Option<f64>) -> Option<f64> {
    let declared = declared?;
    if declared == 0.0 || !declared.is_finite() || !observed.is_finite() {
        return None;
    }
    let dev = (observed - declared) / declared;
    dev.is_finite().then_some(dev)
}

/// Strict comparison: a deviation exactly equal to the threshold is not flagged.
pub fn exceeds(deviation: f64, threshold: f64) -> bool {
    deviation.abs() > threshold
}

/// `numerator / denominator`, or 0 when the quotient is undefined.
pub fn safe_rate(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    finite_or_zero(numerator / denominator)
}

pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Round half away from zero to `decimals` places. Non-finite input rounds to 0.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // avoid emitting -0.0
    finite_or_zero(rounded) + 0.0
}

/// Deviation expressed in percent, two decimals.
pub fn as_percent(deviation: f64) -> f64 {
    round_to(deviation * 100.0, 2)
}

/// Trimmed identifier, `None` when blank.
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Identifier with its `-P<n>` plantation suffix removed.
pub fn base_id(id: &str) -> &str {
    match id.find("-P") {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// Lenient numeric coercion: trims, accepts a decimal comma, maps NA tokens
/// and anything unparseable or non-finite to `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if NA_TOKENS.iter().any(|na| trimmed.eq_ignore_ascii_case(na)) {
        return None;
    }
    let normalized = trimmed.replace(',', ".").replace(' ', "");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Trimmed text cell, `None` for NA tokens.
pub fn parse_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if NA_TOKENS.iter().any(|na| trimmed.eq_ignore_ascii_case(na)) {
        return None;
    }
    Some(trimmed.to_string())
}
