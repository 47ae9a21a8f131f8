//! CPU quantity parsing.
//!
//! Converts Kubernetes resource quantities (`"0.5"`, `"500m"`, `"2"`, `"1e3m"`)
//! into integer milli-units. Fractional millis round up, so `"0.0001"` is
//! one milli-CPU.

use thiserror::Error;

/// A quantity string that could not be converted to milli-units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityError {
    pub input: String,
    pub reason: &'static str,
}

impl QuantityError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Scale of a suffix relative to one whole unit, as `numerator / denominator`.
fn suffix_scale(input: &str, suffix: &str) -> Result<(i128, i128), QuantityError> {
    let scale = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return decimal_exponent(input, suffix),
    };
    Ok(scale)
}

/// Handles the `e<N>` / `E<N>` exponent form.
fn decimal_exponent(input: &str, suffix: &str) -> Result<(i128, i128), QuantityError> {
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .ok_or_else(|| QuantityError::new(input, "unknown suffix"))?;
    let exponent: i32 = exponent
        .parse()
        .map_err(|_| QuantityError::new(input, "invalid exponent"))?;
    if exponent.abs() > 18 {
        return Err(QuantityError::new(input, "exponent out of range"));
    }
    let power = 10_i128.pow(exponent.unsigned_abs());
    Ok(if exponent >= 0 { (power, 1) } else { (1, power) })
}

/// Parse a quantity into milli-units, rounding up.
pub fn parse_milli(input: &str) -> Result<i64, QuantityError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::new(input, "empty quantity"));
    }

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(QuantityError::new(input, "missing digits"));
    }
    if fraction.contains('.') {
        return Err(QuantityError::new(input, "more than one decimal point"));
    }
    if fraction.len() > 18 {
        return Err(QuantityError::new(input, "too many fractional digits"));
    }

    let digits: i128 = format!("{}{}", whole, fraction)
        .parse()
        .map_err(|_| QuantityError::new(input, "number out of range"))?;
    let (scale_num, scale_den) = suffix_scale(input, suffix)?;

    let numerator = digits
        .checked_mul(1000)
        .and_then(|n| n.checked_mul(scale_num))
        .ok_or_else(|| QuantityError::new(input, "quantity out of range"))?;
    let denominator = 10_i128.pow(fraction.len() as u32) * scale_den;

    // Round up away from zero, like resource.Quantity.MilliValue
    let millis = (numerator + denominator - 1) / denominator;
    let millis = if negative { -millis } else { millis };

    i64::try_from(millis).map_err(|_| QuantityError::new(input, "quantity out of range"))
}
