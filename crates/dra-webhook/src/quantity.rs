//! Integer values of Kubernetes resource quantities.
//!
//! A quantity is `<signed decimal><suffix>` where the suffix is a binary SI
//! suffix (`Ki` .. `Ei`), a decimal SI suffix (`n` .. `E`) or a decimal
//! exponent (`e3`, `E-2`). The integer value of a quantity is rounded up, so
//! `500m` has value 1.

use core::error::Error;

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

#[derive(Debug, derive_more::Display)]
pub enum QuantityError {
    #[display("Invalid quantity format: {value:?}")]
    Format { value: String },
    #[display("Quantity {value:?} does not fit in a 64-bit integer")]
    Overflow { value: String },
}

impl Error for QuantityError {}

/// Returns the integer value of `quantity`, rounded up.
///
/// # Errors
///
/// - [`QuantityError::Format`] if the quantity is not well formed
/// - [`QuantityError::Overflow`] if the value exceeds the `i64` range
pub fn integer_value(quantity: &Quantity) -> Result<i64, Report<QuantityError>> {
    parse_integer_value(&quantity.0)
}

fn parse_integer_value(raw: &str) -> Result<i64, Report<QuantityError>> {
    let format_error = || {
        Report::new(QuantityError::Format {
            value: raw.to_string(),
        })
    };
    let overflow_error = || {
        Report::new(QuantityError::Overflow {
            value: raw.to_string(),
        })
    };

    let value = raw.trim();
    let (negative, unsigned) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(format_error());
    }

    let digits = format!("{whole}{fraction}");
    let mantissa: u128 = digits.parse().map_err(|_| overflow_error())?;
    let (binary_multiplier, decimal_exponent) = parse_suffix(suffix).ok_or_else(format_error)?;

    let scaled = mantissa
        .checked_mul(binary_multiplier)
        .ok_or_else(overflow_error)?;
    let exponent = i32::try_from(fraction.len())
        .ok()
        .and_then(|scale| decimal_exponent.checked_sub(scale))
        .ok_or_else(overflow_error)?;

    let magnitude = if exponent >= 0 {
        10u128
            .checked_pow(exponent.unsigned_abs())
            .and_then(|factor| scaled.checked_mul(factor))
            .ok_or_else(overflow_error)?
    } else {
        match 10u128.checked_pow(exponent.unsigned_abs()) {
            Some(divisor) => scaled.div_ceil(divisor),
            // the divisor exceeds any representable mantissa
            None => u128::from(scaled > 0),
        }
    };

    let magnitude = i64::try_from(magnitude).map_err(|_| overflow_error())?;
    if negative {
        Ok(-magnitude)
    } else {
        Ok(magnitude)
    }
}

/// Returns the binary multiplier and the decimal exponent of a suffix.
fn parse_suffix(suffix: &str) -> Option<(u128, i32)> {
    let binary = |power: u32| Some((1u128 << (10 * power), 0));
    let decimal = |exponent: i32| Some((1, exponent));

    match suffix {
        "" => decimal(0),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            exponent.parse::<i32>().ok().and_then(decimal)
        }
    }
}
