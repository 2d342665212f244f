//! Tick and lot-step arithmetic.

use rust_decimal::Decimal;

/// Truncates `value` toward zero to a whole multiple of `step`.
///
/// A non-positive step leaves the value untouched.
#[must_use]
pub fn truncate_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).trunc() * step).normalize()
}

/// Renders a decimal without trailing zeros, the format the exchange expects.
#[must_use]
pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}
