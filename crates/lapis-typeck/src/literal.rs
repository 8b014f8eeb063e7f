//! Evaluation of number literal tokens: hexadecimal, decimal with an
//! optional radix point, scientific notation, and sub-denomination
//! suffixes. Values are exact rationals; the caller decides whether a
//! non-integer result is acceptable.

use lapis_ast::SubDenomination;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

const LOG2_OF_10: f64 = 3.321_928_094_887_362_4;
const MAX_BITS: u64 = 4096;

/// Whether `mantissa * 10^exp` fits into [`MAX_BITS`] bits.
fn fits_precision_base10(mantissa: &BigInt, exp: u32) -> bool {
    if mantissa.is_zero() {
        return true;
    }
    let most_significant_bit = mantissa.bits() - 1;
    if most_significant_bit > MAX_BITS {
        return false;
    }
    let bits_needed = most_significant_bit as u128 + (f64::from(exp) * LOG2_OF_10).floor() as u128 + 1;
    bits_needed <= MAX_BITS as u128
}

fn pow10(exp: usize) -> BigInt {
    num_traits::pow(BigInt::from(10), exp)
}

/// Parse a decimal string with an optional radix point into an exact
/// rational. Signs, exponents and radix prefixes are handled by the
/// caller; anything but digits around a single `.` is rejected.
fn parse_rational(value: &str) -> Option<BigRational> {
    match value.find('.') {
        Some(radix_point) => {
            let whole = &value[..radix_point];
            let fractional = &value[radix_point + 1..];
            if !whole.bytes().all(|b| b.is_ascii_digit())
                || !fractional.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            let numerator: BigInt = whole.parse().ok()?;
            // The underlying integer parser rejects an empty digit string,
            // so `1.` and an all-zero fractional part are invalid.
            let fractional_digits: BigInt = fractional.trim_start_matches('0').parse().ok()?;
            let fraction = BigRational::new(fractional_digits, pow10(fractional.len()));
            Some(BigRational::from_integer(numerator) + fraction)
        }
        None => {
            let numerator: BigInt = value.parse().ok()?;
            Some(BigRational::from_integer(numerator))
        }
    }
}

fn multiplier(sub: SubDenomination) -> Option<BigInt> {
    match sub {
        SubDenomination::Wei | SubDenomination::Second => None,
        SubDenomination::Gwei => Some(BigInt::from(1_000_000_000u64)),
        SubDenomination::Ether => Some(BigInt::from(1_000_000_000_000_000_000u64)),
        SubDenomination::Minute => Some(BigInt::from(60)),
        SubDenomination::Hour => Some(BigInt::from(3600)),
        SubDenomination::Day => Some(BigInt::from(86400)),
        SubDenomination::Week => Some(BigInt::from(604_800)),
        SubDenomination::Year => Some(BigInt::from(31_536_000)),
    }
}

/// Evaluate a number literal token to its exact rational value.
/// Underscore separators are stripped first. Returns `None` for
/// malformed tokens, a zero mantissa in scientific notation, exponents
/// outside the signed 32-bit window, and values beyond the 4096-bit
/// precision bound.
pub fn rational_value(text: &str, sub: Option<SubDenomination>) -> Option<BigRational> {
    let value_string: String = text.chars().filter(|&c| c != '_').collect();

    let mut value;
    if let Some(hex_digits) = value_string.strip_prefix("0x") {
        value = BigRational::from_integer(BigInt::parse_bytes(hex_digits.as_bytes(), 16)?);
    } else if let Some(exp_point) = value_string.find(['e', 'E']) {
        let mantissa = parse_rational(&value_string[..exp_point])?;
        // 0e... is always zero; reject it as malformed.
        if mantissa.is_zero() {
            return None;
        }
        value = mantissa;

        let exp: BigInt = value_string[exp_point + 1..].parse().ok()?;
        if exp > BigInt::from(i32::MAX) || exp < BigInt::from(i32::MIN) {
            return None;
        }
        let exp_abs = exp.abs().to_u32()?;

        if exp.is_negative() {
            let denominator = value.denom().abs();
            if !fits_precision_base10(&denominator, exp_abs) {
                return None;
            }
            value /= BigRational::from_integer(pow10(exp_abs as usize));
        } else if exp.is_positive() {
            let numerator = value.numer().abs();
            if !fits_precision_base10(&numerator, exp_abs) {
                return None;
            }
            value *= BigRational::from_integer(pow10(exp_abs as usize));
        }
    } else {
        value = parse_rational(&value_string)?;
    }

    if let Some(factor) = sub.and_then(multiplier) {
        value *= BigRational::from_integer(factor);
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    fn int(text: &str) -> BigInt {
        text.parse().unwrap()
    }

    fn value(text: &str) -> Option<BigRational> {
        rational_value(text, None)
    }

    #[test]
    fn plain_decimal() {
        assert_eq!(value("42"), Some(BigRational::from_integer(int("42"))));
    }

    #[test]
    fn underscores_are_stripped() {
        assert_eq!(value("1_000_000"), value("1000000"));
    }

    #[test]
    fn hexadecimal() {
        assert_eq!(value("0xff"), Some(BigRational::from_integer(int("255"))));
    }

    #[test]
    fn radix_point_keeps_exact_fraction() {
        let v = value("1.5").unwrap();
        assert_eq!(v, BigRational::new(int("3"), int("2")));
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(value("2e3"), Some(BigRational::from_integer(int("2000"))));
        let v = value("25e-1").unwrap();
        assert_eq!(v, BigRational::new(int("5"), int("2")));
    }

    #[test]
    fn fractional_scientific_combines() {
        assert_eq!(value("1.5e1"), Some(BigRational::from_integer(int("15"))));
    }

    #[test]
    fn zero_mantissa_with_exponent_is_invalid() {
        assert_eq!(value("0e5"), None);
        assert_eq!(value("0e0"), None);
        assert_eq!(value("0.0e3"), None);
    }

    #[test]
    fn exponent_outside_i32_is_invalid() {
        assert_eq!(value("1e2147483648"), None);
        assert_eq!(value("1e-2147483649"), None);
    }

    #[test]
    fn oversized_mantissa_power_is_invalid() {
        // 10^1300 needs well over 4096 bits.
        assert_eq!(value("1e1300"), None);
        assert!(value("1e1200").is_some());
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        assert_eq!(value(""), None);
        assert_eq!(value("1."), None);
        assert_eq!(value(".5"), None);
        assert_eq!(value("0x"), None);
        assert_eq!(value("1.2.3"), None);
        assert_eq!(value("12a"), None);
    }

    #[test]
    fn ether_multiplies_by_ten_to_the_eighteenth() {
        let v = rational_value("1", Some(SubDenomination::Ether)).unwrap();
        assert_eq!(v, BigRational::from_integer(int("1000000000000000000")));
    }

    #[test]
    fn time_denominations() {
        let week = rational_value("2", Some(SubDenomination::Week)).unwrap();
        assert_eq!(week, BigRational::from_integer(int("1209600")));
        let second = rational_value("7", Some(SubDenomination::Second)).unwrap();
        assert_eq!(second, BigRational::from_integer(int("7")));
    }

    #[test]
    fn gwei_fraction_can_become_integral() {
        let v = rational_value("0.5", Some(SubDenomination::Gwei)).unwrap();
        assert!(v.is_integer());
        assert_eq!(v.to_integer(), int("500000000"));
    }

    #[test]
    fn non_integral_after_denomination_stays_rational() {
        let v = rational_value("1.5", None).unwrap();
        assert!(!v.is_integer());
        assert!(!v.denom().is_one());
    }
}
