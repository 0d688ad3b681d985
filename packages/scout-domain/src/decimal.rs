//! Exact decimal values as served by subgraph `BigDecimal` fields.
//!
//! Values are kept as normalized digit strings so comparisons never go through floating
//! point. `"5"`, `"5.0"` and `"0.5e1"` are the same value.

use std::{
	cmp::Ordering,
	fmt::{Display, Formatter},
	str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MAX_EXPONENT: i64 = 512;

#[derive(Clone, Debug)]
pub struct DecimalError {
	input: String,
}
impl Display for DecimalError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "'{}' is not a decimal number.", self.input)
	}
}

impl std::error::Error for DecimalError {}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
	negative: bool,
	// No leading zeros; empty for values below one.
	integer: String,
	// No trailing zeros; empty for whole numbers.
	fraction: String,
}
impl Decimal {
	pub fn zero() -> Self {
		Self { negative: false, integer: String::new(), fraction: String::new() }
	}

	pub fn is_zero(&self) -> bool {
		self.integer.is_empty() && self.fraction.is_empty()
	}

	fn from_parts(negative: bool, digits: &str, scale: i64) -> Self {
		let (integer, fraction) = if scale <= 0 {
			let mut integer = digits.to_string();

			integer.extend(std::iter::repeat_n('0', scale.unsigned_abs() as usize));

			(integer, String::new())
		} else if scale as usize >= digits.len() {
			let mut fraction = "0".repeat(scale as usize - digits.len());

			fraction.push_str(digits);

			(String::new(), fraction)
		} else {
			let split = digits.len() - scale as usize;

			(digits[..split].to_string(), digits[split..].to_string())
		};
		let integer = integer.trim_start_matches('0').to_string();
		let fraction = fraction.trim_end_matches('0').to_string();
		let zero = integer.is_empty() && fraction.is_empty();

		Self { negative: negative && !zero, integer, fraction }
	}

	fn cmp_magnitude(&self, other: &Self) -> Ordering {
		self.integer
			.len()
			.cmp(&other.integer.len())
			.then_with(|| self.integer.cmp(&other.integer))
			.then_with(|| self.fraction.cmp(&other.fraction))
	}
}

impl Default for Decimal {
	fn default() -> Self {
		Self::zero()
	}
}

impl FromStr for Decimal {
	type Err = DecimalError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let err = || DecimalError { input: raw.to_string() };
		let trimmed = raw.trim();
		let (negative, unsigned) = match trimmed.as_bytes().first() {
			Some(b'-') => (true, &trimmed[1..]),
			Some(b'+') => (false, &trimmed[1..]),
			_ => (false, trimmed),
		};
		let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
			Some(index) => {
				let exponent: i64 = unsigned[index + 1..].parse().map_err(|_| err())?;

				if exponent.abs() > MAX_EXPONENT {
					return Err(err());
				}

				(&unsigned[..index], exponent)
			},
			None => (unsigned, 0),
		};
		let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

		if integer.is_empty() && fraction.is_empty() {
			return Err(err());
		}
		if !integer.bytes().chain(fraction.bytes()).all(|byte| byte.is_ascii_digit()) {
			return Err(err());
		}

		let digits = format!("{integer}{fraction}");
		let scale = fraction.len() as i64 - exponent;

		Ok(Self::from_parts(negative, &digits, scale))
	}
}

impl From<u64> for Decimal {
	fn from(value: u64) -> Self {
		Self::from_parts(false, &value.to_string(), 0)
	}
}

impl Ord for Decimal {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self.negative, other.negative) {
			(false, true) => Ordering::Greater,
			(true, false) => Ordering::Less,
			(false, false) => self.cmp_magnitude(other),
			(true, true) => other.cmp_magnitude(self),
		}
	}
}

impl PartialOrd for Decimal {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Display for Decimal {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		if self.negative {
			f.write_str("-")?;
		}

		f.write_str(if self.integer.is_empty() { "0" } else { &self.integer })?;

		if !self.fraction.is_empty() {
			write!(f, ".{}", self.fraction)?;
		}

		Ok(())
	}
}

impl Serialize for Decimal {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Decimal {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Text(String),
			Unsigned(u64),
			Signed(i64),
			Float(f64),
		}

		let text = match Raw::deserialize(deserializer)? {
			Raw::Text(text) => text,
			Raw::Unsigned(value) => value.to_string(),
			Raw::Signed(value) => value.to_string(),
			Raw::Float(value) => value.to_string(),
		};

		text.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dec(raw: &str) -> Decimal {
		raw.parse().expect("Valid decimal.")
	}

	#[test]
	fn normalizes_equivalent_spellings() {
		assert_eq!(dec("5"), dec("5.000"));
		assert_eq!(dec("0.5e1"), dec("5"));
		assert_eq!(dec("-0.0"), Decimal::zero());
		assert_eq!(dec("000123.4500").to_string(), "123.45");
		assert_eq!(dec("1E-3").to_string(), "0.001");
	}

	#[test]
	fn rejects_garbage() {
		for raw in ["", "-", ".", "1.2.3", "abc", "1e", "1e9999", "0x10"] {
			assert!(raw.parse::<Decimal>().is_err(), "{raw} should not parse");
		}
	}
}
