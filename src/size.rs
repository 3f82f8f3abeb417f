use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

use crate::error::ByteSizeError;

const PREFIXES: [char; 9] = ['\0', 'K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y'];

/// Which multiplier a formatted quantity uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prefix {
	/// Multiples of 1024 (`KiB`, `MiB`, ...).
	#[default]
	Binary,
	/// Multiples of 1000 (`KB`, `MB`, ...).
	Si,
}

impl Prefix {
	fn base(self) -> f64 {
		match self {
			Prefix::Binary => 1024.0,
			Prefix::Si => 1000.0,
		}
	}
}

/// A quantity of bytes, e.g. `"123 KiB"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(i64);

impl ByteSize {
	pub const ZERO: ByteSize = ByteSize(0);

	pub const fn new(bytes: i64) -> Self {
		Self(bytes)
	}

	/// Parses `-?\d+(.\d*)? [kmgtpezy]?i?b`, case-insensitive prefix.
	///
	/// `i` selects powers of 1024, its absence powers of 1000.
	pub fn parse(input: &str) -> Result<Self, ByteSizeError> {
		let fail = |reason| ByteSizeError { input: input.to_string(), reason };

		let mut rest = input.trim();
		let negative = match rest.strip_prefix('-') {
			Some(r) => {
				rest = r.trim_start();
				true
			}
			None => false,
		};

		let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
		if int_len == 0 {
			return Err(fail("expected a number"));
		}
		let mut num_len = int_len;
		if rest[num_len..].starts_with('.') {
			num_len += 1;
			num_len += rest[num_len..].bytes().take_while(u8::is_ascii_digit).count();
		}
		let value: f64 = rest[..num_len]
			.parse()
			.map_err(|_| fail("failed to interpret number"))?;
		rest = rest[num_len..].trim_start();

		let mut chars = rest.chars().peekable();
		let exp = match chars.peek().map(|c| c.to_ascii_uppercase()) {
			Some(c) if c != 'B' && c.is_ascii_alphabetic() => {
				let exp = PREFIXES
					.iter()
					.position(|&p| p == c)
					.ok_or_else(|| fail("invalid unit prefix"))?;
				chars.next();
				exp
			}
			_ => 0,
		};
		let base = if matches!(chars.peek(), Some('i' | 'I')) {
			chars.next();
			Prefix::Binary.base()
		} else {
			Prefix::Si.base()
		};
		match chars.next() {
			Some('b') | Some('B') => {}
			_ => return Err(fail("missing `B` unit")),
		}
		if chars.next().is_some() {
			return Err(fail("trailing characters"));
		}

		let sign = if negative { -1.0 } else { 1.0 };
		Ok(Self((sign * value * base.powi(exp as i32)) as i64))
	}

	#[inline]
	pub const fn get(&self) -> i64 {
		self.0
	}

	pub fn set(&mut self, bytes: i64) {
		self.0 = bytes;
	}

	pub fn set_str(&mut self, input: &str) -> Result<(), ByteSizeError> {
		*self = Self::parse(input)?;
		Ok(())
	}

	/// Formats with the given prefix family and number of decimals.
	///
	/// Plain bytes are printed without decimals: `"512 B"`, `"1.50 KiB"`.
	pub fn to_string_with(&self, prefix: Prefix, precision: usize) -> String {
		if self.0 == 0 {
			return "0 B".to_string();
		}
		let sign = if self.0 < 0 { "-" } else { "" };
		let magnitude = self.0.unsigned_abs() as f64;
		let base = prefix.base();

		let mut index = 0;
		let mut divisor = 1.0;
		while index < PREFIXES.len() - 1 && magnitude >= divisor * base {
			divisor *= base;
			index += 1;
		}

		if index == 0 {
			return format!("{}{} B", sign, self.0.unsigned_abs());
		}
		let binary = if prefix == Prefix::Binary { "i" } else { "" };
		format!(
			"{}{:.*} {}{}B",
			sign,
			precision,
			magnitude / divisor,
			PREFIXES[index],
			binary
		)
	}
}

impl fmt::Display for ByteSize {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_string_with(Prefix::Binary, 2))
	}
}

impl FromStr for ByteSize {
	type Err = ByteSizeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl From<i64> for ByteSize {
	fn from(bytes: i64) -> Self {
		Self(bytes)
	}
}

impl Add for ByteSize {
	type Output = ByteSize;

	fn add(self, rhs: ByteSize) -> ByteSize {
		ByteSize(self.0 + rhs.0)
	}
}

impl Sub for ByteSize {
	type Output = ByteSize;

	fn sub(self, rhs: ByteSize) -> ByteSize {
		ByteSize(self.0 - rhs.0)
	}
}

impl AddAssign for ByteSize {
	fn add_assign(&mut self, rhs: ByteSize) {
		self.0 += rhs.0;
	}
}

impl SubAssign for ByteSize {
	fn sub_assign(&mut self, rhs: ByteSize) {
		self.0 -= rhs.0;
	}
}

impl Mul<i64> for ByteSize {
	type Output = ByteSize;

	fn mul(self, rhs: i64) -> ByteSize {
		ByteSize(self.0 * rhs)
	}
}

impl Div<i64> for ByteSize {
	type Output = ByteSize;

	fn div(self, rhs: i64) -> ByteSize {
		ByteSize(self.0 / rhs)
	}
}

/// Ratio of two quantities.
impl Div for ByteSize {
	type Output = f64;

	fn div(self, rhs: ByteSize) -> f64 {
		self.0 as f64 / rhs.0 as f64
	}
}
