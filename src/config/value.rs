use crate::size::ByteSize;

/// Types a config scalar can be read as.
pub trait FromConfigValue: Sized {
	/// Shown in `ConfigError::InvalidValue`.
	const EXPECTED: &'static str;

	fn from_config_value(raw: &str) -> Option<Self>;
}

impl FromConfigValue for String {
	const EXPECTED: &'static str = "a string";

	fn from_config_value(raw: &str) -> Option<Self> {
		Some(raw.to_string())
	}
}

impl FromConfigValue for bool {
	const EXPECTED: &'static str = "a boolean";

	fn from_config_value(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Some(true),
			"0" | "false" | "no" | "off" => Some(false),
			_ => None,
		}
	}
}

impl FromConfigValue for ByteSize {
	const EXPECTED: &'static str = "a byte quantity";

	fn from_config_value(raw: &str) -> Option<Self> {
		ByteSize::parse(raw).ok()
	}
}

macro_rules! from_str_value {
	($($ty:ty => $what:literal),* $(,)?) => {
		$(
			impl FromConfigValue for $ty {
				const EXPECTED: &'static str = $what;

				fn from_config_value(raw: &str) -> Option<Self> {
					raw.trim().parse().ok()
				}
			}
		)*
	};
}

from_str_value! {
	i8 => "an integer", i16 => "an integer", i32 => "an integer", i64 => "an integer",
	u8 => "an unsigned integer", u16 => "an unsigned integer", u32 => "an unsigned integer",
	u64 => "an unsigned integer", usize => "an unsigned integer",
	f32 => "a number", f64 => "a number",
}
