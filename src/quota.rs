//! Fractional bandwidth quota and the pacer every transfer consults.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::QuotaError;
use crate::size::ByteSize;

/// Length of traffic a full bucket may release at once.
const BURST_WINDOW: Duration = Duration::from_millis(100);

/// How `Quota::get` rounds `capacity × fraction` to whole bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RoundingMethod {
	#[default]
	Nearest = 0,
	Down = 1,
	Up = 2,
}

impl RoundingMethod {
	fn from_u8(v: u8) -> Self {
		match v {
			1 => RoundingMethod::Down,
			2 => RoundingMethod::Up,
			_ => RoundingMethod::Nearest,
		}
	}

	fn apply(self, x: f64) -> i64 {
		match self {
			RoundingMethod::Nearest => x.round() as i64,
			RoundingMethod::Down => x.floor() as i64,
			RoundingMethod::Up => x.ceil() as i64,
		}
	}
}

/// Token bucket state. `tokens` goes negative when a grant is issued on credit.
#[derive(Debug)]
struct Bucket {
	tokens: f64,
	last_refill: Instant,
}

/// A share of a capacity, e.g. 50% of 10 MiB/s.
///
/// The fraction can be changed at any time through a shared reference, so
/// one `Arc<Quota>` can pace several sockets at once: they all draw from
/// the same bucket.
pub struct Quota {
	capacity: ByteSize,
	fraction: AtomicU64,
	rounding: AtomicU8,
	bucket: Mutex<Bucket>,
}

impl Quota {
	/// Creates a quota of `fraction` of `capacity`.
	pub fn new(capacity: ByteSize, fraction: f64) -> Result<Self, QuotaError> {
		validate(fraction)?;
		Ok(Self::with_fraction(capacity, fraction))
	}

	/// Creates a quota from a textual fraction, see [`Quota::set_fraction_str`].
	pub fn parse(capacity: ByteSize, text: &str) -> Result<Self, QuotaError> {
		let quota = Self::with_fraction(capacity, 1.0);
		quota.set_fraction_str(text)?;
		Ok(quota)
	}

	/// Creates a quota that allots exactly `allotted` of `capacity`.
	pub fn from_allotted(capacity: ByteSize, allotted: ByteSize) -> Result<Self, QuotaError> {
		if capacity.get() <= 0 {
			return Err(QuotaError::Parse {
				input: allotted.to_string(),
				reason: "capacity is zero".into(),
			});
		}
		Self::new(capacity, allotted / capacity)
	}

	/// The whole capacity.
	pub fn unlimited(capacity: ByteSize) -> Self {
		Self::with_fraction(capacity, 1.0)
	}

	fn with_fraction(capacity: ByteSize, fraction: f64) -> Self {
		Self {
			capacity,
			fraction: AtomicU64::new(fraction.to_bits()),
			rounding: AtomicU8::new(RoundingMethod::Nearest as u8),
			bucket: Mutex::new(Bucket {
				tokens: burst_for(capacity.get() as f64 * fraction),
				last_refill: Instant::now(),
			}),
		}
	}

	#[inline]
	pub fn fraction(&self) -> f64 {
		f64::from_bits(self.fraction.load(Ordering::Acquire))
	}

	/// Sets the fraction. Out-of-range values are rejected and the previous
	/// fraction is kept.
	pub fn set_fraction(&self, fraction: f64) -> Result<(), QuotaError> {
		validate(fraction)?;
		self.fraction.store(fraction.to_bits(), Ordering::Release);
		tracing::debug!(fraction, "quota fraction updated");
		Ok(())
	}

	/// Sets the fraction from text: `"0.25"`, `"25%"` or a byte quantity
	/// relative to the capacity such as `"256 KiB"`.
	pub fn set_fraction_str(&self, text: &str) -> Result<(), QuotaError> {
		let fraction = self.parse_fraction(text)?;
		self.set_fraction(fraction)
	}

	/// Parses `text` into a fraction without applying it.
	pub fn parse_fraction(&self, text: &str) -> Result<f64, QuotaError> {
		if let Some(value) = parse_decimal_or_percent(text) {
			return value.map_err(|reason| QuotaError::Parse { input: text.to_string(), reason });
		}
		let allotted = ByteSize::parse(text).map_err(|e| QuotaError::Parse {
			input: text.to_string(),
			reason: e.reason.to_string(),
		})?;
		if self.capacity.get() <= 0 {
			return Err(QuotaError::Parse {
				input: text.to_string(),
				reason: "capacity is zero".into(),
			});
		}
		Ok(allotted / self.capacity)
	}

	pub fn capacity(&self) -> ByteSize {
		self.capacity
	}

	pub fn rounding_method(&self) -> RoundingMethod {
		RoundingMethod::from_u8(self.rounding.load(Ordering::Relaxed))
	}

	pub fn set_rounding_method(&self, method: RoundingMethod) {
		self.rounding.store(method as u8, Ordering::Relaxed);
	}

	/// Allotted bytes, `capacity × fraction`, rounded.
	pub fn get(&self) -> i64 {
		self.rounding_method().apply(self.capacity.get() as f64 * self.fraction())
	}

	/// Allotted bytes as a quantity.
	pub fn allotted(&self) -> ByteSize {
		ByteSize::new(self.get())
	}

	/// Pacing rate in bytes per second.
	#[inline]
	pub fn rate(&self) -> f64 {
		(self.capacity.get().max(0) as f64) * self.fraction()
	}

	/// Largest chunk a single grant can cover.
	pub fn burst(&self) -> usize {
		burst_for(self.rate()) as usize
	}

	/// Waits until up to `want` bytes may be sent and returns how many.
	///
	/// The grant is at most one burst. Returns `None` when the rate is zero:
	/// nothing may ever be sent, so callers fail instead of waiting.
	pub fn throttle(&self, want: usize) -> Option<usize> {
		let burst = burst_for(self.rate()) as usize;
		self.pace(want.min(burst))
	}

	/// Waits until `len` bytes may be sent as one unit.
	///
	/// Unlike [`Quota::throttle`] the grant is never split; whatever exceeds
	/// the bucket is taken on credit and slept off before returning. Used
	/// for datagrams, which must leave in a single send.
	pub fn throttle_exact(&self, len: usize) -> Option<usize> {
		self.pace(len)
	}

	fn pace(&self, grant: usize) -> Option<usize> {
		let wait = self.reserve(grant)?;
		if !wait.is_zero() {
			tracing::trace!(grant, wait_us = wait.as_micros() as u64, "quota pacing");
			std::thread::sleep(wait);
		}
		Some(grant)
	}

	/// Takes `grant` bytes from the bucket without sleeping and returns how
	/// long the caller must wait before using them.
	fn reserve(&self, grant: usize) -> Option<Duration> {
		let rate = self.rate();
		if rate <= 0.0 || !rate.is_finite() {
			return None;
		}
		if grant == 0 {
			return Some(Duration::ZERO);
		}
		let burst = burst_for(rate);

		let mut bucket = self.bucket.lock();
		let now = Instant::now();
		let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
		bucket.tokens = (bucket.tokens + elapsed * rate).min(burst);
		bucket.last_refill = now;
		bucket.tokens -= grant as f64;
		let debt = -bucket.tokens;
		drop(bucket);

		let wait = if debt > 0.0 {
			Duration::from_secs_f64(debt / rate)
		} else {
			Duration::ZERO
		};
		Some(wait)
	}
}

impl Clone for Quota {
	/// Copies capacity, fraction and rounding; the copy paces independently.
	fn clone(&self) -> Self {
		let quota = Self::with_fraction(self.capacity, self.fraction());
		quota.set_rounding_method(self.rounding_method());
		quota
	}
}

impl PartialEq for Quota {
	fn eq(&self, other: &Self) -> bool {
		self.capacity == other.capacity && self.fraction() == other.fraction()
	}
}

impl fmt::Debug for Quota {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Quota")
			.field("capacity", &self.capacity)
			.field("fraction", &self.fraction())
			.field("rounding", &self.rounding_method())
			.finish()
	}
}

impl fmt::Display for Quota {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.allotted())
	}
}

fn validate(fraction: f64) -> Result<(), QuotaError> {
	if (0.0..=1.0).contains(&fraction) {
		Ok(())
	} else {
		Err(QuotaError::InvalidValue { value: fraction })
	}
}

fn burst_for(rate: f64) -> f64 {
	(rate * BURST_WINDOW.as_secs_f64()).max(1.0).floor()
}

/// Matches `\s*\d+(\.\d*)?\s*%?\s*`. `None` when the text has another shape.
fn parse_decimal_or_percent(text: &str) -> Option<Result<f64, String>> {
	let trimmed = text.trim();
	let (number, divisor) = match trimmed.strip_suffix('%') {
		Some(n) => (n.trim_end(), 100.0),
		None => (trimmed, 1.0),
	};
	let int_len = number.bytes().take_while(u8::is_ascii_digit).count();
	if int_len == 0 {
		return None;
	}
	let tail = &number[int_len..];
	let valid_tail = match tail.strip_prefix('.') {
		Some(frac) => frac.bytes().all(|b| b.is_ascii_digit()),
		None => tail.is_empty(),
	};
	if !valid_tail {
		return None;
	}
	Some(
		number
			.parse::<f64>()
			.map(|v| v / divisor)
			.map_err(|e| format!("failed to interpret {:?} as a number: {}", number, e)),
	)
}

/*
 Token bucket with debt:
  ┌──────────────┬──────────────────────────────────────────────┐
  │ rate         │ capacity × fraction, bytes per second        │
  ├──────────────┼──────────────────────────────────────────────┤
  │ burst        │ rate × 100ms, at least one byte              │
  ├──────────────┼──────────────────────────────────────────────┤
  │ grant        │ min(want, burst), always issued immediately  │
  ├──────────────┼──────────────────────────────────────────────┤
  │ wait         │ -tokens / rate when the bucket is in debt    │
  └──────────────┴──────────────────────────────────────────────┘
*/
