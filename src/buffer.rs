use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use bytes::BytesMut;

/// Owned, mutable byte buffer.
///
/// Payloads sent and received by sockets travel as `Bytes`. Text is stored
/// as its UTF-8 octets; the buffer never interprets its contents.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes {
	buf: BytesMut,
}

impl Bytes {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self { buf: BytesMut::with_capacity(capacity) }
	}

	/// Replaces the contents with `data`.
	///
	/// Accepts anything byte-like: `&[u8]`, `Vec<u8>`, `&str`, `String`.
	pub fn set<B: AsRef<[u8]>>(&mut self, data: B) {
		self.buf.clear();
		self.buf.extend_from_slice(data.as_ref());
	}

	/// Replaces the contents with the octets of `text`.
	pub fn set_text(&mut self, text: &str) {
		self.set(text.as_bytes());
	}

	pub fn extend_from_slice(&mut self, data: &[u8]) {
		self.buf.extend_from_slice(data);
	}

	pub fn clear(&mut self) {
		self.buf.clear();
	}

	#[inline]
	pub fn as_slice(&self) -> &[u8] {
		&self.buf
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.buf.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Decodes the contents as UTF-8, replacing invalid sequences.
	pub fn to_string_lossy(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.buf)
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.buf.to_vec()
	}

	/// Converts into an immutable, cheaply clonable `bytes::Bytes`.
	pub fn freeze(self) -> bytes::Bytes {
		self.buf.freeze()
	}

	pub(crate) fn as_mut_buf(&mut self) -> &mut BytesMut {
		&mut self.buf
	}
}

impl Deref for Bytes {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		&self.buf
	}
}

impl AsRef<[u8]> for Bytes {
	fn as_ref(&self) -> &[u8] {
		&self.buf
	}
}

impl fmt::Debug for Bytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Bytes({:?})", self.to_string_lossy())
	}
}

impl From<&[u8]> for Bytes {
	fn from(data: &[u8]) -> Self {
		Self { buf: BytesMut::from(data) }
	}
}

impl From<Vec<u8>> for Bytes {
	fn from(data: Vec<u8>) -> Self {
		Self::from(data.as_slice())
	}
}

impl From<&str> for Bytes {
	fn from(text: &str) -> Self {
		Self::from(text.as_bytes())
	}
}

impl From<String> for Bytes {
	fn from(text: String) -> Self {
		Self::from(text.as_bytes())
	}
}

impl From<BytesMut> for Bytes {
	fn from(buf: BytesMut) -> Self {
		Self { buf }
	}
}

impl PartialEq<[u8]> for Bytes {
	fn eq(&self, other: &[u8]) -> bool {
		self.as_slice() == other
	}
}

impl PartialEq<&[u8]> for Bytes {
	fn eq(&self, other: &&[u8]) -> bool {
		self.as_slice() == *other
	}
}

impl PartialEq<str> for Bytes {
	fn eq(&self, other: &str) -> bool {
		self.as_slice() == other.as_bytes()
	}
}

impl PartialEq<&str> for Bytes {
	fn eq(&self, other: &&str) -> bool {
		self.as_slice() == other.as_bytes()
	}
}
