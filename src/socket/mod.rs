//! Socket lifecycle, transfer and completion.

mod base;
mod builder;
mod completion;
mod io;
mod options;
mod receive;
mod transfer;

use std::fmt;

pub use self::base::SocketBase;
pub use self::builder::{BufferConfig, SocketConfig, SocketOptions};
pub use self::completion::{Job, SendHandle, SendResult, Spawn, ThreadSpawner};
pub use self::transfer::{Blocking, Completion, Deferred, Payload, SendOptions, SendReport};

/// Byte a receiver answers with when acknowledgement is on.
pub const ACK: u8 = 0x06;

/// Joins the records of a multi-record payload on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Listen backlog used when none is configured.
pub const DEFAULT_BACKLOG: i32 = 50;

/// Userspace receive chunk used when none is configured.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Socket type passed to `socket()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kind {
	/// Reliable, ordered byte stream.
	#[default]
	Stream,
	/// Packets with boundaries, no delivery guarantees.
	Datagram,
}

impl Kind {
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Kind::Stream => libc::SOCK_STREAM,
			Kind::Datagram => libc::SOCK_DGRAM,
		}
	}

	/// Parses `stream` or `datagram` (`dgram`).
	pub fn from_name(name: &str) -> Option<Self> {
		match name.trim().to_ascii_lowercase().as_str() {
			"stream" => Some(Kind::Stream),
			"datagram" | "dgram" => Some(Kind::Datagram),
			_ => None,
		}
	}
}

/*
  ┌──────────┬─────────────┬───────────────┐
  │   Kind   │  Constant   │ Value (Linux) │
  ├──────────┼─────────────┼───────────────┤
  │ Stream   │ SOCK_STREAM │ 1             │
  ├──────────┼─────────────┼───────────────┤
  │ Datagram │ SOCK_DGRAM  │ 2             │
  └──────────┴─────────────┴───────────────┘
*/

impl fmt::Display for Kind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Kind::Stream => "stream",
			Kind::Datagram => "datagram",
		})
	}
}

/// Which direction(s) to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shutdown {
	/// No more receives.
	Read,
	/// No more sends. The peer reads EOF.
	Write,
	/// Both directions.
	Both,
}

impl Shutdown {
	#[inline]
	pub(crate) fn raw(self) -> libc::c_int {
		match self {
			Shutdown::Read => libc::SHUT_RD,
			Shutdown::Write => libc::SHUT_WR,
			Shutdown::Both => libc::SHUT_RDWR,
		}
	}
}

/// Lifecycle state of a [`SocketBase`].
///
/// ```text
/// Created ──bind──▶ Bound ──listen──▶ Listening ──accept──▶ (new socket, Connected)
///    │                │
///    └────connect─────┴──▶ Connected ──shutdown──▶ Shutdown(how)
///
/// any state ──close──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
	Created,
	Bound,
	Listening,
	Connected,
	Shutdown(Shutdown),
	Closed,
}

impl State {
	/// Sends are allowed while the write side is open.
	pub fn can_send(self) -> bool {
		matches!(self, State::Connected | State::Shutdown(Shutdown::Read))
	}

	/// Receives are allowed while the read side is open.
	pub fn can_receive(self) -> bool {
		matches!(self, State::Connected | State::Shutdown(Shutdown::Write))
	}
}

impl fmt::Display for State {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			State::Created => f.write_str("created"),
			State::Bound => f.write_str("bound"),
			State::Listening => f.write_str("listening"),
			State::Connected => f.write_str("connected"),
			State::Shutdown(Shutdown::Read) => f.write_str("shut down for reading"),
			State::Shutdown(Shutdown::Write) => f.write_str("shut down for writing"),
			State::Shutdown(Shutdown::Both) => f.write_str("shut down"),
			State::Closed => f.write_str("closed"),
		}
	}
}
