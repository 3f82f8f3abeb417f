//! Address families and endpoint types.
//!
//! - `Family::Ipv4`: Internet Protocol version 4
//! - `Family::Ipv6`: Internet Protocol version 6
//! - `Family::Unix`: Unix domain sockets (local only)

mod endpoint;
mod ipv4;
mod ipv6;
mod unix;

use std::fmt;

pub use self::endpoint::Endpoint;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::unix::UnixAddr;

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	Unix,
	Ipv4,
	Ipv6,
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Unix => libc::AF_UNIX,
			Family::Ipv4 => libc::AF_INET,
			Family::Ipv6 => libc::AF_INET6,
		}
	}

	/// Parses `unix`, `ipv4`/`inet` or `ipv6`/`inet6`.
	pub fn from_name(name: &str) -> Option<Self> {
		match name.trim().to_ascii_lowercase().as_str() {
			"unix" | "local" => Some(Family::Unix),
			"ipv4" | "inet" => Some(Family::Ipv4),
			"ipv6" | "inet6" => Some(Family::Ipv6),
			_ => None,
		}
	}
}

impl fmt::Display for Family {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Family::Unix => "unix",
			Family::Ipv4 => "ipv4",
			Family::Ipv6 => "ipv6",
		})
	}
}

/*
  The mapping:
  ┌────────┬──────────┬───────────────┐
  │ Family │ Constant │ Value (Linux) │
  ├────────┼──────────┼───────────────┤
  │ Ipv4   │ AF_INET  │ 2             │
  ├────────┼──────────┼───────────────┤
  │ Ipv6   │ AF_INET6 │ 10            │
  ├────────┼──────────┼───────────────┤
  │ Unix   │ AF_UNIX  │ 1             │
  └────────┴──────────┴───────────────┘
*/

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address is invalid (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes of a sockaddr.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		let header = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
		if len < header {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		Some(Self::from_raw(raw, (len - header) as usize))
	}
}
