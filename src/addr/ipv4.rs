use std::fmt;

use crate::addr::ToSockAddr;

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// `127.0.0.1:port`
	pub fn localhost(port: u16) -> Self {
		Self::new([127, 0, 0, 1], port)
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_ne_bytes(self.ip),
			},
			sin_zero: [0; 8],
		}
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self::new(addr.ip().octets(), addr.port())
	}
}

impl From<SocketAddrV4> for std::net::SocketAddrV4 {
	fn from(addr: SocketAddrV4) -> Self {
		std::net::SocketAddrV4::new(addr.ip.into(), addr.port)
	}
}

impl fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let [a, b, c, d] = self.ip;
		write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
	}
}

/*
  - sin_family: AF_INET
  - sin_port: port in network byte order (big-endian)
  - sin_addr: IP in network byte order; the octets already are, so
    from_ne_bytes keeps them in memory order
  - sin_zero: padding to match sockaddr size
*/

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw(); // lives on this stack frame while f runs
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}
