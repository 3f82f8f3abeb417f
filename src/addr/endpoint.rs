use std::borrow::Cow;
use std::fmt;
use std::net::ToSocketAddrs;
use std::str::FromStr;

use crate::error::{Cause, SocketError};

use super::{Family, FromSockAddr, SocketAddrV4, SocketAddrV6, ToSockAddr, UnixAddr};

/// Where a socket binds or connects.
///
/// Textual forms accepted by [`Endpoint::parse`]:
///
/// ```text
/// unix:/run/app.sock   Unix path
/// /run/app.sock        Unix path
/// unix:@app            abstract Unix name
/// 127.0.0.1:80         IPv4
/// [::1]:80             IPv6
/// localhost:80         host name, resolved on bind or connect
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
	Unix(UnixAddr),
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	/// Not looked up yet; see [`Endpoint::resolve`].
	Host { host: String, port: u16 },
}

impl Endpoint {
	pub fn parse(text: &str) -> Result<Self, SocketError> {
		let text = text.trim();
		let fail = |cause: Cause| SocketError::Address { addr: text.to_string(), cause };

		if let Some(rest) = text.strip_prefix("unix:") {
			let addr = match rest.strip_prefix('@') {
				Some(name) => UnixAddr::abstract_socket(name),
				None => UnixAddr::from_path(rest),
			};
			return Self::checked_unix(addr).map_err(fail);
		}
		if text.starts_with('/') {
			return Self::checked_unix(UnixAddr::from_path(text)).map_err(fail);
		}
		if let Ok(addr) = text.parse::<std::net::SocketAddr>() {
			return Ok(addr.into());
		}

		// Anything left is host:port, looked up later.
		let bad = || fail(Cause::Unresolved { reason: "expected host:port".into() });
		let (host, port) = text.rsplit_once(':').ok_or_else(bad)?;
		if host.is_empty() || host.contains(':') {
			return Err(bad());
		}
		let port = port.parse::<u16>().map_err(|_| bad())?;
		Ok(Endpoint::Host { host: host.to_string(), port })
	}

	/// Looks a host name up through the system resolver and picks the first
	/// address of `family`. Other endpoints come back unchanged.
	pub fn resolve(&self, family: Family) -> Result<Cow<'_, Endpoint>, SocketError> {
		let Endpoint::Host { host, port } = self else {
			return Ok(Cow::Borrowed(self));
		};
		let fail = |cause: Cause| SocketError::Address { addr: self.to_string(), cause };
		if family == Family::Unix {
			return Err(fail(Cause::FamilyMismatch));
		}

		let found = (host.as_str(), *port)
			.to_socket_addrs()
			.map_err(|e| fail(Cause::Unresolved { reason: e.to_string() }))?
			.map(Endpoint::from)
			.find(|addr| addr.family() == Some(family))
			.ok_or_else(|| fail(Cause::Unresolved { reason: format!("no {} address", family) }))?;
		tracing::trace!(host = %host, resolved = %found, "host resolved");
		Ok(Cow::Owned(found))
	}

	fn checked_unix(addr: UnixAddr) -> Result<Self, Cause> {
		if addr.to_raw().is_none() {
			return Err(Cause::AddressTooLong);
		}
		Ok(Endpoint::Unix(addr))
	}

	/// `None` for a host name until it is resolved.
	pub fn family(&self) -> Option<Family> {
		match self {
			Endpoint::Unix(_) => Some(Family::Unix),
			Endpoint::V4(_) => Some(Family::Ipv4),
			Endpoint::V6(_) => Some(Family::Ipv6),
			Endpoint::Host { .. } => None,
		}
	}

	/// Port of an IP endpoint.
	pub fn port(&self) -> Option<u16> {
		match self {
			Endpoint::Unix(_) => None,
			Endpoint::V4(addr) => Some(addr.port()),
			Endpoint::V6(addr) => Some(addr.port()),
			Endpoint::Host { port, .. } => Some(*port),
		}
	}

	pub fn as_unix(&self) -> Option<&UnixAddr> {
		match self {
			Endpoint::Unix(addr) => Some(addr),
			_ => None,
		}
	}

	/// Decodes what getsockname/getpeername/accept wrote into `storage`.
	pub(crate) fn from_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<Self> {
		let ptr = storage as *const libc::sockaddr_storage as *const libc::sockaddr;
		// SAFETY: sockaddr_storage is large enough for every family below.
		unsafe {
			match storage.ss_family as libc::c_int {
				libc::AF_UNIX => UnixAddr::from_sockaddr(ptr, len).map(Endpoint::Unix),
				libc::AF_INET => SocketAddrV4::from_sockaddr(ptr, len).map(Endpoint::V4),
				libc::AF_INET6 => SocketAddrV6::from_sockaddr(ptr, len).map(Endpoint::V6),
				_ => None,
			}
		}
	}
}

impl ToSockAddr for Endpoint {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match self {
			Endpoint::Unix(addr) => addr.with_raw(f),
			Endpoint::V4(addr) => addr.with_raw(f),
			Endpoint::V6(addr) => addr.with_raw(f),
			Endpoint::Host { .. } => None,
		}
	}
}

impl From<std::net::SocketAddr> for Endpoint {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(v4) => Endpoint::V4(v4.into()),
			std::net::SocketAddr::V6(v6) => Endpoint::V6(v6.into()),
		}
	}
}

impl From<UnixAddr> for Endpoint {
	fn from(addr: UnixAddr) -> Self {
		Endpoint::Unix(addr)
	}
}

impl From<SocketAddrV4> for Endpoint {
	fn from(addr: SocketAddrV4) -> Self {
		Endpoint::V4(addr)
	}
}

impl From<SocketAddrV6> for Endpoint {
	fn from(addr: SocketAddrV6) -> Self {
		Endpoint::V6(addr)
	}
}

impl FromStr for Endpoint {
	type Err = SocketError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Endpoint::parse(s)
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Endpoint::Unix(addr) => fmt::Display::fmt(addr, f),
			Endpoint::V4(addr) => fmt::Display::fmt(addr, f),
			Endpoint::V6(addr) => fmt::Display::fmt(addr, f),
			Endpoint::Host { host, port } => write!(f, "{}:{}", host, port),
		}
	}
}
