use std::fmt;
use std::path::Path;

use crate::addr::ToSockAddr;

/// Unix domain socket address (file path or abstract name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates from a filesystem path.
	pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
		use std::os::unix::ffi::OsStrExt;
		Self::new(path.as_ref().as_os_str().as_bytes())
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, with no filesystem entry.
	/// Auto-removed when all references close.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// An unnamed address, as reported for the client end of a connection.
	pub fn unnamed() -> Self {
		Self { path: Vec::new(), is_abstract: false }
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns true for an unnamed socket.
	pub fn is_unnamed(&self) -> bool {
		self.path.is_empty() && !self.is_abstract
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Returns the filesystem path, `None` for abstract or unnamed addresses.
	pub fn as_path(&self) -> Option<&Path> {
		use std::os::unix::ffi::OsStrExt;
		if self.is_abstract || self.path.is_empty() {
			return None;
		}
		Some(Path::new(std::ffi::OsStr::from_bytes(&self.path)))
	}

	/// Converts to the raw sockaddr_un and its used length.
	pub(crate) fn to_raw(&self) -> Option<(libc::sockaddr_un, libc::socklen_t)> {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		let header = std::mem::size_of::<libc::sa_family_t>();

		let used = if self.is_abstract {
			// first byte stays zero, then the name
			if self.path.len() + 1 > addr.sun_path.len() {
				return None;
			}
			for (i, &byte) in self.path.iter().enumerate() {
				addr.sun_path[i + 1] = byte as libc::c_char;
			}
			header + 1 + self.path.len()
		} else {
			// null-terminated
			if self.path.len() >= addr.sun_path.len() {
				return None;
			}
			for (i, &byte) in self.path.iter().enumerate() {
				addr.sun_path[i] = byte as libc::c_char;
			}
			std::mem::size_of::<libc::sockaddr_un>()
		};

		Some((addr, used as libc::socklen_t))
	}

	/// Creates from raw sockaddr_un whose `sun_path` holds `path_len` bytes.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, path_len: usize) -> Self {
		let path_len = path_len.min(raw.sun_path.len());
		if path_len == 0 {
			return Self::unnamed();
		}
		let bytes = &raw.sun_path[..path_len];
		if bytes[0] == 0 {
			let name: Vec<u8> = bytes[1..].iter().map(|&c| c as u8).collect();
			Self { path: name, is_abstract: true }
		} else {
			let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
			let path: Vec<u8> = bytes[..end].iter().map(|&c| c as u8).collect();
			Self { path, is_abstract: false }
		}
	}
}

impl fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let prefix = if self.is_abstract { "@" } else { "" };
		write!(f, "unix:{}{}", prefix, String::from_utf8_lossy(&self.path))
	}
}

/*
Unix socket paths have a maximum length (108 bytes on Linux, one reserved
for the null terminator). Abstract names skip the terminator but spend the
first byte on the leading zero. Too long → None, never truncated.
*/

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let (raw, len) = self.to_raw()?;
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, len))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_round_trip() {
		let addr = UnixAddr::new("/tmp/app.sock");
		let (raw, len) = addr.to_raw().unwrap();
		let header = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
		assert_eq!(UnixAddr::from_raw(&raw, (len - header) as usize), addr);
		assert_eq!(addr.to_string(), "unix:/tmp/app.sock");
		assert_eq!(addr.as_path(), Some(Path::new("/tmp/app.sock")));
	}

	#[test]
	fn abstract_round_trip() {
		let addr = UnixAddr::abstract_socket("pacewire");
		let (raw, len) = addr.to_raw().unwrap();
		let header = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
		assert_eq!(UnixAddr::from_raw(&raw, (len - header) as usize), addr);
		assert_eq!(addr.to_string(), "unix:@pacewire");
		assert_eq!(addr.as_path(), None);
	}

	#[test]
	fn too_long_is_rejected() {
		assert!(UnixAddr::new(vec![b'a'; 200]).to_raw().is_none());
		assert!(UnixAddr::new(vec![b'a'; 108]).to_raw().is_none());
		assert!(UnixAddr::new(vec![b'a'; 107]).to_raw().is_some());
	}

	#[test]
	fn unnamed_from_empty_raw() {
		let raw: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		assert!(UnixAddr::from_raw(&raw, 0).is_unnamed());
	}
}
