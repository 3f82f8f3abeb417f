//! Thin syscall wrappers. Everything here retries on EINTR and reports
//! failure as a [`Cause`]; callers pick the stage.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use crate::addr::Endpoint;
use crate::error::{Cause, errno};

/// Runs `call` until it stops failing with EINTR.
fn retry<F: FnMut() -> isize>(mut call: F) -> Result<usize, Cause> {
	loop {
		let n = call();
		if n >= 0 {
			return Ok(n as usize);
		}
		let e = errno();
		if e != libc::EINTR {
			return Err(Cause::Os { errno: e });
		}
	}
}

pub(crate) fn send(fd: RawFd, buf: &[u8], flags: libc::c_int) -> Result<usize, Cause> {
	retry(|| unsafe {
		libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags)
	})
}

/// Sends `buf` with `pass` attached as SCM_RIGHTS.
///
/// Stream sockets drop ancillary data sent with zero bytes, so `buf` must
/// not be empty.
pub(crate) fn send_with_fd(
	fd: RawFd,
	buf: &[u8],
	flags: libc::c_int,
	pass: RawFd,
) -> Result<usize, Cause> {
	let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
	// u64 backing keeps the cmsghdr aligned.
	let mut control = vec![0u64; space.div_ceil(8)];

	let mut iov = libc::iovec {
		iov_base: buf.as_ptr() as *mut libc::c_void,
		iov_len: buf.len(),
	};

	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;
	msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
	msg.msg_controllen = space as _;

	unsafe {
		let cmsg = libc::CMSG_FIRSTHDR(&msg);
		(*cmsg).cmsg_level = libc::SOL_SOCKET;
		(*cmsg).cmsg_type = libc::SCM_RIGHTS;
		(*cmsg).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<RawFd>() as u32) as _;
		std::ptr::copy_nonoverlapping(
			&pass as *const RawFd,
			libc::CMSG_DATA(cmsg) as *mut RawFd,
			1,
		);
	}

	retry(|| unsafe { libc::sendmsg(fd, &msg, flags) })
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> Result<usize, Cause> {
	retry(|| unsafe {
		libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags)
	})
}

/// Size of the datagram at the head of the receive queue. Blocks until one
/// arrives.
pub(crate) fn next_datagram_len(fd: RawFd) -> Result<usize, Cause> {
	let mut head = [0u8; 1];
	recv(fd, &mut head, libc::MSG_PEEK | libc::MSG_TRUNC)
}

/// Receives exactly one datagram. A datagram larger than `buf` is consumed
/// and reported as [`Cause::Truncated`].
pub(crate) fn recv_datagram(fd: RawFd, buf: &mut [u8]) -> Result<usize, Cause> {
	let n = recv(fd, buf, libc::MSG_TRUNC)?;
	if n > buf.len() {
		return Err(Cause::Truncated { len: n });
	}
	Ok(n)
}

/// Receives into `buf` and takes the first descriptor passed alongside.
///
/// `flags` is `MSG_TRUNC` for datagram sockets, 0 otherwise.
pub(crate) fn recv_with_fd(
	fd: RawFd,
	buf: &mut [u8],
	flags: libc::c_int,
) -> Result<(usize, Option<OwnedFd>), Cause> {
	let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
	let mut control = vec![0u64; space.div_ceil(8)];

	let mut iov = libc::iovec {
		iov_base: buf.as_mut_ptr() as *mut libc::c_void,
		iov_len: buf.len(),
	};

	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;
	msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
	msg.msg_controllen = space as _;

	let n = retry(|| unsafe { libc::recvmsg(fd, &mut msg, flags | libc::MSG_CMSG_CLOEXEC) })?;

	let mut passed = None;
	unsafe {
		let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
		while !cmsg.is_null() {
			if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
				let raw = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const RawFd);
				passed = Some(OwnedFd::from_raw_fd(raw));
				break;
			}
			cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
		}
	}
	// A descriptor that came with a cut datagram is closed on drop.
	if msg.msg_flags & libc::MSG_TRUNC != 0 {
		return Err(Cause::Truncated { len: n });
	}
	Ok((n, passed))
}

/// True when at least one more byte can be read without blocking.
pub(crate) fn has_pending(fd: RawFd) -> bool {
	let mut head = [0u8; 1];
	matches!(recv(fd, &mut head, libc::MSG_PEEK | libc::MSG_DONTWAIT), Ok(n) if n > 0)
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> Result<(), Cause> {
	if unsafe { libc::shutdown(fd, how) } == -1 {
		return Err(Cause::last_os());
	}
	Ok(())
}

/// Blocking accept; returns the new descriptor and the peer's address.
pub(crate) fn accept(fd: RawFd) -> Result<(OwnedFd, Option<Endpoint>), Cause> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

	let raw = retry(|| unsafe {
		libc::accept4(
			fd,
			&mut storage as *mut _ as *mut libc::sockaddr,
			&mut len,
			libc::SOCK_CLOEXEC,
		) as isize
	})?;

	let conn = unsafe { OwnedFd::from_raw_fd(raw as RawFd) };
	Ok((conn, Endpoint::from_storage(&storage, len)))
}

pub(crate) fn local_name(fd: RawFd) -> Option<Endpoint> {
	name_of(fd, libc::getsockname)
}

pub(crate) fn peer_name(fd: RawFd) -> Option<Endpoint> {
	name_of(fd, libc::getpeername)
}

fn name_of(
	fd: RawFd,
	call: unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
) -> Option<Endpoint> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let result = unsafe { call(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
	if result == -1 {
		return None;
	}
	Endpoint::from_storage(&storage, len)
}
