use std::os::fd::AsRawFd;

use crate::error::{Cause, errno};

fn set_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	option: libc::c_int,
	name: &'static str,
	val: libc::c_int,
) -> Result<(), Cause> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			option,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(Cause::Option { name, errno: errno() })
	} else {
		Ok(())
	}
}

fn get_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	option: libc::c_int,
	name: &'static str,
) -> Result<libc::c_int, Cause> {
	let mut val: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			socket.as_raw_fd(),
			level,
			option,
			&mut val as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		Err(Cause::Option { name, errno: errno() })
	} else {
		Ok(val)
	}
}

/// Sets SO_REUSEADDR.
///
/// Allows binding to an address that's in TIME_WAIT state.
/// Essential for server restarts.
pub(crate) fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), Cause> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, "SO_REUSEADDR", enable as libc::c_int)
}

/// Sets SO_RCVBUF. The kernel typically doubles the value internally.
pub(crate) fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), Cause> {
	let val = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
	set_int(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, "SO_RCVBUF", val)
}

/// Sets SO_SNDBUF. Same doubling as SO_RCVBUF.
pub(crate) fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), Cause> {
	let val = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
	set_int(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, "SO_SNDBUF", val)
}

pub(crate) fn recv_buffer_size<S: AsRawFd>(socket: &S) -> Result<usize, Cause> {
	get_int(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, "SO_RCVBUF").map(|v| v.max(0) as usize)
}

pub(crate) fn send_buffer_size<S: AsRawFd>(socket: &S) -> Result<usize, Cause> {
	get_int(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, "SO_SNDBUF").map(|v| v.max(0) as usize)
}

/// Sets SO_LINGER.
///
/// - `None`: close returns immediately, kernel sends data in background
/// - `Some(0)`: hard reset (RST), discards unsent data
/// - `Some(n)`: close blocks up to n seconds waiting for data to send
pub(crate) fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> Result<(), Cause> {
	let val = match linger {
		None => libc::linger { l_onoff: 0, l_linger: 0 },
		Some(seconds) => libc::linger {
			l_onoff: 1,
			l_linger: libc::c_int::try_from(seconds).unwrap_or(libc::c_int::MAX),
		},
	};
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_LINGER,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::linger>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(Cause::Option { name: "SO_LINGER", errno: errno() })
	} else {
		Ok(())
	}
}

/// Sets or clears O_NONBLOCK.
pub(crate) fn set_nonblocking<S: AsRawFd>(socket: &S, nonblocking: bool) -> Result<(), Cause> {
	let flags = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_GETFL) };
	if flags == -1 {
		return Err(Cause::Option { name: "F_GETFL", errno: errno() });
	}
	let new_flags = if nonblocking {
		flags | libc::O_NONBLOCK
	} else {
		flags & !libc::O_NONBLOCK
	};
	let result = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_SETFL, new_flags) };
	if result == -1 {
		return Err(Cause::Option { name: "O_NONBLOCK", errno: errno() });
	}
	Ok(())
}

/// Pending error on the socket (SO_ERROR), cleared by reading it.
pub(crate) fn take_error<S: AsRawFd>(socket: &S) -> Result<Option<i32>, Cause> {
	let error = get_int(socket, libc::SOL_SOCKET, libc::SO_ERROR, "SO_ERROR")?;
	Ok((error != 0).then_some(error))
}
