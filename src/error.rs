use std::fmt;

use crate::socket::State;

/// Lifecycle stage a socket operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
	Create,
	Address,
	Bind,
	Listen,
	Accept,
	Connect,
	Read,
	Write,
	Shutdown,
	Close,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Stage::Create => "create",
			Stage::Address => "address",
			Stage::Bind => "bind",
			Stage::Listen => "listen",
			Stage::Accept => "accept",
			Stage::Connect => "connect",
			Stage::Read => "read",
			Stage::Write => "write",
			Stage::Shutdown => "shutdown",
			Stage::Close => "close",
		};
		f.write_str(name)
	}
}

/// Why a socket operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
	/// The syscall returned -1.
	Os { errno: i32 },
	/// setsockopt/getsockopt/fcntl failed while applying an option.
	Option { name: &'static str, errno: i32 },
	/// The operation is not valid from the socket's current state.
	InvalidState { state: State },
	/// The peer closed the connection.
	PeerClosed,
	/// The socket was closed while the operation was pending.
	Cancelled,
	/// The peer answered a synchronous send with something other than ACK.
	AckMismatch { got: u8 },
	/// The associated quota allows no throughput at all.
	QuotaExhausted,
	/// The path does not fit in `sun_path`.
	AddressTooLong,
	/// The endpoint could not be parsed or resolved.
	Unresolved { reason: String },
	/// The endpoint family differs from the socket's family.
	FamilyMismatch,
	/// A control message carrying a descriptor was expected but not received.
	MissingDescriptor,
	/// A datagram did not fit the receive buffer; `len` is its real size.
	Truncated { len: usize },
}

impl Cause {
	/// Returns the OS error number behind this cause, if any.
	pub fn errno(&self) -> Option<i32> {
		match self {
			Cause::Os { errno } | Cause::Option { errno, .. } => Some(*errno),
			_ => None,
		}
	}

	#[inline]
	pub(crate) fn last_os() -> Self {
		Cause::Os { errno: errno() }
	}
}

impl fmt::Display for Cause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Cause::Os { errno } => f.write_str(&errno_to_str(*errno)),
			Cause::Option { name, errno } => write!(f, "option {}: {}", name, errno_to_str(*errno)),
			Cause::InvalidState { state } => write!(f, "invalid state: socket is {}", state),
			Cause::PeerClosed => f.write_str("connection closed by peer"),
			Cause::Cancelled => f.write_str("cancelled by close"),
			Cause::AckMismatch { got } => write!(f, "ACK failed (got {:#04x})", got),
			Cause::QuotaExhausted => f.write_str("quota allows no throughput"),
			Cause::AddressTooLong => f.write_str("address too long"),
			Cause::Unresolved { reason } => write!(f, "unresolved: {}", reason),
			Cause::FamilyMismatch => f.write_str("address family does not match socket"),
			Cause::MissingDescriptor => f.write_str("no descriptor in control message"),
			Cause::Truncated { len } => write!(f, "datagram of {} bytes truncated", len),
		}
	}
}

/// Socket lifecycle errors, one variant per stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
	#[error("socket() failed: {cause}")]
	Create { cause: Cause },

	#[error("address {addr:?}: {cause}")]
	Address { addr: String, cause: Cause },

	#[error("bind({addr}) failed: {cause}")]
	Bind { addr: String, cause: Cause },

	#[error("listen(backlog={backlog}) failed: {cause}")]
	Listen { backlog: i32, cause: Cause },

	#[error("accept() failed: {cause}")]
	Accept { cause: Cause },

	#[error("connect({addr}) failed: {cause}")]
	Connect { addr: String, cause: Cause },

	#[error("read() failed: {cause}")]
	Read { cause: Cause },

	#[error("write() failed: {cause}")]
	Write { cause: Cause },

	#[error("shutdown() failed: {cause}")]
	Shutdown { cause: Cause },

	#[error("close() failed: {cause}")]
	Close { cause: Cause },
}

impl SocketError {
	/// Returns the lifecycle stage that failed.
	pub fn stage(&self) -> Stage {
		match self {
			SocketError::Create { .. } => Stage::Create,
			SocketError::Address { .. } => Stage::Address,
			SocketError::Bind { .. } => Stage::Bind,
			SocketError::Listen { .. } => Stage::Listen,
			SocketError::Accept { .. } => Stage::Accept,
			SocketError::Connect { .. } => Stage::Connect,
			SocketError::Read { .. } => Stage::Read,
			SocketError::Write { .. } => Stage::Write,
			SocketError::Shutdown { .. } => Stage::Shutdown,
			SocketError::Close { .. } => Stage::Close,
		}
	}

	pub fn cause(&self) -> &Cause {
		match self {
			SocketError::Create { cause }
			| SocketError::Address { cause, .. }
			| SocketError::Bind { cause, .. }
			| SocketError::Listen { cause, .. }
			| SocketError::Accept { cause }
			| SocketError::Connect { cause, .. }
			| SocketError::Read { cause }
			| SocketError::Write { cause }
			| SocketError::Shutdown { cause }
			| SocketError::Close { cause } => cause,
		}
	}

	/// Returns the underlying OS error number, if the failure came from a syscall.
	pub fn errno(&self) -> Option<i32> {
		self.cause().errno()
	}

	/// True when the operation was rejected because of the socket's state.
	pub fn is_invalid_state(&self) -> bool {
		matches!(self.cause(), Cause::InvalidState { .. })
	}

	/// Builds the stage's own error for an out-of-order call.
	pub(crate) fn invalid_state(stage: Stage, state: State) -> Self {
		let cause = Cause::InvalidState { state };
		match stage {
			Stage::Create => SocketError::Create { cause },
			Stage::Address => SocketError::Address { addr: String::new(), cause },
			Stage::Bind => SocketError::Bind { addr: String::new(), cause },
			Stage::Listen => SocketError::Listen { backlog: 0, cause },
			Stage::Accept => SocketError::Accept { cause },
			Stage::Connect => SocketError::Connect { addr: String::new(), cause },
			Stage::Read => SocketError::Read { cause },
			Stage::Write => SocketError::Write { cause },
			Stage::Shutdown => SocketError::Shutdown { cause },
			Stage::Close => SocketError::Close { cause },
		}
	}
}

/// Failure to parse a byte quantity such as `"10 MiB"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse {input:?} as bytes: {reason}")]
pub struct ByteSizeError {
	pub input: String,
	pub reason: &'static str,
}

/// Quota validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuotaError {
	#[error("failed to parse quota {input:?}: {reason}")]
	Parse { input: String, reason: String },

	#[error("quota fraction {value} outside [0, 1]")]
	InvalidValue { value: f64 },
}

/// Configuration parse and lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("{source_name}:{line}: syntax error: {reason}")]
	Syntax { source_name: String, line: usize, reason: String },

	#[error("{source_name}:{line}: duplicate key `{key}` in section [{section}]")]
	DuplicateKey { source_name: String, line: usize, section: String, key: String },

	#[error("cannot include `{name}`: {reason}")]
	Include { name: String, reason: String },

	#[error("[{section}]: no entry `{key}`")]
	KeyNotFound { section: String, key: String },

	#[error("[{section}]: invalid value for `{key}` = {value:?}: expected {expected}")]
	InvalidValue { section: String, key: String, value: String, expected: &'static str },

	#[error("[{section}]: invalid quota `{key}`: {source}")]
	Quota { section: String, key: String, source: QuotaError },

	#[error("no config file at {path}: {source}")]
	Io { path: String, source: std::io::Error },
}

/// Any error this crate produces.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Socket(#[from] SocketError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Quota(#[from] QuotaError),

	#[error(transparent)]
	ByteSize(#[from] ByteSizeError),
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
	unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
	match errno {
		libc::EACCES => "permission denied".into(),
		libc::EADDRINUSE => "address already in use".into(),
		libc::EADDRNOTAVAIL => "address not available".into(),
		libc::EAFNOSUPPORT => "address family not supported".into(),
		libc::EAGAIN => "resource temporarily unavailable".into(),
		libc::EBADF => "bad file descriptor".into(),
		libc::ECONNREFUSED => "connection refused".into(),
		libc::ECONNRESET => "connection reset by peer".into(),
		libc::EINPROGRESS => "operation in progress".into(),
		libc::EINTR => "interrupted by signal".into(),
		libc::EINVAL => "invalid argument".into(),
		libc::EMFILE => "too many open files".into(),
		libc::ENAMETOOLONG => "name too long".into(),
		libc::ENETUNREACH => "network unreachable".into(),
		libc::ENOBUFS => "no buffer space available".into(),
		libc::ENOENT => "no such file or directory".into(),
		libc::ENOTCONN => "not connected".into(),
		libc::EOPNOTSUPP => "operation not supported".into(),
		libc::EPIPE => "broken pipe".into(),
		libc::ETIMEDOUT => "connection timed out".into(),
		_ => format!("errno {}", errno),
	}
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
	match errno {
		libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
		libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
		libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
		libc::EAGAIN => std::io::ErrorKind::WouldBlock,
		libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
		libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
		libc::EINTR => std::io::ErrorKind::Interrupted,
		libc::EINVAL => std::io::ErrorKind::InvalidInput,
		libc::ENOTCONN => std::io::ErrorKind::NotConnected,
		libc::EPIPE => std::io::ErrorKind::BrokenPipe,
		libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
		_ => std::io::ErrorKind::Other,
	}
}

impl From<SocketError> for std::io::Error {
	fn from(err: SocketError) -> Self {
		let kind = match err.cause() {
			Cause::Os { errno } | Cause::Option { errno, .. } => errno_to_kind(*errno),
			Cause::InvalidState { .. } => std::io::ErrorKind::NotConnected,
			Cause::PeerClosed => std::io::ErrorKind::ConnectionReset,
			Cause::Cancelled => std::io::ErrorKind::Interrupted,
			Cause::AckMismatch { .. } => std::io::ErrorKind::InvalidData,
			Cause::QuotaExhausted => std::io::ErrorKind::WouldBlock,
			Cause::AddressTooLong
			| Cause::Unresolved { .. }
			| Cause::FamilyMismatch => std::io::ErrorKind::InvalidInput,
			Cause::MissingDescriptor | Cause::Truncated { .. } => std::io::ErrorKind::InvalidData,
		};
		std::io::Error::new(kind, err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stage_matches_variant() {
		let err = SocketError::Connect { addr: "unix:/x".into(), cause: Cause::Os { errno: libc::ECONNREFUSED } };
		assert_eq!(err.stage(), Stage::Connect);
		assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
		assert_eq!(err.to_string(), "connect(unix:/x) failed: connection refused");
	}

	#[test]
	fn invalid_state_keeps_stage() {
		let err = SocketError::invalid_state(Stage::Write, State::Created);
		assert_eq!(err.stage(), Stage::Write);
		assert!(err.is_invalid_state());
		assert_eq!(err.errno(), None);
		assert!(err.to_string().contains("invalid state"));
	}

	#[test]
	fn converts_to_io_error_kind() {
		let io: std::io::Error = SocketError::Write { cause: Cause::Os { errno: libc::EPIPE } }.into();
		assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);

		let io: std::io::Error = SocketError::Read { cause: Cause::InvalidState { state: State::Closed } }.into();
		assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);
	}
}
