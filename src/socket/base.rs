use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::addr::{Endpoint, Family, ToSockAddr};
use crate::error::{Cause, SocketError, Stage, errno};
use crate::quota::Quota;

use super::completion::Slot;
use super::{DEFAULT_READ_CHUNK, Kind, Shutdown, State, io, options};

/// What a transfer needs from its socket. Cloned into async workers so the
/// descriptor stays open until the last of them finishes.
#[derive(Clone)]
pub(crate) struct Link {
	pub(crate) fd: Arc<OwnedFd>,
	pub(crate) quota: Option<Arc<Quota>>,
	pub(crate) cancelled: Arc<AtomicBool>,
	pub(crate) kind: Kind,
}

/// One communication endpoint: a stream or datagram socket in the Unix,
/// IPv4 or IPv6 family, moving through the [`State`] lifecycle.
///
/// Every failing call returns the [`SocketError`] variant of its stage.
/// Calls made from the wrong state fail the same way with
/// [`Cause::InvalidState`].
///
/// # Example
/// ```ignore
/// let mut server = SocketBase::new(Family::Ipv4, Kind::Stream)?;
/// server.set_reuse_addr(true)?;
/// server.bind(&"127.0.0.1:0".parse()?)?;
/// server.listen(DEFAULT_BACKLOG)?;
/// let conn = server.accept()?;
/// let data = conn.receive_data()?;
/// ```
pub struct SocketBase {
	fd: Option<Arc<OwnedFd>>,
	family: Family,
	kind: Kind,
	state: State,
	local: Option<Endpoint>,
	peer: Option<Endpoint>,
	unlink_on_close: Option<PathBuf>,
	quota: Option<Arc<Quota>>,
	acknowledge: bool,
	read_chunk: usize,
	cancelled: Arc<AtomicBool>,
	pending: Mutex<Vec<Arc<Slot>>>,
}

impl SocketBase {
	/// Creates the descriptor (`socket()` with `SOCK_CLOEXEC`).
	pub fn new(family: Family, kind: Kind) -> Result<Self, SocketError> {
		let fd = unsafe { libc::socket(family.raw(), kind.raw() | libc::SOCK_CLOEXEC, 0) };
		if fd == -1 {
			return Err(SocketError::Create { cause: Cause::last_os() });
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		tracing::debug!(%family, %kind, fd = fd.as_raw_fd(), "socket created");
		Ok(Self::from_fd(fd, family, kind, State::Created))
	}

	fn from_fd(fd: OwnedFd, family: Family, kind: Kind, state: State) -> Self {
		Self {
			fd: Some(Arc::new(fd)),
			family,
			kind,
			state,
			local: None,
			peer: None,
			unlink_on_close: None,
			quota: None,
			acknowledge: false,
			read_chunk: DEFAULT_READ_CHUNK,
			cancelled: Arc::new(AtomicBool::new(false)),
			pending: Mutex::new(Vec::new()),
		}
	}

	/// Binds to `endpoint`. Valid from `Created`.
	///
	/// A Unix path bound here is unlinked again by [`SocketBase::close`].
	pub fn bind(&mut self, endpoint: &Endpoint) -> Result<(), SocketError> {
		let fd = self.expect_state(Stage::Bind, |s| s == State::Created)?;
		let resolved = endpoint.resolve(self.family)?;
		let endpoint: &Endpoint = &resolved;
		self.check_family(endpoint)?;

		let result = endpoint.with_raw(|ptr, len| unsafe { libc::bind(fd, ptr, len) });
		match result {
			Some(-1) => {
				return Err(SocketError::Bind { addr: endpoint.to_string(), cause: Cause::last_os() });
			}
			Some(_) => {}
			None => return Err(address_error(endpoint, Cause::AddressTooLong)),
		}

		if let Endpoint::Unix(addr) = endpoint {
			self.unlink_on_close = addr.as_path().map(PathBuf::from);
		}
		self.local = io::local_name(fd).or_else(|| Some(endpoint.clone()));
		self.state = State::Bound;
		tracing::debug!(local = %endpoint, "socket bound");
		Ok(())
	}

	/// Starts listening. Valid from `Bound`.
	pub fn listen(&mut self, backlog: i32) -> Result<(), SocketError> {
		let fd = self.expect_state(Stage::Listen, |s| s == State::Bound)?;
		if unsafe { libc::listen(fd, backlog) } == -1 {
			return Err(SocketError::Listen { backlog, cause: Cause::last_os() });
		}
		self.state = State::Listening;
		tracing::debug!(backlog, local = ?self.local, "socket listening");
		Ok(())
	}

	/// Waits for a connection and returns it as a new `Connected` socket.
	///
	/// The new socket shares this one's quota and copies its
	/// acknowledgement and read chunk settings. This socket stays
	/// `Listening`.
	pub fn accept(&self) -> Result<SocketBase, SocketError> {
		let fd = self.expect_state(Stage::Accept, |s| s == State::Listening)?;
		let (conn, peer) = io::accept(fd).map_err(|cause| SocketError::Accept { cause })?;

		let mut accepted = Self::from_fd(conn, self.family, self.kind, State::Connected);
		accepted.local = io::local_name(accepted.raw_fd());
		accepted.peer = peer;
		accepted.quota = self.quota.clone();
		accepted.acknowledge = self.acknowledge;
		accepted.read_chunk = self.read_chunk;
		tracing::debug!(peer = ?accepted.peer, fd = accepted.raw_fd(), "connection accepted");
		Ok(accepted)
	}

	/// Connects to `endpoint`. Valid from `Created` or `Bound`.
	///
	/// Datagram sockets become `Connected` too; sends then go to
	/// `endpoint`.
	pub fn connect(&mut self, endpoint: &Endpoint) -> Result<(), SocketError> {
		let fd = self.expect_state(Stage::Connect, |s| matches!(s, State::Created | State::Bound))?;
		let resolved = endpoint.resolve(self.family)?;
		let endpoint: &Endpoint = &resolved;
		self.check_family(endpoint)?;
		let connect_err = |cause| SocketError::Connect { addr: endpoint.to_string(), cause };

		let result = endpoint.with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) });
		match result {
			Some(-1) if errno() == libc::EINTR => {
				// The handshake carries on in the kernel; wait for it.
				self.finish_interrupted_connect(fd).map_err(connect_err)?;
			}
			Some(-1) => return Err(connect_err(Cause::last_os())),
			Some(_) => {}
			None => return Err(address_error(endpoint, Cause::AddressTooLong)),
		}

		self.peer = io::peer_name(fd).or_else(|| Some(endpoint.clone()));
		self.local = io::local_name(fd);
		self.state = State::Connected;
		tracing::debug!(peer = %endpoint, local = ?self.local, "socket connected");
		Ok(())
	}

	fn finish_interrupted_connect(&self, fd: RawFd) -> Result<(), Cause> {
		let mut poll = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
		loop {
			let n = unsafe { libc::poll(&mut poll, 1, -1) };
			if n >= 0 {
				break;
			}
			let e = errno();
			if e != libc::EINTR {
				return Err(Cause::Os { errno: e });
			}
		}
		match self.take_error_raw()? {
			Some(errno) => Err(Cause::Os { errno }),
			None => Ok(()),
		}
	}

	/// Shuts down one or both directions. Valid from `Connected`.
	pub fn shutdown(&mut self, how: Shutdown) -> Result<(), SocketError> {
		let fd = self.expect_state(Stage::Shutdown, |s| s == State::Connected)?;
		io::shutdown(fd, how.raw()).map_err(|cause| SocketError::Shutdown { cause })?;
		self.state = State::Shutdown(how);
		tracing::debug!(?how, "socket shut down");
		Ok(())
	}

	/// Closes the socket. Valid from every state but `Closed`.
	///
	/// Pending async sends resolve with a cancelled write error, blocked
	/// workers are woken by shutting the transport down, and a Unix path
	/// bound by this socket is removed.
	pub fn close(&mut self) -> Result<(), SocketError> {
		if self.state == State::Closed {
			return Err(SocketError::invalid_state(Stage::Close, State::Closed));
		}
		self.state = State::Closed;
		self.cancelled.store(true, Ordering::Release);

		let cancelled = std::mem::take(&mut *self.pending.lock())
			.into_iter()
			.filter(|slot| slot.cancel())
			.count();

		let fd = self.fd.take();
		if let Some(fd) = &fd {
			if Arc::strong_count(fd) > 1 {
				// ENOTCONN is expected for sockets that never connected.
				let _ = io::shutdown(fd.as_raw_fd(), libc::SHUT_RDWR);
			}
		}

		if let Some(path) = self.unlink_on_close.take() {
			if let Err(err) = std::fs::remove_file(&path) {
				if err.kind() != std::io::ErrorKind::NotFound {
					tracing::warn!(path = %path.display(), %err, "failed to unlink socket path");
				}
			}
		}

		tracing::debug!(cancelled, "socket closed");
		match fd.map(Arc::try_unwrap) {
			Some(Ok(owned)) => {
				let raw = owned.into_raw_fd();
				if unsafe { libc::close(raw) } == -1 {
					return Err(SocketError::Close { cause: Cause::last_os() });
				}
				Ok(())
			}
			// A worker still holds the descriptor; it closes on the last drop.
			Some(Err(_)) | None => Ok(()),
		}
	}

	#[inline]
	pub fn state(&self) -> State {
		self.state
	}

	#[inline]
	pub fn family(&self) -> Family {
		self.family
	}

	#[inline]
	pub fn kind(&self) -> Kind {
		self.kind
	}

	/// Address this socket is bound to, once bound or connected.
	pub fn local_endpoint(&self) -> Option<&Endpoint> {
		self.local.as_ref()
	}

	/// Address of the connected peer.
	pub fn peer_endpoint(&self) -> Option<&Endpoint> {
		self.peer.as_ref()
	}

	/// Raw descriptor, `None` once closed.
	pub fn as_raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	pub fn quota(&self) -> Option<&Arc<Quota>> {
		self.quota.as_ref()
	}

	/// Paces every later transfer by `quota`. Sockets sharing the `Arc`
	/// share its budget.
	pub fn set_quota(&mut self, quota: Option<Arc<Quota>>) {
		self.quota = quota;
	}

	pub fn acknowledge(&self) -> bool {
		self.acknowledge
	}

	/// Turns the ACK handshake on: synchronous sends wait for an [`ACK`]
	/// byte, receives answer with one.
	///
	/// [`ACK`]: super::ACK
	pub fn set_acknowledge(&mut self, enable: bool) {
		self.acknowledge = enable;
	}

	pub fn read_chunk(&self) -> usize {
		self.read_chunk
	}

	/// Size of each `recv` call. Zero is raised to one byte.
	pub fn set_read_chunk(&mut self, size: usize) {
		self.read_chunk = size.max(1);
	}

	pub fn set_reuse_addr(&self, enable: bool) -> Result<(), SocketError> {
		let fd = self.open_fd(Stage::Bind)?;
		options::set_reuse_addr(fd, enable).map_err(|cause| SocketError::Bind {
			addr: String::new(),
			cause,
		})
	}

	pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
		let fd = self.open_fd(Stage::Read)?;
		options::set_recv_buffer_size(fd, size).map_err(|cause| SocketError::Read { cause })
	}

	pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
		let fd = self.open_fd(Stage::Write)?;
		options::set_send_buffer_size(fd, size).map_err(|cause| SocketError::Write { cause })
	}

	/// Kernel receive buffer size as reported by SO_RCVBUF.
	pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
		let fd = self.open_fd(Stage::Read)?;
		options::recv_buffer_size(fd).map_err(|cause| SocketError::Read { cause })
	}

	pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
		let fd = self.open_fd(Stage::Write)?;
		options::send_buffer_size(fd).map_err(|cause| SocketError::Write { cause })
	}

	/// Non-blocking receives fail with EAGAIN instead of waiting.
	pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
		let fd = self.open_fd(Stage::Create)?;
		options::set_nonblocking(fd, nonblocking).map_err(|cause| SocketError::Create { cause })
	}

	/// SO_LINGER, applied when the socket closes.
	pub fn set_linger(&self, linger: Option<u32>) -> Result<(), SocketError> {
		let fd = self.open_fd(Stage::Close)?;
		options::set_linger(fd, linger).map_err(|cause| SocketError::Close { cause })
	}

	/// Reads and clears the pending socket error (SO_ERROR).
	pub fn take_error(&self) -> Result<Option<i32>, SocketError> {
		self.take_error_raw().map_err(|cause| SocketError::Read { cause })
	}

	fn take_error_raw(&self) -> Result<Option<i32>, Cause> {
		match &self.fd {
			Some(fd) => options::take_error(&**fd),
			None => Err(Cause::InvalidState { state: self.state }),
		}
	}

	/// Async sends not yet resolved.
	pub fn pending_sends(&self) -> usize {
		self.pending.lock().iter().filter(|slot| !slot.is_resolved()).count()
	}

	pub(crate) fn register(&self, slot: Arc<Slot>) {
		let mut pending = self.pending.lock();
		pending.retain(|slot| !slot.is_resolved());
		pending.push(slot);
	}

	/// Transfer context for a send, if the write side is open.
	pub(crate) fn writer(&self) -> Result<Link, SocketError> {
		self.link(Stage::Write, State::can_send)
	}

	/// Transfer context for a receive, if the read side is open.
	pub(crate) fn reader(&self) -> Result<Link, SocketError> {
		self.link(Stage::Read, State::can_receive)
	}

	fn link(&self, stage: Stage, allowed: fn(State) -> bool) -> Result<Link, SocketError> {
		match &self.fd {
			Some(fd) if allowed(self.state) => Ok(Link {
				fd: fd.clone(),
				quota: self.quota.clone(),
				cancelled: self.cancelled.clone(),
				kind: self.kind,
			}),
			_ => Err(SocketError::invalid_state(stage, self.state)),
		}
	}

	fn expect_state(&self, stage: Stage, allowed: impl Fn(State) -> bool) -> Result<RawFd, SocketError> {
		match &self.fd {
			Some(fd) if allowed(self.state) => Ok(fd.as_raw_fd()),
			_ => Err(SocketError::invalid_state(stage, self.state)),
		}
	}

	fn open_fd(&self, stage: Stage) -> Result<&OwnedFd, SocketError> {
		self.fd
			.as_deref()
			.ok_or_else(|| SocketError::invalid_state(stage, self.state))
	}

	fn raw_fd(&self) -> RawFd {
		self.as_raw_fd().unwrap_or(-1)
	}

	fn check_family(&self, endpoint: &Endpoint) -> Result<(), SocketError> {
		if endpoint.family() != Some(self.family) {
			return Err(address_error(endpoint, Cause::FamilyMismatch));
		}
		Ok(())
	}
}

fn address_error(endpoint: &Endpoint, cause: Cause) -> SocketError {
	SocketError::Address { addr: endpoint.to_string(), cause }
}

impl Drop for SocketBase {
	fn drop(&mut self) {
		if self.state != State::Closed {
			if let Err(err) = self.close() {
				tracing::warn!(%err, "error closing socket on drop");
			}
		}
	}
}

impl fmt::Debug for SocketBase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SocketBase")
			.field("fd", &self.as_raw_fd())
			.field("family", &self.family)
			.field("kind", &self.kind)
			.field("state", &self.state)
			.field("local", &self.local)
			.field("peer", &self.peer)
			.field("acknowledge", &self.acknowledge)
			.field("quota", &self.quota)
			.finish()
	}
}
