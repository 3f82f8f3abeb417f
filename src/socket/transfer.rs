use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::BufMut;

use crate::buffer::Bytes;
use crate::error::{Cause, SocketError};

use super::base::{Link, SocketBase};
use super::completion::{Job, SendHandle, SendResult, Slot, Spawn};
use super::{ACK, Kind, RECORD_SEPARATOR, io};

/// What a send transmits.
///
/// Records go on the wire joined by [`RECORD_SEPARATOR`]; a single
/// payload goes as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
	Single(Bytes),
	Records(Vec<Bytes>),
}

impl Payload {
	/// Payload bytes, separators excluded.
	pub fn len(&self) -> usize {
		match self {
			Payload::Single(data) => data.len(),
			Payload::Records(records) => records.iter().map(Bytes::len).sum(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Bytes as they go on the wire.
	pub fn encode(&self) -> bytes::Bytes {
		match self {
			Payload::Single(data) => bytes::Bytes::copy_from_slice(data),
			Payload::Records(records) => {
				let separators = records.len().saturating_sub(1);
				let mut wire = bytes::BytesMut::with_capacity(self.len() + separators);
				for (i, record) in records.iter().enumerate() {
					if i > 0 {
						wire.put_u8(RECORD_SEPARATOR);
					}
					wire.put_slice(record);
				}
				wire.freeze()
			}
		}
	}
}

impl From<Bytes> for Payload {
	fn from(data: Bytes) -> Self {
		Payload::Single(data)
	}
}

impl From<&str> for Payload {
	fn from(text: &str) -> Self {
		Payload::Single(text.into())
	}
}

impl From<String> for Payload {
	fn from(text: String) -> Self {
		Payload::Single(text.into())
	}
}

impl From<&[u8]> for Payload {
	fn from(data: &[u8]) -> Self {
		Payload::Single(data.into())
	}
}

impl From<Vec<u8>> for Payload {
	fn from(data: Vec<u8>) -> Self {
		Payload::Single(data.into())
	}
}

impl From<Vec<Bytes>> for Payload {
	fn from(records: Vec<Bytes>) -> Self {
		Payload::Records(records)
	}
}

impl From<Vec<String>> for Payload {
	fn from(records: Vec<String>) -> Self {
		Payload::Records(records.into_iter().map(Bytes::from).collect())
	}
}

impl From<Vec<&str>> for Payload {
	fn from(records: Vec<&str>) -> Self {
		Payload::Records(records.into_iter().map(Bytes::from).collect())
	}
}

/// Per-send options.
///
/// # Example
/// ```ignore
/// let opts = SendOptions::new().flags(libc::MSG_DONTROUTE).pass_fd(file.as_fd());
/// socket.send_data_sync("hello", &opts)?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions<'fd> {
	pub flags: libc::c_int,
	pub fd: Option<BorrowedFd<'fd>>,
}

impl<'fd> SendOptions<'fd> {
	pub fn new() -> Self {
		Self::default()
	}

	/// `send(2)` flags. `MSG_NOSIGNAL` is always added.
	pub fn flags(mut self, flags: libc::c_int) -> Self {
		self.flags = flags;
		self
	}

	/// Passes `fd` to the peer (Unix sockets only) with the first chunk.
	pub fn pass_fd(mut self, fd: BorrowedFd<'fd>) -> Self {
		self.fd = Some(fd);
		self
	}
}

/// Outcome of a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
	/// Sum of record lengths.
	pub payload_bytes: usize,
	/// Bytes written to the transport, separators included.
	pub wire_bytes: usize,
	/// Number of send calls the transfer took.
	pub chunks: usize,
}

/// How the result of a transfer reaches the caller.
pub trait Completion {
	type Output;

	fn complete(self, result: SendResult) -> Self::Output;
}

/// Hands the result straight back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

impl Completion for Blocking {
	type Output = SendResult;

	fn complete(self, result: SendResult) -> SendResult {
		result
	}
}

/// Resolves a [`SendHandle`].
pub struct Deferred {
	slot: Arc<Slot>,
}

impl Completion for Deferred {
	type Output = ();

	fn complete(self, result: SendResult) {
		if !self.slot.resolve(result) {
			tracing::trace!("send finished after its handle was resolved");
		}
	}
}

/// Writes `wire` to the transport, paced by the link's quota, and hands the
/// outcome to `completion`.
pub(crate) fn transfer<C: Completion>(
	link: &Link,
	wire: &[u8],
	payload_bytes: usize,
	flags: libc::c_int,
	pass: Option<RawFd>,
	acknowledge: bool,
	completion: C,
) -> C::Output {
	completion.complete(run(link, wire, payload_bytes, flags, pass, acknowledge))
}

fn run(
	link: &Link,
	wire: &[u8],
	payload_bytes: usize,
	flags: libc::c_int,
	mut pass: Option<RawFd>,
	acknowledge: bool,
) -> SendResult {
	let fd = link.fd.as_raw_fd();
	let flags = flags | libc::MSG_NOSIGNAL;
	let write = |cause| SocketError::Write { cause };

	if link.kind == Kind::Datagram {
		let report = send_datagram(link, wire, payload_bytes, flags, pass)?;
		if acknowledge {
			await_ack(fd)?;
		}
		return Ok(report);
	}

	// A descriptor needs at least one byte to ride on.
	let filler = [0u8];
	let wire = if wire.is_empty() && pass.is_some() { &filler[..] } else { wire };

	let mut report = SendReport { payload_bytes, ..SendReport::default() };
	while report.wire_bytes < wire.len() {
		if link.cancelled.load(Ordering::Acquire) {
			return Err(write(Cause::Cancelled));
		}
		let rest = &wire[report.wire_bytes..];
		let grant = match &link.quota {
			Some(quota) => quota.throttle(rest.len()).ok_or(write(Cause::QuotaExhausted))?,
			None => rest.len(),
		};
		let chunk = &rest[..grant];
		let sent = match pass.take() {
			Some(passed) => io::send_with_fd(fd, chunk, flags, passed),
			None => io::send(fd, chunk, flags),
		}
		.map_err(write)?;

		report.wire_bytes += sent;
		report.chunks += 1;
		tracing::trace!(sent, total = report.wire_bytes, of = wire.len(), "chunk sent");
	}

	if acknowledge {
		await_ack(fd)?;
	}
	Ok(report)
}

/// A datagram leaves in one `send`, even when empty. The quota grants the
/// whole length at once and carries any excess as debt.
fn send_datagram(
	link: &Link,
	wire: &[u8],
	payload_bytes: usize,
	flags: libc::c_int,
	pass: Option<RawFd>,
) -> SendResult {
	let write = |cause| SocketError::Write { cause };
	if link.cancelled.load(Ordering::Acquire) {
		return Err(write(Cause::Cancelled));
	}
	if let Some(quota) = &link.quota {
		quota.throttle_exact(wire.len()).ok_or(write(Cause::QuotaExhausted))?;
	}
	let fd = link.fd.as_raw_fd();
	let sent = match pass {
		Some(passed) => io::send_with_fd(fd, wire, flags, passed),
		None => io::send(fd, wire, flags),
	}
	.map_err(write)?;
	tracing::trace!(sent, "datagram sent");
	Ok(SendReport { payload_bytes, wire_bytes: sent, chunks: 1 })
}

fn await_ack(fd: RawFd) -> Result<(), SocketError> {
	let read = |cause| SocketError::Read { cause };
	let mut reply = [0u8; 1];
	match io::recv(fd, &mut reply, 0).map_err(read)? {
		0 => Err(read(Cause::PeerClosed)),
		_ if reply[0] == ACK => Ok(()),
		_ => Err(read(Cause::AckMismatch { got: reply[0] })),
	}
}

impl SocketBase {
	/// Sends `payload` and returns once it is on the wire.
	///
	/// Same as [`SocketBase::send_data_sync`].
	pub fn send_data(
		&self,
		payload: impl Into<Payload>,
		options: &SendOptions<'_>,
	) -> Result<SendReport, SocketError> {
		self.send_data_sync(payload, options)
	}

	/// Blocks until the whole payload is written, paced by the quota.
	///
	/// With acknowledgement on, also waits for the peer's [`ACK`] byte.
	pub fn send_data_sync(
		&self,
		payload: impl Into<Payload>,
		options: &SendOptions<'_>,
	) -> Result<SendReport, SocketError> {
		let link = self.writer()?;
		let payload = payload.into();
		let wire = payload.encode();
		let pass = options.fd.map(|fd| fd.as_raw_fd());
		transfer(&link, &wire, payload.len(), options.flags, pass, self.acknowledge(), Blocking)
	}

	/// Starts a send on `spawner` and returns its handle immediately.
	///
	/// Errors, including calls from a state that cannot send, arrive
	/// through the handle.
	pub fn send_data_async<S: Spawn + ?Sized>(
		&self,
		payload: impl Into<Payload>,
		options: &SendOptions<'_>,
		spawner: &S,
	) -> SendHandle {
		self.dispatch(payload.into(), options, spawner, None)
	}

	/// Like [`SocketBase::send_data_async`], also calling `callback` once
	/// with the result.
	pub fn send_data_async_with<S, F>(
		&self,
		payload: impl Into<Payload>,
		options: &SendOptions<'_>,
		spawner: &S,
		callback: F,
	) -> SendHandle
	where
		S: Spawn + ?Sized,
		F: FnOnce(SendResult) + Send + 'static,
	{
		self.dispatch(payload.into(), options, spawner, Some(Box::new(callback)))
	}

	fn dispatch<S: Spawn + ?Sized>(
		&self,
		payload: Payload,
		options: &SendOptions<'_>,
		spawner: &S,
		callback: Option<Box<dyn FnOnce(SendResult) + Send>>,
	) -> SendHandle {
		let slot = Slot::new(callback);
		let handle = SendHandle::new(slot.clone());

		let link = match self.writer() {
			Ok(link) => link,
			Err(err) => {
				slot.resolve(Err(err));
				return handle;
			}
		};
		// The worker may outlive the caller's borrow.
		let pass: Option<OwnedFd> = match options.fd.map(|fd| fd.try_clone_to_owned()).transpose() {
			Ok(pass) => pass,
			Err(err) => {
				let errno = err.raw_os_error().unwrap_or(libc::EBADF);
				slot.resolve(Err(SocketError::Write { cause: Cause::Os { errno } }));
				return handle;
			}
		};

		self.register(slot.clone());
		let payload_bytes = payload.len();
		let wire = payload.encode();
		let flags = options.flags;
		let completion = Deferred { slot: slot.clone() };
		tracing::trace!(payload_bytes, "dispatching async send");

		spawner.spawn(Job::new(slot, move || {
			let passed = pass.as_ref().map(|fd| fd.as_raw_fd());
			transfer(&link, &wire, payload_bytes, flags, passed, false, completion);
		}));
		handle
	}
}
