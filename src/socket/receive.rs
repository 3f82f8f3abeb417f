use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::buffer::Bytes;
use crate::error::{Cause, SocketError};

use super::base::{Link, SocketBase};
use super::{ACK, Kind, RECORD_SEPARATOR, io};

fn read_err(cause: Cause) -> SocketError {
	SocketError::Read { cause }
}

impl SocketBase {
	/// Receives what the peer has sent so far.
	///
	/// Blocks for the first chunk, then keeps reading while more data is
	/// already waiting. Answers with [`ACK`] when acknowledgement is on.
	/// A peer that closed before sending anything fails with
	/// [`Cause::PeerClosed`].
	///
	/// On a datagram socket this is exactly one whole datagram, which may
	/// be empty.
	pub fn receive_data(&self) -> Result<Bytes, SocketError> {
		let link = self.reader()?;
		if self.kind() == Kind::Datagram {
			let data = self.read_datagram(&link, None)?;
			self.reply_ack(&link)?;
			tracing::trace!(len = data.len(), "received datagram");
			return Ok(data);
		}
		let mut data = Bytes::with_capacity(self.read_chunk());
		if self.read_into(&link, &mut data, None)? == 0 {
			return Err(read_err(Cause::PeerClosed));
		}
		self.drain_pending(&link, &mut data)?;
		self.reply_ack(&link)?;
		tracing::trace!(len = data.len(), "received data");
		Ok(data)
	}

	/// [`SocketBase::receive_data`] split at each [`RECORD_SEPARATOR`].
	pub fn receive_records(&self) -> Result<Vec<Bytes>, SocketError> {
		let data = self.receive_data()?;
		Ok(data.split(|&b| b == RECORD_SEPARATOR).map(Bytes::from).collect())
	}

	/// Receives data together with a descriptor the peer passed.
	///
	/// Fails with [`Cause::MissingDescriptor`] when the first chunk carries
	/// none.
	pub fn receive_with_fd(&self) -> Result<(Bytes, OwnedFd), SocketError> {
		let link = self.reader()?;
		let mut passed = None;
		let data = if self.kind() == Kind::Datagram {
			let data = self.read_datagram(&link, Some(&mut passed))?;
			passed.ok_or(read_err(Cause::MissingDescriptor)).map(|fd| (data, fd))
		} else {
			let mut data = Bytes::with_capacity(self.read_chunk());
			let n = self.read_into(&link, &mut data, Some(&mut passed))?;
			match passed {
				Some(fd) => Ok((data, fd)),
				None if n == 0 => Err(read_err(Cause::PeerClosed)),
				None => Err(read_err(Cause::MissingDescriptor)),
			}
		};
		let (mut data, passed) = data?;
		if self.kind() != Kind::Datagram {
			self.drain_pending(&link, &mut data)?;
		}
		self.reply_ack(&link)?;
		tracing::trace!(len = data.len(), fd = passed.as_raw_fd(), "received data with descriptor");
		Ok((data, passed))
	}

	/// Reads until the peer shuts down its write side.
	///
	/// Unlike [`SocketBase::receive_data`] an immediate end of stream is
	/// not an error; the result is then empty. A datagram socket has no end
	/// of stream, so this returns the next datagram.
	pub fn receive_to_end(&self) -> Result<Bytes, SocketError> {
		let link = self.reader()?;
		if self.kind() == Kind::Datagram {
			return self.read_datagram(&link, None);
		}
		let mut data = Bytes::with_capacity(self.read_chunk());
		while self.read_into(&link, &mut data, None)? > 0 {}
		tracing::trace!(len = data.len(), "received to end of stream");
		Ok(data)
	}

	/// One `recv` of at most a read chunk, paced by the quota, appended to
	/// `data`.
	fn read_into(
		&self,
		link: &Link,
		data: &mut Bytes,
		passed: Option<&mut Option<OwnedFd>>,
	) -> Result<usize, SocketError> {
		let want = match &link.quota {
			Some(quota) => quota
				.throttle(self.read_chunk())
				.ok_or(read_err(Cause::QuotaExhausted))?,
			None => self.read_chunk(),
		};

		let buf = data.as_mut_buf();
		let start = buf.len();
		buf.resize(start + want, 0);
		let fd = link.fd.as_raw_fd();
		let result = match passed {
			Some(slot) => io::recv_with_fd(fd, &mut buf[start..], 0).map(|(n, fd)| {
				*slot = fd;
				n
			}),
			None => io::recv(fd, &mut buf[start..], 0),
		};
		let n = match result {
			Ok(n) => n,
			Err(cause) => {
				buf.truncate(start);
				return Err(read_err(cause));
			}
		};
		buf.truncate(start + n);
		Ok(n)
	}

	/// One whole datagram, sized by peeking at the queue head and paced as
	/// a single grant.
	fn read_datagram(&self, link: &Link, passed: Option<&mut Option<OwnedFd>>) -> Result<Bytes, SocketError> {
		let fd = link.fd.as_raw_fd();
		let len = io::next_datagram_len(fd).map_err(read_err)?;
		if let Some(quota) = &link.quota {
			quota.throttle_exact(len).ok_or(read_err(Cause::QuotaExhausted))?;
		}

		let mut data = Bytes::with_capacity(len);
		let buf = data.as_mut_buf();
		buf.resize(len, 0);
		let n = match passed {
			Some(slot) => io::recv_with_fd(fd, &mut buf[..], libc::MSG_TRUNC).map(|(n, fd)| {
				*slot = fd;
				n
			}),
			None => io::recv_datagram(fd, &mut buf[..]),
		}
		.map_err(read_err)?;
		buf.truncate(n);
		Ok(data)
	}

	fn drain_pending(&self, link: &Link, data: &mut Bytes) -> Result<(), SocketError> {
		let fd: RawFd = link.fd.as_raw_fd();
		while io::has_pending(fd) {
			if self.read_into(link, data, None)? == 0 {
				break;
			}
		}
		Ok(())
	}

	fn reply_ack(&self, link: &Link) -> Result<(), SocketError> {
		if !self.acknowledge() {
			return Ok(());
		}
		io::send(link.fd.as_raw_fd(), &[ACK], libc::MSG_NOSIGNAL)
			.map(|_| ())
			.map_err(|cause| SocketError::Write { cause })
	}
}
