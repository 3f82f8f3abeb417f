use std::sync::Arc;

use crate::addr::{Endpoint, Family};
use crate::config::ConfigNode;
use crate::error::{ConfigError, Error, SocketError};
use crate::quota::Quota;
use crate::size::ByteSize;

use super::{DEFAULT_BACKLOG, DEFAULT_READ_CHUNK, Kind, SocketBase};

// ============================================================================
// Option Structs
// ============================================================================

/// Kernel buffer size configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self.send = Some(size);
		self
	}

	fn apply(&self, socket: &SocketBase) -> Result<(), SocketError> {
		if let Some(size) = self.recv {
			socket.set_recv_buffer_size(size)?;
		}
		if let Some(size) = self.send {
			socket.set_send_buffer_size(size)?;
		}
		Ok(())
	}
}

/// Settings applied to a socket right after it is created.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketOptions {
	pub reuse_addr: bool,
	pub buffers: BufferConfig,
	pub backlog: i32,
	pub read_chunk: usize,
	pub acknowledge: bool,
	pub linger: Option<Option<u32>>,
	pub nonblocking: bool,
	pub quota: Option<Arc<Quota>>,
}

impl Default for SocketOptions {
	fn default() -> Self {
		Self {
			reuse_addr: false,
			buffers: BufferConfig::default(),
			backlog: DEFAULT_BACKLOG,
			read_chunk: DEFAULT_READ_CHUNK,
			acknowledge: false,
			linger: None,
			nonblocking: false,
			quota: None,
		}
	}
}

impl SocketOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reuse_addr(mut self, enable: bool) -> Self {
		self.reuse_addr = enable;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// Set listen backlog. Default: 50.
	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	/// Set the userspace receive chunk. Default: 1 KiB.
	pub fn read_chunk(mut self, size: usize) -> Self {
		self.read_chunk = size;
		self
	}

	pub fn acknowledge(mut self, enable: bool) -> Self {
		self.acknowledge = enable;
		self
	}

	pub fn linger(mut self, seconds: Option<u32>) -> Self {
		self.linger = Some(seconds);
		self
	}

	pub fn nonblocking(mut self, enable: bool) -> Self {
		self.nonblocking = enable;
		self
	}

	pub fn quota(mut self, quota: Arc<Quota>) -> Self {
		self.quota = Some(quota);
		self
	}

	pub fn apply(&self, socket: &mut SocketBase) -> Result<(), SocketError> {
		if self.reuse_addr {
			socket.set_reuse_addr(true)?;
		}
		self.buffers.apply(socket)?;
		if let Some(linger) = self.linger {
			socket.set_linger(linger)?;
		}
		if self.nonblocking {
			socket.set_nonblocking(true)?;
		}
		socket.set_read_chunk(self.read_chunk);
		socket.set_acknowledge(self.acknowledge);
		socket.set_quota(self.quota.clone());
		Ok(())
	}
}

// ============================================================================
// Config-driven sockets
// ============================================================================

/// Socket settings read from a configuration section.
///
/// ```text
/// [server]
/// bind = 127.0.0.1:7000
/// backlog = 64
/// reuse address = yes
/// receive buffer = 256 KiB
/// acknowledge = on
/// bandwidth = 10 MiB
/// quota = 25%
/// ```
///
/// `family` defaults to the family of `bind` or `connect`, IPv4 for a host
/// name; `type` defaults
/// to `stream`. A `quota` without `bandwidth` is ignored with a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
	section: String,
	pub family: Family,
	pub kind: Kind,
	pub bind: Option<Endpoint>,
	pub connect: Option<Endpoint>,
	pub options: SocketOptions,
}

impl SocketConfig {
	/// Settings for a socket of `family`/`kind` with defaults everywhere.
	pub fn new(family: Family, kind: Kind) -> Self {
		Self {
			section: String::new(),
			family,
			kind,
			bind: None,
			connect: None,
			options: SocketOptions::default(),
		}
	}

	pub fn from_node(node: &ConfigNode) -> Result<Self, Error> {
		let endpoint = |key: &str| -> Result<Option<Endpoint>, Error> {
			match node.get(key) {
				Ok(text) => Ok(Some(Endpoint::parse(text)?)),
				Err(ConfigError::KeyNotFound { .. }) => Ok(None),
				Err(err) => Err(err.into()),
			}
		};
		let bind = endpoint("bind")?;
		let connect = endpoint("connect")?;

		let family = match node.get("family") {
			Ok(name) => Family::from_name(name).ok_or_else(|| invalid(node, "family", name, "unix, ipv4 or ipv6"))?,
			Err(_) => bind
				.as_ref()
				.or(connect.as_ref())
				// Host names default to IPv4.
				.map(|endpoint| endpoint.family().unwrap_or(Family::Ipv4))
				.ok_or_else(|| ConfigError::KeyNotFound {
					section: node.path().to_string(),
					key: "family".into(),
				})?,
		};
		let kind = match node.get("type") {
			Ok(name) => Kind::from_name(name).ok_or_else(|| invalid(node, "type", name, "stream or datagram"))?,
			Err(_) => Kind::Stream,
		};

		let mut buffers = BufferConfig::new();
		if node.contains_key("receive buffer") {
			buffers = buffers.recv(byte_count(node, "receive buffer")?);
		}
		if node.contains_key("send buffer") {
			buffers = buffers.send(byte_count(node, "send buffer")?);
		}

		let mut options = SocketOptions::new()
			.reuse_addr(node.get_as_or("reuse address", false))
			.backlog(node.get_as_or("backlog", DEFAULT_BACKLOG))
			.acknowledge(node.get_as_or("acknowledge", false))
			.buffers(buffers);
		if node.contains_key("read chunk") {
			options = options.read_chunk(byte_count(node, "read chunk")?);
		}
		if let Some(quota) = quota_from(node)? {
			options = options.quota(Arc::new(quota));
		}

		tracing::debug!(section = %node.path(), %family, %kind, "socket configuration loaded");
		Ok(Self { section: node.path().to_string(), family, kind, bind, connect, options })
	}

	/// Creates the socket and applies the options.
	pub fn open(&self) -> Result<SocketBase, SocketError> {
		let mut socket = SocketBase::new(self.family, self.kind)?;
		self.options.apply(&mut socket)?;
		Ok(socket)
	}

	/// Opens, binds to `bind` and listens. Datagram sockets stop after bind.
	pub fn listen(&self) -> Result<SocketBase, Error> {
		let bind = self.bind.as_ref().ok_or_else(|| self.missing("bind"))?;
		let mut socket = self.open()?;
		socket.bind(bind)?;
		if self.kind == Kind::Stream {
			socket.listen(self.options.backlog)?;
		}
		Ok(socket)
	}

	/// Opens, binds when `bind` is set, then connects to `connect`.
	pub fn connect(&self) -> Result<SocketBase, Error> {
		let target = self.connect.as_ref().ok_or_else(|| self.missing("connect"))?;
		let mut socket = self.open()?;
		if let Some(bind) = &self.bind {
			socket.bind(bind)?;
		}
		socket.connect(target)?;
		Ok(socket)
	}

	fn missing(&self, key: &str) -> ConfigError {
		ConfigError::KeyNotFound { section: self.section.clone(), key: key.into() }
	}
}

fn invalid(node: &ConfigNode, key: &str, value: &str, expected: &'static str) -> ConfigError {
	ConfigError::InvalidValue {
		section: node.path().to_string(),
		key: key.into(),
		value: value.into(),
		expected,
	}
}

fn byte_count(node: &ConfigNode, key: &str) -> Result<usize, ConfigError> {
	let size: ByteSize = node.get_as(key)?;
	usize::try_from(size.get()).map_err(|_| invalid(node, key, &size.to_string(), "a non-negative byte quantity"))
}

fn quota_from(node: &ConfigNode) -> Result<Option<Quota>, ConfigError> {
	match (node.contains_key("bandwidth"), node.contains_key("quota")) {
		(true, true) => {
			let capacity: ByteSize = node.get_as("bandwidth")?;
			node.get_quota("quota", capacity).map(Some)
		}
		(true, false) => {
			let capacity: ByteSize = node.get_as("bandwidth")?;
			Ok(Some(Quota::unlimited(capacity)))
		}
		(false, true) => {
			tracing::warn!(section = %node.path(), "quota without bandwidth ignored");
			Ok(None)
		}
		(false, false) => Ok(None),
	}
}
