//! Sockets with quota-paced transfers and a hierarchical configuration
//! tree that sets both up.
//!
//! - [`SocketBase`]: lifecycle (`bind`, `listen`, `accept`, `connect`,
//!   `shutdown`, `close`), synchronous and asynchronous sends, receives
//! - [`Quota`]: a fraction of a byte capacity, used to pace transfers
//! - [`ConfigParser`] / [`ConfigNode`]: nested `key = value` sections with
//!   includable sub-configurations
//! - [`SocketConfig`]: opens a socket from a configuration section

pub mod addr;
pub mod config;
pub mod socket;

mod buffer;
mod error;
mod quota;
mod size;

pub use self::addr::{Endpoint, Family, SocketAddrV4, SocketAddrV6, UnixAddr};
pub use self::buffer::Bytes;
pub use self::config::{ConfigNode, ConfigParser, FromConfigValue};
pub use self::error::{ByteSizeError, Cause, ConfigError, Error, QuotaError, SocketError, Stage, errno};
pub use self::quota::{Quota, RoundingMethod};
pub use self::size::{ByteSize, Prefix};
pub use self::socket::{
	ACK, Blocking, BufferConfig, Completion, DEFAULT_BACKLOG, DEFAULT_READ_CHUNK, Deferred, Job,
	Kind, Payload, RECORD_SEPARATOR, SendHandle, SendOptions, SendReport, SendResult, Shutdown, SocketBase,
	SocketConfig, SocketOptions, Spawn, State, ThreadSpawner,
};
