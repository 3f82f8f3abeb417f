use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Cause, SocketError};

use super::transfer::SendReport;

/// Outcome of a send.
pub type SendResult = Result<SendReport, SocketError>;
type Callback = Box<dyn FnOnce(SendResult) + Send>;

struct SlotState {
	result: Option<SendResult>,
	callback: Option<Callback>,
	/// Set once the callback has returned; waiters wake only then.
	done: bool,
}

/// One pending asynchronous send. Resolved exactly once; later
/// resolutions are ignored.
pub(crate) struct Slot {
	state: Mutex<SlotState>,
	ready: Condvar,
}

impl Slot {
	pub(crate) fn new(callback: Option<Callback>) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(SlotState { result: None, callback, done: false }),
			ready: Condvar::new(),
		})
	}

	/// Stores `result` unless the slot is already resolved. Returns whether
	/// this call won.
	pub(crate) fn resolve(&self, result: SendResult) -> bool {
		let mut state = self.state.lock();
		if state.result.is_some() {
			return false;
		}
		let callback = state.callback.take();
		state.result = Some(result.clone());
		drop(state);

		// Outside the lock: the callback may inspect the handle.
		if let Some(callback) = callback {
			callback(result);
		}
		self.state.lock().done = true;
		self.ready.notify_all();
		true
	}

	pub(crate) fn cancel(&self) -> bool {
		self.resolve(Err(SocketError::Write { cause: Cause::Cancelled }))
	}

	pub(crate) fn is_resolved(&self) -> bool {
		self.state.lock().done
	}

	fn peek(&self) -> Option<SendResult> {
		let state = self.state.lock();
		if state.done { state.result.clone() } else { None }
	}

	fn wait_until(&self, deadline: Option<Instant>) -> Option<SendResult> {
		let mut state = self.state.lock();
		while !state.done {
			match deadline {
				Some(deadline) => {
					if self.ready.wait_until(&mut state, deadline).timed_out() {
						break;
					}
				}
				None => self.ready.wait(&mut state),
			}
		}
		if state.done { state.result.clone() } else { None }
	}
}

/// Completion of a [`send_data_async`](super::SocketBase::send_data_async)
/// call.
///
/// Every handle resolves exactly once: with the transfer's report, with
/// the error that stopped it, or with a cancelled write error when the
/// socket is closed first.
#[derive(Clone)]
pub struct SendHandle {
	slot: Arc<Slot>,
}

impl SendHandle {
	pub(crate) fn new(slot: Arc<Slot>) -> Self {
		Self { slot }
	}

	/// Blocks until the send completes.
	pub fn wait(&self) -> SendResult {
		match self.slot.wait_until(None) {
			Some(result) => result,
			// A deadline-free wait only returns once resolved.
			None => Err(SocketError::Write { cause: Cause::Cancelled }),
		}
	}

	/// Blocks up to `timeout`; `None` if still pending.
	pub fn wait_timeout(&self, timeout: Duration) -> Option<SendResult> {
		self.slot.wait_until(Some(Instant::now() + timeout))
	}

	pub fn try_result(&self) -> Option<SendResult> {
		self.slot.peek()
	}

	pub fn is_complete(&self) -> bool {
		self.slot.is_resolved()
	}
}

impl fmt::Debug for SendHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SendHandle")
			.field("result", &self.slot.peek())
			.finish()
	}
}

/// Unit of work handed to a [`Spawn`] implementation.
///
/// Dropping a job without calling [`Job::run`] resolves its send as
/// cancelled.
pub struct Job {
	work: Option<Box<dyn FnOnce() + Send>>,
	slot: Arc<Slot>,
}

impl Job {
	pub(crate) fn new(slot: Arc<Slot>, work: impl FnOnce() + Send + 'static) -> Self {
		Self { work: Some(Box::new(work)), slot }
	}

	pub fn run(mut self) {
		if let Some(work) = self.work.take() {
			work();
		}
	}
}

impl Drop for Job {
	fn drop(&mut self) {
		if self.work.is_some() && self.slot.cancel() {
			tracing::debug!("async send dropped before it ran");
		}
	}
}

impl fmt::Debug for Job {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Job").field("pending", &self.work.is_some()).finish()
	}
}

/// Execution context for asynchronous sends.
pub trait Spawn {
	fn spawn(&self, job: Job);
}

impl<F: Fn(Job)> Spawn for F {
	fn spawn(&self, job: Job) {
		self(job)
	}
}

/// Runs every job on its own OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
	fn spawn(&self, job: Job) {
		let spawned = std::thread::Builder::new()
			.name("pacewire-send".into())
			.spawn(move || job.run());
		// On failure the closure, and the job with it, is dropped: the
		// send resolves as cancelled.
		if let Err(err) = spawned {
			tracing::warn!(%err, "failed to spawn send worker");
		}
	}
}
