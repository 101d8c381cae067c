//! The synchronizing result handle returned by [`WorkPool::submit`](crate::WorkPool::submit).
//!
//! An [`AsyncResult`] owns one task through its lifecycle: `WAIT` until a
//! worker picks it up, `RUNNING` while the task body executes, then exactly
//! one terminal state. Every field lives behind a single mutex, mirroring
//! the original design's choice of a blocking mutex over a spinlock -- once
//! more than a handful of threads contend on it, a spinlock's busy-wait
//! loses to a mutex that can park, and only a mutex gives us a condition
//! variable to block `wait()` on.

use std::any::Any;
use std::fmt::{self, Debug, Display, Formatter};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use enumflags2::{bitflags, BitFlags};

use crate::{debug, trace};

/// The lifecycle of an [`AsyncResult`]. `Wait` is the only source state;
/// the four states after `Running` are absorbing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
	Wait,
	Running,
	Success,
	Error,
	Cancelled,
	Interrupted
}

impl Status {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(
			self,
			Self::Success | Self::Error | Self::Cancelled | Self::Interrupted
		)
	}
}

/// Which terminal events a callback wants to hear about.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallbackKind {
	Success = 0x1,
	Error   = 0x2,
	Cancel  = 0x4,
	Interrupt = 0x8
}

pub type CallbackMask = BitFlags<CallbackKind>;

fn callback_kind(status: Status) -> Option<CallbackKind> {
	Some(match status {
		Status::Success => CallbackKind::Success,
		Status::Error => CallbackKind::Error,
		Status::Cancelled => CallbackKind::Cancel,
		Status::Interrupted => CallbackKind::Interrupt,
		Status::Wait | Status::Running => return None
	})
}

/// Per-task cooperative cancellation flag.
///
/// Rust has no portable equivalent of signalling an arbitrary OS thread to
/// unwind mid-task, so a running task is interrupted by convention rather
/// than by force: it polls [`WorkContext::cancelled`] at a safe point and,
/// if set, calls [`interrupt`] to resolve its own handle as `INTERRUPTED`.
pub struct WorkContext {
	cancelled: AtomicBool
}

impl WorkContext {
	pub(crate) const fn new() -> Self {
		Self { cancelled: AtomicBool::new(false) }
	}

	#[must_use]
	pub fn cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Relaxed)
	}

	pub(crate) fn request_cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}

	fn reset(&self) {
		self.cancelled.store(false, Ordering::Relaxed);
	}
}

/// The distinguished panic payload a task raises (via [`interrupt`]) to be
/// resolved as `INTERRUPTED` instead of `ERROR`.
struct Interrupted;

/// Abandon the current task because [`WorkContext::cancelled`] was observed.
///
/// This unwinds the task's stack like any other panic, but `execute` treats
/// it as the distinguished interruption outcome: the handle resolves to
/// `INTERRUPTED`, its `INTERRUPT` callbacks fire, and the panic is then
/// resumed so the worker thread genuinely unwinds (letting the pool shrink
/// by one worker, just as an externally interrupted OS thread would).
pub fn interrupt() -> ! {
	std::panic::panic_any(Interrupted)
}

/// A task's captured failure: either a panic payload or a value the task
/// deliberately raised via [`std::panic::panic_any`].
///
/// The payload is kept behind its own mutex rather than requiring `Sync`
/// from the caller's error type, since `catch_unwind` only guarantees
/// `Send`: the original `Box<dyn Any + Send>` payload may not be `Sync`,
/// and a mutex is `Sync` for any `Send` content.
pub struct TaskError {
	payload: Mutex<Box<dyn Any + Send>>
}

impl TaskError {
	fn from_panic(payload: Box<dyn Any + Send>) -> Self {
		Self { payload: Mutex::new(payload) }
	}

	/// Wrap a value a task raised deliberately (e.g. via [`std::panic::panic_any`]).
	pub fn new<E: Any + Send + 'static>(err: E) -> Self {
		Self::from_panic(Box::new(err))
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Any + Send>> {
		self.payload.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Inspect the captured payload as `T`, or `None` if it was some other type.
	pub fn downcast_ref<T: 'static, R>(&self, with: impl FnOnce(Option<&T>) -> R) -> R {
		with(self.lock().downcast_ref::<T>())
	}

	/// A human-readable summary. Domain error types should implement
	/// [`Display`] and downcast via [`Self::downcast_ref`] for anything richer.
	#[must_use]
	pub fn message(&self) -> String {
		let payload = self.lock();

		if let Some(msg) = payload.downcast_ref::<&str>() {
			(*msg).to_owned()
		} else if let Some(msg) = payload.downcast_ref::<String>() {
			msg.clone()
		} else {
			"unknown error".to_owned()
		}
	}
}

impl Debug for TaskError {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
		fmt.debug_struct("TaskError").field("message", &self.message()).finish()
	}
}

impl Display for TaskError {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.message(), fmt)
	}
}

impl std::error::Error for TaskError {}

pub type Task = Box<dyn FnOnce(&AsyncResult) + Send>;
pub type Callback = Box<dyn Fn(&AsyncResult) + Send + Sync>;

/// A task's result, type-tagged for a checked downcast on retrieval. Mirrors
/// the original `shared_ptr<T>`-based `Result<T>`: `get_result` hands back a
/// shared, reference-counted view rather than a copy.
type ResultSlot = Arc<dyn Any + Send + Sync>;

struct Inner {
	status: Status,
	task: Option<Task>,
	result: Option<ResultSlot>,
	error: Option<Arc<TaskError>>,
	callbacks: Vec<(CallbackMask, Callback)>
}

/// A heap-allocated, reference-shareable handle driving one task through
/// its lifecycle. Construct with [`AsyncResult::new`]; share by cloning the
/// returned [`AsyncResultPtr`].
pub struct AsyncResult {
	inner: Mutex<Inner>,
	cond: Condvar,
	context: WorkContext
}

/// The shared-pointer type clients actually hold.
pub type AsyncResultPtr = Arc<AsyncResult>;

impl AsyncResult {
	pub fn new<F>(task: F) -> AsyncResultPtr
	where
		F: FnOnce(&AsyncResult) + Send + 'static
	{
		Arc::new(Self {
			inner: Mutex::new(Inner {
				status: Status::Wait,
				task: Some(Box::new(task)),
				result: None,
				error: None,
				callbacks: Vec::new()
			}),
			cond: Condvar::new(),
			context: WorkContext::new()
		})
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// The cooperative-cancellation flag for the task currently (or about
	/// to be) running on this handle.
	#[must_use]
	pub fn context(&self) -> &WorkContext {
		&self.context
	}

	#[must_use]
	pub fn status(&self) -> Status {
		self.lock().status
	}

	#[must_use]
	pub fn exception(&self) -> Option<Arc<TaskError>> {
		self.lock().error.clone()
	}

	#[must_use]
	pub fn get_result<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		let slot = self.lock().result.clone()?;

		slot.downcast::<T>().ok()
	}

	pub fn set_result<T: Any + Send + Sync>(&self, value: T) {
		self.lock().result = Some(Arc::new(value));
	}

	pub fn clear_result(&self) {
		self.lock().result = None;
	}

	/// Register `cb`, filtered to the events named by `mask`.
	///
	/// If the handle hasn't reached a terminal state yet, `cb` is queued and
	/// fires exactly once during the terminal fan-out. If the handle is
	/// already terminal, `cb` is invoked synchronously on the calling
	/// thread right here (iff `mask` matches the stored terminal status) --
	/// this is what makes late registration safe instead of a lost wakeup.
	pub fn add_callback(&self, mask: CallbackMask, cb: Callback) {
		let terminal_status = {
			let mut inner = self.lock();

			match inner.status {
				Status::Wait | Status::Running => {
					inner.callbacks.push((mask, cb));

					return;
				}
				other => other
			}
		};

		let Some(kind) = callback_kind(terminal_status) else {
			return;
		};

		if mask.contains(kind) {
			cb(self);
		}
	}

	pub fn add_success(&self, cb: Callback) {
		self.add_callback(CallbackKind::Success.into(), cb);
	}

	pub fn add_error(&self, cb: Callback) {
		self.add_callback(CallbackKind::Error.into(), cb);
	}

	pub fn add_cancel(&self, cb: Callback) {
		self.add_callback(CallbackKind::Cancel.into(), cb);
	}

	pub fn add_interrupt(&self, cb: Callback) {
		self.add_callback(CallbackKind::Interrupt.into(), cb);
	}

	pub fn add_all(&self, cb: Callback) {
		self.add_callback(BitFlags::all(), cb);
	}

	/// Transition `from` -> `to` if the handle is currently in `from`,
	/// running `mutate` on the locked state as part of the same critical
	/// section. Returns whether this call won the race.
	fn transition(&self, from: Status, to: Status, mutate: impl FnOnce(&mut Inner)) -> bool {
		let mut inner = self.lock();

		if inner.status != from {
			return false;
		}

		inner.status = to;
		mutate(&mut inner);

		true
	}

	/// Complete a `Running -> to` transition: notify waiters, then fan the
	/// matching callbacks out, snapshotting and clearing the list first so
	/// each callback fires exactly once even if it re-enters this handle.
	fn terminate(&self, to: Status, mutate: impl FnOnce(&mut Inner)) -> bool {
		if !self.transition(Status::Running, to, mutate) {
			return false;
		}

		self.cond.notify_all();
		self.fire_callbacks(to);

		true
	}

	fn fire_callbacks(&self, status: Status) {
		let Some(kind) = callback_kind(status) else {
			return;
		};

		let callbacks = std::mem::take(&mut self.lock().callbacks);

		for (mask, cb) in callbacks {
			if mask.contains(kind) {
				// Swallow callback panics: callbacks are observers and must
				// not be able to corrupt the completion sequence.
				let _ = catch_unwind(AssertUnwindSafe(|| cb(self)));
			}
		}
	}

	/// Cancel a not-yet-started task. No-op (returns `false`) once the task
	/// has begun or already reached a terminal state.
	pub fn cancel(&self) -> bool {
		let fired = self.transition(Status::Wait, Status::Cancelled, |_| {});

		if fired {
			self.cond.notify_all();
			self.fire_callbacks(Status::Cancelled);
		}

		fired
	}

	/// Run the task if the handle is still `WAIT`. Returns whether it did.
	///
	/// A task that panics with the crate's [`interrupt`] payload resolves
	/// the handle `INTERRUPTED` and then the panic is resumed, so the
	/// calling worker thread genuinely unwinds. Any other panic resolves
	/// the handle `ERROR` with the payload captured as a [`TaskError`].
	pub fn execute(&self) -> bool {
		let task = {
			let mut inner = self.lock();

			if inner.status != Status::Wait {
				return false;
			}

			inner.status = Status::Running;
			inner.task.take()
		};

		self.context.reset();
		trace!(target: self, "## execute()");

		let Some(task) = task else {
			// Constructed handles always carry a task; this only happens if
			// `execute` somehow runs twice concurrently past the status
			// check above, which the status guard above already prevents.
			return true;
		};

		match catch_unwind(AssertUnwindSafe(|| task(self))) {
			Ok(()) => {
				self.terminate(Status::Success, |_| {});
			}
			Err(payload) => {
				if payload.downcast_ref::<Interrupted>().is_some() {
					self.terminate(Status::Interrupted, |_| {});
					debug!(target: self, "## execute() = INTERRUPTED");
					resume_unwind(payload);
				}

				let err = TaskError::from_panic(payload);

				self.terminate(Status::Error, |inner| inner.error = Some(Arc::new(err)));
			}
		}

		true
	}

	/// Block until terminal, or until `timeout_ms` elapses (`0` = forever).
	/// Returns whether the handle is terminal when this call returns.
	pub fn wait(&self, timeout_ms: u64) -> bool {
		let inner = self.lock();

		if inner.status.is_terminal() {
			return true;
		}

		if timeout_ms == 0 {
			let inner = self
				.cond
				.wait_while(inner, |inner| !inner.status.is_terminal())
				.unwrap_or_else(PoisonError::into_inner);

			return inner.status.is_terminal();
		}

		let (inner, timeout) = self
			.cond
			.wait_timeout_while(inner, Duration::from_millis(timeout_ms), |inner| {
				!inner.status.is_terminal()
			})
			.unwrap_or_else(PoisonError::into_inner);

		!timeout.timed_out() || inner.status.is_terminal()
	}
}

impl Drop for AsyncResult {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;
	use std::thread;

	use super::*;

	#[test]
	fn happy_path() {
		let ar = AsyncResult::new(|ar| ar.set_result(42i32));
		let success = Arc::new(AtomicU32::new(0));
		let all = Arc::new(AtomicU32::new(0));

		ar.add_success({
			let success = success.clone();
			Box::new(move |_| {
				success.fetch_add(1, Ordering::SeqCst);
			})
		});
		ar.add_all({
			let all = all.clone();
			Box::new(move |_| {
				all.fetch_add(1, Ordering::SeqCst);
			})
		});

		assert!(ar.execute());
		assert!(ar.wait(0));
		assert_eq!(ar.status(), Status::Success);
		assert_eq!(*ar.get_result::<i32>().unwrap(), 42);
		assert_eq!(success.load(Ordering::SeqCst), 1);
		assert_eq!(all.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn domain_error_round_trips_attached_code() {
		struct MyError {
			code: u32
		}

		let ar = AsyncResult::new(|_| std::panic::panic_any(MyError { code: 0xDEAD_BEEF }));
		let error_fired = Arc::new(AtomicU32::new(0));
		let success_fired = Arc::new(AtomicU32::new(0));

		ar.add_error({
			let error_fired = error_fired.clone();
			Box::new(move |_| {
				error_fired.fetch_add(1, Ordering::SeqCst);
			})
		});
		ar.add_success({
			let success_fired = success_fired.clone();
			Box::new(move |_| {
				success_fired.fetch_add(1, Ordering::SeqCst);
			})
		});

		assert!(ar.execute());

		assert_eq!(ar.status(), Status::Error);
		assert_eq!(error_fired.load(Ordering::SeqCst), 1);
		assert_eq!(success_fired.load(Ordering::SeqCst), 0);

		let err = ar.exception().expect("error should be captured");

		err.downcast_ref::<MyError>(|found| {
			assert_eq!(found.expect("should downcast to MyError").code, 0xDEAD_BEEF);
		});
	}

	#[test]
	fn pre_execute_cancel_prevents_task_from_running() {
		let ran = Arc::new(AtomicU32::new(0));
		let cancelled_fired = Arc::new(AtomicU32::new(0));

		let ar = {
			let ran = ran.clone();
			AsyncResult::new(move |_| {
				ran.fetch_add(1, Ordering::SeqCst);
			})
		};

		ar.add_cancel({
			let cancelled_fired = cancelled_fired.clone();
			Box::new(move |_| {
				cancelled_fired.fetch_add(1, Ordering::SeqCst);
			})
		});

		assert!(ar.cancel());
		assert!(!ar.execute());

		assert_eq!(ar.status(), Status::Cancelled);
		assert_eq!(ran.load(Ordering::SeqCst), 0);
		assert_eq!(cancelled_fired.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn worker_interruption_resumes_the_panic() {
		let ar = AsyncResult::new(|ar| {
			if !ar.context().cancelled() {
				ar.context().request_cancel();
			}

			if ar.context().cancelled() {
				interrupt();
			}
		});

		let interrupted_fired = Arc::new(AtomicU32::new(0));

		ar.add_interrupt({
			let interrupted_fired = interrupted_fired.clone();
			Box::new(move |_| {
				interrupted_fired.fetch_add(1, Ordering::SeqCst);
			})
		});

		let result = catch_unwind(AssertUnwindSafe(|| ar.execute()));

		assert!(result.is_err());
		assert_eq!(ar.status(), Status::Interrupted);
		assert_eq!(interrupted_fired.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn wait_with_timeout_returns_false_without_firing_callbacks() {
		let (lock, cond) = (Mutex::new(false), Condvar::new());
		let ar = AsyncResult::new(move |_| {
			// A task that parks forever unless told to stop; the test never
			// tells it to stop, so `wait` must time out instead of hanging.
			let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
			let _ = cond.wait(guard);
		});

		let fired = Arc::new(AtomicU32::new(0));

		ar.add_all({
			let fired = fired.clone();
			Box::new(move |_| {
				fired.fetch_add(1, Ordering::SeqCst);
			})
		});

		let ar_bg = ar.clone();

		let handle = thread::spawn(move || {
			ar_bg.execute();
		});

		assert!(!ar.wait(100));
		assert!(matches!(ar.status(), Status::Wait | Status::Running));
		assert_eq!(fired.load(Ordering::SeqCst), 0);

		// The task blocks forever; detach rather than join so this test
		// doesn't hang the suite on a leaked worker.
		drop(handle);
	}

	#[test]
	fn post_completion_registration_fires_synchronously() {
		let ar = AsyncResult::new(|ar| ar.set_result(1i32));

		assert!(ar.execute());
		assert_eq!(ar.status(), Status::Success);

		let fired = Arc::new(AtomicU32::new(0));

		ar.add_success({
			let fired = fired.clone();
			Box::new(move |_| {
				fired.fetch_add(1, Ordering::SeqCst);
			})
		});

		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}
}
