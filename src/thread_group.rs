//! A managed set of worker OS threads.
//!
//! Mirrors the original's `ThreadGroup`: a hash set of threads behind a
//! single lock, with bulk join/interrupt operations. The original extended
//! `boost::thread_group` and relied on `boost::thread::interrupt()`, a
//! cooperative cancellation point baked into every blocking boost call.
//! Rust threads have no such built-in interruption point, so each managed
//! thread here carries its own [`WorkContext`](crate::async_result::WorkContext) --
//! the same cooperative flag a task polls -- and a completion latch that lets
//! [`join_and_interrupt_all`](ThreadGroup::join_and_interrupt_all) wait with a
//! timeout, something `JoinHandle::join` cannot do on its own.

use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::async_result::WorkContext;
use crate::debug;

struct Latch {
	done: Mutex<bool>,
	cond: Condvar
}

impl Latch {
	fn new() -> Self {
		Self { done: Mutex::new(false), cond: Condvar::new() }
	}

	fn signal(&self) {
		*self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
		self.cond.notify_all();
	}

	/// Wait up to `timeout` for the latch, or forever if `None`. Returns
	/// whether it fired.
	fn wait(&self, timeout: Option<Duration>) -> bool {
		let guard = self.done.lock().unwrap_or_else(PoisonError::into_inner);

		match timeout {
			None => *self
				.cond
				.wait_while(guard, |done| !*done)
				.unwrap_or_else(PoisonError::into_inner),
			Some(timeout) => {
				let (guard, result) = self
					.cond
					.wait_timeout_while(guard, timeout, |done| !*done)
					.unwrap_or_else(PoisonError::into_inner);

				*guard || !result.timed_out()
			}
		}
	}
}

/// One thread under management: its join handle, its cooperative
/// interruption flag, and a latch the worker body signals on exit.
struct Managed {
	handle: JoinHandle<()>,
	context: Arc<WorkContext>,
	latch: Arc<Latch>
}

/// A reference to a thread running under a [`ThreadGroup`], handed to the
/// worker closure so it can poll for interruption.
pub type ThreadHandle = Arc<WorkContext>;

/// Manages a set of worker threads as a unit: spawn, interrupt, and join
/// them in bulk. Used internally by [`WorkPool`](crate::WorkPool), but
/// useful on its own for any fixed or resizable pool of OS threads.
pub struct ThreadGroup {
	threads: RwLock<Vec<Managed>>
}

impl ThreadGroup {
	#[must_use]
	pub fn new() -> Self {
		Self { threads: RwLock::new(Vec::new()) }
	}

	/// Spawn a thread running `body` and add it to the group. `body`
	/// receives its own [`ThreadHandle`] to poll for interruption via
	/// [`WorkContext::cancelled`].
	///
	/// # Panics
	///
	/// Panics if the OS refuses to spawn a new thread.
	pub fn create_thread<F>(&self, body: F) -> ThreadId
	where
		F: FnOnce(ThreadHandle) + Send + 'static
	{
		let context = Arc::new(WorkContext::new());
		let latch = Arc::new(Latch::new());

		let spawned_context = context.clone();
		let spawned_latch = latch.clone();

		let handle = thread::Builder::new()
			.spawn(move || {
				body(spawned_context);
				spawned_latch.signal();
			})
			.expect("failed to spawn worker thread");

		let id = handle.id();

		self.threads
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(Managed { handle, context, latch });

		debug!(target: self, "## create_thread() = {:?}", id);

		id
	}

	/// The number of threads currently managed (joined-or-not).
	#[must_use]
	pub fn size(&self) -> usize {
		self.threads.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	/// The ids of every managed thread.
	#[must_use]
	pub fn all_threads(&self) -> Vec<ThreadId> {
		self.threads
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.map(|managed| managed.handle.id())
			.collect()
	}

	/// Request cooperative interruption of every managed thread, without
	/// waiting for any of them to actually stop.
	pub fn interrupt_all(&self) {
		debug!(target: self, "## interrupt_all()");

		for managed in self.threads.read().unwrap_or_else(PoisonError::into_inner).iter() {
			managed.context.request_cancel();
		}
	}

	/// Request cooperative interruption of at most `n` managed threads that
	/// haven't already been asked to stop. Returns how many were actually
	/// signalled (fewer than `n` if not enough not-yet-cancelled threads
	/// remain). Used to shrink a group by an exact count rather than
	/// interrupting every member.
	pub fn interrupt_n(&self, n: usize) -> usize {
		let mut signalled = 0;

		for managed in self.threads.read().unwrap_or_else(PoisonError::into_inner).iter() {
			if signalled >= n {
				break;
			}

			if !managed.context.cancelled() {
				managed.context.request_cancel();
				signalled += 1;
			}
		}

		debug!(target: self, "## interrupt_n({n}) signalled={signalled}");

		signalled
	}

	/// Join every managed thread, blocking as long as it takes. The group
	/// is empty afterward.
	pub fn join_all(&self) {
		let drained = std::mem::take(&mut *self.threads.write().unwrap_or_else(PoisonError::into_inner));

		debug!(target: self, "## join_all() draining {} threads", drained.len());

		for managed in drained {
			let _ = managed.handle.join();
		}
	}

	/// Join each managed thread, waiting up to `timeout_ms` for it (`0`
	/// means don't wait at all). Any thread that doesn't finish in time is
	/// sent an interrupt request and then joined unconditionally -- the
	/// request only helps if the thread's task actually polls
	/// [`WorkContext::cancelled`]; a task that never does can still make
	/// this call block, which is the inherent limit of cooperative
	/// cancellation without a forced thread kill. So this call always
	/// returns with the group empty, but not always promptly.
	pub fn join_and_interrupt_all(&self, timeout_ms: u64) {
		let drained = std::mem::take(&mut *self.threads.write().unwrap_or_else(PoisonError::into_inner));
		let timeout = Duration::from_millis(timeout_ms);

		debug!(
			target: self,
			"## join_and_interrupt_all({}) draining {} threads",
			timeout_ms,
			drained.len()
		);

		for managed in drained {
			if !managed.latch.wait(Some(timeout)) {
				managed.context.request_cancel();
			}

			let _ = managed.handle.join();
		}
	}
}

impl Default for ThreadGroup {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for ThreadGroup {
	fn drop(&mut self) {
		self.interrupt_all();
		self.join_all();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;

	#[test]
	fn create_and_join_all() {
		let group = ThreadGroup::new();
		let counter = Arc::new(AtomicU32::new(0));

		for _ in 0..4 {
			let counter = counter.clone();

			group.create_thread(move |_ctx| {
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}

		assert_eq!(group.size(), 4);
		group.join_all();
		assert_eq!(group.size(), 0);
		assert_eq!(counter.load(Ordering::SeqCst), 4);
	}

	#[test]
	fn interrupt_all_sets_context_flag_observed_by_worker() {
		let group = ThreadGroup::new();
		let observed = Arc::new(AtomicU32::new(0));

		let observed_worker = observed.clone();

		group.create_thread(move |ctx| {
			while !ctx.cancelled() {
				thread::sleep(Duration::from_millis(5));
			}
			observed_worker.fetch_add(1, Ordering::SeqCst);
		});

		group.interrupt_all();
		group.join_all();

		assert_eq!(observed.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn interrupt_n_signals_only_that_many_threads() {
		let group = ThreadGroup::new();
		let observed = Arc::new(AtomicU32::new(0));

		for _ in 0..4 {
			let observed = observed.clone();

			group.create_thread(move |ctx| {
				while !ctx.cancelled() {
					thread::sleep(Duration::from_millis(5));
				}
				observed.fetch_add(1, Ordering::SeqCst);
			});
		}

		let signalled = group.interrupt_n(2);
		assert_eq!(signalled, 2);

		// Give the two signalled workers a moment to notice and exit; the
		// other two must still be parked, not interrupted.
		thread::sleep(Duration::from_millis(50));
		assert_eq!(observed.load(Ordering::SeqCst), 2);

		group.interrupt_all();
		group.join_all();
		assert_eq!(observed.load(Ordering::SeqCst), 4);
	}

	#[test]
	fn join_and_interrupt_all_reclaims_slow_threads() {
		let group = ThreadGroup::new();

		group.create_thread(|ctx| {
			while !ctx.cancelled() {
				thread::sleep(Duration::from_millis(5));
			}
		});

		group.join_and_interrupt_all(20);
		assert_eq!(group.size(), 0);
	}
}
