//! The bounded, multi-worker job queue.
//!
//! Grounded on the original's `ThreadPool`: a fixed-size [`ThreadGroup`] of
//! workers pulling from a shared job queue, an admission cap on how many
//! jobs may be outstanding (queued or running, tracked in the live-job
//! map) at once, and a job-id map so a worker
//! finishing one task can drop its own bookkeeping entry (the original's
//! `reduce_worker_handler`/`task_finish_handler` pair) right after
//! `execute` returns -- deliberately *not* via a callback on the handle
//! itself, since a handle's callbacks can run arbitrary user code (which
//! may call back into this same pool) and ordering that against the
//! pool's own bookkeeping removal is exactly the kind of subtle
//! lock-reentrancy hazard this design avoids by keeping the two separate.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::async_result::{AsyncResult, AsyncResultPtr, Callback};
use crate::error::{self, Error, Result};
use crate::thread_group::{ThreadGroup, ThreadHandle};
use crate::{debug, info, warn};

/// Construction-time tuning for a [`WorkPool`].
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
	/// Worker threads to start with.
	pub workers: usize,

	/// Maximum number of jobs allowed to sit in the queue awaiting a free
	/// worker. `0` means unbounded.
	pub max_queue: usize
}

impl PoolConfig {
	#[must_use]
	pub const fn new(workers: usize, max_queue: usize) -> Self {
		Self { workers, max_queue }
	}
}

impl Default for PoolConfig {
	/// One worker per available core, unbounded queue.
	fn default() -> Self {
		Self { workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get), max_queue: 0 }
	}
}

type JobId = u64;

struct Queue {
	running: bool,
	workers: usize,
	next_job_id: JobId,
	pending: VecDeque<(JobId, AsyncResultPtr)>,
	jobs: std::collections::HashMap<JobId, AsyncResultPtr>
}

impl Queue {
	fn new() -> Self {
		Self {
			running: false,
			workers: 0,
			next_job_id: 0,
			pending: VecDeque::new(),
			jobs: std::collections::HashMap::new()
		}
	}

	fn outstanding(&self) -> usize {
		self.jobs.len()
	}
}

/// A bounded thread pool executing [`AsyncResult`] tasks.
///
/// Call [`run`](Self::run) once to start the worker threads, then
/// [`submit`](Self::submit) tasks; each submission returns the
/// [`AsyncResultPtr`] that will resolve once the task runs. Call
/// [`stop`](Self::stop) to end the pool's loop; unstarted jobs are
/// cancelled, and already-running jobs are optionally interrupted.
pub struct WorkPool {
	state: Mutex<Queue>,
	cond: Condvar,
	threads: ThreadGroup,
	config: PoolConfig
}

impl WorkPool {
	/// Construct a pool with `config`. The pool does nothing until
	/// [`run`](Self::run) is called.
	#[must_use]
	pub fn new(config: PoolConfig) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(Queue::new()),
			cond: Condvar::new(),
			threads: ThreadGroup::new(),
			config
		})
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// The number of worker threads the pool currently targets: the count
	/// it was started (or last resized) to, not a live recount of the
	/// underlying thread group -- a thread signalled by `reduce_workers`
	/// stays in the group until it actually notices and exits, so
	/// `threads.size()` would overcount right after a reduction.
	#[must_use]
	pub fn worker_count(&self) -> usize {
		self.lock().workers
	}

	/// Start the worker threads and begin draining the queue. Each worker
	/// loops: take the oldest pending job, execute it, remove its entry
	/// from the job map, repeat; when the queue is empty it waits on the
	/// pool's condition variable.
	///
	/// # Errors
	///
	/// Returns [`error::Kind::PoolAlreadyRunning`] if `run` was already
	/// called and [`stop`](Self::stop) hasn't returned since.
	pub fn run(self: &Arc<Self>) -> Result<()> {
		{
			let mut state = self.lock();

			if state.running {
				return Err(Error::from(error::Kind::PoolAlreadyRunning));
			}

			state.running = true;
			state.workers = self.config.workers;
		}

		info!(target: self.as_ref(), "## run() workers={}", self.config.workers);

		for _ in 0..self.config.workers {
			let pool = self.clone();

			self.threads.create_thread(move |ctx| pool.worker_loop(&ctx));
		}

		Ok(())
	}

	fn worker_loop(self: &Arc<Self>, ctx: &ThreadHandle) {
		loop {
			let (job_id, ar) = {
				let mut state = self.lock();

				loop {
					if !state.running {
						return;
					}

					if let Some(job) = state.pending.pop_front() {
						break job;
					}

					if ctx.cancelled() {
						return;
					}

					let (guard, _) = self
						.cond
						.wait_timeout_while(state, Duration::from_millis(200), |state| {
							state.running && state.pending.is_empty()
						})
						.unwrap_or_else(PoisonError::into_inner);

					state = guard;
				}
			};

			ar.execute();

			let mut state = self.lock();

			state.jobs.remove(&job_id);

			if state.outstanding() == 0 && state.pending.is_empty() {
				self.cond.notify_all();
			}
		}
	}

	/// Submit `task`, registering `callback` (if given) for every terminal
	/// event -- equivalent to calling [`AsyncResult::add_all`] on the
	/// returned handle, but guaranteed to be in place before the task has
	/// any chance to run. Returns the handle the caller uses to track or
	/// cancel it.
	///
	/// # Errors
	///
	/// Returns [`error::Kind::PoolNotRunning`] if [`run`](Self::run) has not
	/// been called, or [`error::Kind::PoolFull`] if the queue is already at
	/// its configured `max_queue`.
	pub fn submit<F>(
		self: &Arc<Self>, task: F, callback: Option<Callback>
	) -> Result<AsyncResultPtr>
	where
		F: FnOnce(&AsyncResult) + Send + 'static
	{
		let ar = AsyncResult::new(task);
		let mut state = self.lock();

		if !state.running {
			return Err(Error::from(error::Kind::PoolNotRunning));
		}

		if self.config.max_queue > 0 && state.outstanding() >= self.config.max_queue {
			warn!(target: self.as_ref(), "## submit() rejected, queue full");

			return Err(Error::from(error::Kind::PoolFull));
		}

		if let Some(callback) = callback {
			ar.add_all(callback);
		}

		let job_id = state.next_job_id;
		state.next_job_id = state.next_job_id.wrapping_add(1);

		state.pending.push_back((job_id, ar.clone()));
		state.jobs.insert(job_id, ar.clone());
		drop(state);

		self.cond.notify_one();
		debug!(target: self.as_ref(), "## submit() job_id={job_id}");

		Ok(ar)
	}

	/// Cancel every job this pool is still tracking as outstanding. A job
	/// that hasn't started becomes `CANCELLED`; a job already `RUNNING` is
	/// unaffected by `cancel()` itself, but is dropped from the live-job
	/// map here regardless, since this call's contract is that no job it
	/// touches remains tracked afterward.
	pub fn cancel_all(&self) {
		// Swap out the whole live-job map, not just the pending queue: a
		// handle left in `jobs` is, by the crate's own invariant, never
		// terminal, and only this map's entries -- not `pending`, a subset
		// of it -- are what `outstanding()`/`wait()` actually watch. `cancel`
		// fires a handle's CANCEL/ALL callbacks synchronously, and those are
		// arbitrary user code that may itself call back into this pool (submit
		// a follow-up job, for instance) -- so the map is taken out and the
		// lock released before cancelling anything, rather than calling out
		// to user code while held.
		let jobs = std::mem::take(&mut self.lock().jobs);

		for (_, ar) in jobs {
			ar.cancel();
		}

		// `jobs` may have just gone from non-empty to empty with `pending`
		// already empty (every outstanding job was running, none queued),
		// which is exactly the condition a blocked `wait()` is watching for.
		self.cond.notify_all();
	}

	/// Block until the queue is drained and no jobs are outstanding, or
	/// until `timeout_ms` elapses (`0` means wait forever). Returns `false`
	/// if the timeout elapsed first.
	#[must_use]
	pub fn wait(&self, timeout_ms: u64) -> bool {
		let state = self.lock();
		let is_idle = |state: &Queue| state.pending.is_empty() && state.outstanding() == 0;

		if is_idle(&state) {
			return true;
		}

		if timeout_ms == 0 {
			let _ = self
				.cond
				.wait_while(state, |state| !is_idle(state))
				.unwrap_or_else(PoisonError::into_inner);

			return true;
		}

		let (state, timeout) = self
			.cond
			.wait_timeout_while(state, Duration::from_millis(timeout_ms), |state| !is_idle(state))
			.unwrap_or_else(PoisonError::into_inner);

		!timeout.timed_out() || is_idle(&state)
	}

	/// Stop the pool's loop. Jobs still waiting in the queue are cancelled.
	/// If `interrupt` is set, running jobs have their
	/// [`WorkContext::cancelled`](crate::async_result::WorkContext::cancelled)
	/// flag raised; this call then blocks until every worker thread exits.
	pub fn stop(&self, interrupt: bool) {
		let (pending, live) = {
			let mut state = self.lock();

			if !state.running {
				return;
			}

			state.running = false;

			let pending = std::mem::take(&mut state.pending);
			let live: Vec<_> = state.jobs.values().cloned().collect();

			state.jobs.clear();

			(pending, live)
		};

		// Raise every live job's own cancellation flag first: a job still
		// in `pending` hasn't started, so this is a harmless no-op for it
		// (it's about to be cancelled outright below); a job a worker is
		// mid-`execute` on is the only way this flag reaches the task body,
		// since `ThreadGroup`'s own per-thread flag (raised below by
		// `join_and_interrupt_all`) only ever governs an *idle* worker's
		// exit, not a task already running on one.
		if interrupt {
			for ar in &live {
				ar.context().request_cancel();
			}
		}

		// Released the lock above before cancelling: a handle's CANCEL/ALL
		// callbacks are arbitrary user code that may call back into this
		// pool, which would otherwise deadlock against this same thread.
		for (_, ar) in pending {
			ar.cancel();
		}

		self.cond.notify_all();
		info!(target: self, "## stop(interrupt={interrupt})");

		if interrupt {
			self.threads.join_and_interrupt_all(0);
		} else {
			self.threads.join_all();
		}
	}

	/// Add `n` additional worker threads to a running pool.
	///
	/// # Errors
	///
	/// Returns [`error::Kind::PoolNotRunning`] if the pool hasn't been
	/// started.
	pub fn add_workers(self: &Arc<Self>, n: usize) -> Result<()> {
		{
			let mut state = self.lock();

			if !state.running {
				return Err(Error::from(error::Kind::PoolNotRunning));
			}

			state.workers += n;
		}

		for _ in 0..n {
			let pool = self.clone();

			self.threads.create_thread(move |ctx| pool.worker_loop(&ctx));
		}

		Ok(())
	}

	/// Request that `n` worker threads stop once they finish (or are
	/// waiting for) their current job. This does not interrupt a job that
	/// is already running; it just tells up to `n` idle-or-between-jobs
	/// workers to exit their loop the next time they'd otherwise block,
	/// leaving the rest of the group untouched.
	///
	/// # Errors
	///
	/// Returns [`error::Kind::InvalidArgument`] if `n` is greater than or
	/// equal to the pool's current worker count -- reducing by at least the
	/// whole group would leave nothing to drain the queue.
	pub fn reduce_workers(&self, n: usize) -> Result<()> {
		let mut state = self.lock();

		if n >= state.workers {
			return Err(Error::invalid_argument(format!(
				"cannot reduce by {n} workers, pool only has {}",
				state.workers
			)));
		}

		state.workers -= n;
		drop(state);

		self.threads.interrupt_n(n);
		self.cond.notify_all();

		Ok(())
	}
}

impl Drop for WorkPool {
	fn drop(&mut self) {
		self.stop(true);
	}
}
