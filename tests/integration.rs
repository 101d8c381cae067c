//! Black-box scenarios exercised against the public API only, covering
//! pool-wide behavior that doesn't fit naturally inside a single module's
//! unit tests: resizing a running pool, interrupting long-running work on
//! shutdown, and callbacks observing a job submitted by another callback.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xx_workpool::async_result::interrupt;
use xx_workpool::{PoolConfig, Status, WorkPool};

#[test]
fn add_workers_increases_throughput_capacity() {
	let pool = WorkPool::new(PoolConfig::new(1, 0));

	pool.run().expect("pool should start");
	pool.add_workers(3).expect("pool is running, so this should succeed");

	assert_eq!(pool.worker_count(), 4);

	let counter = Arc::new(AtomicU32::new(0));

	for _ in 0..32 {
		let counter = counter.clone();

		pool.submit(
			move |ar| {
				counter.fetch_add(1, Ordering::SeqCst);
				ar.set_result(());
			},
			None
		)
		.expect("submit should succeed");
	}

	assert!(pool.wait(5_000));
	assert_eq!(counter.load(Ordering::SeqCst), 32);

	pool.stop(false);
}

#[test]
fn stop_with_interrupt_resolves_running_job_as_interrupted() {
	let pool = WorkPool::new(PoolConfig::new(1, 0));

	pool.run().expect("pool should start");

	let ar = pool
		.submit(
			|ar| {
				while !ar.context().cancelled() {
					std::thread::sleep(Duration::from_millis(5));
				}

				interrupt();
			},
			None
		)
		.expect("submit should succeed");

	// Give the worker a moment to actually pick the job up before stopping.
	std::thread::sleep(Duration::from_millis(50));

	pool.stop(true);

	assert_eq!(ar.status(), Status::Interrupted);
}

#[test]
fn callback_can_submit_a_follow_up_job_on_the_same_pool() {
	let pool = WorkPool::new(PoolConfig::new(2, 0));

	pool.run().expect("pool should start");

	let follow_up_ran = Arc::new(AtomicU32::new(0));
	let pool_for_callback = pool.clone();
	let follow_up_for_callback = follow_up_ran.clone();

	let first = pool
		.submit(|ar| ar.set_result(1i32), None)
		.expect("submit should succeed");

	first.add_success(Box::new(move |_| {
		let follow_up_ran = follow_up_for_callback.clone();

		pool_for_callback
			.submit(
				move |ar| {
					follow_up_ran.fetch_add(1, Ordering::SeqCst);
					ar.set_result(2i32);
				},
				None
			)
			.expect("pool is still running during the success callback");
	}));

	// The callback runs synchronously as part of finishing the first job, so
	// the follow-up job is already queued before this job is removed from the
	// outstanding set: a single `wait` covers both.
	assert!(pool.wait(5_000));

	assert_eq!(follow_up_ran.load(Ordering::SeqCst), 1);

	pool.stop(false);
}
