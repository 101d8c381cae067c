//! A small smoke test you can run to watch the pool work: starts a pool,
//! submits a handful of tasks that deliberately vary in outcome (success,
//! a domain error, a cancellation), waits for them all, then shuts down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use xx_workpool::{PoolConfig, Status, WorkPool};

fn main() {
	let pool = WorkPool::new(PoolConfig::new(4, 64));

	pool.run().expect("pool should start cleanly");

	let completed = Arc::new(AtomicU32::new(0));
	let mut handles = Vec::new();

	for i in 0..8 {
		let completed = completed.clone();

		let ar = pool
			.submit(
				move |ar| {
					if i == 3 {
						std::panic::panic_any(format!("task {i} hit a deliberate domain error"));
					}

					ar.set_result(i * i);
				},
				Some(Box::new(move |ar: &xx_workpool::AsyncResult| {
					completed.fetch_add(1, Ordering::SeqCst);
					log::info!("job finished with status {:?}", ar.status());
				}))
			)
			.expect("submission should be admitted");

		handles.push(ar);
	}

	let cancel_me = pool.submit(|_| {}, None).expect("submission should be admitted");
	cancel_me.cancel();

	assert!(pool.wait(5_000), "all submitted jobs should finish within the timeout");

	for ar in &handles {
		match ar.status() {
			Status::Success => {
				let value = ar.get_result::<i32>().expect("success jobs set a result");
				println!("success: {value}");
			}
			Status::Error => {
				let err = ar.exception().expect("error jobs capture an exception");
				println!("error: {err}");
			}
			other => println!("unexpected status: {other:?}")
		}
	}

	println!("completed {} of {} tracked jobs", completed.load(Ordering::SeqCst), handles.len());

	pool.stop(false);
}
