//! A bounded thread pool where every submission returns a synchronizing
//! [`AsyncResult`](async_result::AsyncResult) handle instead of a bare
//! `JoinHandle`.
//!
//! The handle tracks its own lifecycle (`WAIT` -> `RUNNING` -> one terminal
//! state), stores a type-erased result or captured error, and dispatches
//! category-filtered callbacks exactly once. The [`WorkPool`](work_pool::WorkPool)
//! drives handles across a resizable [`ThreadGroup`](thread_group::ThreadGroup),
//! with bounded admission and graceful shutdown.

pub mod async_result;
pub mod error;
pub mod log;
pub mod thread_group;
pub mod work_pool;

pub use async_result::{
	AsyncResult, AsyncResultPtr, Callback, CallbackKind, CallbackMask, Status, Task, TaskError,
	WorkContext
};
pub use error::{Error, Result};
pub use thread_group::{ThreadGroup, ThreadHandle};
pub use work_pool::{PoolConfig, WorkPool};
