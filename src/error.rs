//! Errors surfaced synchronously by the pool's API.
//!
//! These are distinct from task failures: a task that panics or returns an
//! error is captured onto its own [`AsyncResult`](crate::AsyncResult) and
//! never becomes an [`Error`] here (see [`crate::async_result::TaskError`]).
//! This module only covers misuse of the pool itself: submitting past the
//! admission cap, calling lifecycle methods out of order, or asking a
//! pool to do something it does not implement.

use std::fmt::{self, Debug, Display, Formatter};
use std::io;
use std::result;

pub type Result<T> = result::Result<T, Error>;

/// The reason a [`WorkPool`](crate::WorkPool) call was rejected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind {
	/// An argument violated a precondition the caller should have checked.
	InvalidArgument,

	/// The admission cap (`max_queue`) would be exceeded by this submission.
	PoolFull,

	/// The call requires a running pool, but `run()` has not been called
	/// (or `stop()` already returned).
	PoolNotRunning,

	/// `run()` was called on a pool that is already running.
	PoolAlreadyRunning,

	/// The operation is not supported by this kind of pool.
	MethodNotSupported
}

impl Kind {
	const fn message(self) -> &'static str {
		match self {
			Self::InvalidArgument => "invalid argument",
			Self::PoolFull => "work pool admission queue is full",
			Self::PoolNotRunning => "work pool is not running",
			Self::PoolAlreadyRunning => "work pool is already running",
			Self::MethodNotSupported => "method not supported by this pool"
		}
	}
}

/// A pool-level error: raised synchronously to the caller, never stored on
/// an `AsyncResult`.
pub struct Error {
	kind: Kind,
	message: Option<String>
}

impl Error {
	#[must_use]
	pub const fn new(kind: Kind) -> Self {
		Self { kind, message: None }
	}

	pub fn with_message<M: Into<String>>(kind: Kind, message: M) -> Self {
		Self { kind, message: Some(message.into()) }
	}

	#[must_use]
	pub const fn kind(&self) -> Kind {
		self.kind
	}

	pub fn invalid_argument<M: Into<String>>(message: M) -> Self {
		Self::with_message(Kind::InvalidArgument, message)
	}
}

impl Debug for Error {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
		let mut debug = fmt.debug_struct("Error");

		debug.field("kind", &self.kind);

		if let Some(message) = &self.message {
			debug.field("message", message);
		}

		debug.finish()
	}
}

impl Display for Error {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
		match &self.message {
			Some(message) => write!(fmt, "{}: {}", self.kind.message(), message),
			None => write!(fmt, "{}", self.kind.message())
		}
	}
}

impl std::error::Error for Error {}

impl From<Kind> for Error {
	fn from(kind: Kind) -> Self {
		Self::new(kind)
	}
}

impl From<Error> for io::Error {
	fn from(value: Error) -> Self {
		let kind = match value.kind {
			Kind::InvalidArgument => io::ErrorKind::InvalidInput,
			Kind::PoolFull => io::ErrorKind::WouldBlock,
			Kind::PoolNotRunning | Kind::PoolAlreadyRunning | Kind::MethodNotSupported => {
				io::ErrorKind::Other
			}
		};

		Self::new(kind, value)
	}
}
