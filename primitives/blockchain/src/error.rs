/// Shared error taxonomy tag, classifying an error into one of five
/// recovery strategies.
///
/// Every component error implements [`ErrorClass`] so the import pipeline can
/// decide, without matching on concrete error types, whether to retry a gap
/// fetch, drop the offending block, or terminate the process.
pub trait ErrorClass: std::error::Error {
	fn class(&self) -> Class;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Class {
	/// Recovered locally; caller decides the next action.
	Structural,
	/// Reject the message/block, keep the peer, continue.
	Validation,
	/// Fatal; abort cleanly.
	Integrity,
	/// Retried with backoff at the relevant boundary.
	Transient,
	/// Backpressure surfaced to the submitter.
	Resource,
}

/// Generic errors produced by the runtime/trie ports.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("runtime trapped while executing `{export}`: {message}")]
	RuntimeTrap { export: String, message: String },
	#[error("state root mismatch: header claims {expected:?}, computed {actual:?}")]
	StateRootMismatch { expected: super::BlockHash, actual: super::BlockHash },
	#[error("trie store corrupted: {0}")]
	TrieCorruption(String),
}

impl ErrorClass for Error {
	fn class(&self) -> Class {
		match self {
			Error::RuntimeTrap { .. } => Class::Integrity,
			Error::StateRootMismatch { .. } => Class::Validation,
			Error::TrieCorruption(_) => Class::Integrity,
		}
	}
}
