use sp_blockchain::{BlockHash, BlockInfo, BlockNumber};

/// The five-way error taxonomy: every error type in the import pipeline
/// implements this so `BlockExecutor` can decide retry/drop/terminate
/// without matching on concrete error variants.
pub trait ErrorClass {
	fn class(&self) -> Class;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Class {
	Structural,
	Validation,
	Integrity,
	Transient,
	Resource,
}

/// What the import pipeline should do with a block whose processing failed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImportAction {
	/// Request the missing ancestors and retry once they arrive.
	RetryGap,
	/// Discard this block only; the rest of the tree is unaffected.
	DropBlock,
	/// Unrecoverable; the caller must shut the node down.
	Terminate,
}

impl Class {
	pub fn action(self) -> ImportAction {
		match self {
			Class::Structural => ImportAction::RetryGap,
			Class::Validation => ImportAction::DropBlock,
			Class::Integrity => ImportAction::Terminate,
			Class::Transient => ImportAction::RetryGap,
			Class::Resource => ImportAction::DropBlock,
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum BlockTreeError {
	#[error("parent of block {0:?} is unknown")]
	UnknownParent(BlockHash),
	#[error("block {0:?} is already known")]
	AlreadyKnown(BlockHash),
	#[error("header {0:?} is unknown")]
	UnknownHeader(BlockHash),
}

impl ErrorClass for BlockTreeError {
	fn class(&self) -> Class {
		Class::Structural
	}
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
	#[error("seal signature does not verify")]
	InvalidSeal,
	#[error("VRF output/proof does not verify")]
	InvalidVrf,
	#[error("VRF output did not beat the leadership threshold")]
	ThresholdMissed,
	#[error("signature does not verify")]
	InvalidSignature,
	#[error("justification does not reach supermajority or does not verify")]
	InvalidJustification,
	#[error("header carries no consensus pre-digest")]
	MissingPreDigest,
	#[error("authority index {0} out of range")]
	UnknownAuthority(u32),
	#[error("no epoch descriptor for epoch {0}")]
	NoEpochData(u64),
}

impl ErrorClass for ValidationError {
	fn class(&self) -> Class {
		Class::Validation
	}
}

#[derive(thiserror::Error, Debug)]
pub enum AuthoritySetIngestError {
	#[error("block {0:?} is not a known ancestor")]
	UnknownAncestor(BlockInfo),
	#[error("activation number {activate_at} is before announcement block {at}")]
	InvalidActivation { at: BlockNumber, activate_at: BlockNumber },
}

impl ErrorClass for AuthoritySetIngestError {
	fn class(&self) -> Class {
		Class::Structural
	}
}

#[derive(thiserror::Error, Debug)]
pub enum JustificationError {
	#[error("justification targets an unknown block")]
	UnknownTarget,
	#[error(transparent)]
	Invalid(#[from] InvalidJustificationReason),
}

#[derive(thiserror::Error, Debug)]
pub enum InvalidJustificationReason {
	#[error("precommit signature does not verify")]
	BadSignature,
	#[error("precommit weight {0} is below the supermajority threshold {1}")]
	BelowThreshold(u64, u64),
	#[error("precommit voter is not in the active set")]
	UnknownVoter,
	#[error("justification set_id {0} does not match the active set_id {1}")]
	SetMismatch(u64, u64),
}

impl ErrorClass for JustificationError {
	fn class(&self) -> Class {
		Class::Validation
	}
}

/// Errors surfaced while executing a candidate block end to end.
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
	#[error(transparent)]
	BlockTree(#[from] BlockTreeError),
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Runtime(#[from] sp_blockchain::Error),
	#[error(transparent)]
	AuthoritySet(#[from] AuthoritySetIngestError),
	#[error(transparent)]
	Justification(#[from] JustificationError),
	#[error("this block is already known")]
	BlockExists,
}

impl ErrorClass for ImportError {
	fn class(&self) -> Class {
		match self {
			ImportError::BlockTree(e) => e.class(),
			ImportError::Validation(e) => e.class(),
			// A RuntimeTrap is tagged Integrity by default, but a trap during
			// execution of a single candidate block should only drop that
			// block rather than terminate the whole node.
			ImportError::Runtime(sp_blockchain::Error::RuntimeTrap { .. }) => Class::Validation,
			ImportError::Runtime(sp_blockchain::Error::StateRootMismatch { .. }) => Class::Validation,
			ImportError::Runtime(sp_blockchain::Error::TrieCorruption(_)) => Class::Integrity,
			ImportError::AuthoritySet(e) => e.class(),
			ImportError::Justification(e) => e.class(),
			ImportError::BlockExists => Class::Structural,
		}
	}
}
