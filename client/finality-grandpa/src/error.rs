use sc_consensus::{Class, ErrorClass};
use sp_blockchain::{BlockHash, BlockInfo};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("block {0:?} is not a known ancestor")]
	UnknownAncestor(BlockInfo),
	#[error("activation number {activate_at} is before announcement block {at}")]
	InvalidActivation { at: u64, activate_at: u64 },
	#[error(transparent)]
	Finalize(#[from] FinalizeJustificationError),
	#[error("vote from {0:?} is not a member of the active voter set")]
	UnknownVoter(sp_consensus_babe::AuthorityId),
	#[error("round {0} already completed")]
	RoundAlreadyCompleted(u64),
}

impl ErrorClass for Error {
	fn class(&self) -> Class {
		match self {
			Error::UnknownAncestor(_) | Error::InvalidActivation { .. } => Class::Structural,
			Error::Finalize(_) | Error::UnknownVoter(_) => Class::Validation,
			Error::RoundAlreadyCompleted(_) => Class::Structural,
		}
	}
}

/// Why a justification (either one we assembled, or one received over the
/// wire via `Fin`) failed to verify.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FinalizeJustificationError {
	#[error("precommit signature does not verify")]
	BadSignature,
	#[error("precommit voter {0:?} is not in the active set")]
	UnknownVoter(sp_consensus_babe::AuthorityId),
	#[error("precommit weight {0} is below the supermajority threshold {1}")]
	BelowThreshold(u64, u64),
	#[error("justification targets {justification:?} but round {round} precommit-ghost is {ghost:?}")]
	TargetMismatch { round: u64, justification: BlockHash, ghost: BlockHash },
}
