// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! GRANDPA primitives: votes, justifications, and the authority-set change
//! digests the import pipeline hands to the authority-set manager.

use codec::{Decode, Encode};
use sp_blockchain::BlockInfo;
use sp_consensus_babe::{Authority, AuthorityId};

/// The two phases of a GRANDPA round.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug, Hash)]
pub enum VoteKind {
	PrimaryPropose,
	Prevote,
	Precommit,
}

/// A single signed vote cast by a voter in a round.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct SignedVote {
	pub kind: VoteKind,
	pub round: u64,
	pub set_id: u64,
	pub target: BlockInfo,
	pub voter: AuthorityId,
	pub signature: [u8; 64],
}

/// Bundle of precommits totalling supermajority weight for a target block.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Justification {
	pub round: u64,
	pub set_id: u64,
	pub target: BlockInfo,
	pub precommits: Vec<SignedVote>,
}

/// `τ = ⌈2W/3⌉ + 1`.
pub fn supermajority_threshold(total_weight: u64) -> u64 {
	(2 * total_weight).div_ceil(3) + 1
}

/// An action attached to a [`ScheduledChangeDigest`]: enact or force a new
/// authority set, disable a misbehaving authority, or pause/resume voting.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum ScheduledAction {
	EnactAt { activate_at: u64, authorities: Vec<Authority> },
	ForceAt { activate_at: u64, authorities: Vec<Authority> },
	Disable { authority_index: u64 },
	Pause { activate_at: u64 },
	Resume { activate_at: u64 },
}

/// The consensus-digest payload carrying a scheduled/forced authority-set
/// change or a pause/resume/disable instruction, observed by the import
/// pipeline and forwarded to the authority-set manager.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct ScheduledChangeDigest {
	pub action: ScheduledAction,
}

/// Signature verification oracle: signing/verification schemes themselves
/// (Ed25519/Sr25519) are out of scope, exposed here as a port.
pub trait VoteSignatureOracle: Send + Sync {
	fn verify(&self, voter: &AuthorityId, message: &[u8], signature: &[u8; 64]) -> bool;
}

/// The canonical signed payload for a vote: `(round, set_id, kind, target)`.
pub fn vote_signing_payload(round: u64, set_id: u64, kind: VoteKind, target: &BlockInfo) -> Vec<u8> {
	(round, set_id, kind, target).encode()
}
