// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! BABE primitives: authority sets, epoch descriptors, the pre-digest carried
//! by every BABE-authored header, and the VRF leadership threshold.

mod threshold;

pub use threshold::{calculate_threshold, Threshold};

use codec::{Decode, Encode};
use sp_blockchain::SlotNumber;

/// A BABE/GRANDPA authority's public key bytes. Opaque here: signature
/// verification is an external crypto oracle (Sr25519/Ed25519).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Debug)]
pub struct AuthorityId(pub [u8; 32]);

/// A voting-weighted authority. Weight must be >= 1; callers that construct
/// one with weight 0 get `Authority::new` returning `None`.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Authority {
	pub id: AuthorityId,
	pub weight: u64,
}

impl Authority {
	pub fn new(id: AuthorityId, weight: u64) -> Option<Self> {
		(weight >= 1).then_some(Self { id, weight })
	}
}

/// An ordered authority list plus the monotone set-id that changes each time
/// the set is enacted.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug, Default)]
pub struct AuthoritySet {
	pub authorities: Vec<Authority>,
	pub set_id: u64,
}

impl AuthoritySet {
	pub fn total_weight(&self) -> u64 {
		self.authorities.iter().map(|a| a.weight).sum()
	}

	pub fn get(&self, index: u32) -> Option<&Authority> {
		self.authorities.get(index as usize)
	}
}

/// Index of an epoch since genesis (or since the configured unix-epoch
/// anchor, depending on the slot strategy).
pub type EpochIndex = u64;

/// Per-epoch authorities, randomness and slot schedule, written once when the
/// "next epoch" digest is observed.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct EpochDescriptor {
	pub epoch_index: EpochIndex,
	pub start_slot: SlotNumber,
	pub duration_slots: u64,
	pub authorities: Vec<Authority>,
	pub randomness: [u8; 32],
}

impl EpochDescriptor {
	pub fn contains_slot(&self, slot: SlotNumber) -> bool {
		slot >= self.start_slot && slot < self.start_slot + self.duration_slots
	}

	pub fn total_weight(&self) -> u64 {
		self.authorities.iter().map(|a| a.weight).sum()
	}
}

/// The genesis-level BABE configuration: constants that never change once
/// the chain is live.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct BabeConfiguration {
	pub slot_duration_millis: u64,
	pub epoch_length: u64,
	/// The "c" constant (numerator, denominator) in the threshold formula.
	pub c: (u64, u64),
	pub genesis_authorities: Vec<Authority>,
	pub randomness: [u8; 32],
}

/// Pre-runtime digest every BABE header carries: which slot, which
/// authority, and the VRF proof backing the leadership claim.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct BabePreDigest {
	pub slot: SlotNumber,
	pub authority_index: u32,
	pub vrf_output: [u8; 32],
	pub vrf_proof: [u8; 64],
}

/// Consensus digest carrying the next epoch's descriptor, written by the
/// runtime and observed by the import pipeline.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct NextEpochDescriptorDigest {
	pub authorities: Vec<Authority>,
	pub randomness: [u8; 32],
}

/// The two supported slot -> epoch-index strategies. Chosen at
/// configuration time; an implementer must not switch strategies on a
/// populated store.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug, serde::Serialize, serde::Deserialize)]
pub enum SlotStrategy {
	FromZero,
	FromUnixEpoch,
}

/// An oracle for VRF evaluation/verification. Out of scope: VRF
/// implementation itself (Sr25519-based), exposed here as a port.
pub trait VrfOracle: Send + Sync {
	/// Evaluate our own VRF over `input` with our keypair, for slot-claim
	/// attempts during authoring.
	fn evaluate(&self, input: &[u8]) -> ([u8; 32], [u8; 64]);

	/// Verify a claimed VRF output/proof against `input` and `authority`.
	fn verify(&self, input: &[u8], authority: &AuthorityId, output: &[u8; 32], proof: &[u8; 64]) -> bool;
}

/// Builds the VRF transcript input `randomness || slot || epoch_index`
/// shared by authoring and validation.
pub fn vrf_transcript(randomness: &[u8; 32], slot: SlotNumber, epoch_index: EpochIndex) -> Vec<u8> {
	let mut buf = Vec::with_capacity(32 + 8 + 8);
	buf.extend_from_slice(randomness);
	buf.extend_from_slice(&slot.to_le_bytes());
	buf.extend_from_slice(&epoch_index.to_le_bytes());
	buf
}
