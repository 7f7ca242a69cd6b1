// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Block, header and extrinsic primitives shared by every client crate, plus
//! the `Runtime` and `TrieStore` ports the core consensus subsystem treats as
//! external collaborators.

mod digest;
mod error;
mod ports;

pub use digest::{ConsensusEngineId, DigestItem};
pub use error::Error;
pub use ports::{AuxStore, MemoryAuxStore, Runtime, TrieStore};

use blake2::digest::{consts::U32, Digest as _};
use codec::{Decode, Encode};

/// 4-byte tag identifying the BABE consensus engine in digest items.
pub const BABE_ENGINE_ID: ConsensusEngineId = *b"BABE";
/// 4-byte tag identifying the GRANDPA consensus engine in digest items.
pub const GRANDPA_ENGINE_ID: ConsensusEngineId = *b"FRNK";

/// 32-byte blake2b digest identifying a block or an extrinsic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Default)]
pub struct BlockHash(pub [u8; 32]);

impl std::fmt::Debug for BlockHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{}", hex(&self.0))
	}
}

impl std::fmt::Display for BlockHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Debug::fmt(self, f)
	}
}

fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Monotone block height, genesis is 0.
pub type BlockNumber = u64;

/// Monotone real-time slot counter.
pub type SlotNumber = u64;

/// A lightweight handle identifying a known block by number and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Debug)]
pub struct BlockInfo {
	pub number: BlockNumber,
	pub hash: BlockHash,
}

impl BlockInfo {
	pub fn new(number: BlockNumber, hash: BlockHash) -> Self {
		Self { number, hash }
	}
}

/// A canonical block header.
///
/// `digests` ends with a consensus seal for every non-genesis header; callers
/// that need the pre-seal digests use [`BlockHeader::pre_seal_digests`].
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct BlockHeader {
	pub parent_hash: BlockHash,
	pub number: BlockNumber,
	pub state_root: BlockHash,
	pub extrinsics_root: BlockHash,
	pub digests: Vec<DigestItem>,
}

impl BlockHeader {
	/// Hash of the canonical SCALE encoding of this header.
	pub fn hash(&self) -> BlockHash {
		let encoded = self.encode();
		let mut hasher = blake2::Blake2b::<U32>::new();
		hasher.update(&encoded);
		let out = hasher.finalize();
		let mut buf = [0u8; 32];
		buf.copy_from_slice(&out);
		BlockHash(buf)
	}

	pub fn info(&self) -> BlockInfo {
		BlockInfo::new(self.number, self.hash())
	}

	/// All digests except a trailing seal, if one is present.
	pub fn pre_seal_digests(&self) -> &[DigestItem] {
		match self.digests.last() {
			Some(DigestItem::Seal(_, _)) => &self.digests[..self.digests.len() - 1],
			_ => &self.digests[..],
		}
	}

	/// The trailing seal digest, if present.
	pub fn seal(&self) -> Option<&DigestItem> {
		match self.digests.last() {
			d @ Some(DigestItem::Seal(_, _)) => d,
			_ => None,
		}
	}

	/// A copy of this header with the trailing seal digest stripped, for
	/// runtime execution (the runtime never sees its own seal).
	pub fn without_seal(&self) -> Self {
		let mut digests = self.digests.clone();
		if matches!(digests.last(), Some(DigestItem::Seal(_, _))) {
			digests.pop();
		}
		Self { digests, ..self.clone() }
	}
}

/// An opaque, already SCALE-encoded transaction.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Extrinsic(pub Vec<u8>);

impl Extrinsic {
	pub fn hash(&self) -> BlockHash {
		let mut hasher = blake2::Blake2b::<U32>::new();
		hasher.update(&self.0);
		let out = hasher.finalize();
		let mut buf = [0u8; 32];
		buf.copy_from_slice(&out);
		BlockHash(buf)
	}
}

/// A full block: header plus its ordered extrinsics.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Block {
	pub header: BlockHeader,
	pub body: Vec<Extrinsic>,
}

impl Block {
	pub fn deconstruct(self) -> (BlockHeader, Vec<Extrinsic>) {
		(self.header, self.body)
	}
}
