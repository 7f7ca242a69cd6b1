use codec::{Decode, Encode};

/// Tag identifying which consensus engine a digest item belongs to, e.g.
/// `b"BABE"` or `b"FRNK"` (GRANDPA).
pub type ConsensusEngineId = [u8; 4];

/// A single entry in a header's digest log.
///
/// Mirrors the generic `DigestItem` used throughout Substrate: engines never
/// invent their own header field, they stash opaque payloads here and decode
/// them back out by engine id.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum DigestItem {
	/// Pre-runtime digest produced by the block author before execution
	/// (e.g. the BABE pre-digest).
	PreRuntime(ConsensusEngineId, Vec<u8>),
	/// Digest produced by the runtime during execution, observed by the
	/// import pipeline (e.g. scheduled/forced authority-set changes, the
	/// BABE next-epoch descriptor).
	Consensus(ConsensusEngineId, Vec<u8>),
	/// The block author's seal over the rest of the header. Always last
	/// when present, and stripped before the header reaches the runtime.
	Seal(ConsensusEngineId, Vec<u8>),
}

impl DigestItem {
	pub fn engine_id(&self) -> ConsensusEngineId {
		match self {
			DigestItem::PreRuntime(id, _) | DigestItem::Consensus(id, _) | DigestItem::Seal(id, _) => *id,
		}
	}

	pub fn as_consensus(&self, engine: ConsensusEngineId) -> Option<&[u8]> {
		match self {
			DigestItem::Consensus(id, data) if *id == engine => Some(data),
			_ => None,
		}
	}

	pub fn as_pre_runtime(&self, engine: ConsensusEngineId) -> Option<&[u8]> {
		match self {
			DigestItem::PreRuntime(id, data) if *id == engine => Some(data),
			_ => None,
		}
	}
}
