use codec::{Decode, Encode};
use sp_blockchain::BlockInfo;
use sp_consensus_babe::AuthorityId;
use sp_consensus_grandpa::{Justification, SignedVote, VoteKind};

/// Informational "I am at round R, set S" gossip used to drive catch-up
/// on a network partition.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct NeighborPacket {
	pub round: u64,
	pub set_id: u64,
	pub commit_finalized_height: u64,
}

/// The `GrandpaMessage` wire tagged union.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum GrandpaMessage {
	Vote(SignedVote),
	Commit(Justification),
	NeighborPacket(NeighborPacket),
	CatchUpRequest { round: u64, set_id: u64 },
	CatchUpResponse { round: u64, set_id: u64, prevotes: Vec<SignedVote>, precommits: Vec<SignedVote> },
}

/// The external gossip transport for GRANDPA messages; peer-to-peer
/// transport and multiplexing are handled by the surrounding network host.
pub trait GrandpaNetwork: Send + Sync {
	fn broadcast(&self, message: GrandpaMessage);
}

/// Local signing oracle: out of scope (signature schemes are
/// external crypto oracles). Produces the 64-byte signature over the
/// canonical `(round, set_id, kind, target)` payload.
pub trait VoteSigner: Send + Sync {
	fn id(&self) -> AuthorityId;
	fn sign(&self, round: u64, set_id: u64, kind: VoteKind, target: &BlockInfo) -> [u8; 64];
}

/// A narrow read-only view onto the import pipeline's `BlockTree`: "what's
/// the best block we currently know about descending from `base`?" Kept
/// separate from `sc_consensus::Ancestry` since prevoting needs a concrete
/// candidate, not just an ancestry predicate.
pub trait ChainQuery: Send + Sync {
	fn best_containing(&self, base: BlockInfo) -> BlockInfo;
}
