use async_trait::async_trait;
use sp_blockchain::{BlockHash, BlockHeader};
use sp_consensus_babe::AuthoritySet;
use sp_consensus_grandpa::Justification;

use crate::error::{AuthoritySetIngestError, JustificationError, ValidationError};

/// Checks a block header's consensus seal before execution.
/// Implemented by `sc_consensus_babe::BlockValidator`.
pub trait BlockValidator: Send + Sync {
	fn validate_header(&self, header: &BlockHeader) -> Result<(), ValidationError>;
}

/// An ancestry oracle over whatever block tree the caller holds. Lets
/// `AuthoritySetObserver` walk its own schedule tree against the import
/// pipeline's `BlockTree` without owning it.
pub trait Ancestry {
	fn is_descendant_of(&self, ancestor: &BlockHash, descendant: &BlockHash) -> bool;
}

/// The authority-set manager, as seen by the import pipeline: it only needs
/// to *ingest* digests and finalization events. Implemented by
/// `sc_consensus_grandpa::AuthoritySetManager`.
pub trait AuthoritySetObserver: Send + Sync {
	fn on_scheduled_change(
		&self,
		at: sp_blockchain::BlockInfo,
		new_set: AuthoritySet,
		activate_at: sp_blockchain::BlockNumber,
		tree: &dyn Ancestry,
	) -> Result<(), AuthoritySetIngestError>;

	fn on_forced_change(
		&self,
		at: sp_blockchain::BlockInfo,
		new_set: AuthoritySet,
		activate_at: sp_blockchain::BlockNumber,
		tree: &dyn Ancestry,
	) -> Result<(), AuthoritySetIngestError>;

	fn on_disabled(&self, at: sp_blockchain::BlockInfo, authority_index: u64, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError>;

	fn on_pause(&self, at: sp_blockchain::BlockInfo, activate_at: sp_blockchain::BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError>;

	fn on_resume(&self, at: sp_blockchain::BlockInfo, activate_at: sp_blockchain::BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError>;

	fn on_finalize(&self, block: sp_blockchain::BlockInfo, tree: &dyn Ancestry);
}

/// The GRANDPA voter, as seen by the import pipeline: it only needs to
/// ingest justifications observed in imported blocks.
/// Implemented by `sc_consensus_grandpa::GrandpaVoter`.
pub trait JustificationHandler: Send + Sync {
	fn import_justification(&self, justification: Justification) -> Result<(), JustificationError>;
}

/// A peer identifier. Out of scope: the transport and peer-routing
/// implementation behind it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PeerId(pub String);

/// One page of a `BlocksResponse` wire message.
#[derive(Clone, Debug)]
pub struct BlockData {
	pub hash: BlockHash,
	pub header: Option<BlockHeader>,
	pub body: Option<Vec<sp_blockchain::Extrinsic>>,
	pub justification: Option<Justification>,
}

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
	#[error("peer request timed out")]
	Timeout,
	#[error("stream reset")]
	StreamReset,
}

/// The external libp2p-style transport: `send`, `broadcast`,
/// `open_stream` collapse here into the two operations the core subsystem
/// actually needs.
#[async_trait]
pub trait NetworkHandle: Send + Sync {
	async fn request_blocks(&self, peer: PeerId, from: BlockHash, to: BlockHash) -> Result<Vec<BlockData>, NetworkError>;
	fn broadcast_block(&self, header: BlockHeader, body: Vec<sp_blockchain::Extrinsic>);
}

/// One of the events the core emits for the surrounding RPC collaborator
/// to forward to subscribers. The import
/// pipeline is the only thing that calls [`RpcSink::emit`]; the RPC
/// transport itself (session handling, subscription bookkeeping) is out of
/// scope.
#[derive(Clone, Debug)]
pub enum RpcEvent {
	/// `chain.newHead`: a new best block was imported.
	NewHead(sp_blockchain::BlockInfo),
	/// `chain.finalizedHead`.
	FinalizedHead(sp_blockchain::BlockInfo),
	/// `state.storage`: a key changed in the state committed by a newly
	/// finalized block.
	StorageChanged(sp_blockchain::BlockInfo, Vec<u8>),
	/// An extrinsic's lifecycle transitioned, keyed by its hash.
	Extrinsic(BlockHash, ExtrinsicStatus),
}

/// The extrinsic lifecycle states named in §6: `Future`, `Ready`,
/// `Broadcast(peers)`, `InBlock(hash)`, `Finalized(hash)`, `Invalid`.
#[derive(Clone, Debug)]
pub enum ExtrinsicStatus {
	Future,
	Ready,
	Broadcast(Vec<PeerId>),
	InBlock(BlockHash),
	Finalized(BlockHash),
	Invalid,
}

/// Where `RpcEvent`s go. A no-op implementation is provided for tests and
/// for a node that runs with no RPC collaborator attached.
pub trait RpcSink: Send + Sync {
	fn emit(&self, event: RpcEvent);
}

/// Drops every event; the default when no RPC collaborator is wired in.
pub struct NoopRpcSink;

impl RpcSink for NoopRpcSink {
	fn emit(&self, _event: RpcEvent) {}
}

/// The handful of observations worth exporting to Prometheus: named after
/// what each call site already knows at the point it would log it, not
/// after any particular metrics backend's naming convention.
pub trait Metrics: Send + Sync {
	fn observe_import_duration(&self, seconds: f64);
	fn set_best_block(&self, number: sp_blockchain::BlockNumber);
	fn set_finalized_block(&self, number: sp_blockchain::BlockNumber);
	fn inc_votes(&self);
}

/// Discards every observation; the default when no Prometheus registry is
/// wired in.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
	fn observe_import_duration(&self, _seconds: f64) {}
	fn set_best_block(&self, _number: sp_blockchain::BlockNumber) {}
	fn set_finalized_block(&self, _number: sp_blockchain::BlockNumber) {}
	fn inc_votes(&self) {}
}
