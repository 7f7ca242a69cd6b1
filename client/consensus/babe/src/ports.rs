use std::time::Duration;

use async_trait::async_trait;
use sp_blockchain::{Block, BlockInfo, Extrinsic};
use sp_consensus_babe::AuthorityId;

/// Which timer fired, fed back into the slot loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerKind {
	Slot,
}

/// A small port over `tokio::time`, kept local to this crate so the slot
/// loop can be driven by a scripted clock in tests instead of real delays.
#[async_trait]
pub trait Clock: Send + Sync {
	async fn delay(&self, duration: Duration);
}

pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
	async fn delay(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

/// Seal signing/verification: out of scope (Sr25519 signature scheme
/// itself), exposed here as a port. `id()` is the local authoring
/// identity; `verify` checks an arbitrary authority's seal during
/// validation.
pub trait SealOracle: Send + Sync {
	fn id(&self) -> AuthorityId;
	fn sign(&self, header_hash: sp_blockchain::BlockHash) -> [u8; 64];
	fn verify(&self, authority: &AuthorityId, header_hash: sp_blockchain::BlockHash, signature: &[u8; 64]) -> bool;
}

/// What the slot loop feeds transactions and inherents into to get back a
/// built, unsealed block. Out of scope: runtime execution and state-root
/// computation, which the proposer's implementation owns.
#[async_trait]
pub trait Proposer: Send + Sync {
	async fn propose(
		&self,
		parent: BlockInfo,
		inherents: Vec<Extrinsic>,
		extrinsics: Vec<Extrinsic>,
		pre_digest: sp_blockchain::DigestItem,
		deadline: Duration,
	) -> Result<Block, ProposerError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ProposerError {
	#[error("proposer could not build a block on top of {0:?} before the deadline")]
	Timeout(BlockInfo),
	#[error("proposer failed: {0}")]
	Other(String),
}

/// Supplies the mandatory inherent extrinsics (timestamp, etc.) for a slot.
/// Out of scope: inherent data formats themselves.
pub trait InherentDataProvider: Send + Sync {
	fn inherents(&self, slot: sp_blockchain::SlotNumber) -> Vec<Extrinsic>;
}

/// The two narrow queries the slot loop needs against the shared import
/// pipeline: what to build on, and what to fill the block with. Kept
/// separate from `sc_consensus::BlockExecutor`/`sc_transaction_pool::TransactionPool`
/// themselves so this crate never has to name the executor's concrete
/// `AuxStore` type parameter.
pub trait ChainState: Send + Sync {
	fn best_block(&self) -> BlockInfo;
	fn ready_extrinsics(&self, max: usize) -> Vec<Extrinsic>;
}

/// Hands a self-authored block to the shared import pipeline.
pub trait BlockSink: Send + Sync {
	fn import_own_block(&self, block: Block) -> Result<(), sc_consensus::ImportError>;
}
