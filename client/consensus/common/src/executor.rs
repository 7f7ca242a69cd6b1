use std::sync::Arc;
use std::time::Instant;

use codec::Decode;
use sp_blockchain::{
	Block, BlockHash, BlockHeader, BlockInfo, DigestItem, Runtime, TrieStore, BABE_ENGINE_ID, GRANDPA_ENGINE_ID,
};
use sp_consensus_babe::{BabePreDigest, NextEpochDescriptorDigest, SlotStrategy};
use sp_consensus_grandpa::{Justification, ScheduledAction, ScheduledChangeDigest};
use tracing::{info, warn};

use crate::block_tree::BlockTree;
use crate::error::{ImportError, ValidationError};
use crate::ports::{Ancestry, AuthoritySetObserver, BlockValidator, ExtrinsicStatus, JustificationHandler, Metrics, RpcEvent, RpcSink};

impl Ancestry for BlockTree {
	fn is_descendant_of(&self, ancestor: &BlockHash, descendant: &BlockHash) -> bool {
		BlockTree::is_descendant_of(self, ancestor, descendant)
	}
}

/// What came of handing a block to [`BlockExecutor::apply_block`].
#[derive(Debug)]
pub enum ImportOutcome {
	Imported(BlockInfo),
	/// The block carried a justification that advanced finality.
	Finalized(BlockInfo),
	/// `block`'s parent is unknown; the executor has switched to `syncing`
	/// and the caller should drive a [`crate::sync::Synchronizer`] run
	/// from `request_from` up to `to`.
	GapDetected { request_from: BlockInfo, to: BlockHash },
}

enum ImporterState {
	Ready,
	Syncing { target: BlockHash, buffered: Vec<(Block, Option<Justification>)> },
}

/// BlockExecutor: drives a candidate block from "header
/// received" to "state committed, finality-relevant events emitted".
///
/// Single-threaded state machine (`ready`/`syncing`); announcements that
/// arrive while syncing are buffered rather than processed out of order.
pub struct BlockExecutor<S> {
	tree: BlockTree,
	pool: sc_transaction_pool::TransactionPool,
	epoch_store: Arc<sc_consensus_epochs::EpochStore<S>>,
	runtime: Arc<dyn Runtime>,
	trie: Arc<dyn TrieStore>,
	validator: Arc<dyn BlockValidator>,
	authority_observer: Arc<dyn AuthoritySetObserver>,
	justification_handler: Arc<dyn JustificationHandler>,
	rpc: Arc<dyn RpcSink>,
	metrics: Arc<dyn Metrics>,
	epoch_length: u64,
	state: ImporterState,
}

impl<S: sp_blockchain::AuxStore> BlockExecutor<S> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		tree: BlockTree,
		pool: sc_transaction_pool::TransactionPool,
		epoch_store: Arc<sc_consensus_epochs::EpochStore<S>>,
		runtime: Arc<dyn Runtime>,
		trie: Arc<dyn TrieStore>,
		validator: Arc<dyn BlockValidator>,
		authority_observer: Arc<dyn AuthoritySetObserver>,
		justification_handler: Arc<dyn JustificationHandler>,
		rpc: Arc<dyn RpcSink>,
		metrics: Arc<dyn Metrics>,
		epoch_length: u64,
	) -> Self {
		Self {
			tree,
			pool,
			epoch_store,
			runtime,
			trie,
			validator,
			authority_observer,
			justification_handler,
			rpc,
			metrics,
			epoch_length,
			state: ImporterState::Ready,
		}
	}

	pub fn block_tree(&self) -> &BlockTree {
		&self.tree
	}

	pub fn pool(&self) -> &sc_transaction_pool::TransactionPool {
		&self.pool
	}

	pub fn pool_mut(&mut self) -> &mut sc_transaction_pool::TransactionPool {
		&mut self.pool
	}

	pub fn is_syncing(&self) -> bool {
		matches!(self.state, ImporterState::Syncing { .. })
	}

	/// Apply a justification the local GRANDPA voter just completed a round
	/// for, distinct from one attached to an imported block: advances the
	/// finality cursor and notifies the authority-set manager, the same as
	/// step 7 of `apply_ready_block` does for an externally-received one.
	pub fn finalize_externally(&mut self, block: BlockInfo, justification: sp_consensus_grandpa::Justification) -> Result<Option<BlockInfo>, ImportError> {
		if let Some(event) = self.tree.finalize(block, justification)? {
			self.authority_observer.on_finalize(event.finalized, &self.tree);
			self.notify_finalized(event.finalized);
			return Ok(Some(event.finalized));
		}
		Ok(None)
	}

	fn notify_finalized(&self, finalized: BlockInfo) {
		self.metrics.set_finalized_block(finalized.number);
		self.rpc.emit(RpcEvent::FinalizedHead(finalized));
		if let Some(body) = self.tree.get_body(&finalized.hash) {
			for extrinsic in body {
				self.rpc.emit(RpcEvent::Extrinsic(extrinsic.hash(), ExtrinsicStatus::Finalized(finalized.hash)));
			}
		}
	}

	/// Called once a [`crate::sync::Synchronizer`] run completes and the
	/// buffered announcements can be replayed in order.
	pub fn resume_after_sync(&mut self) -> Result<Vec<ImportOutcome>, ImportError> {
		let buffered = match std::mem::replace(&mut self.state, ImporterState::Ready) {
			ImporterState::Syncing { buffered, .. } => buffered,
			ImporterState::Ready => return Ok(Vec::new()),
		};
		let mut outcomes = Vec::with_capacity(buffered.len());
		for (block, justification) in buffered {
			outcomes.push(self.apply_block(block, justification)?);
		}
		Ok(outcomes)
	}

	/// Process one candidate block arriving as a fresh announcement (import
	/// from the network or self-authorship). If the parent is unknown, this
	/// enters `syncing` and reports the gap to request; the block that
	/// triggered it is *not* buffered here -- the requested range `(last_
	/// finalized, header.hash]` already re-fetches it from the peer as the
	/// last entry of the gap-fill, per spec §4.5 step 1. Only announcements
	/// that arrive *while already syncing* are buffered, for
	/// [`Self::resume_after_sync`] to replay once the gap-fill completes.
	pub fn apply_block(&mut self, block: Block, justification: Option<Justification>) -> Result<ImportOutcome, ImportError> {
		if let ImporterState::Syncing { target, buffered } = &mut self.state {
			let target = *target;
			buffered.push((block, justification));
			return Ok(ImportOutcome::GapDetected { request_from: self.tree.last_finalized(), to: target });
		}

		let hash = block.header.hash();
		if self.tree.contains(&hash) {
			return Err(ImportError::BlockExists);
		}

		if !self.tree.contains(&block.header.parent_hash) && block.header.number != 0 {
			self.state = ImporterState::Syncing { target: hash, buffered: Vec::new() };
			return Ok(ImportOutcome::GapDetected { request_from: self.tree.last_finalized(), to: hash });
		}

		self.import_contiguous(block, justification)
	}

	/// Apply one block delivered by a [`crate::sync::Synchronizer`] gap-fill
	/// page. Unlike [`Self::apply_block`], this never re-enters `syncing`:
	/// the synchronizer walks `(from, to]` in ancestor order, so by the time
	/// a page entry reaches here its parent was either already in the tree
	/// or was the previous entry in the same page. A page that turns out not
	/// to be contiguous (an uncooperative or buggy peer) surfaces as a
	/// regular structural error rather than silently buffering.
	pub fn apply_synced_block(&mut self, block: Block, justification: Option<Justification>) -> Result<ImportOutcome, ImportError> {
		let hash = block.header.hash();
		if self.tree.contains(&hash) {
			return Err(ImportError::BlockExists);
		}
		if !self.tree.contains(&block.header.parent_hash) && block.header.number != 0 {
			return Err(crate::error::BlockTreeError::UnknownParent(block.header.parent_hash).into());
		}
		self.import_contiguous(block, justification)
	}

	fn import_contiguous(&mut self, block: Block, justification: Option<Justification>) -> Result<ImportOutcome, ImportError> {
		let hash = block.header.hash();
		let started = Instant::now();
		let outcome = self.apply_ready_block(block, justification);
		let elapsed = started.elapsed();
		self.metrics.observe_import_duration(elapsed.as_secs_f64());
		info!(target: "import", ?hash, elapsed_ms = elapsed.as_millis() as u64, "block processed");
		outcome
	}

	fn apply_ready_block(&mut self, block: Block, justification: Option<Justification>) -> Result<ImportOutcome, ImportError> {
		self.validator.validate_header(&block.header)?;

		let without_seal = block.header.without_seal();
		let parent = self
			.tree
			.get_header(&block.header.parent_hash)
			.expect("parent presence checked by caller")
			.clone();
		let encoded_header = codec::Encode::encode(&without_seal);
		let encoded_body = codec::Encode::encode(&block.body);

		let computed_root = self.runtime.execute_block(parent.state_root, &encoded_header, &encoded_body, self.trie.as_ref())?;
		if computed_root != block.header.state_root {
			return Err(ImportError::Runtime(sp_blockchain::Error::StateRootMismatch {
				expected: block.header.state_root,
				actual: computed_root,
			}));
		}

		let info = self.tree.add_header(block.header.clone(), self.authority_weight(&block.header))?;
		self.tree.add_body(info.hash, block.body.clone())?;

		self.dispatch_pre_seal_digests(&block.header)?;

		self.metrics.set_best_block(self.tree.deepest_leaf().number);
		self.rpc.emit(RpcEvent::NewHead(info));

		let mut outcome = ImportOutcome::Imported(info);
		if let Some(justification) = justification {
			self.justification_handler.import_justification(justification.clone())?;
			if let Some(event) = self.tree.finalize(justification.target, justification)? {
				self.authority_observer.on_finalize(event.finalized, &self.tree);
				self.notify_finalized(event.finalized);
				outcome = ImportOutcome::Finalized(event.finalized);
			}
		}

		for extrinsic in &block.body {
			self.pool.remove(extrinsic.hash());
			self.rpc.emit(RpcEvent::Extrinsic(extrinsic.hash(), ExtrinsicStatus::InBlock(info.hash)));
		}

		self.seed_epoch_bookkeeping(&block.header)?;

		Ok(outcome)
	}

	/// Resolve the authoring authority's own weight for the best-chain
	/// cumulative-weight rule; 0 if the header carries no BABE pre-digest
	/// (e.g. the genesis header).
	fn authority_weight(&self, header: &BlockHeader) -> u64 {
		let Some(pre_digest) = pre_runtime_babe_digest(header) else { return 0 };
		let epoch_index = self.epoch_store.epoch_index_for_slot(pre_digest.slot, self.epoch_length).map(|(idx, _)| idx).unwrap_or(0);
		self.epoch_store
			.get_epoch(epoch_index)
			.and_then(|epoch| epoch.authorities.get(pre_digest.authority_index as usize).map(|a| a.weight))
			.unwrap_or(0)
	}

	fn dispatch_pre_seal_digests(&self, header: &BlockHeader) -> Result<(), ImportError> {
		let at = header.info();
		for digest in header.pre_seal_digests() {
			let DigestItem::Consensus(engine, payload) = digest else { continue };
			if *engine == GRANDPA_ENGINE_ID {
				let Ok(change) = ScheduledChangeDigest::decode(&mut &payload[..]) else { continue };
				match change.action {
					ScheduledAction::EnactAt { activate_at, authorities } => {
						let new_set = sp_consensus_babe::AuthoritySet { authorities, set_id: 0 };
						self.authority_observer.on_scheduled_change(at, new_set, activate_at, &self.tree)?;
					}
					ScheduledAction::ForceAt { activate_at, authorities } => {
						let new_set = sp_consensus_babe::AuthoritySet { authorities, set_id: 0 };
						self.authority_observer.on_forced_change(at, new_set, activate_at, &self.tree)?;
					}
					ScheduledAction::Disable { authority_index } => {
						self.authority_observer.on_disabled(at, authority_index, &self.tree)?;
					}
					ScheduledAction::Pause { activate_at } => {
						self.authority_observer.on_pause(at, activate_at, &self.tree)?;
					}
					ScheduledAction::Resume { activate_at } => {
						self.authority_observer.on_resume(at, activate_at, &self.tree)?;
					}
				}
			} else if *engine != BABE_ENGINE_ID {
				warn!(target: "import", engine = ?engine, "ignoring digest from unknown consensus engine");
			}
		}
		Ok(())
	}

	/// Seed the `FromUnixEpoch` anchor on the
	/// very first block, and persist a "next epoch" descriptor the instant
	/// its digest is observed.
	fn seed_epoch_bookkeeping(&self, header: &BlockHeader) -> Result<(), ImportError> {
		let Some(pre_digest) = pre_runtime_babe_digest(header) else { return Ok(()) };

		if self.epoch_store.strategy() == SlotStrategy::FromUnixEpoch && self.epoch_store.get_last().is_none() {
			self.epoch_store.set_last(sc_consensus_epochs::LastEpoch { epoch_index: 0, start_slot: pre_digest.slot });
		}

		let (current_epoch_index, offset) = self
			.epoch_store
			.epoch_index_for_slot(pre_digest.slot, self.epoch_length)
			.map_err(|_| ValidationError::NoEpochData(0))?;
		let current_epoch_start = pre_digest.slot - offset;

		for digest in header.pre_seal_digests() {
			let DigestItem::Consensus(engine, payload) = digest else { continue };
			if *engine != BABE_ENGINE_ID {
				continue;
			}
			let Ok(next) = NextEpochDescriptorDigest::decode(&mut &payload[..]) else { continue };
			let next_index = current_epoch_index + 1;
			let descriptor = sp_consensus_babe::EpochDescriptor {
				epoch_index: next_index,
				start_slot: current_epoch_start + self.epoch_length,
				duration_slots: self.epoch_length,
				authorities: next.authorities,
				randomness: next.randomness,
			};
			match self.epoch_store.put_epoch(next_index, descriptor) {
				Ok(()) => {}
				Err(sc_consensus_epochs::Error::Conflict(_)) => {}
				Err(other) => warn!(target: "import", error = %other, "failed to persist next epoch descriptor"),
			}
		}
		Ok(())
	}
}

fn pre_runtime_babe_digest(header: &BlockHeader) -> Option<BabePreDigest> {
	header.pre_seal_digests().iter().find_map(|d| match d {
		DigestItem::PreRuntime(engine, payload) if *engine == BABE_ENGINE_ID => BabePreDigest::decode(&mut &payload[..]).ok(),
		_ => None,
	})
}
