use std::sync::Arc;

use sp_blockchain::{Block, BlockHash, BlockInfo};
use tracing::{info, warn};

use crate::error::ImportError;
use crate::executor::{BlockExecutor, ImportOutcome};
use crate::ports::{BlockData, NetworkError, NetworkHandle, PeerId};

/// Synchronizer: walk a gap `(from, to]` in pages, applying
/// each delivered block through the shared [`BlockExecutor`] -- request,
/// apply each, and if the page didn't reach `to`, request the next page
/// from the last applied block; an empty page ends the walk with a warning
/// rather than an error (the peer may simply be behind).
pub struct Synchronizer {
	network: Arc<dyn NetworkHandle>,
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
	#[error(transparent)]
	Network(#[from] NetworkError),
	#[error(transparent)]
	Import(#[from] ImportError),
}

impl Synchronizer {
	pub fn new(network: Arc<dyn NetworkHandle>) -> Self {
		Self { network }
	}

	/// Fill the gap `(from, to]` from `peer`, applying every delivered block
	/// through `executor`, then replay whatever announcements arrived while
	/// syncing.
	pub async fn run_gap<S: sp_blockchain::AuxStore>(
		&self,
		peer: PeerId,
		executor: &mut BlockExecutor<S>,
		from: BlockInfo,
		to: BlockHash,
	) -> Result<Vec<ImportOutcome>, SyncError> {
		let mut cursor = from.hash;
		let mut outcomes = Vec::new();

		loop {
			let page = self.network.request_blocks(peer.clone(), cursor, to).await?;
			if page.is_empty() {
				warn!(target: "sync", from = ?cursor, to = ?to, "peer returned an empty page, ending sync walk");
				break;
			}

			let mut last = cursor;
			for entry in &page {
				if let Some(outcome) = self.apply_page_entry(executor, entry)? {
					last = entry.hash;
					outcomes.push(outcome);
				}
			}

			if last == to || last == cursor {
				break;
			}
			cursor = last;
		}

		outcomes.extend(executor.resume_after_sync()?);
		info!(target: "sync", applied = outcomes.len(), to = ?to, "gap sync complete");
		Ok(outcomes)
	}

	fn apply_page_entry<S: sp_blockchain::AuxStore>(
		&self,
		executor: &mut BlockExecutor<S>,
		entry: &BlockData,
	) -> Result<Option<ImportOutcome>, SyncError> {
		let Some(header) = entry.header.clone() else { return Ok(None) };
		let body = entry.body.clone().unwrap_or_default();
		let block = Block { header, body };
		// `apply_synced_block`, not `apply_block`: the executor is still
		// `Syncing` for the whole walk, and `apply_block` would just buffer
		// every page entry behind the original announcement instead of
		// applying it.
		let outcome = executor.apply_synced_block(block, entry.justification.clone())?;
		Ok(Some(outcome))
	}
}
