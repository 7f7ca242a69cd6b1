// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! The authority-set manager: a fork-aware tree of pending
//! changes (scheduled enactments, forced changes, disablements, pause/resume)
//! that graduate into the active GRANDPA voter set as the chain finalizes
//! past their activation block.
//!
//! `authorities(at, tree)` answers the general "which set is active at block
//! `at`" query against any known block, finalized or not. `current()` is a
//! convenience over the same projection at the last finalized block, which
//! is all the voter ever needs: a GRANDPA round's base is always the last
//! finalized block.

use std::sync::Arc;

use codec::{Decode, Encode};
use fork_tree::{ForkTree, Node};
use parking_lot::RwLock;
use sp_blockchain::{AuxStore, BlockHash, BlockInfo, BlockNumber};
use sp_consensus_babe::AuthoritySet;

use sc_consensus::{Ancestry, AuthoritySetIngestError, AuthoritySetObserver};

const AUTH_SET_KEY: &[u8] = b":auth:set";
const AUTH_ROOT_KEY: &[u8] = b":auth:root";

#[derive(Clone, Debug, Encode, Decode)]
enum PendingKind {
	Enact(AuthoritySet),
	Force(AuthoritySet),
	Disable(u64),
	Pause,
	Resume,
}

#[derive(Clone, Debug, Encode, Decode)]
struct PendingChange {
	activate_at: BlockNumber,
	kind: PendingKind,
}

#[derive(Clone, Encode, Decode)]
struct Persisted {
	current: AuthoritySet,
	next_set_id: u64,
	paused: bool,
}

struct State {
	current: AuthoritySet,
	next_set_id: u64,
	paused: bool,
	pending: ForkTree<BlockHash, BlockNumber, PendingChange>,
}

/// Tracks the GRANDPA authority set across scheduled/forced changes,
/// disablements and pause/resume, persisting itself under `:auth:set` /
/// `:auth:root`.
pub struct AuthoritySetManager<S> {
	aux: Arc<S>,
	state: RwLock<State>,
}

impl<S: AuxStore> AuthoritySetManager<S> {
	pub fn new(aux: Arc<S>, genesis_set: AuthoritySet) -> Self {
		let state = match (aux.get_aux(AUTH_SET_KEY), aux.get_aux(AUTH_ROOT_KEY)) {
			(Some(set_bytes), Some(root_bytes)) => {
				let persisted = Persisted::decode(&mut &set_bytes[..]).expect("corrupt :auth:set aux entry");
				let pending = ForkTree::decode(&mut &root_bytes[..]).expect("corrupt :auth:root aux entry");
				State { current: persisted.current, next_set_id: persisted.next_set_id, paused: persisted.paused, pending }
			}
			_ => State { current: genesis_set.clone(), next_set_id: genesis_set.set_id + 1, paused: false, pending: ForkTree::new() },
		};
		let manager = Self { aux, state: RwLock::new(state) };
		manager.persist();
		manager
	}

	/// The active voter set effective at the last finalized block, or `None`
	/// while the set is paused. A thin convenience over [`Self::authorities`]
	/// for the voter, whose round base is always the last finalized block.
	pub fn current(&self) -> Option<AuthoritySet> {
		let state = self.state.read();
		if state.paused {
			None
		} else {
			Some(state.current.clone())
		}
	}

	pub fn current_set_id(&self) -> u64 {
		self.state.read().current.set_id
	}

	/// The set effective at `at`, per spec §4.2: walk to the deepest pending
	/// node that is an ancestor-or-equal of `at`, folding in every action on
	/// that path whose `activate_at` has been reached by `at.number`, in
	/// activation order, onto the set effective at the last finalized block
	/// (`state.current`). Unlike [`Self::current`] this does not require
	/// `at` to be finalized: scenario 3 (spec §8) queries non-finalized
	/// descendants of a block carrying a scheduled change and expects the
	/// old set back until the activation height is reached.
	pub fn authorities(&self, at: BlockInfo, tree: &dyn Ancestry) -> AuthoritySet {
		let state = self.state.read();
		let mut matured: Vec<(BlockNumber, PendingChange)> = Vec::new();
		for root in state.pending.roots() {
			collect_matured(root, at, tree, &mut matured);
		}
		matured.sort_by_key(|(_, change)| change.activate_at);

		let mut set = state.current.clone();
		let mut next_set_id = state.next_set_id;
		for (_, change) in matured {
			apply_pending_kind(&change.kind, &mut set, &mut next_set_id);
		}
		set
	}

	fn persist(&self) {
		let state = self.state.read();
		let persisted = Persisted { current: state.current.clone(), next_set_id: state.next_set_id, paused: state.paused };
		self.aux.insert_aux(AUTH_SET_KEY, &persisted.encode());
		self.aux.insert_aux(AUTH_ROOT_KEY, &state.pending.encode());
	}

	fn stage(&self, at: BlockInfo, activate_at: BlockNumber, kind: PendingKind, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		if activate_at < at.number {
			return Err(AuthoritySetIngestError::InvalidActivation { at: at.number, activate_at });
		}
		let mut state = self.state.write();
		let oracle = |a: &BlockHash, b: &BlockHash| Ok::<bool, std::convert::Infallible>(tree.is_descendant_of(a, b));
		state
			.pending
			.import(at.hash, at.number, PendingChange { activate_at, kind }, &oracle)
			.map_err(|_| AuthoritySetIngestError::UnknownAncestor(at))?;
		drop(state);
		self.persist();
		Ok(())
	}
}

impl<S: AuxStore> AuthoritySetObserver for AuthoritySetManager<S> {
	fn on_scheduled_change(&self, at: BlockInfo, new_set: AuthoritySet, activate_at: BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		self.stage(at, activate_at, PendingKind::Enact(new_set), tree)
	}

	fn on_forced_change(&self, at: BlockInfo, new_set: AuthoritySet, activate_at: BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		self.stage(at, activate_at, PendingKind::Force(new_set), tree)
	}

	fn on_disabled(&self, at: BlockInfo, authority_index: u64, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		self.stage(at, at.number, PendingKind::Disable(authority_index), tree)
	}

	fn on_pause(&self, at: BlockInfo, activate_at: BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		self.stage(at, activate_at, PendingKind::Pause, tree)
	}

	fn on_resume(&self, at: BlockInfo, activate_at: BlockNumber, tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		self.stage(at, activate_at, PendingKind::Resume, tree)
	}

	/// Graduate every pending change on the now-finalized branch whose
	/// activation has been reached, applying them in activation order, then
	/// advance the pending tree's root alongside the import pipeline's
	/// `BlockTree::finalize`.
	fn on_finalize(&self, block: BlockInfo, tree: &dyn Ancestry) {
		let mut state = self.state.write();

		let mut matured: Vec<(BlockNumber, PendingChange)> = Vec::new();
		for root in state.pending.roots() {
			collect_matured(root, block, tree, &mut matured);
		}
		matured.sort_by_key(|(_, change)| change.activate_at);

		for (_, change) in matured {
			match &change.kind {
				PendingKind::Pause => state.paused = true,
				PendingKind::Resume => state.paused = false,
				kind => {
					let (mut current, mut next_set_id) = (state.current.clone(), state.next_set_id);
					apply_pending_kind(kind, &mut current, &mut next_set_id);
					state.current = current;
					state.next_set_id = next_set_id;
				}
			}
		}

		if !state.pending.is_empty() {
			let oracle = |a: &BlockHash, b: &BlockHash| Ok::<bool, std::convert::Infallible>(tree.is_descendant_of(a, b));
			let _ = state.pending.finalize(&block.hash, block.number, &oracle);
		}

		drop(state);
		self.persist();
	}
}

/// Collect every pending change on the path from `node` down to `at` whose
/// `activate_at` has been reached by `at.number`. Shared by `on_finalize`
/// (`at` = the newly finalized block) and `authorities` (`at` = an arbitrary,
/// possibly non-finalized, query block).
fn collect_matured(node: &Node<BlockHash, BlockNumber, PendingChange>, at: BlockInfo, tree: &dyn Ancestry, out: &mut Vec<(BlockNumber, PendingChange)>) {
	let on_branch = node.hash == at.hash || tree.is_descendant_of(&node.hash, &at.hash);
	if !on_branch {
		return;
	}
	if node.data.activate_at <= at.number {
		out.push((node.number, node.data.clone()));
	}
	for child in &node.children {
		collect_matured(child, at, tree, out);
	}
}

/// Apply an `Enact`/`Force`/`Disable` action's effect to a standalone
/// `(AuthoritySet, next_set_id)` pair. `Pause`/`Resume` only affect the
/// manager's `paused` flag, which callers handle separately since
/// `authorities()`'s projection has no such flag to mutate.
fn apply_pending_kind(kind: &PendingKind, current: &mut AuthoritySet, next_set_id: &mut u64) {
	match kind {
		PendingKind::Enact(set) | PendingKind::Force(set) => {
			*current = AuthoritySet { authorities: set.authorities.clone(), set_id: *next_set_id };
			*next_set_id += 1;
		}
		PendingKind::Disable(index) => {
			if (*index as usize) < current.authorities.len() {
				current.authorities.remove(*index as usize);
			}
		}
		PendingKind::Pause | PendingKind::Resume => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sp_blockchain::MemoryAuxStore;
	use sp_consensus_babe::Authority;

	fn authority(byte: u8, weight: u64) -> Authority {
		Authority::new(sp_consensus_babe::AuthorityId([byte; 32]), weight).unwrap()
	}

	fn info(number: u64, byte: u8) -> BlockInfo {
		BlockInfo::new(number, BlockHash([byte; 32]))
	}

	/// Linear chain 0 -> 1 -> 2 -> 3, used as the `Ancestry` oracle in tests.
	struct LinearChain;
	impl Ancestry for LinearChain {
		fn is_descendant_of(&self, ancestor: &BlockHash, descendant: &BlockHash) -> bool {
			ancestor.0[0] <= descendant.0[0]
		}
	}

	#[test]
	fn scheduled_change_graduates_on_finalize_and_bumps_set_id() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1)], set_id: 0 };
		let manager = AuthoritySetManager::new(aux, genesis);

		let new_set = AuthoritySet { authorities: vec![authority(2, 1), authority(3, 1)], set_id: 0 };
		manager.on_scheduled_change(info(1, 1), new_set, 2, &LinearChain).unwrap();
		assert_eq!(manager.current_set_id(), 0);

		manager.on_finalize(info(1, 1), &LinearChain);
		assert_eq!(manager.current_set_id(), 0, "not yet activated");

		manager.on_finalize(info(2, 2), &LinearChain);
		let current = manager.current().unwrap();
		assert_eq!(current.set_id, 1);
		assert_eq!(current.authorities.len(), 2);
	}

	/// Spec §8 scenario 3: a scheduled change staged at height `H` with
	/// `activate_at = H+3` must not affect `authorities()` at `H+1`/`H+2`,
	/// only at `H+3` -- with no finalization step at all, unlike
	/// `scheduled_change_graduates_on_finalize_and_bumps_set_id` above.
	#[test]
	fn authorities_at_returns_old_set_until_activation_height_is_reached() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1)], set_id: 0 };
		let manager = AuthoritySetManager::new(aux, genesis);

		let new_set = AuthoritySet { authorities: vec![authority(2, 1), authority(3, 1)], set_id: 0 };
		manager.on_scheduled_change(info(1, 1), new_set, 4, &LinearChain).unwrap();

		assert_eq!(manager.authorities(info(2, 2), &LinearChain).authorities.len(), 1, "H+1: still the old set");
		assert_eq!(manager.authorities(info(3, 3), &LinearChain).authorities.len(), 1, "H+2: still the old set");

		let activated = manager.authorities(info(4, 4), &LinearChain);
		assert_eq!(activated.authorities.len(), 2, "H+3: the new set is effective");
		assert_eq!(activated.set_id, 1);

		// Unrelated forks never reach the node carrying the scheduled change.
		assert_eq!(manager.current_set_id(), 0, "nothing has been finalized yet");
	}

	#[test]
	fn disable_removes_authority_immediately() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1), authority(2, 1)], set_id: 0 };
		let manager = AuthoritySetManager::new(aux, genesis);

		manager.on_disabled(info(1, 1), 0, &LinearChain).unwrap();
		manager.on_finalize(info(1, 1), &LinearChain);

		let current = manager.current().unwrap();
		assert_eq!(current.authorities.len(), 1);
		assert_eq!(current.authorities[0].id, sp_consensus_babe::AuthorityId([2; 32]));
	}

	#[test]
	fn pause_then_resume_blocks_then_unblocks_current() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1)], set_id: 0 };
		let manager = AuthoritySetManager::new(aux, genesis);

		manager.on_pause(info(1, 1), 1, &LinearChain).unwrap();
		manager.on_finalize(info(1, 1), &LinearChain);
		assert!(manager.current().is_none());

		manager.on_resume(info(2, 2), 2, &LinearChain).unwrap();
		manager.on_finalize(info(2, 2), &LinearChain);
		assert!(manager.current().is_some());
	}

	#[test]
	fn activation_before_announcement_is_rejected() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1)], set_id: 0 };
		let manager = AuthoritySetManager::new(aux, genesis);

		let new_set = AuthoritySet { authorities: vec![authority(2, 1)], set_id: 0 };
		let err = manager.on_scheduled_change(info(5, 5), new_set, 2, &LinearChain).unwrap_err();
		assert!(matches!(err, AuthoritySetIngestError::InvalidActivation { .. }));
	}

	#[test]
	fn state_survives_reload_from_the_same_aux_store() {
		let aux = Arc::new(MemoryAuxStore::new());
		let genesis = AuthoritySet { authorities: vec![authority(1, 1)], set_id: 0 };
		{
			let manager = AuthoritySetManager::new(aux.clone(), genesis.clone());
			let new_set = AuthoritySet { authorities: vec![authority(2, 1)], set_id: 0 };
			manager.on_scheduled_change(info(1, 1), new_set, 1, &LinearChain).unwrap();
			manager.on_finalize(info(1, 1), &LinearChain);
			assert_eq!(manager.current_set_id(), 1);
		}

		let reloaded = AuthoritySetManager::new(aux, genesis);
		assert_eq!(reloaded.current_set_id(), 1);
		assert_eq!(reloaded.current().unwrap().authorities.len(), 1);
	}
}
