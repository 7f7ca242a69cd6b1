// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! The GRANDPA round driver, re-architected as
//! an explicit state machine: `handle(input, tree)` takes one of
//! `{Vote, Fin, TimerFired, Cancel}` and returns the `Action`s the caller
//! should carry out (broadcast a message, arm a timer, finalize a block).
//! No future is polled and no callback chain is registered; the owning
//! event loop drives it directly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use codec::{Decode, Encode};
use parking_lot::Mutex;
use sc_consensus::{Ancestry, JustificationError, Metrics};
use sp_blockchain::{AuxStore, BlockInfo};
use sp_consensus_grandpa::{supermajority_threshold, Justification, SignedVote, VoteKind, VoteSignatureOracle};
use tracing::{info, warn};

use crate::authority_set::AuthoritySetManager;
use crate::clock::TimerKind;
use crate::ports::{ChainQuery, GrandpaMessage, NeighborPacket, VoteSigner};
use crate::round::{Round, RoundPhase, VoterSet};

const GRANDPA_STATE_KEY: &[u8] = b":grandpa:state";

/// Round duration `D` (default 3.333s) and the liveness check period
/// (default 20s),.
#[derive(Clone, Copy, Debug)]
pub struct VoterConfig {
	pub round_duration: Duration,
	pub liveness_timeout: Duration,
}

impl Default for VoterConfig {
	fn default() -> Self {
		Self { round_duration: Duration::from_millis(3333), liveness_timeout: Duration::from_secs(20) }
	}
}

/// One of the four inputs driving the voter's explicit state machine.
pub enum Input {
	Vote(SignedVote),
	/// An externally observed justification for `round`, received over
	/// gossip.
	Fin(u64, Justification),
	TimerFired(TimerKind),
	/// Shut down: cancel any in-flight timers without finalizing.
	Cancel,
}

/// What the caller should do in response to an `Input`.
#[derive(Debug)]
pub enum Action {
	Broadcast(GrandpaMessage),
	ScheduleTimer(TimerKind, Duration),
	Finalized(BlockInfo, Justification),
	None,
}

#[derive(Encode, Decode)]
struct Persisted {
	round_number: u64,
}

struct Inner {
	round: Round,
	base: BlockInfo,
	prevote_sent: bool,
	precommit_sent: bool,
	completed: bool,
	cancelled: bool,
	last_seen_round_at_liveness_check: u64,
}

/// Drives GRANDPA rounds to completion. `S` is the aux-store
/// backend shared with the authority-set manager's persistence.
pub struct GrandpaVoter<S> {
	authority_set: Arc<AuthoritySetManager<S>>,
	signer: Arc<dyn VoteSigner>,
	verifier: Arc<dyn VoteSignatureOracle>,
	chain: Arc<dyn ChainQuery>,
	aux: Arc<S>,
	config: VoterConfig,
	metrics: Arc<dyn Metrics>,
	inner: Mutex<Inner>,
}

impl<S: AuxStore> GrandpaVoter<S> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		authority_set: Arc<AuthoritySetManager<S>>,
		signer: Arc<dyn VoteSigner>,
		verifier: Arc<dyn VoteSignatureOracle>,
		chain: Arc<dyn ChainQuery>,
		aux: Arc<S>,
		config: VoterConfig,
		metrics: Arc<dyn Metrics>,
		genesis_base: BlockInfo,
	) -> (Self, Vec<Action>) {
		let round_number = aux.get_aux(GRANDPA_STATE_KEY).and_then(|bytes| Persisted::decode(&mut &bytes[..]).ok()).map(|p| p.round_number).unwrap_or(0);

		let voter = Self {
			authority_set,
			signer,
			verifier,
			chain,
			aux,
			config,
			metrics,
			inner: Mutex::new(Inner {
				round: Round::new(0, 0, VoterSet::new(Vec::new()), genesis_base, genesis_base, None),
				base: genesis_base,
				prevote_sent: false,
				precommit_sent: false,
				completed: false,
				cancelled: false,
				last_seen_round_at_liveness_check: 0,
			}),
		};
		let actions = voter.start_round(round_number, genesis_base, genesis_base);
		(voter, actions)
	}

	/// Begin a new round. Returns `[]` if the authority set is currently
	/// paused: no rounds run while paused.
	fn start_round(&self, round_number: u64, base: BlockInfo, primary_propose: BlockInfo) -> Vec<Action> {
		let Some(set) = self.authority_set.current() else {
			info!(target: "grandpa", "authority set paused, not starting round {}", round_number);
			return Vec::new();
		};
		let voters = VoterSet::new(set.authorities);
		let local_id = Some(self.signer.id()).filter(|id| voters.contains(id));
		let round = Round::new(round_number, set.set_id, voters, base, primary_propose, local_id);

		let mut actions = Vec::new();
		let is_primary = local_id.is_some_and(|id| round.is_primary(&id));
		if is_primary {
			actions.push(Action::Broadcast(GrandpaMessage::Vote(SignedVote {
				kind: VoteKind::PrimaryPropose,
				round: round_number,
				set_id: round.set_id,
				target: primary_propose,
				voter: self.signer.id(),
				signature: self.signer.sign(round_number, round.set_id, VoteKind::PrimaryPropose, &primary_propose),
			})));
		}
		actions.push(Action::ScheduleTimer(TimerKind::Prevote, self.config.round_duration / 2));
		actions.push(Action::ScheduleTimer(TimerKind::Precommit, self.config.round_duration));
		actions.push(Action::ScheduleTimer(TimerKind::Liveness, self.config.liveness_timeout));

		let mut inner = self.inner.lock();
		inner.round = round;
		inner.base = base;
		inner.prevote_sent = false;
		inner.precommit_sent = false;
		inner.completed = false;
		inner.cancelled = false;
		inner.last_seen_round_at_liveness_check = round_number;
		drop(inner);

		actions
	}

	fn persist_round_number(&self, round_number: u64) {
		self.aux.insert_aux(GRANDPA_STATE_KEY, &Persisted { round_number }.encode());
	}

	fn sign_vote(&self, round_number: u64, set_id: u64, kind: VoteKind, target: BlockInfo) -> SignedVote {
		let signature = self.signer.sign(round_number, set_id, kind, &target);
		SignedVote { kind, round: round_number, set_id, target, voter: self.signer.id(), signature }
	}

	/// Try to finalize the current round and, if it finalizes, persist and
	/// advance into the next one. `extra` collects the advance-round
	/// actions alongside whatever the caller already pushed.
	fn try_complete(&self, tree: &dyn Ancestry, extra: &mut Vec<Action>) {
		let (target, justification, round_number) = {
			let mut inner = self.inner.lock();
			if inner.completed {
				return;
			}
			let is_descendant_of = |a: &sp_blockchain::BlockHash, b: &sp_blockchain::BlockHash| tree.is_descendant_of(a, b);
			let Some((target, justification)) = inner.round.try_finalize(&is_descendant_of) else {
				return;
			};
			inner.completed = true;
			(target, justification, inner.round.round_number)
		};
		self.persist_round_number(round_number + 1);
		extra.push(Action::Finalized(target, justification));
		extra.extend(self.start_round(round_number + 1, target, target));
	}

	/// Main entry point: feed one input, get back the actions to perform.
	pub fn handle(&self, input: Input, tree: &dyn Ancestry) -> Vec<Action> {
		let mut actions = Vec::new();
		match input {
			Input::Vote(vote) => {
				let accepted = {
					let mut inner = self.inner.lock();
					if inner.cancelled || inner.completed {
						false
					} else if vote.round != inner.round.round_number || vote.set_id != inner.round.set_id {
						false
					} else if !inner.round.voters().contains(&vote.voter) {
						warn!(target: "grandpa", voter = ?vote.voter, "vote from unknown voter rejected");
						false
					} else {
						matches!(inner.round.import_vote(vote), crate::round::VoteOutcome::Accepted)
					}
				};
				if accepted {
					self.metrics.inc_votes();
					self.try_complete(tree, &mut actions);
				}
			}
			Input::Fin(round_number, justification) => {
				if let Ok(()) = self.verify_and_accept_external(round_number, &justification, tree) {
					self.try_complete(tree, &mut actions);
				}
			}
			Input::TimerFired(TimerKind::Prevote) => {
				if let Some(vote) = self.build_prevote() {
					actions.push(Action::Broadcast(GrandpaMessage::Vote(vote)));
				}
				self.try_complete(tree, &mut actions);
			}
			Input::TimerFired(TimerKind::Precommit) => {
				if let Some(vote) = self.build_prevote() {
					actions.push(Action::Broadcast(GrandpaMessage::Vote(vote)));
				}
				if let Some(vote) = self.build_precommit(tree) {
					actions.push(Action::Broadcast(GrandpaMessage::Vote(vote)));
				}
				self.try_complete(tree, &mut actions);
			}
			Input::TimerFired(TimerKind::Liveness) => {
				let mut inner = self.inner.lock();
				if !inner.cancelled {
					let stalled = inner.last_seen_round_at_liveness_check == inner.round.round_number;
					inner.last_seen_round_at_liveness_check = inner.round.round_number;
					let round_number = inner.round.round_number;
					let set_id = inner.round.set_id;
					drop(inner);
					if stalled {
						warn!(target: "grandpa", round = round_number, "round has not advanced; broadcasting neighbor packet");
					}
					actions.push(Action::Broadcast(GrandpaMessage::NeighborPacket(NeighborPacket {
						round: round_number,
						set_id,
						commit_finalized_height: self.inner.lock().base.number,
					})));
					actions.push(Action::ScheduleTimer(TimerKind::Liveness, self.config.liveness_timeout));
				}
			}
			Input::Cancel => {
				self.inner.lock().cancelled = true;
			}
		}
		actions
	}

	fn build_prevote(&self) -> Option<SignedVote> {
		let mut inner = self.inner.lock();
		if inner.prevote_sent || inner.cancelled || inner.completed {
			return None;
		}
		inner.round.local_id?;
		let target = self.chain.best_containing(inner.round.primary_propose);
		let round_number = inner.round.round_number;
		let set_id = inner.round.set_id;
		let vote = self.sign_vote(round_number, set_id, VoteKind::Prevote, target);
		inner.round.local_prevote = Some(target);
		inner.prevote_sent = true;
		inner.round.import_vote(vote.clone());
		Some(vote)
	}

	fn build_precommit(&self, tree: &dyn Ancestry) -> Option<SignedVote> {
		let mut inner = self.inner.lock();
		if inner.precommit_sent || inner.cancelled || inner.completed {
			return None;
		}
		inner.round.local_id?;
		let is_descendant_of = |a: &sp_blockchain::BlockHash, b: &sp_blockchain::BlockHash| tree.is_descendant_of(a, b);
		let target = inner.round.prevote_ghost(&is_descendant_of).unwrap_or(inner.base);
		inner.round.local_precommit = Some(target);
		inner.precommit_sent = true;
		let round_number = inner.round.round_number;
		let set_id = inner.round.set_id;
		let vote = self.sign_vote(round_number, set_id, VoteKind::Precommit, target);
		inner.round.import_vote(vote.clone());
		Some(vote)
	}

	fn verify_and_accept_external(&self, round_number: u64, justification: &Justification, _tree: &dyn Ancestry) -> Result<(), JustificationError> {
		verify_justification(justification, &self.authority_set, self.verifier.as_ref())?;
		let mut inner = self.inner.lock();
		if inner.round.round_number == round_number && !inner.completed {
			inner.round.accept_external_finalization(justification.target, justification.clone());
			inner.completed = true;
		}
		Ok(())
	}
}

/// Verify a justification's signatures and supermajority weight against the
/// authority set's current `set_id`. Shared by `GrandpaVoter::handle`
/// (the `Fin` input) and `GrandpaVoter`'s `JustificationHandler` impl, which
/// verifies justifications attached directly to imported blocks.
fn verify_justification<S: AuxStore>(
	justification: &Justification,
	authority_set: &AuthoritySetManager<S>,
	verifier: &dyn VoteSignatureOracle,
) -> Result<(), JustificationError> {
	use sc_consensus::InvalidJustificationReason;

	let Some(set) = authority_set.current() else {
		return Err(InvalidJustificationReason::UnknownVoter.into());
	};
	if justification.set_id != set.set_id {
		return Err(InvalidJustificationReason::SetMismatch(justification.set_id, set.set_id).into());
	}

	let mut seen = HashSet::new();
	let mut weight = 0u64;
	for precommit in &justification.precommits {
		if precommit.target.hash != justification.target.hash {
			continue;
		}
		let Some(authority) = set.authorities.iter().find(|a| a.id == precommit.voter) else {
			return Err(InvalidJustificationReason::UnknownVoter.into());
		};
		let payload = sp_consensus_grandpa::vote_signing_payload(precommit.round, precommit.set_id, VoteKind::Precommit, &precommit.target);
		if !verifier.verify(&precommit.voter, &payload, &precommit.signature) {
			return Err(InvalidJustificationReason::BadSignature.into());
		}
		if seen.insert(precommit.voter) {
			weight += authority.weight;
		}
	}

	let threshold = supermajority_threshold(set.total_weight());
	if weight < threshold {
		return Err(InvalidJustificationReason::BelowThreshold(weight, threshold).into());
	}
	Ok(())
}

impl<S: AuxStore + Send + Sync> sc_consensus::JustificationHandler for GrandpaVoter<S> {
	fn import_justification(&self, justification: Justification) -> Result<(), JustificationError> {
		verify_justification(&justification, &self.authority_set, self.verifier.as_ref())?;
		let mut inner = self.inner.lock();
		if inner.round.round_number == justification.round && !inner.completed {
			inner.round.accept_external_finalization(justification.target, justification.clone());
			inner.completed = true;
			drop(inner);
			self.persist_round_number(justification.round + 1);
		}
		Ok(())
	}
}

impl std::fmt::Debug for RoundPhase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", *self as u8 as char)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sp_blockchain::{BlockHash, MemoryAuxStore};
	use sp_consensus_babe::{Authority, AuthoritySet};

	fn authority(byte: u8) -> Authority {
		Authority::new(AuthorityId([byte; 32]), 1).unwrap()
	}

	fn info(number: u64, byte: u8) -> BlockInfo {
		BlockInfo::new(number, BlockHash([byte; 32]))
	}

	/// A single linear chain, ordered by the hash's first byte.
	struct LinearChain;
	impl Ancestry for LinearChain {
		fn is_descendant_of(&self, ancestor: &sp_blockchain::BlockHash, descendant: &sp_blockchain::BlockHash) -> bool {
			ancestor.0[0] <= descendant.0[0]
		}
	}

	struct AcceptAllVerifier;
	impl VoteSignatureOracle for AcceptAllVerifier {
		fn verify(&self, _voter: &AuthorityId, _message: &[u8], _signature: &[u8; 64]) -> bool {
			true
		}
	}

	struct LocalSigner(AuthorityId);
	impl VoteSigner for LocalSigner {
		fn id(&self) -> AuthorityId {
			self.0
		}
		fn sign(&self, _round: u64, _set_id: u64, _kind: VoteKind, _target: &BlockInfo) -> [u8; 64] {
			[0; 64]
		}
	}

	struct FixedChainQuery(BlockInfo);
	impl ChainQuery for FixedChainQuery {
		fn best_containing(&self, _base: BlockInfo) -> BlockInfo {
			self.0
		}
	}

	fn precommit(voter: AuthorityId, round: u64, set_id: u64, target: BlockInfo) -> SignedVote {
		SignedVote { kind: VoteKind::Precommit, round, set_id, target, voter, signature: [0; 64] }
	}

	#[test]
	fn round_finalizes_once_precommit_weight_reaches_supermajority() {
		let a = authority(1);
		let b = authority(2);
		let c = authority(3);
		let genesis = info(0, 0);
		let target = info(1, 1);

		let authority_set = Arc::new(AuthoritySetManager::new(
			Arc::new(MemoryAuxStore::new()),
			AuthoritySet { authorities: vec![a.clone(), b.clone(), c.clone()], set_id: 0 },
		));

		let (voter, initial) = GrandpaVoter::new(
			authority_set,
			Arc::new(LocalSigner(a.id)),
			Arc::new(AcceptAllVerifier),
			Arc::new(FixedChainQuery(target)),
			Arc::new(MemoryAuxStore::new()),
			VoterConfig::default(),
			Arc::new(sc_consensus::NoopMetrics),
			genesis,
		);
		// `a` is primary for round 0 (0 mod 3 == 0): it proposes up front.
		assert!(initial.iter().any(|action| matches!(action, Action::Broadcast(GrandpaMessage::Vote(v)) if v.kind == VoteKind::PrimaryPropose)));

		let mut finalized = None;
		for voter_id in [a.id, b.id, c.id] {
			let actions = voter.handle(Input::Vote(precommit(voter_id, 0, 0, target)), &LinearChain);
			for action in actions {
				if let Action::Finalized(block, justification) = action {
					finalized = Some((block, justification));
				}
			}
		}

		let (block, justification) = finalized.expect("three of three precommits must reach supermajority");
		assert_eq!(block, target);
		assert_eq!(justification.precommits.len(), 3);
	}

	#[test]
	fn votes_from_unknown_voters_are_rejected() {
		let a = authority(1);
		let genesis = info(0, 0);
		let target = info(1, 1);

		let authority_set = Arc::new(AuthoritySetManager::new(
			Arc::new(MemoryAuxStore::new()),
			AuthoritySet { authorities: vec![a.clone()], set_id: 0 },
		));
		let (voter, _initial) = GrandpaVoter::new(
			authority_set,
			Arc::new(LocalSigner(a.id)),
			Arc::new(AcceptAllVerifier),
			Arc::new(FixedChainQuery(target)),
			Arc::new(MemoryAuxStore::new()),
			VoterConfig::default(),
			Arc::new(sc_consensus::NoopMetrics),
			genesis,
		);

		let stranger = AuthorityId([99; 32]);
		let actions = voter.handle(Input::Vote(precommit(stranger, 0, 0, target)), &LinearChain);
		assert!(!actions.iter().any(|a| matches!(a, Action::Finalized(..))));
	}
}
