use std::collections::{HashMap, HashSet};

use sp_blockchain::{BlockHash, BlockInfo};
use sp_consensus_babe::{Authority, AuthorityId};
use sp_consensus_grandpa::{Justification, SignedVote, VoteKind};

use crate::vote_graph;

/// The ordered set of voters driving a round, plus their weights.
#[derive(Clone, Debug)]
pub struct VoterSet {
	voters: Vec<Authority>,
}

impl VoterSet {
	pub fn new(voters: Vec<Authority>) -> Self {
		Self { voters }
	}

	pub fn total_weight(&self) -> u64 {
		self.voters.iter().map(|a| a.weight).sum()
	}

	pub fn weight_of(&self, id: &AuthorityId) -> Option<u64> {
		self.voters.iter().find(|a| &a.id == id).map(|a| a.weight)
	}

	pub fn contains(&self, id: &AuthorityId) -> bool {
		self.voters.iter().any(|a| &a.id == id)
	}

	pub fn len(&self) -> usize {
		self.voters.len()
	}

	pub fn is_empty(&self) -> bool {
		self.voters.is_empty()
	}

	/// `round_number mod |V|`.
	pub fn primary(&self, round_number: u64) -> Option<&Authority> {
		if self.voters.is_empty() {
			return None;
		}
		self.voters.get((round_number as usize) % self.voters.len())
	}
}

/// The round state machine's phase: `Proposed -> Prevoted ->
/// Precommitted -> Completable -> Finalizing -> Completed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundPhase {
	Proposed,
	Prevoted,
	Precommitted,
	Completable,
	Finalizing,
	Completed,
}

/// The outcome of importing a single vote.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteOutcome {
	Accepted,
	/// Same voter, same target, already on record.
	Duplicate,
	/// Same voter, same kind, conflicting target: an equivocation.
	Equivocation,
}

/// One round of GRANDPA voting: prevotes, precommits, the vote
/// graph they build, and the ghost/estimate/completable computations built
/// on it.
pub struct Round {
	pub round_number: u64,
	pub set_id: u64,
	voters: VoterSet,
	threshold: u64,
	base: BlockInfo,
	/// The previous round's finalizing estimate, carried forward as the
	/// `PrimaryPropose` candidate.
	pub primary_propose: BlockInfo,

	prevotes: HashMap<AuthorityId, SignedVote>,
	precommits: HashMap<AuthorityId, SignedVote>,
	prevote_weight_by_target: HashMap<BlockInfo, u64>,
	precommit_weight_by_target: HashMap<BlockInfo, u64>,
	precommitted_voters: HashSet<AuthorityId>,
	equivocators_prevote: HashSet<AuthorityId>,
	equivocators_precommit: HashSet<AuthorityId>,

	pub phase: RoundPhase,
	pub local_id: Option<AuthorityId>,
	pub local_prevote: Option<BlockInfo>,
	pub local_precommit: Option<BlockInfo>,
	finalized: Option<(BlockInfo, Justification)>,
}

impl Round {
	pub fn new(round_number: u64, set_id: u64, voters: VoterSet, base: BlockInfo, primary_propose: BlockInfo, local_id: Option<AuthorityId>) -> Self {
		let total_weight = voters.total_weight();
		let threshold = sp_consensus_grandpa::supermajority_threshold(total_weight);
		Self {
			round_number,
			set_id,
			voters,
			threshold,
			base,
			primary_propose,
			prevotes: HashMap::new(),
			precommits: HashMap::new(),
			prevote_weight_by_target: HashMap::new(),
			precommit_weight_by_target: HashMap::new(),
			precommitted_voters: HashSet::new(),
			equivocators_prevote: HashSet::new(),
			equivocators_precommit: HashSet::new(),
			phase: RoundPhase::Proposed,
			local_id,
			local_prevote: None,
			local_precommit: None,
			finalized: None,
		}
	}

	pub fn threshold(&self) -> u64 {
		self.threshold
	}

	pub fn voters(&self) -> &VoterSet {
		&self.voters
	}

	pub fn base(&self) -> BlockInfo {
		self.base
	}

	pub fn is_primary(&self, id: &AuthorityId) -> bool {
		self.voters.primary(self.round_number).is_some_and(|a| &a.id == id)
	}

	pub fn is_equivocator(&self, kind: VoteKind, id: &AuthorityId) -> bool {
		match kind {
			VoteKind::Prevote => self.equivocators_prevote.contains(id),
			VoteKind::Precommit => self.equivocators_precommit.contains(id),
			VoteKind::PrimaryPropose => false,
		}
	}

	/// Import a signature-verified vote. The caller (the voter's message
	/// handler) is responsible for signature verification and for checking
	/// `vote.round`/`vote.set_id` match this round before calling.
	pub fn import_vote(&mut self, vote: SignedVote) -> VoteOutcome {
		match vote.kind {
			VoteKind::PrimaryPropose => VoteOutcome::Accepted,
			VoteKind::Prevote => self.import_into(vote, true),
			VoteKind::Precommit => self.import_into(vote, false),
		}
	}

	fn import_into(&mut self, vote: SignedVote, is_prevote: bool) -> VoteOutcome {
		let (table, weight_by_target, equivocators) = if is_prevote {
			(&mut self.prevotes, &mut self.prevote_weight_by_target, &mut self.equivocators_prevote)
		} else {
			(&mut self.precommits, &mut self.precommit_weight_by_target, &mut self.equivocators_precommit)
		};

		if let Some(existing) = table.get(&vote.voter) {
			if existing.target == vote.target {
				return VoteOutcome::Duplicate;
			}
			equivocators.insert(vote.voter);
			return VoteOutcome::Equivocation;
		}

		let Some(weight) = self.voters.weight_of(&vote.voter) else {
			return VoteOutcome::Duplicate;
		};
		*weight_by_target.entry(vote.target).or_insert(0) += weight;
		table.insert(vote.voter, vote.clone());
		if !is_prevote {
			self.precommitted_voters.insert(vote.voter);
		}
		VoteOutcome::Accepted
	}

	fn precommitted_weight(&self) -> u64 {
		self.precommitted_voters.iter().filter_map(|id| self.voters.weight_of(id)).sum()
	}

	pub fn prevote_ghost<F>(&self, is_descendant_of: &F) -> Option<BlockInfo>
	where
		F: Fn(&BlockHash, &BlockHash) -> bool,
	{
		vote_graph::ghost(&self.prevote_weight_by_target, self.threshold, self.base, is_descendant_of)
	}

	pub fn precommit_ghost<F>(&self, is_descendant_of: &F) -> Option<BlockInfo>
	where
		F: Fn(&BlockHash, &BlockHash) -> bool,
	{
		vote_graph::ghost(&self.precommit_weight_by_target, self.threshold, self.base, is_descendant_of)
	}

	pub fn estimate<F>(&self, is_descendant_of: &F) -> BlockInfo
	where
		F: Fn(&BlockHash, &BlockHash) -> bool,
	{
		let prevote_ghost = self.prevote_ghost(is_descendant_of).unwrap_or(self.base);
		vote_graph::estimate(
			&self.precommit_weight_by_target,
			self.precommitted_weight(),
			self.voters.total_weight(),
			self.threshold,
			prevote_ghost,
			self.base,
			is_descendant_of,
		)
	}

	pub fn is_completable<F>(&self, is_descendant_of: &F) -> bool
	where
		F: Fn(&BlockHash, &BlockHash) -> bool,
	{
		let estimate = self.estimate(is_descendant_of);
		vote_graph::completable(
			&self.precommit_weight_by_target,
			self.precommitted_weight(),
			self.voters.total_weight(),
			self.threshold,
			estimate,
			is_descendant_of,
		)
	}

	/// If the precommit-ghost has reached supermajority, build the
	/// justification for it and mark
	/// this round `Completed`. Idempotent: returns the same result on
	/// repeated calls once completed.
	pub fn try_finalize<F>(&mut self, is_descendant_of: &F) -> Option<(BlockInfo, Justification)>
	where
		F: Fn(&BlockHash, &BlockHash) -> bool,
	{
		if let Some(done) = &self.finalized {
			return Some(done.clone());
		}

		let ghost = self.precommit_ghost(is_descendant_of)?;
		let weight = vote_graph::cumulative_weight(&self.precommit_weight_by_target, ghost, is_descendant_of);
		if weight < self.threshold {
			return None;
		}

		let precommits: Vec<SignedVote> = self
			.precommits
			.values()
			.filter(|v| v.target.hash == ghost.hash || is_descendant_of(&ghost.hash, &v.target.hash))
			.cloned()
			.collect();

		let justification = Justification { round: self.round_number, set_id: self.set_id, target: ghost, precommits };
		self.phase = RoundPhase::Completed;
		self.finalized = Some((ghost, justification.clone()));
		Some((ghost, justification))
	}

	pub fn is_completed(&self) -> bool {
		matches!(self.phase, RoundPhase::Completed)
	}

	/// Accept an externally-constructed justification (a `Fin` input) as
	/// this round's outcome, short-circuiting local voting. The caller
	/// (the voter) is responsible for verifying the justification's weight
	/// and signatures first.
	pub fn accept_external_finalization(&mut self, target: BlockInfo, justification: Justification) {
		self.phase = RoundPhase::Completed;
		self.finalized = Some((target, justification));
	}
}
