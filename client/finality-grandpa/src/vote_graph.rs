use std::cmp::Reverse;
use std::collections::HashMap;

use sp_blockchain::{BlockHash, BlockInfo};

/// Sum of weights of every vote whose target is `candidate` or a descendant
/// of it. `is_descendant_of(a, b)` must answer "is `a` an ancestor-or-equal
/// of `b`?", matching [`sc_consensus::BlockTree::is_descendant_of`].
pub fn cumulative_weight<F>(votes: &HashMap<BlockInfo, u64>, candidate: BlockInfo, is_descendant_of: &F) -> u64
where
	F: Fn(&BlockHash, &BlockHash) -> bool,
{
	votes
		.iter()
		.filter(|(v, _)| v.hash == candidate.hash || is_descendant_of(&candidate.hash, &v.hash))
		.map(|(_, w)| *w)
		.sum()
}

/// The deepest candidate block (a cast vote, or `base`) whose cumulative
/// weight reaches `threshold`, tie-broken by the smallest hash at a given
/// height, matching [`sc_consensus::BlockTree::deepest_leaf`]'s rule.
/// `None` if not even `base` reaches the threshold.
pub fn ghost<F>(votes: &HashMap<BlockInfo, u64>, threshold: u64, base: BlockInfo, is_descendant_of: &F) -> Option<BlockInfo>
where
	F: Fn(&BlockHash, &BlockHash) -> bool,
{
	let mut candidates: Vec<BlockInfo> = votes.keys().copied().collect();
	candidates.push(base);

	candidates
		.into_iter()
		.filter(|c| cumulative_weight(votes, *c, is_descendant_of) >= threshold)
		.max_by_key(|c| (c.number, Reverse(c.hash)))
}

/// The best block such that it, plus all its descendants, could still
/// gather >= `threshold` precommits given what's been observed and the
/// weight of voters who have not yet precommitted. Always an
/// ancestor-or-equal of `prevote_ghost`.
#[allow(clippy::too_many_arguments)]
pub fn estimate<F>(
	precommit_votes: &HashMap<BlockInfo, u64>,
	precommitted_weight: u64,
	total_weight: u64,
	threshold: u64,
	prevote_ghost: BlockInfo,
	base: BlockInfo,
	is_descendant_of: &F,
) -> BlockInfo
where
	F: Fn(&BlockHash, &BlockHash) -> bool,
{
	let remaining = total_weight.saturating_sub(precommitted_weight);

	let mut candidates: Vec<BlockInfo> = precommit_votes.keys().copied().collect();
	candidates.push(base);
	candidates.push(prevote_ghost);

	candidates
		.into_iter()
		.filter(|c| c.hash == prevote_ghost.hash || is_descendant_of(&c.hash, &prevote_ghost.hash))
		.filter(|c| cumulative_weight(precommit_votes, *c, is_descendant_of) + remaining >= threshold)
		.max_by_key(|c| (c.number, Reverse(c.hash)))
		.unwrap_or(base)
}

/// A round is completable when no block still reachable by the
/// not-yet-precommitted voters could ever overtake `estimate`: the heaviest
/// strict descendant of `estimate` observed so far, plus every vote that
/// could still arrive, must fall short of `threshold`.
pub fn completable<F>(
	precommit_votes: &HashMap<BlockInfo, u64>,
	precommitted_weight: u64,
	total_weight: u64,
	threshold: u64,
	estimate: BlockInfo,
	is_descendant_of: &F,
) -> bool
where
	F: Fn(&BlockHash, &BlockHash) -> bool,
{
	let remaining = total_weight.saturating_sub(precommitted_weight);
	let best_rival = precommit_votes
		.keys()
		.filter(|c| c.hash != estimate.hash && is_descendant_of(&estimate.hash, &c.hash))
		.map(|c| cumulative_weight(precommit_votes, *c, is_descendant_of))
		.max()
		.unwrap_or(0);
	best_rival + remaining < threshold
}

#[cfg(test)]
mod tests {
	use super::*;

	fn h(n: u8) -> BlockHash {
		BlockHash([n; 32])
	}
	fn b(number: u64, n: u8) -> BlockInfo {
		BlockInfo::new(number, h(n))
	}

	/// linear chain: base(0) -> a(1) -> c(2), plus a fork base -> b(1)
	fn linear(ancestor: &BlockHash, descendant: &BlockHash) -> bool {
		let edges: &[(u8, u8)] = &[(1, 0), (2, 1)]; // child -> parent, by salt
		if ancestor == descendant {
			return true;
		}
		let mut cur = descendant.0[0];
		loop {
			if cur == ancestor.0[0] {
				return true;
			}
			match edges.iter().find(|(c, _)| *c == cur) {
				Some((_, p)) => cur = *p,
				None => return false,
			}
		}
	}

	#[test]
	fn ghost_picks_deepest_block_reaching_threshold() {
		let mut votes = HashMap::new();
		votes.insert(b(1, 1), 2u64);
		votes.insert(b(2, 2), 2u64);
		let base = b(0, 0);

		// threshold 3: only base (cumulative 4) and block 1 (cumulative 4) qualify,
		// block 2 alone carries weight 2 < 3.
		let g = ghost(&votes, 3, base, &linear).unwrap();
		assert_eq!(g, b(1, 1));
	}

	#[test]
	fn ghost_none_when_base_does_not_reach_threshold() {
		let votes = HashMap::new();
		let base = b(0, 0);
		assert_eq!(ghost(&votes, 1, base, &linear), None);
	}

	#[test]
	fn completable_when_no_remaining_voters_can_overtake_estimate() {
		let mut votes = HashMap::new();
		votes.insert(b(1, 1), 3u64);
		// total weight 4, all already precommitted, none left to flip things.
		assert!(completable(&votes, 4, 4, 3, b(1, 1), &linear));
	}

	#[test]
	fn not_completable_when_remaining_voters_could_still_reach_threshold() {
		let mut votes = HashMap::new();
		votes.insert(b(1, 1), 1u64);
		// 3 of 4 total weight has not precommitted yet; block 2 is a
		// descendant of the estimate and could still be pushed over threshold.
		let mut with_rival = votes.clone();
		with_rival.insert(b(2, 2), 0u64);
		assert!(!completable(&with_rival, 1, 4, 3, b(1, 1), &linear));
	}
}
