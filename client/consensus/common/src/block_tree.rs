use std::collections::{HashMap, HashSet};

use sp_blockchain::{BlockHash, BlockHeader, BlockInfo, BlockNumber, Extrinsic};
use sp_consensus_grandpa::Justification;

use crate::error::BlockTreeError;

struct Node {
	header: BlockHeader,
	body: Option<Vec<Extrinsic>>,
	justification: Option<Justification>,
	children: Vec<BlockHash>,
	/// This block's own authority weight, resolved by the caller at import
	/// time (typically from the BABE pre-digest's authority index). Kept
	/// out of `BlockHeader` itself so `BlockTree` never has to reach back
	/// into the authority-set manager to compute the best-chain rule.
	weight: u64,
	cumulative_weight: u64,
}

/// The canonical DAG of known, validated headers: best-chain
/// selection, the finality cursor, and pruning on finalization.
pub struct BlockTree {
	nodes: HashMap<BlockHash, Node>,
	leaves: HashSet<BlockHash>,
	genesis: BlockHash,
	last_finalized: BlockInfo,
}

/// What changed as a result of a successful `finalize` call, for the caller
/// to forward onward as `chain.finalizedHead` / extrinsic-lifecycle events.
pub struct FinalizationEvent {
	pub finalized: BlockInfo,
	pub pruned: Vec<BlockHash>,
}

impl BlockTree {
	/// Seed the tree with a genesis header (no parent, number 0).
	pub fn new(genesis_header: BlockHeader) -> Self {
		assert_eq!(genesis_header.number, 0, "genesis header must be number 0");
		let hash = genesis_header.hash();
		let mut nodes = HashMap::new();
		nodes.insert(
			hash,
			Node { header: genesis_header, body: Some(Vec::new()), justification: None, children: Vec::new(), weight: 0, cumulative_weight: 0 },
		);
		let mut leaves = HashSet::new();
		leaves.insert(hash);

		Self { nodes, leaves, genesis: hash, last_finalized: BlockInfo::new(0, hash) }
	}

	pub fn genesis_hash(&self) -> BlockHash {
		self.genesis
	}

	pub fn contains(&self, hash: &BlockHash) -> bool {
		self.nodes.contains_key(hash)
	}

	/// Insert `header`, whose own authoring weight is `weight` (0 for
	/// genesis or non-authored test headers).
	pub fn add_header(&mut self, header: BlockHeader, weight: u64) -> Result<BlockInfo, BlockTreeError> {
		let hash = header.hash();
		if self.nodes.contains_key(&hash) {
			return Err(BlockTreeError::AlreadyKnown(hash));
		}

		let parent = self.nodes.get(&header.parent_hash).ok_or(BlockTreeError::UnknownParent(header.parent_hash))?;
		let cumulative_weight = parent.cumulative_weight + weight;
		let parent_hash = header.parent_hash;

		let info = header.info();
		self.nodes.insert(hash, Node { header, body: None, justification: None, children: Vec::new(), weight, cumulative_weight });

		self.leaves.remove(&parent_hash);
		self.leaves.insert(hash);
		self.nodes.get_mut(&parent_hash).expect("just looked up").children.push(hash);

		Ok(info)
	}

	pub fn add_body(&mut self, hash: BlockHash, body: Vec<Extrinsic>) -> Result<(), BlockTreeError> {
		let node = self.nodes.get_mut(&hash).ok_or(BlockTreeError::UnknownHeader(hash))?;
		node.body = Some(body);
		Ok(())
	}

	pub fn get_header(&self, hash: &BlockHash) -> Option<&BlockHeader> {
		self.nodes.get(hash).map(|n| &n.header)
	}

	pub fn get_body(&self, hash: &BlockHash) -> Option<&[Extrinsic]> {
		self.nodes.get(hash).and_then(|n| n.body.as_deref())
	}

	pub fn children(&self, hash: &BlockHash) -> Vec<BlockHash> {
		self.nodes.get(hash).map(|n| n.children.clone()).unwrap_or_default()
	}

	/// Longest chain; tie-break by greater cumulative authority weight;
	/// final tie-break by smaller hash.
	pub fn deepest_leaf(&self) -> BlockInfo {
		self.leaves
			.iter()
			.map(|hash| {
				let node = &self.nodes[hash];
				(node.header.number, node.cumulative_weight, *hash)
			})
			.max_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2.cmp(&a.2)))
			.map(|(number, _, hash)| BlockInfo::new(number, hash))
			.unwrap_or(BlockInfo::new(0, self.genesis))
	}

	pub fn last_finalized(&self) -> BlockInfo {
		self.last_finalized
	}

	pub fn is_descendant_of(&self, ancestor: &BlockHash, descendant: &BlockHash) -> bool {
		if ancestor == descendant {
			return true;
		}
		let Some(mut node) = self.nodes.get(descendant) else { return false };
		loop {
			if &node.header.parent_hash == ancestor {
				return true;
			}
			if node.header.number == 0 {
				return false;
			}
			match self.nodes.get(&node.header.parent_hash) {
				Some(parent) => node = parent,
				None => return false,
			}
		}
	}

	/// Move the finality cursor to `block`, attaching `justification`, and
	/// prune every branch that does not descend from it. A finalization
	/// older than the current cursor is a no-op (`Ok(None)`); finalizing an
	/// unknown block is an error.
	pub fn finalize(&mut self, block: BlockInfo, justification: Justification) -> Result<Option<FinalizationEvent>, BlockTreeError> {
		if block.number <= self.last_finalized.number {
			return Ok(None);
		}
		if !self.nodes.contains_key(&block.hash) {
			return Err(BlockTreeError::UnknownHeader(block.hash));
		}

		// Collect every node that is NOT a descendant of `block` (and isn't
		// `block` itself or an ancestor of it) -- those are the pruned
		// forks. We do this before mutating anything so the operation reads
		// as atomic to observers.
		let keep: HashSet<BlockHash> = {
			let mut keep = HashSet::new();
			let mut frontier = vec![block.hash];
			while let Some(h) = frontier.pop() {
				if keep.insert(h) {
					frontier.extend(self.nodes[&h].children.iter().copied());
				}
			}
			// ancestors of `block` are retained too (they're on the
			// canonical path, just already finalized or about to be).
			let mut cur = block.hash;
			while let Some(node) = self.nodes.get(&cur) {
				keep.insert(cur);
				if node.header.number == 0 {
					break;
				}
				cur = node.header.parent_hash;
			}
			keep
		};

		let pruned: Vec<BlockHash> = self.nodes.keys().filter(|h| !keep.contains(*h)).copied().collect();
		for hash in &pruned {
			self.nodes.remove(hash);
			self.leaves.remove(hash);
		}

		// Children lists may still reference pruned hashes (a retained
		// ancestor whose *other* child branch got pruned); sweep those.
		for node in self.nodes.values_mut() {
			node.children.retain(|c| keep.contains(c));
		}

		if let Some(node) = self.nodes.get_mut(&block.hash) {
			node.justification = Some(justification);
		}
		self.leaves.retain(|h| self.nodes.contains_key(h));
		if self.leaves.is_empty() {
			self.leaves.insert(block.hash);
		}

		self.last_finalized = block;
		Ok(Some(FinalizationEvent { finalized: block, pruned }))
	}
}
