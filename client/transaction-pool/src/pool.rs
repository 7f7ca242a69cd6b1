use std::collections::{HashMap, HashSet, VecDeque};

use sp_blockchain::{BlockHash, Extrinsic};
use tracing::{debug, trace};

use crate::{Error, Moderator};

/// An opaque tag a transaction either requires to be ready, or provides for
/// others once it is.
pub type Tag = Vec<u8>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolTransaction {
	pub hash: BlockHash,
	pub data: Extrinsic,
	pub requires: Vec<Tag>,
	pub provides: Vec<Tag>,
	pub submitted_at: u64,
}

impl PoolTransaction {
	pub fn new(data: Extrinsic, requires: Vec<Tag>, provides: Vec<Tag>, submitted_at: u64) -> Self {
		let hash = data.hash();
		Self { hash, data, requires, provides, submitted_at }
	}
}

/// TransactionPool: admission, tag-based readiness, eviction.
///
/// Invariant maintained by every mutating method: the set of ready
/// transactions is always the transitive closure of "requires satisfied"
/// under the current provides map.
pub struct TransactionPool {
	max_ready: usize,
	max_postponed: usize,
	ban_window: u64,
	max_age: u64,

	all: HashMap<BlockHash, PoolTransaction>,
	ready_order: Vec<BlockHash>,
	ready_set: HashSet<BlockHash>,
	waiting: HashSet<BlockHash>,
	postponed: VecDeque<BlockHash>,

	/// tag -> the single ready transaction currently providing it.
	tag_provider: HashMap<Tag, BlockHash>,
	/// tag -> every non-ready transaction blocked on it.
	tag_waiters: HashMap<Tag, HashSet<BlockHash>>,

	moderator: Moderator,
}

impl TransactionPool {
	pub fn new(max_ready: usize, max_postponed: usize, ban_window: u64, max_age: u64) -> Self {
		Self {
			max_ready,
			max_postponed,
			ban_window,
			max_age,
			all: HashMap::new(),
			ready_order: Vec::new(),
			ready_set: HashSet::new(),
			waiting: HashSet::new(),
			postponed: VecDeque::new(),
			tag_provider: HashMap::new(),
			tag_waiters: HashMap::new(),
			moderator: Moderator::new(ban_window),
		}
	}

	pub fn len(&self) -> usize {
		self.all.len()
	}

	pub fn is_empty(&self) -> bool {
		self.all.is_empty()
	}

	/// Snapshot of every currently-ready transaction, in promotion order.
	pub fn ready(&self) -> Vec<PoolTransaction> {
		self.ready_order.iter().map(|h| self.all[h].clone()).collect()
	}

	fn is_satisfied(&self, tx: &PoolTransaction) -> bool {
		tx.requires.iter().all(|tag| self.tag_provider.contains_key(tag))
	}

	pub fn submit(&mut self, tx: PoolTransaction) -> Result<(), Error> {
		if self.all.contains_key(&tx.hash) || self.moderator.is_banned(&tx.hash) {
			return Err(Error::AlreadyImported);
		}

		if self.is_satisfied(&tx) {
			self.admit_ready(tx)?;
		} else {
			for tag in &tx.requires {
				self.tag_waiters.entry(tag.clone()).or_default().insert(tx.hash);
			}
			self.waiting.insert(tx.hash);
			self.all.insert(tx.hash, tx);
		}

		Ok(())
	}

	/// Insert a transaction known to be ready, respecting `max_ready`, then
	/// cascade-promote anything it newly unblocks.
	fn admit_ready(&mut self, tx: PoolTransaction) -> Result<(), Error> {
		let hash = tx.hash;
		if self.ready_order.len() >= self.max_ready {
			if self.postponed.len() >= self.max_postponed {
				return Err(Error::PoolFull);
			}
			trace!(target: "txpool", ?hash, "pool full, postponing");
			self.postponed.push_back(hash);
			self.all.insert(hash, tx);
			return Ok(());
		}

		self.promote(tx);
		self.cascade_from_ready_insert();
		Ok(())
	}

	fn promote(&mut self, tx: PoolTransaction) {
		let hash = tx.hash;
		for tag in &tx.provides {
			self.tag_provider.entry(tag.clone()).or_insert(hash);
		}
		self.ready_order.push(hash);
		self.ready_set.insert(hash);
		self.waiting.remove(&hash);
		self.all.insert(hash, tx);
		debug!(target: "txpool", ?hash, "transaction ready");
	}

	/// Breadth-first promotion of every waiting transaction unblocked by the
	/// tags most recently added to `tag_provider`.
	fn cascade_from_ready_insert(&mut self) {
		let mut frontier: Vec<Tag> = self.tag_provider.keys().cloned().collect();
		loop {
			let mut unlocked = Vec::new();
			for tag in frontier.drain(..) {
				if let Some(waiters) = self.tag_waiters.get(&tag) {
					unlocked.extend(waiters.iter().copied());
				}
			}
			if unlocked.is_empty() {
				break;
			}

			let mut next_frontier = Vec::new();
			for hash in unlocked {
				if self.ready_set.contains(&hash) || !self.waiting.contains(&hash) {
					continue;
				}
				let tx = match self.all.get(&hash) {
					Some(tx) => tx.clone(),
					None => continue,
				};
				if !self.is_satisfied(&tx) {
					continue;
				}
				for tag in &tx.provides {
					if !self.tag_provider.contains_key(tag) {
						next_frontier.push(tag.clone());
					}
				}
				if self.ready_order.len() >= self.max_ready {
					self.postponed.push_back(hash);
					self.waiting.remove(&hash);
				} else {
					self.promote(tx);
				}
			}
			frontier = next_frontier;
			if frontier.is_empty() {
				break;
			}
		}
	}

	/// Unlink `hash`, rolling back any tags it provided (demoting dependents)
	/// and draining the postponed queue into any freed ready slots. Absence
	/// of `hash` is not an error.
	pub fn remove(&mut self, hash: BlockHash) {
		let Some(tx) = self.all.remove(&hash) else { return };

		self.waiting.remove(&hash);
		for tag in &tx.requires {
			if let Some(set) = self.tag_waiters.get_mut(tag) {
				set.remove(&hash);
			}
		}

		if self.ready_set.remove(&hash) {
			self.ready_order.retain(|h| *h != hash);
			for tag in &tx.provides {
				if self.tag_provider.get(tag) == Some(&hash) {
					self.tag_provider.remove(tag);
				}
			}
			self.demote_unsatisfied();
		} else {
			self.postponed.retain(|h| *h != hash);
		}

		self.drain_postponed();
	}

	/// After a provides-rollback, demote every ready transaction whose
	/// requires are no longer fully satisfied. Cascades, since demoting one
	/// transaction can strip the tags it provided from others.
	fn demote_unsatisfied(&mut self) {
		loop {
			let to_demote: Vec<BlockHash> = self
				.ready_order
				.iter()
				.copied()
				.filter(|h| !self.is_satisfied(&self.all[h]))
				.collect();
			if to_demote.is_empty() {
				break;
			}
			for hash in to_demote {
				self.ready_set.remove(&hash);
				self.ready_order.retain(|h| *h != hash);
				let tx = self.all[&hash].clone();
				for tag in &tx.provides {
					if self.tag_provider.get(tag) == Some(&hash) {
						self.tag_provider.remove(tag);
					}
				}
				for tag in &tx.requires {
					self.tag_waiters.entry(tag.clone()).or_default().insert(hash);
				}
				self.waiting.insert(hash);
			}
		}
	}

	fn drain_postponed(&mut self) {
		while self.ready_order.len() < self.max_ready {
			let Some(hash) = self.postponed.pop_front() else { break };
			let Some(tx) = self.all.get(&hash).cloned() else { continue };
			if self.is_satisfied(&tx) {
				self.promote(tx);
			} else {
				self.waiting.insert(hash);
				for tag in &tx.requires {
					self.tag_waiters.entry(tag.clone()).or_default().insert(hash);
				}
			}
		}
		self.cascade_from_ready_insert();
	}

	/// Evict waiting/postponed transactions older than `max_age` as of
	/// `at_block`, banning them from immediate resubmission, and age out
	/// expired bans. Ready transactions are never evicted here: they are
	/// reaped individually as their block is imported (see the import
	/// pipeline's `BlockExecutor::apply_block`).
	pub fn remove_stale(&mut self, at_block: u64) {
		let stale: Vec<BlockHash> = self
			.all
			.iter()
			.filter(|(h, tx)| !self.ready_set.contains(*h) && tx.submitted_at + self.max_age <= at_block)
			.map(|(h, _)| *h)
			.collect();

		for hash in stale {
			self.remove(hash);
			self.moderator.ban(hash, at_block);
		}
		self.moderator.age_out(at_block);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ext(n: u8) -> Extrinsic {
		Extrinsic(vec![n])
	}

	fn tx(n: u8, requires: &[&str], provides: &[&str], at: u64) -> PoolTransaction {
		PoolTransaction::new(
			ext(n),
			requires.iter().map(|s| s.as_bytes().to_vec()).collect(),
			provides.iter().map(|s| s.as_bytes().to_vec()).collect(),
			at,
		)
	}

	#[test]
	fn ready_promotion_order_follows_dependency_chain() {
		let mut pool = TransactionPool::new(100, 100, 10, 10);
		let t1 = tx(1, &["a"], &["b"], 0);
		let t2 = tx(2, &["b"], &["c"], 0);
		pool.submit(t1.clone()).unwrap();
		pool.submit(t2.clone()).unwrap();
		assert!(pool.ready().is_empty());

		let t0 = tx(0, &[], &["a"], 0);
		pool.submit(t0.clone()).unwrap();

		let order: Vec<BlockHash> = pool.ready().iter().map(|t| t.hash).collect();
		assert_eq!(order, vec![t0.hash, t1.hash, t2.hash]);
	}

	#[test]
	fn remove_demotes_dependents_that_lose_their_provider() {
		let mut pool = TransactionPool::new(100, 100, 10, 10);
		let t0 = tx(0, &[], &["a"], 0);
		let t1 = tx(1, &["a"], &["b"], 0);
		pool.submit(t0.clone()).unwrap();
		pool.submit(t1.clone()).unwrap();
		assert_eq!(pool.ready().len(), 2);

		pool.remove(t0.hash);
		assert_eq!(pool.ready().len(), 0);
	}

	#[test]
	fn duplicate_submit_is_rejected() {
		let mut pool = TransactionPool::new(100, 100, 10, 10);
		let t0 = tx(0, &[], &["a"], 0);
		pool.submit(t0.clone()).unwrap();
		assert_eq!(pool.submit(t0), Err(Error::AlreadyImported));
	}

	#[test]
	fn overflow_beyond_max_ready_is_postponed_then_drained() {
		let mut pool = TransactionPool::new(1, 10, 10, 10);
		let t0 = tx(0, &[], &["a"], 0);
		let t1 = tx(1, &[], &["b"], 0);
		pool.submit(t0.clone()).unwrap();
		pool.submit(t1.clone()).unwrap();
		assert_eq!(pool.ready().len(), 1);

		pool.remove(t0.hash);
		assert_eq!(pool.ready().len(), 1);
		assert_eq!(pool.ready()[0].hash, t1.hash);
	}

	#[test]
	fn remove_stale_bans_resubmission_within_window() {
		let mut pool = TransactionPool::new(100, 100, 5, 10);
		let t0 = tx(0, &["a"], &["b"], 0);
		pool.submit(t0.clone()).unwrap();
		pool.remove_stale(10);
		assert_eq!(pool.submit(t0), Err(Error::AlreadyImported));
	}
}
