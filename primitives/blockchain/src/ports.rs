use crate::{BlockHash, Error};
use std::collections::HashMap;
use parking_lot::Mutex;

/// The external WASM runtime host. Out of scope: WASM execution engine
/// internals. In scope: the single entry point the import pipeline and the
/// block producer call through.
pub trait Runtime: Send + Sync {
	/// Execute a block's extrinsics against the state rooted at
	/// `state_root`, committing every write the execution produces through
	/// `trie` and returning the resulting post-state root. The returned
	/// root is exactly `trie`'s own idea of the new root -- callers must
	/// not derive it any other way.
	///
	/// `block` must already have its seal digest stripped.
	fn execute_block(
		&self,
		state_root: BlockHash,
		header_without_seal: &[u8],
		body: &[u8],
		trie: &dyn TrieStore,
	) -> Result<BlockHash, Error>;

	/// Call an arbitrary named export (used by the inherent-data and
	/// authoring paths for runtime APIs such as "fetch the BABE epoch
	/// configuration").
	fn call(&self, state_root: BlockHash, export: &str, input: &[u8]) -> Result<Vec<u8>, Error>;
}

/// The external state-trie backing store. Out of scope: trie implementation,
/// KV backing store, SCALE codec mechanics.
pub trait TrieStore: Send + Sync {
	fn get(&self, root: BlockHash, key: &[u8]) -> Option<Vec<u8>>;
	fn put(&self, root: BlockHash, key: &[u8], value: Vec<u8>) -> BlockHash;
	fn delete(&self, root: BlockHash, key: &[u8]) -> BlockHash;
	/// Current root of the most recently committed state for `root`'s lineage.
	fn root(&self, root: BlockHash) -> BlockHash;
	/// Commit a batch of writes at once, returning the new root.
	fn commit_at(&self, root: BlockHash, writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> BlockHash;
}

/// Fixed-key auxiliary storage, independent of any state root: the
/// `:auth:root`, `:grandpa:state` and `:babe:epoch:<u64>` keys
/// all live here rather than in the state trie. Out of scope: the
/// underlying KV backing store; this is a thin port over it.
pub trait AuxStore: Send + Sync {
	fn get_aux(&self, key: &[u8]) -> Option<Vec<u8>>;
	fn insert_aux(&self, key: &[u8], value: &[u8]);
	fn remove_aux(&self, key: &[u8]);
}

/// An in-memory [`AuxStore`] for tests, in place of the real node's on-disk
/// backing store.
#[derive(Default)]
pub struct MemoryAuxStore {
	data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryAuxStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl AuxStore for MemoryAuxStore {
	fn get_aux(&self, key: &[u8]) -> Option<Vec<u8>> {
		self.data.lock().get(key).cloned()
	}

	fn insert_aux(&self, key: &[u8], value: &[u8]) {
		self.data.lock().insert(key.to_vec(), value.to_vec());
	}

	fn remove_aux(&self, key: &[u8]) {
		self.data.lock().remove(key);
	}
}
