// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Standalone, single-authority devnet implementations of every external
//! port the core consensus subsystem treats as a collaborator: the WASM
//! runtime, the state trie, VRF/seal/vote signing oracles, the proposer and
//! the libp2p network handle. None of these are meant to be cryptographically
//! sound; they exist so `substrate-diy-node` authors and imports its own
//! blocks without a real runtime, trie backend or key store wired in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use blake2::digest::{consts::U32, Digest as _};
use codec::{Decode, Encode};
use parking_lot::Mutex;
use sp_blockchain::{
	AuxStore, Block, BlockHash, BlockHeader, BlockInfo, DigestItem, Error as ChainError, Extrinsic, Runtime, TrieStore,
};
use sp_consensus_babe::{AuthorityId, VrfOracle};
use sp_consensus_grandpa::{VoteKind, VoteSignatureOracle};

fn blake2_32(parts: &[&[u8]]) -> [u8; 32] {
	let mut hasher = blake2::Blake2b::<U32>::new();
	for part in parts {
		hasher.update(part);
	}
	let out = hasher.finalize();
	let mut buf = [0u8; 32];
	buf.copy_from_slice(&out);
	buf
}

fn blake2_64(parts: &[&[u8]]) -> [u8; 64] {
	let first = blake2_32(parts);
	let second = blake2_32(&[&first[..]]);
	let mut buf = [0u8; 64];
	buf[..32].copy_from_slice(&first);
	buf[32..].copy_from_slice(&second);
	buf
}

/// A state transition standing in for WASM execution: the one write this
/// runtime makes per block is keyed by the blake2 of the header with its
/// `state_root` field zeroed (so a proposer can compute it up front, before
/// the seal exists) and valued by the body. The post-state root is whatever
/// [`DevTrieStore::commit_at`] says that write produces -- the trie, not
/// this runtime, is authoritative.
pub struct DevRuntime;

impl Runtime for DevRuntime {
	fn execute_block(&self, parent_state_root: BlockHash, header_without_seal: &[u8], body: &[u8], trie: &dyn TrieStore) -> Result<BlockHash, ChainError> {
		let mut input = header_without_seal;
		let header = BlockHeader::decode(&mut input)
			.map_err(|e| ChainError::RuntimeTrap { export: "execute_block".into(), message: format!("malformed header: {e}") })?;
		let canonical = BlockHeader { state_root: BlockHash::default(), ..header };
		let key = blake2_32(&[&canonical.encode()]).to_vec();
		Ok(trie.commit_at(parent_state_root, &[(key, Some(body.to_vec()))]))
	}

	fn call(&self, _state_root: BlockHash, _export: &str, _input: &[u8]) -> Result<Vec<u8>, ChainError> {
		Ok(Vec::new())
	}
}

/// A trie with no Merkle structure: every root is just the blake2 of its
/// parent root and the batch of writes applied to reach it. Good enough for
/// a devnet that never serves state proofs to peers.
#[derive(Default)]
pub struct DevTrieStore {
	data: Mutex<HashMap<BlockHash, HashMap<Vec<u8>, Vec<u8>>>>,
}

impl DevTrieStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl TrieStore for DevTrieStore {
	fn get(&self, root: BlockHash, key: &[u8]) -> Option<Vec<u8>> {
		self.data.lock().get(&root).and_then(|kv| kv.get(key).cloned())
	}

	fn put(&self, root: BlockHash, key: &[u8], value: Vec<u8>) -> BlockHash {
		self.commit_at(root, &[(key.to_vec(), Some(value))])
	}

	fn delete(&self, root: BlockHash, key: &[u8]) -> BlockHash {
		self.commit_at(root, &[(key.to_vec(), None)])
	}

	fn root(&self, root: BlockHash) -> BlockHash {
		root
	}

	fn commit_at(&self, root: BlockHash, writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> BlockHash {
		let mut guard = self.data.lock();
		let mut next = guard.get(&root).cloned().unwrap_or_default();
		for (key, value) in writes {
			match value {
				Some(v) => {
					next.insert(key.clone(), v.clone());
				}
				None => {
					next.remove(key);
				}
			}
		}
		let mut hash_input: Vec<u8> = root.0.to_vec();
		for (key, value) in writes {
			hash_input.extend_from_slice(key);
			hash_input.extend_from_slice(value.as_deref().unwrap_or(&[]));
		}
		let new_root = BlockHash(blake2_32(&[&hash_input]));
		guard.insert(new_root, next);
		new_root
	}
}

/// A VRF/seal/vote-signing identity for a single devnet authority. Output
/// and signatures are keyed hashes of `(our id, message)`: deterministic and
/// reproducible across restarts, not unpredictable or unforgeable, which is
/// fine for a node that is its own only peer.
pub struct DevKeypair {
	id: AuthorityId,
}

impl DevKeypair {
	pub fn new(id: AuthorityId) -> Self {
		Self { id }
	}

	pub fn id(&self) -> AuthorityId {
		self.id
	}
}

impl VrfOracle for DevKeypair {
	fn evaluate(&self, input: &[u8]) -> ([u8; 32], [u8; 64]) {
		let output = blake2_32(&[&self.id.0, input]);
		let proof = blake2_64(&[&output, &self.id.0]);
		(output, proof)
	}

	fn verify(&self, input: &[u8], authority: &AuthorityId, output: &[u8; 32], proof: &[u8; 64]) -> bool {
		let expected_output = blake2_32(&[&authority.0, input]);
		let expected_proof = blake2_64(&[&expected_output, &authority.0]);
		*output == expected_output && *proof == expected_proof
	}
}

impl sc_consensus_babe::SealOracle for DevKeypair {
	fn id(&self) -> AuthorityId {
		self.id
	}

	fn sign(&self, header_hash: BlockHash) -> [u8; 64] {
		blake2_64(&[&self.id.0, &header_hash.0])
	}

	fn verify(&self, authority: &AuthorityId, header_hash: BlockHash, signature: &[u8; 64]) -> bool {
		*signature == blake2_64(&[&authority.0, &header_hash.0])
	}
}

impl sc_consensus_grandpa::VoteSigner for DevKeypair {
	fn id(&self) -> AuthorityId {
		self.id
	}

	fn sign(&self, round: u64, set_id: u64, kind: VoteKind, target: &BlockInfo) -> [u8; 64] {
		let payload = sp_consensus_grandpa::vote_signing_payload(round, set_id, kind, target);
		blake2_64(&[&self.id.0, &payload])
	}
}

impl VoteSignatureOracle for DevKeypair {
	fn verify(&self, voter: &AuthorityId, message: &[u8], signature: &[u8; 64]) -> bool {
		*signature == blake2_64(&[&voter.0, message])
	}
}

/// Always returns an empty inherent set: a standalone devnet has no
/// timestamp/parachain inherents of its own to inject.
pub struct DevInherents;

impl sc_consensus_babe::InherentDataProvider for DevInherents {
	fn inherents(&self, _slot: sp_blockchain::SlotNumber) -> Vec<Extrinsic> {
		Vec::new()
	}
}

/// Builds a block by hashing its way to a state root through [`DevRuntime`]
/// rather than executing anything; the extrinsics root is likewise the
/// blake2 of the body's concatenated extrinsic hashes.
///
/// Needs direct access to the block tree (not just [`sc_consensus_babe::ChainState`])
/// to read the parent header's actual `state_root`, since `execute_block`'s
/// result depends on it.
pub struct DevProposer<S> {
	runtime: Arc<DevRuntime>,
	trie: Arc<DevTrieStore>,
	executor: Arc<Mutex<sc_consensus::BlockExecutor<S>>>,
}

impl<S> DevProposer<S> {
	pub fn new(runtime: Arc<DevRuntime>, trie: Arc<DevTrieStore>, executor: Arc<Mutex<sc_consensus::BlockExecutor<S>>>) -> Self {
		Self { runtime, trie, executor }
	}
}

fn extrinsics_root(body: &[Extrinsic]) -> BlockHash {
	let mut input = Vec::new();
	for extrinsic in body {
		input.extend_from_slice(&extrinsic.hash().0);
	}
	BlockHash(blake2_32(&[&input]))
}

#[async_trait]
impl<S: AuxStore + Send + Sync> sc_consensus_babe::Proposer for DevProposer<S> {
	async fn propose(
		&self,
		parent: BlockInfo,
		inherents: Vec<Extrinsic>,
		extrinsics: Vec<Extrinsic>,
		pre_digest: DigestItem,
		_deadline: std::time::Duration,
	) -> Result<Block, sc_consensus_babe::ProposerError> {
		let parent_state_root = self
			.executor
			.lock()
			.block_tree()
			.get_header(&parent.hash)
			.map(|header| header.state_root)
			.ok_or_else(|| sc_consensus_babe::ProposerError::Other(format!("unknown parent {:?}", parent.hash)))?;

		let body: Vec<Extrinsic> = inherents.into_iter().chain(extrinsics).collect();
		let without_seal = BlockHeader {
			parent_hash: parent.hash,
			number: parent.number + 1,
			state_root: BlockHash::default(),
			extrinsics_root: extrinsics_root(&body),
			digests: vec![pre_digest],
		};

		let state_root = self
			.runtime
			.execute_block(parent_state_root, &without_seal.encode(), &body.encode(), self.trie.as_ref())
			.map_err(|e| sc_consensus_babe::ProposerError::Other(e.to_string()))?;

		let header = BlockHeader { state_root, ..without_seal };
		Ok(Block { header, body })
	}
}

/// Shared read/write surface over the import pipeline, implementing every
/// query port `sc-consensus-babe` and `sc-consensus-grandpa` need against
/// it: best block, ready extrinsics, self-authored-block import, and
/// best-descendant-of-base for GRANDPA's primary proposal.
pub struct SharedChain<S> {
	executor: Arc<Mutex<sc_consensus::BlockExecutor<S>>>,
}

impl<S> SharedChain<S> {
	pub fn new(executor: Arc<Mutex<sc_consensus::BlockExecutor<S>>>) -> Self {
		Self { executor }
	}
}

impl<S: AuxStore + Send + Sync> sc_consensus_babe::ChainState for SharedChain<S> {
	fn best_block(&self) -> BlockInfo {
		self.executor.lock().block_tree().deepest_leaf()
	}

	fn ready_extrinsics(&self, max: usize) -> Vec<Extrinsic> {
		self.executor.lock().pool().ready().into_iter().take(max).map(|tx| tx.data).collect()
	}
}

impl<S: AuxStore + Send + Sync> sc_consensus_babe::BlockSink for SharedChain<S> {
	fn import_own_block(&self, block: Block) -> Result<(), sc_consensus::ImportError> {
		self.executor.lock().apply_block(block, None).map(|_| ())
	}
}

impl<S: AuxStore + Send + Sync> sc_consensus_grandpa::ChainQuery for SharedChain<S> {
	fn best_containing(&self, _base: BlockInfo) -> BlockInfo {
		self.executor.lock().block_tree().deepest_leaf()
	}
}

/// No peers to talk to: block announcements and GRANDPA gossip both go
/// nowhere, and gap requests always come back empty.
pub struct DevNetworkHandle;

#[async_trait]
impl sc_consensus::NetworkHandle for DevNetworkHandle {
	async fn request_blocks(
		&self,
		_peer: sc_consensus::PeerId,
		_from: BlockHash,
		_to: BlockHash,
	) -> Result<Vec<sc_consensus::BlockData>, sc_consensus::NetworkError> {
		Ok(Vec::new())
	}

	fn broadcast_block(&self, _header: BlockHeader, _body: Vec<Extrinsic>) {}
}

pub struct DevGrandpaNetwork;

impl sc_consensus_grandpa::GrandpaNetwork for DevGrandpaNetwork {
	fn broadcast(&self, _message: sc_consensus_grandpa::GrandpaMessage) {}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn runtime_execution_is_independent_of_the_placeholder_state_root() {
		let runtime = DevRuntime;
		let trie = DevTrieStore::new();
		let header = BlockHeader {
			parent_hash: BlockHash::default(),
			number: 1,
			state_root: BlockHash::default(),
			extrinsics_root: BlockHash::default(),
			digests: Vec::new(),
		};

		let placeholder_root = runtime.execute_block(BlockHash::default(), &header.encode(), &[], &trie).unwrap();

		let sealed = BlockHeader { state_root: placeholder_root, ..header };
		let final_root = runtime.execute_block(BlockHash::default(), &sealed.encode(), &[], &trie).unwrap();

		assert_eq!(placeholder_root, final_root);
	}

	#[test]
	fn executing_a_block_actually_writes_its_body_into_the_trie() {
		let runtime = DevRuntime;
		let trie = DevTrieStore::new();
		let header = BlockHeader {
			parent_hash: BlockHash::default(),
			number: 1,
			state_root: BlockHash::default(),
			extrinsics_root: BlockHash::default(),
			digests: Vec::new(),
		};
		let body = b"some extrinsics".to_vec();

		let root = runtime.execute_block(BlockHash::default(), &header.encode(), &body, &trie).unwrap();
		assert_ne!(root, BlockHash::default());

		let canonical = BlockHeader { state_root: BlockHash::default(), ..header };
		let key = blake2_32(&[&canonical.encode()]).to_vec();
		assert_eq!(trie.get(root, &key), Some(body));
	}

	#[test]
	fn vrf_evaluate_then_verify_round_trips_for_the_same_identity() {
		let id = AuthorityId([5; 32]);
		let keypair = DevKeypair::new(id);
		let (output, proof) = keypair.evaluate(b"input");
		assert!(VrfOracle::verify(&keypair, b"input", &id, &output, &proof));
		assert!(!VrfOracle::verify(&keypair, b"other input", &id, &output, &proof));
	}

	#[test]
	fn trie_store_commit_is_content_addressed() {
		let trie = DevTrieStore::new();
		let root = trie.put(BlockHash::default(), b"k", b"v".to_vec());
		assert_eq!(trie.get(root, b"k"), Some(b"v".to_vec()));
		assert_eq!(trie.get(BlockHash::default(), b"k"), None);
	}
}
