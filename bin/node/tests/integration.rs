//! Cross-component tests wiring the block-import pipeline, the transaction
//! pool, and the GRANDPA voter together the way `main.rs` does, rather than
//! exercising each crate in isolation the way its own unit tests do.

use std::sync::Arc;

use blake2::digest::{consts::U32, Digest as _};
use codec::Encode;
use sc_consensus::{Ancestry, AuthoritySetIngestError, BlockExecutor, BlockTree, ImportOutcome, NoopMetrics, NoopRpcSink};
use sc_consensus_grandpa::{Action, AuthoritySetManager, ChainQuery, GrandpaVoter, Input, VoterConfig, VoteSigner};
use sc_transaction_pool::{PoolTransaction, TransactionPool};
use sp_blockchain::{BlockHash, BlockHeader, BlockInfo, DigestItem, Extrinsic, MemoryAuxStore};
use sp_consensus_babe::AuthorityId;
use sp_consensus_grandpa::{SignedVote, VoteKind, VoteSignatureOracle};

struct AcceptAllRuntime;
impl sp_blockchain::Runtime for AcceptAllRuntime {
	fn execute_block(&self, state_root: BlockHash, header_without_seal: &[u8], body: &[u8], trie: &dyn sp_blockchain::TrieStore) -> Result<BlockHash, sp_blockchain::Error> {
		let mut hasher = blake2::Blake2b::<U32>::new();
		hasher.update(header_without_seal);
		let out = hasher.finalize();
		let mut buf = [0u8; 32];
		buf.copy_from_slice(&out);
		let root = BlockHash(buf);
		let _ = trie.commit_at(state_root, &[(header_without_seal.to_vec(), Some(body.to_vec()))]);
		Ok(root)
	}
	fn call(&self, _state_root: BlockHash, _export: &str, _input: &[u8]) -> Result<Vec<u8>, sp_blockchain::Error> {
		Ok(Vec::new())
	}
}

struct NoopTrie;
impl sp_blockchain::TrieStore for NoopTrie {
	fn get(&self, _root: BlockHash, _key: &[u8]) -> Option<Vec<u8>> {
		None
	}
	fn put(&self, root: BlockHash, _key: &[u8], _value: Vec<u8>) -> BlockHash {
		root
	}
	fn delete(&self, root: BlockHash, _key: &[u8]) -> BlockHash {
		root
	}
	fn root(&self, root: BlockHash) -> BlockHash {
		root
	}
	fn commit_at(&self, root: BlockHash, _writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> BlockHash {
		root
	}
}

struct AcceptAllValidator;
impl sc_consensus::BlockValidator for AcceptAllValidator {
	fn validate_header(&self, _header: &BlockHeader) -> Result<(), sc_consensus::ValidationError> {
		Ok(())
	}
}

struct NoopAuthorityObserver;
impl sc_consensus::AuthoritySetObserver for NoopAuthorityObserver {
	fn on_scheduled_change(&self, _at: BlockInfo, _new_set: sp_consensus_babe::AuthoritySet, _activate_at: u64, _tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		Ok(())
	}
	fn on_forced_change(&self, _at: BlockInfo, _new_set: sp_consensus_babe::AuthoritySet, _activate_at: u64, _tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		Ok(())
	}
	fn on_disabled(&self, _at: BlockInfo, _authority_index: u64, _tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		Ok(())
	}
	fn on_pause(&self, _at: BlockInfo, _activate_at: u64, _tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		Ok(())
	}
	fn on_resume(&self, _at: BlockInfo, _activate_at: u64, _tree: &dyn Ancestry) -> Result<(), AuthoritySetIngestError> {
		Ok(())
	}
	fn on_finalize(&self, _block: BlockInfo, _tree: &dyn Ancestry) {}
}

struct NoopJustificationHandler;
impl sc_consensus::JustificationHandler for NoopJustificationHandler {
	fn import_justification(&self, _justification: sp_consensus_grandpa::Justification) -> Result<(), sc_consensus::JustificationError> {
		Ok(())
	}
}

struct AcceptAllVoteVerifier;
impl VoteSignatureOracle for AcceptAllVoteVerifier {
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

struct ExecutorChainQuery(BlockInfo);
impl ChainQuery for ExecutorChainQuery {
	fn best_containing(&self, _base: BlockInfo) -> BlockInfo {
		self.0
	}
}

fn genesis_header() -> BlockHeader {
	BlockHeader { parent_hash: BlockHash::default(), number: 0, state_root: BlockHash::default(), extrinsics_root: BlockHash::default(), digests: vec![] }
}

fn child_header(parent: &BlockHeader, salt: u8, extrinsics_root: BlockHash) -> BlockHeader {
	let parent_hash = parent.hash();
	let without_seal = BlockHeader { parent_hash, number: parent.number + 1, state_root: BlockHash::default(), extrinsics_root, digests: vec![] };
	let mut hasher = blake2::Blake2b::<U32>::new();
	hasher.update(without_seal.encode());
	let out = hasher.finalize();
	let mut state_root = [0u8; 32];
	state_root.copy_from_slice(&out);
	let mut digests = without_seal.digests.clone();
	digests.push(DigestItem::Seal(*b"TEST", vec![salt]));
	BlockHeader { state_root: BlockHash(state_root), digests, ..without_seal }
}

fn new_executor() -> BlockExecutor<MemoryAuxStore> {
	let tree = BlockTree::new(genesis_header());
	let pool = TransactionPool::new(100, 100, 10, 100);
	let epoch_store = Arc::new(sc_consensus_epochs::EpochStore::open(Arc::new(MemoryAuxStore::new()), sp_consensus_babe::SlotStrategy::FromZero).unwrap());
	BlockExecutor::new(
		tree,
		pool,
		epoch_store,
		Arc::new(AcceptAllRuntime),
		Arc::new(NoopTrie),
		Arc::new(AcceptAllValidator),
		Arc::new(NoopAuthorityObserver),
		Arc::new(NoopJustificationHandler),
		Arc::new(NoopRpcSink),
		Arc::new(NoopMetrics),
		10,
	)
}

/// Scenarios 2 + 4: two competing blocks at the same height are both
/// imported, then a GRANDPA round driven entirely through `handle` reaches
/// precommit supermajority on one of them; the resulting `Action::Finalized`
/// is fed back into the same `BlockExecutor` exactly as `main.rs`'s
/// `apply_grandpa_action` does, pruning the losing fork.
#[test]
fn grandpa_round_finalizes_a_forked_block_through_the_import_pipeline() {
	let mut executor = new_executor();
	let genesis = executor.block_tree().genesis_hash();
	let genesis_header = executor.block_tree().get_header(&genesis).unwrap().clone();

	let b1a = child_header(&genesis_header, 0xAA, BlockHash::default());
	let b1b = child_header(&genesis_header, 0xBB, BlockHash::default());
	let info_1a = match executor.apply_block(sp_blockchain::Block { header: b1a, body: Vec::new() }, None).unwrap() {
		ImportOutcome::Imported(info) => info,
		other => panic!("expected Imported, got {other:?}"),
	};
	executor.apply_block(sp_blockchain::Block { header: b1b, body: Vec::new() }, None).unwrap();
	assert_eq!(executor.block_tree().children(&genesis).len(), 2);

	let a = sp_consensus_babe::Authority::new(AuthorityId([1; 32]), 1).unwrap();
	let b = sp_consensus_babe::Authority::new(AuthorityId([2; 32]), 1).unwrap();
	let c = sp_consensus_babe::Authority::new(AuthorityId([3; 32]), 1).unwrap();
	let authority_set = Arc::new(AuthoritySetManager::new(
		Arc::new(MemoryAuxStore::new()),
		sp_consensus_babe::AuthoritySet { authorities: vec![a.clone(), b.clone(), c.clone()], set_id: 0 },
	));

	let genesis_base = BlockInfo::new(0, genesis);
	let (voter, _initial) = GrandpaVoter::new(
		authority_set,
		Arc::new(LocalSigner(a.id)),
		Arc::new(AcceptAllVoteVerifier),
		Arc::new(ExecutorChainQuery(info_1a)),
		Arc::new(MemoryAuxStore::new()),
		VoterConfig::default(),
		Arc::new(NoopMetrics),
		genesis_base,
	);

	let mut finalized = None;
	for voter_id in [a.id, b.id, c.id] {
		let vote = SignedVote { kind: VoteKind::Precommit, round: 0, set_id: 0, target: info_1a, voter: voter_id, signature: [0; 64] };
		let actions = voter.handle(Input::Vote(vote), executor.block_tree());
		for action in actions {
			if let Action::Finalized(block, justification) = action {
				finalized = Some((block, justification));
			}
		}
	}
	let (block, justification) = finalized.expect("three of three precommits must reach supermajority");
	assert_eq!(block, info_1a);

	executor.finalize_externally(block, justification).unwrap();
	assert_eq!(executor.block_tree().last_finalized(), info_1a);
	assert_eq!(executor.block_tree().children(&genesis), vec![info_1a.hash]);
}

/// Scenario 5, driven through the import pipeline rather than the pool
/// directly: a waiting chain of transactions is submitted, then the
/// provider of the missing tag arrives inside an imported block body, and
/// the whole chain is reaped by `apply_block` in one pass.
#[test]
fn importing_a_block_reaps_every_transaction_it_newly_unblocks() {
	let mut executor = new_executor();

	let t1 = Extrinsic(vec![1]);
	let t2 = Extrinsic(vec![2]);
	let t0 = Extrinsic(vec![0]);

	executor.pool_mut().submit(PoolTransaction::new(t1.clone(), vec![b"a".to_vec()], vec![b"b".to_vec()], 0)).unwrap();
	executor.pool_mut().submit(PoolTransaction::new(t2.clone(), vec![b"b".to_vec()], vec![b"c".to_vec()], 0)).unwrap();
	assert!(executor.pool().ready().is_empty());

	executor.pool_mut().submit(PoolTransaction::new(t0.clone(), vec![], vec![b"a".to_vec()], 0)).unwrap();
	let ready: Vec<_> = executor.pool().ready().into_iter().map(|tx| tx.data).collect();
	assert_eq!(ready, vec![t0.clone(), t1.clone(), t2.clone()]);

	let genesis = executor.block_tree().genesis_hash();
	let genesis_header = executor.block_tree().get_header(&genesis).unwrap().clone();
	let body = vec![t0, t1, t2.clone()];
	let extrinsics_root = {
		let mut hasher = blake2::Blake2b::<U32>::new();
		hasher.update(body.encode());
		let out = hasher.finalize();
		let mut buf = [0u8; 32];
		buf.copy_from_slice(&out);
		BlockHash(buf)
	};
	let header = child_header(&genesis_header, 1, extrinsics_root);
	let outcome = executor.apply_block(sp_blockchain::Block { header, body }, None).unwrap();
	assert!(matches!(outcome, ImportOutcome::Imported(_)));

	assert!(executor.pool().ready().is_empty());
	assert!(!executor.pool().ready().iter().any(|tx| tx.data == t2));
}
