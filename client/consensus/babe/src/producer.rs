use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sp_blockchain::{Block, BlockHash, DigestItem, SlotNumber, BABE_ENGINE_ID};
use sp_consensus_babe::{vrf_transcript, AuthorityId, BabePreDigest, EpochDescriptor, VrfOracle};
use tracing::{info, warn};

use crate::ports::{BlockSink, ChainState, Clock, InherentDataProvider, Proposer, ProposerError, SealOracle};

const PROPOSAL_DEADLINE: Duration = Duration::from_millis(2000);
const MAX_EXTRINSICS_PER_BLOCK: usize = 512;

/// A slot this node won leadership for: the VRF output/proof to embed in
/// the pre-digest.
#[derive(Clone, Copy)]
struct Claim {
	vrf_output: [u8; 32],
	vrf_proof: [u8; 64],
}

/// Precomputed per-epoch leadership: which slots in `[start_slot,
/// start_slot + duration_slots)` this node won, and the VRF claim for each.
struct LeadershipVector {
	claims: HashMap<SlotNumber, Claim>,
}

impl LeadershipVector {
	/// Evaluate the VRF for every slot in the epoch once, up front, rather
	/// than per-slot: the threshold and randomness are fixed for the whole
	/// epoch, so there's no reason to repeat the epoch lookup on every tick.
	fn compute(epoch: &EpochDescriptor, our_weight: u64, c: (u64, u64), vrf: &dyn VrfOracle) -> Self {
		let total_weight = epoch.total_weight();
		let threshold = sp_consensus_babe::calculate_threshold(c, total_weight, our_weight);
		let mut claims = HashMap::new();
		for offset in 0..epoch.duration_slots {
			let slot = epoch.start_slot + offset;
			let transcript = vrf_transcript(&epoch.randomness, slot, epoch.epoch_index);
			let (vrf_output, vrf_proof) = vrf.evaluate(&transcript);
			if u128::from_be_bytes(vrf_output) < threshold {
				claims.insert(slot, Claim { vrf_output, vrf_proof });
			}
		}
		Self { claims }
	}

	fn claim(&self, slot: SlotNumber) -> Option<Claim> {
		self.claims.get(&slot).copied()
	}
}

/// Drives BABE slot authoring: for each slot this node is leader for,
/// builds a block via the external [`Proposer`], seals it, and hands it to
/// the shared import pipeline and network broadcaster.
pub struct BabeProducer {
	id: AuthorityId,
	authority_index: u32,
	c: (u64, u64),
	slot_duration: Duration,
	clock: Arc<dyn Clock>,
	vrf: Arc<dyn VrfOracle>,
	seal: Arc<dyn SealOracle>,
	proposer: Arc<dyn Proposer>,
	inherents: Arc<dyn InherentDataProvider>,
	chain: Arc<dyn ChainState>,
	sink: Arc<dyn BlockSink>,
	network: Arc<dyn sc_consensus::NetworkHandle>,
}

impl BabeProducer {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		id: AuthorityId,
		authority_index: u32,
		c: (u64, u64),
		slot_duration: Duration,
		clock: Arc<dyn Clock>,
		vrf: Arc<dyn VrfOracle>,
		seal: Arc<dyn SealOracle>,
		proposer: Arc<dyn Proposer>,
		inherents: Arc<dyn InherentDataProvider>,
		chain: Arc<dyn ChainState>,
		sink: Arc<dyn BlockSink>,
		network: Arc<dyn sc_consensus::NetworkHandle>,
	) -> Self {
		Self { id, authority_index, c, slot_duration, clock, vrf, seal, proposer, inherents, chain, sink, network }
	}

	/// Run the slot loop for one epoch, sleeping between slots via the
	/// configured [`Clock`]. Returns once every slot in the epoch has
	/// elapsed; the caller re-enters with the next epoch's descriptor,
	/// whose authorities and randomness come entirely from the on-chain
	/// "next epoch" digest rather than being recomputed here.
	pub async fn run_epoch(&self, epoch: &EpochDescriptor) {
		let our_weight = match epoch.authorities.get(self.authority_index as usize) {
			Some(authority) if authority.id == self.id => authority.weight,
			_ => {
				warn!(target: "babe", epoch = epoch.epoch_index, "not a member of this epoch's authority set, sitting it out");
				return;
			}
		};

		let leadership = LeadershipVector::compute(epoch, our_weight, self.c, self.vrf.as_ref());
		info!(target: "babe", epoch = epoch.epoch_index, won = leadership.claims.len(), total = epoch.duration_slots, "leadership vector computed");

		for offset in 0..epoch.duration_slots {
			let slot = epoch.start_slot + offset;
			self.clock.delay(self.slot_duration).await;

			let Some(claim) = leadership.claim(slot) else { continue };
			if let Err(error) = self.author_slot(slot, claim).await {
				warn!(target: "babe", slot, error = %error, "failed to author slot we won");
			}
		}
	}

	async fn author_slot(&self, slot: SlotNumber, claim: Claim) -> Result<(), ProposerError> {
		let parent = self.chain.best_block();
		let inherents = self.inherents.inherents(slot);
		let extrinsics = self.chain.ready_extrinsics(MAX_EXTRINSICS_PER_BLOCK);

		let pre_digest = BabePreDigest { slot, authority_index: self.authority_index, vrf_output: claim.vrf_output, vrf_proof: claim.vrf_proof };
		let pre_digest_item = DigestItem::PreRuntime(BABE_ENGINE_ID, codec::Encode::encode(&pre_digest));

		let block = self.proposer.propose(parent, inherents, extrinsics, pre_digest_item, PROPOSAL_DEADLINE).await?;
		let (mut header, body) = block.deconstruct();

		let signed_hash: BlockHash = header.hash();
		let signature = self.seal.sign(signed_hash);
		header.digests.push(DigestItem::Seal(BABE_ENGINE_ID, signature.to_vec()));

		let sealed = Block { header: header.clone(), body: body.clone() };
		if let Err(error) = self.sink.import_own_block(sealed) {
			warn!(target: "babe", slot, error = %error, "failed to import our own authored block");
			return Ok(());
		}
		self.network.broadcast_block(header, body);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use sp_blockchain::{BlockHeader, BlockInfo, Extrinsic};
	use sp_consensus_babe::Authority;

	struct AlwaysWinVrf;
	impl VrfOracle for AlwaysWinVrf {
		fn evaluate(&self, _input: &[u8]) -> ([u8; 32], [u8; 64]) {
			([0u8; 32], [0u8; 64])
		}
		fn verify(&self, _input: &[u8], _authority: &AuthorityId, _output: &[u8; 32], _proof: &[u8; 64]) -> bool {
			true
		}
	}

	struct NoopSeal;
	impl SealOracle for NoopSeal {
		fn id(&self) -> AuthorityId {
			AuthorityId([1; 32])
		}
		fn sign(&self, _header_hash: BlockHash) -> [u8; 64] {
			[9; 64]
		}
		fn verify(&self, _authority: &AuthorityId, _header_hash: BlockHash, _signature: &[u8; 64]) -> bool {
			true
		}
	}

	struct ImmediateClock;
	#[async_trait]
	impl Clock for ImmediateClock {
		async fn delay(&self, _duration: Duration) {}
	}

	struct EchoProposer;
	#[async_trait]
	impl Proposer for EchoProposer {
		async fn propose(
			&self,
			parent: BlockInfo,
			_inherents: Vec<Extrinsic>,
			_extrinsics: Vec<Extrinsic>,
			pre_digest: DigestItem,
			_deadline: Duration,
		) -> Result<Block, ProposerError> {
			let header = BlockHeader {
				parent_hash: parent.hash,
				number: parent.number + 1,
				state_root: BlockHash::default(),
				extrinsics_root: BlockHash::default(),
				digests: vec![pre_digest],
			};
			Ok(Block { header, body: Vec::new() })
		}
	}

	struct NoInherents;
	impl InherentDataProvider for NoInherents {
		fn inherents(&self, _slot: SlotNumber) -> Vec<Extrinsic> {
			Vec::new()
		}
	}

	struct FixedChain;
	impl ChainState for FixedChain {
		fn best_block(&self) -> BlockInfo {
			BlockInfo::new(0, BlockHash::default())
		}
		fn ready_extrinsics(&self, _max: usize) -> Vec<Extrinsic> {
			Vec::new()
		}
	}

	struct RecordingSink {
		imported: Mutex<Vec<Block>>,
	}
	impl BlockSink for RecordingSink {
		fn import_own_block(&self, block: Block) -> Result<(), sc_consensus::ImportError> {
			self.imported.lock().push(block);
			Ok(())
		}
	}

	struct NoopNetwork;
	#[async_trait]
	impl sc_consensus::NetworkHandle for NoopNetwork {
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

	fn genesis_epoch(duration_slots: u64) -> EpochDescriptor {
		EpochDescriptor {
			epoch_index: 0,
			start_slot: 0,
			duration_slots,
			authorities: vec![Authority::new(AuthorityId([1; 32]), 1).unwrap()],
			randomness: [0; 32],
		}
	}

	#[tokio::test]
	async fn authors_every_slot_it_wins_in_the_epoch() {
		let sink = Arc::new(RecordingSink { imported: Mutex::new(Vec::new()) });
		let producer = BabeProducer::new(
			AuthorityId([1; 32]),
			0,
			(1, 1),
			Duration::from_millis(0),
			Arc::new(ImmediateClock),
			Arc::new(AlwaysWinVrf),
			Arc::new(NoopSeal),
			Arc::new(EchoProposer),
			Arc::new(NoInherents),
			Arc::new(FixedChain),
			sink.clone(),
			Arc::new(NoopNetwork),
		);

		producer.run_epoch(&genesis_epoch(3)).await;

		assert_eq!(sink.imported.lock().len(), 3);
	}

	#[tokio::test]
	async fn sits_out_slots_it_does_not_win() {
		struct NeverWinVrf;
		impl VrfOracle for NeverWinVrf {
			fn evaluate(&self, _input: &[u8]) -> ([u8; 32], [u8; 64]) {
				([0xFF; 32], [0u8; 64])
			}
			fn verify(&self, _input: &[u8], _authority: &AuthorityId, _output: &[u8; 32], _proof: &[u8; 64]) -> bool {
				true
			}
		}

		let sink = Arc::new(RecordingSink { imported: Mutex::new(Vec::new()) });
		let producer = BabeProducer::new(
			AuthorityId([1; 32]),
			0,
			(0, 1),
			Duration::from_millis(0),
			Arc::new(ImmediateClock),
			Arc::new(NeverWinVrf),
			Arc::new(NoopSeal),
			Arc::new(EchoProposer),
			Arc::new(NoInherents),
			Arc::new(FixedChain),
			sink.clone(),
			Arc::new(NoopNetwork),
		);

		producer.run_epoch(&genesis_epoch(3)).await;

		assert!(sink.imported.lock().is_empty());
	}

	#[tokio::test]
	async fn sits_out_an_epoch_it_is_not_a_member_of() {
		let sink = Arc::new(RecordingSink { imported: Mutex::new(Vec::new()) });
		let producer = BabeProducer::new(
			AuthorityId([2; 32]),
			0,
			(1, 1),
			Duration::from_millis(0),
			Arc::new(ImmediateClock),
			Arc::new(AlwaysWinVrf),
			Arc::new(NoopSeal),
			Arc::new(EchoProposer),
			Arc::new(NoInherents),
			Arc::new(FixedChain),
			sink.clone(),
			Arc::new(NoopNetwork),
		);

		producer.run_epoch(&genesis_epoch(3)).await;

		assert!(sink.imported.lock().is_empty());
	}
}
