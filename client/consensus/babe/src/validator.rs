use std::sync::Arc;

use codec::Decode;
use sp_blockchain::{BlockHeader, DigestItem, BABE_ENGINE_ID};
use sp_consensus_babe::{vrf_transcript, BabeConfiguration, BabePreDigest, VrfOracle};

use crate::ports::SealOracle;

/// Verifies a BABE header's pre-digest and seal before the import pipeline
/// hands the block to the runtime.
pub struct BlockValidator<S> {
	config: BabeConfiguration,
	epoch_length: u64,
	epoch_store: Arc<sc_consensus_epochs::EpochStore<S>>,
	vrf: Arc<dyn VrfOracle>,
	seal: Arc<dyn SealOracle>,
}

impl<S: sp_blockchain::AuxStore> BlockValidator<S> {
	pub fn new(
		config: BabeConfiguration,
		epoch_length: u64,
		epoch_store: Arc<sc_consensus_epochs::EpochStore<S>>,
		vrf: Arc<dyn VrfOracle>,
		seal: Arc<dyn SealOracle>,
	) -> Self {
		Self { config, epoch_length, epoch_store, vrf, seal }
	}
}

impl<S: sp_blockchain::AuxStore + Send + Sync> sc_consensus::BlockValidator for BlockValidator<S> {
	fn validate_header(&self, header: &BlockHeader) -> Result<(), sc_consensus::ValidationError> {
		use sc_consensus::ValidationError as E;

		let pre_digest = header
			.pre_seal_digests()
			.iter()
			.find_map(|d| match d {
				DigestItem::PreRuntime(engine, payload) if *engine == BABE_ENGINE_ID => BabePreDigest::decode(&mut &payload[..]).ok(),
				_ => None,
			})
			.ok_or(E::MissingPreDigest)?;

		let DigestItem::Seal(engine, seal_bytes) = header.seal().ok_or(E::InvalidSeal)? else { return Err(E::InvalidSeal) };
		if *engine != BABE_ENGINE_ID {
			return Err(E::InvalidSeal);
		}
		let signature: [u8; 64] = seal_bytes.as_slice().try_into().map_err(|_| E::InvalidSeal)?;

		let (epoch_index, _offset) = self
			.epoch_store
			.epoch_index_for_slot(pre_digest.slot, self.epoch_length)
			.map_err(|_| E::NoEpochData(0))?;
		let epoch = self.epoch_store.require_epoch(epoch_index).map_err(|_| E::NoEpochData(epoch_index))?;

		let authority = epoch
			.authorities
			.get(pre_digest.authority_index as usize)
			.ok_or(E::UnknownAuthority(pre_digest.authority_index))?;

		let signed_hash = header.without_seal().hash();
		if !self.seal.verify(&authority.id, signed_hash, &signature) {
			return Err(E::InvalidSignature);
		}

		let transcript = vrf_transcript(&epoch.randomness, pre_digest.slot, epoch_index);
		if !self.vrf.verify(&transcript, &authority.id, &pre_digest.vrf_output, &pre_digest.vrf_proof) {
			return Err(E::InvalidVrf);
		}

		let threshold = sp_consensus_babe::calculate_threshold(self.config.c, epoch.total_weight(), authority.weight);
		let output = u128::from_be_bytes(pre_digest.vrf_output);
		if output >= threshold {
			return Err(E::ThresholdMissed);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sp_blockchain::{BlockHash, MemoryAuxStore};
	use sp_consensus_babe::{Authority, AuthorityId, EpochDescriptor, SlotStrategy};

	struct AcceptAllVrf;
	impl VrfOracle for AcceptAllVrf {
		fn evaluate(&self, _input: &[u8]) -> ([u8; 32], [u8; 64]) {
			([0u8; 32], [0u8; 64])
		}
		fn verify(&self, _input: &[u8], _authority: &AuthorityId, _output: &[u8; 32], _proof: &[u8; 64]) -> bool {
			true
		}
	}

	struct AcceptAllSeal;
	impl SealOracle for AcceptAllSeal {
		fn id(&self) -> AuthorityId {
			AuthorityId([0; 32])
		}
		fn sign(&self, _header_hash: BlockHash) -> [u8; 64] {
			[0; 64]
		}
		fn verify(&self, _authority: &AuthorityId, _header_hash: BlockHash, _signature: &[u8; 64]) -> bool {
			true
		}
	}

	fn epoch_store_with_epoch(epoch_index: u64, authority: AuthorityId, weight: u64) -> Arc<sc_consensus_epochs::EpochStore<MemoryAuxStore>> {
		let store = sc_consensus_epochs::EpochStore::open(Arc::new(MemoryAuxStore::new()), SlotStrategy::FromZero).unwrap();
		store
			.put_epoch(
				epoch_index,
				EpochDescriptor {
					epoch_index,
					start_slot: epoch_index * 10,
					duration_slots: 10,
					authorities: vec![Authority::new(authority, weight).unwrap()],
					randomness: [0; 32],
				},
			)
			.unwrap();
		Arc::new(store)
	}

	fn config() -> BabeConfiguration {
		BabeConfiguration { slot_duration_millis: 3000, epoch_length: 10, c: (1, 4), genesis_authorities: vec![], randomness: [0; 32] }
	}

	fn sealed_header(slot: u64, authority_index: u32) -> BlockHeader {
		let pre_digest = BabePreDigest { slot, authority_index, vrf_output: [0; 32], vrf_proof: [0; 64] };
		let without_seal = BlockHeader {
			parent_hash: BlockHash::default(),
			number: 1,
			state_root: BlockHash::default(),
			extrinsics_root: BlockHash::default(),
			digests: vec![DigestItem::PreRuntime(BABE_ENGINE_ID, codec::Encode::encode(&pre_digest))],
		};
		let mut digests = without_seal.digests.clone();
		digests.push(DigestItem::Seal(BABE_ENGINE_ID, vec![0; 64]));
		BlockHeader { digests, ..without_seal }
	}

	#[test]
	fn validates_a_well_formed_header() {
		let authority = AuthorityId([7; 32]);
		let epoch_store = epoch_store_with_epoch(0, authority, 1);
		let validator = BlockValidator::new(config(), 10, epoch_store, Arc::new(AcceptAllVrf), Arc::new(AcceptAllSeal));

		let header = sealed_header(3, 0);
		assert!(sc_consensus::BlockValidator::validate_header(&validator, &header).is_ok());
	}

	#[test]
	fn rejects_header_with_no_pre_digest() {
		let epoch_store = epoch_store_with_epoch(0, AuthorityId([7; 32]), 1);
		let validator = BlockValidator::new(config(), 10, epoch_store, Arc::new(AcceptAllVrf), Arc::new(AcceptAllSeal));

		let header = BlockHeader {
			parent_hash: BlockHash::default(),
			number: 1,
			state_root: BlockHash::default(),
			extrinsics_root: BlockHash::default(),
			digests: vec![DigestItem::Seal(BABE_ENGINE_ID, vec![0; 64])],
		};
		assert!(matches!(
			sc_consensus::BlockValidator::validate_header(&validator, &header),
			Err(sc_consensus::ValidationError::MissingPreDigest)
		));
	}

	#[test]
	fn rejects_unknown_authority_index() {
		let epoch_store = epoch_store_with_epoch(0, AuthorityId([7; 32]), 1);
		let validator = BlockValidator::new(config(), 10, epoch_store, Arc::new(AcceptAllVrf), Arc::new(AcceptAllSeal));

		let header = sealed_header(3, 9);
		assert!(matches!(
			sc_consensus::BlockValidator::validate_header(&validator, &header),
			Err(sc_consensus::ValidationError::UnknownAuthority(9))
		));
	}

	#[test]
	fn rejects_when_threshold_missed() {
		struct AlwaysHighVrf;
		impl VrfOracle for AlwaysHighVrf {
			fn evaluate(&self, _input: &[u8]) -> ([u8; 32], [u8; 64]) {
				([0xFF; 32], [0; 64])
			}
			fn verify(&self, _input: &[u8], _authority: &AuthorityId, _output: &[u8; 32], _proof: &[u8; 64]) -> bool {
				true
			}
		}

		let authority = AuthorityId([7; 32]);
		let epoch_store = epoch_store_with_epoch(0, authority, 1);
		let mut cfg = config();
		cfg.c = (0, 1);
		let validator = BlockValidator::new(cfg, 10, epoch_store, Arc::new(AlwaysHighVrf), Arc::new(AcceptAllSeal));

		let pre_digest = BabePreDigest { slot: 3, authority_index: 0, vrf_output: [0xFF; 32], vrf_proof: [0; 64] };
		let without_seal = BlockHeader {
			parent_hash: BlockHash::default(),
			number: 1,
			state_root: BlockHash::default(),
			extrinsics_root: BlockHash::default(),
			digests: vec![DigestItem::PreRuntime(BABE_ENGINE_ID, codec::Encode::encode(&pre_digest))],
		};
		let mut digests = without_seal.digests.clone();
		digests.push(DigestItem::Seal(BABE_ENGINE_ID, vec![0; 64]));
		let header = BlockHeader { digests, ..without_seal };

		assert!(matches!(
			sc_consensus::BlockValidator::validate_header(&validator, &header),
			Err(sc_consensus::ValidationError::ThresholdMissed)
		));
	}
}
