// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Durable epoch-index -> [`EpochDescriptor`] map, plus the "last observed
//! epoch" anchor used to derive an epoch index from a slot number.

use std::sync::Arc;

use codec::{Decode, Encode};
use parking_lot::RwLock;
use sp_blockchain::AuxStore;
use sp_consensus_babe::{EpochDescriptor, EpochIndex, SlotNumber, SlotStrategy};

/// The `(epoch0_index, epoch0_slot)` anchor `FromUnixEpoch` derives every
/// other epoch index from.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug)]
pub struct LastEpoch {
	pub epoch_index: EpochIndex,
	pub start_slot: SlotNumber,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
	#[error("epoch {0} already has a different descriptor on record")]
	Conflict(EpochIndex),
	#[error("epoch {0} not found")]
	NotFound(EpochIndex),
	#[error("last-epoch anchor not set")]
	NoAnchor,
	#[error("store already has epoch data; cannot switch slot strategy")]
	StrategyAlreadyFixed,
}

fn epoch_key(index: EpochIndex) -> Vec<u8> {
	let mut key = b":babe:epoch:".to_vec();
	key.extend_from_slice(&index.to_le_bytes());
	key
}

const LAST_EPOCH_KEY: &[u8] = b":babe:last";
const STRATEGY_KEY: &[u8] = b":babe:strategy";

/// EpochStore: a total-function map from epoch index to
/// [`EpochDescriptor`], backed by [`AuxStore`], plus the slot-strategy
/// chosen once at configuration time.
pub struct EpochStore<S> {
	aux: Arc<S>,
	strategy: RwLock<Option<SlotStrategy>>,
}

impl<S: AuxStore> EpochStore<S> {
	/// Open the store, fixing `strategy` if this is the first use, or
	/// validating it matches the strategy already recorded.
	pub fn open(aux: Arc<S>, strategy: SlotStrategy) -> Result<Self, Error> {
		let recorded = aux.get_aux(STRATEGY_KEY).map(|raw| {
			SlotStrategy::decode(&mut &raw[..]).expect("corrupt slot-strategy record")
		});

		match recorded {
			None => {
				aux.insert_aux(STRATEGY_KEY, &strategy.encode());
			}
			Some(recorded) if recorded as u8 == strategy as u8 => {}
			Some(_) => return Err(Error::StrategyAlreadyFixed),
		}

		Ok(Self { aux, strategy: RwLock::new(Some(strategy)) })
	}

	pub fn strategy(&self) -> SlotStrategy {
		self.strategy.read().expect("fixed at open()")
	}

	/// Idempotent: writing the same descriptor twice is a no-op; writing a
	/// different descriptor for an already-known index is a [`Error::Conflict`].
	pub fn put_epoch(&self, index: EpochIndex, descriptor: EpochDescriptor) -> Result<(), Error> {
		if let Some(existing) = self.get_epoch(index) {
			if existing == descriptor {
				return Ok(());
			}
			return Err(Error::Conflict(index));
		}
		self.aux.insert_aux(&epoch_key(index), &descriptor.encode());
		Ok(())
	}

	pub fn get_epoch(&self, index: EpochIndex) -> Option<EpochDescriptor> {
		self.aux
			.get_aux(&epoch_key(index))
			.map(|raw| EpochDescriptor::decode(&mut &raw[..]).expect("corrupt epoch record"))
	}

	pub fn require_epoch(&self, index: EpochIndex) -> Result<EpochDescriptor, Error> {
		self.get_epoch(index).ok_or(Error::NotFound(index))
	}

	pub fn set_last(&self, last: LastEpoch) {
		self.aux.insert_aux(LAST_EPOCH_KEY, &last.encode());
	}

	pub fn get_last(&self) -> Option<LastEpoch> {
		self.aux.get_aux(LAST_EPOCH_KEY).map(|raw| LastEpoch::decode(&mut &raw[..]).expect("corrupt anchor"))
	}

	/// Derive the epoch index and in-epoch slot offset for `slot`, per the
	/// configured strategy.
	pub fn epoch_index_for_slot(&self, slot: SlotNumber, epoch_length: u64) -> Result<(EpochIndex, u64), Error> {
		match self.strategy() {
			SlotStrategy::FromZero => Ok((slot / epoch_length, slot % epoch_length)),
			SlotStrategy::FromUnixEpoch => {
				let anchor = self.get_last().ok_or(Error::NoAnchor)?;
				let slot_diff = slot.saturating_sub(anchor.start_slot);
				Ok((anchor.epoch_index + slot_diff / epoch_length, slot_diff % epoch_length))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sp_blockchain::MemoryAuxStore;
	use sp_consensus_babe::Authority;

	fn descriptor(index: EpochIndex) -> EpochDescriptor {
		EpochDescriptor {
			epoch_index: index,
			start_slot: index * 10,
			duration_slots: 10,
			authorities: vec![Authority::new(sp_consensus_babe::AuthorityId([1; 32]), 1).unwrap()],
			randomness: [0; 32],
		}
	}

	#[test]
	fn put_is_idempotent_but_rejects_conflicting_overwrite() {
		let store = EpochStore::open(Arc::new(MemoryAuxStore::new()), SlotStrategy::FromZero).unwrap();
		store.put_epoch(0, descriptor(0)).unwrap();
		store.put_epoch(0, descriptor(0)).unwrap();

		let mut other = descriptor(0);
		other.randomness = [9; 32];
		assert_eq!(store.put_epoch(0, other), Err(Error::Conflict(0)));
	}

	#[test]
	fn from_zero_strategy_derives_index_from_slot() {
		let store = EpochStore::open(Arc::new(MemoryAuxStore::new()), SlotStrategy::FromZero).unwrap();
		assert_eq!(store.epoch_index_for_slot(25, 10).unwrap(), (2, 5));
	}

	#[test]
	fn from_unix_epoch_strategy_uses_anchor() {
		let store = EpochStore::open(Arc::new(MemoryAuxStore::new()), SlotStrategy::FromUnixEpoch).unwrap();
		store.set_last(LastEpoch { epoch_index: 5, start_slot: 1_000 });
		assert_eq!(store.epoch_index_for_slot(1_025, 10).unwrap(), (7, 5));
	}

	#[test]
	fn reopening_with_a_different_strategy_is_rejected() {
		let aux = Arc::new(MemoryAuxStore::new());
		EpochStore::open(aux.clone(), SlotStrategy::FromZero).unwrap();
		let err = EpochStore::open(aux, SlotStrategy::FromUnixEpoch).unwrap_err();
		assert_eq!(err, Error::StrategyAlreadyFixed);
	}
}
