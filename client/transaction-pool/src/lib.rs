// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Tag-based transaction pool: admission, readiness promotion/demotion, and
//! staleness eviction at finalization.

mod moderator;
mod pool;

pub use moderator::Moderator;
pub use pool::{PoolTransaction, Tag, TransactionPool};

use sp_blockchain::BlockHash;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
	#[error("transaction already imported")]
	AlreadyImported,
	#[error("pool is at capacity")]
	PoolFull,
	#[error("transaction {0:?} not found")]
	NotFound(BlockHash),
}
