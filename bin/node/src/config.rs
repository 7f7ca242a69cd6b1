// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! On-disk node configuration: chain role, BABE/GRANDPA timing, transaction
//! pool capacity, and the data directory. Loaded once at startup from a
//! TOML file via `serde`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sp_consensus_babe::AuthorityId;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file {0}: {1}")]
	Io(PathBuf, std::io::Error),
	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("{field} must be 64 hex characters, got {value:?}")]
	BadKeySeed { field: &'static str, value: String },
}

/// A 32-byte devnet key seed, hex-encoded in the config file. Doubles as the
/// node's [`AuthorityId`]: see `dev::DevKeypair`, which uses it directly as
/// VRF/seal/vote key material rather than deriving a real keypair from it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeySeed(pub [u8; 32]);

impl fmt::Debug for KeySeed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "KeySeed(0x{})", hex_encode(&self.0))
	}
}

impl KeySeed {
	fn parse(field: &'static str, hex: &str) -> Result<Self, ConfigError> {
		let bytes = hex_decode(hex).ok_or_else(|| ConfigError::BadKeySeed { field, value: hex.to_string() })?;
		let array: [u8; 32] =
			bytes.try_into().map_err(|_| ConfigError::BadKeySeed { field, value: hex.to_string() })?;
		Ok(Self(array))
	}

	pub fn authority_id(&self) -> AuthorityId {
		AuthorityId(self.0)
	}
}

fn hex_encode(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}
	(0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawRole {
	Authority { babe_seed: String, grandpa_seed: String },
	FullNode,
}

#[derive(Clone, Debug, Deserialize)]
struct RawConfig {
	role: RawRole,
	slot_duration_millis: u64,
	epoch_length: u64,
	babe_c_numerator: u64,
	babe_c_denominator: u64,
	grandpa_round_duration_millis: u64,
	grandpa_liveness_timeout_millis: u64,
	pool_max_ready: usize,
	pool_max_postponed: usize,
	pool_ban_window_blocks: u64,
	pool_max_age_blocks: u64,
	data_dir: PathBuf,
}

/// What this node does with its local keys, if any.
#[derive(Clone, Copy, Debug)]
pub enum ChainRole {
	/// Author BABE blocks and cast GRANDPA votes with the given key
	/// material.
	Authority { babe_key: KeySeed, grandpa_key: KeySeed },
	/// Import and validate only; no authoring, no voting.
	FullNode,
}

/// The fully validated, in-memory form of the node's TOML configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
	pub role: ChainRole,
	pub slot_duration: Duration,
	pub epoch_length: u64,
	pub babe_c: (u64, u64),
	pub grandpa_round_duration: Duration,
	pub grandpa_liveness_timeout: Duration,
	pub pool_max_ready: usize,
	pub pool_max_postponed: usize,
	pub pool_ban_window_blocks: u64,
	pub pool_max_age_blocks: u64,
	pub data_dir: PathBuf,
}

impl NodeConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
		Self::parse(&raw)
	}

	fn parse(raw: &str) -> Result<Self, ConfigError> {
		let raw: RawConfig = toml::from_str(raw)?;
		let role = match raw.role {
			RawRole::Authority { babe_seed, grandpa_seed } => ChainRole::Authority {
				babe_key: KeySeed::parse("role.babe_seed", &babe_seed)?,
				grandpa_key: KeySeed::parse("role.grandpa_seed", &grandpa_seed)?,
			},
			RawRole::FullNode => ChainRole::FullNode,
		};

		Ok(Self {
			role,
			slot_duration: Duration::from_millis(raw.slot_duration_millis),
			epoch_length: raw.epoch_length,
			babe_c: (raw.babe_c_numerator, raw.babe_c_denominator),
			grandpa_round_duration: Duration::from_millis(raw.grandpa_round_duration_millis),
			grandpa_liveness_timeout: Duration::from_millis(raw.grandpa_liveness_timeout_millis),
			pool_max_ready: raw.pool_max_ready,
			pool_max_postponed: raw.pool_max_postponed,
			pool_ban_window_blocks: raw.pool_ban_window_blocks,
			pool_max_age_blocks: raw.pool_max_age_blocks,
			data_dir: raw.data_dir,
		})
	}
}
