// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! The block tree, the block-import pipeline, and the gap synchronizer
//! shared by every consensus engine.
//!
//! This crate defines the port traits (`BlockValidator`, `AuthoritySetObserver`,
//! `JustificationHandler`, `NetworkHandle`) that `sc-consensus-babe` and
//! `sc-consensus-grandpa` implement, keeping the import pipeline itself free
//! of a dependency on either concrete consensus engine.

mod block_tree;
mod error;
mod executor;
mod ports;
mod sync;

pub use block_tree::{BlockTree, FinalizationEvent};
pub use error::{
	AuthoritySetIngestError, BlockTreeError, Class, ErrorClass, ImportAction, ImportError,
	InvalidJustificationReason, JustificationError, ValidationError,
};
pub use executor::{BlockExecutor, ImportOutcome};
pub use ports::{
	Ancestry, AuthoritySetObserver, BlockData, BlockValidator, ExtrinsicStatus, JustificationHandler, Metrics, NetworkError,
	NetworkHandle, NoopMetrics, NoopRpcSink, PeerId, RpcEvent, RpcSink,
};
pub use sync::{SyncError, Synchronizer};
