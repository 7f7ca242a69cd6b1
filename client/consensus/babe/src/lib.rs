// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! BABE: slot-based block authoring backed by a VRF leadership lottery, and
//! the header validator that checks an authored block's seal and VRF proof
//! before it reaches the runtime.
//!
//! This crate implements `sc_consensus::BlockValidator`; the import
//! pipeline, block tree and authority-set manager live in `sc-consensus`
//! and `sc-consensus-grandpa` respectively and are treated as external
//! collaborators here.

mod ports;
mod producer;
mod validator;

pub use ports::{
	BlockSink, ChainState, Clock, InherentDataProvider, Proposer, ProposerError, SealOracle, SystemClock, TimerKind,
};
pub use producer::BabeProducer;
pub use validator::BlockValidator;
