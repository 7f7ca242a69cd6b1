// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! The GRANDPA finality gadget and the fork-aware
//! authority-set manager that backs it and the BABE import
//! path alike.
//!
//! Re-architected: the voter is an explicit state machine
//! driven by `{Vote, Fin, TimerFired, Cancel}` inputs rather than a
//! callback chain or a polled future -- tests drive it by feeding inputs
//! directly, with no executor required.

mod authority_set;
mod clock;
mod error;
mod ports;
mod round;
mod vote_graph;
mod voter;

pub use authority_set::AuthoritySetManager;
pub use clock::{Clock, SystemClock, TimerKind};
pub use error::{Error, FinalizeJustificationError};
pub use ports::{ChainQuery, GrandpaMessage, GrandpaNetwork, NeighborPacket, VoteSigner};
pub use round::{Round, RoundPhase};
pub use voter::{Action, GrandpaVoter, Input, VoterConfig};
