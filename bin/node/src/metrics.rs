// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Prometheus-backed implementation of `sc_consensus::Metrics`, registered
//! under the `substrate_diy_node` namespace. Mirrors the handful of gauges
//! and the one histogram the import pipeline and the voter already know how
//! to report at their call sites.

use prometheus_endpoint::{register, Gauge, Histogram, HistogramOpts, PrometheusError, Registry, U64};

pub struct PrometheusMetrics {
	import_duration: Histogram,
	best_block: Gauge<U64>,
	finalized_block: Gauge<U64>,
	votes_total: Gauge<U64>,
}

impl PrometheusMetrics {
	pub fn register(registry: &Registry) -> Result<Self, PrometheusError> {
		Ok(Self {
			import_duration: register(
				Histogram::with_opts(HistogramOpts::new(
					"substrate_diy_node_import_duration_seconds",
					"Time taken to validate, execute and commit one block",
				))?,
				registry,
			)?,
			best_block: register(
				Gauge::<U64>::new("substrate_diy_node_best_block", "Height of the current best block")?,
				registry,
			)?,
			finalized_block: register(
				Gauge::<U64>::new("substrate_diy_node_finalized_block", "Height of the last finalized block")?,
				registry,
			)?,
			votes_total: register(
				Gauge::<U64>::new("substrate_diy_node_grandpa_votes_total", "Number of GRANDPA votes accepted")?,
				registry,
			)?,
		})
	}
}

impl sc_consensus::Metrics for PrometheusMetrics {
	fn observe_import_duration(&self, seconds: f64) {
		self.import_duration.observe(seconds);
	}

	fn set_best_block(&self, number: sp_blockchain::BlockNumber) {
		self.best_block.set(number);
	}

	fn set_finalized_block(&self, number: sp_blockchain::BlockNumber) {
		self.finalized_block.set(number);
	}

	fn inc_votes(&self) {
		self.votes_total.inc();
	}
}
