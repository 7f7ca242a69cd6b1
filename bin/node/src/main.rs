// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! `substrate-diy-node`: wires the block tree, import pipeline, BABE
//! producer and GRANDPA voter together into the single-threaded core loop
//! described by the consensus subsystem's concurrency model, against the
//! in-memory devnet collaborators in [`dev`].
//!
//! Every external port (`Runtime`, `TrieStore`, `NetworkHandle`, VRF/seal/
//! vote-signing oracles) is satisfied by [`dev`]'s standalone, non-networked
//! implementations: this binary is a single-node devnet, not a production
//! client with a real WASM host, trie backend or libp2p stack behind it.

mod config;
mod dev;
mod metrics;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use sc_consensus::{Ancestry, ImportAction, ImportOutcome, JustificationError, Metrics as _};
use sc_consensus_grandpa::{Action, GrandpaVoter, Input, TimerKind as GrandpaTimer, VoterConfig};
use sp_blockchain::{AuxStore, Block, BlockHash, BlockHeader, BlockInfo, MemoryAuxStore, Runtime as _};
use sp_consensus_babe::{Authority, AuthorityId, AuthoritySet, BabeConfiguration, EpochDescriptor, SlotStrategy};
use sp_consensus_grandpa::Justification;

use config::{ChainRole, NodeConfig};

/// Single-authority devnet identity baked in for the `FullNode` role, which
/// carries no local keys of its own but still needs *some* genesis
/// authority set to make progress against in the absence of real peers.
const FALLBACK_BABE_ID: AuthorityId = AuthorityId([0xAA; 32]);
const FALLBACK_GRANDPA_ID: AuthorityId = AuthorityId([0xBB; 32]);

#[derive(Parser, Debug)]
#[command(name = "substrate-diy-node", about = "Standalone BABE + GRANDPA devnet node")]
struct Cli {
	/// Path to the node's TOML configuration file.
	#[arg(long, default_value = "node.toml")]
	config: PathBuf,
	/// If set, expose Prometheus metrics on this address instead of the
	/// no-op metrics sink.
	#[arg(long)]
	prometheus: Option<SocketAddr>,
	/// Log filter directive, forwarded to `tracing_subscriber::EnvFilter`.
	#[arg(long, default_value = "info")]
	log: String,
}

/// Forwards justification imports to whichever [`GrandpaVoter`] gets built
/// after this handler is already wired into the [`sc_consensus::BlockExecutor`]
/// that owns it -- the two are mutually dependent at construction, so the
/// voter binds itself in once it exists. Mirrors the deferred-link pattern
/// real `sc-finality-grandpa` uses between its block-import wrapper and the
/// voter it eventually drives.
#[derive(Default)]
struct DeferredJustificationHandler {
	inner: Mutex<Option<Arc<dyn sc_consensus::JustificationHandler>>>,
}

impl DeferredJustificationHandler {
	fn bind(&self, handler: Arc<dyn sc_consensus::JustificationHandler>) {
		*self.inner.lock() = Some(handler);
	}
}

impl sc_consensus::JustificationHandler for DeferredJustificationHandler {
	fn import_justification(&self, justification: Justification) -> Result<(), JustificationError> {
		match self.inner.lock().as_ref() {
			Some(handler) => handler.import_justification(justification),
			None => Ok(()),
		}
	}
}

/// Events the core loop reacts to. Everything that would otherwise be a
/// callback into shared state instead posts one of these back onto the
/// single-threaded loop.
enum CoreEvent {
	OwnBlock(Block),
	GrandpaTimer(GrandpaTimer),
	Shutdown,
}

fn genesis_header() -> BlockHeader {
	BlockHeader {
		parent_hash: BlockHash::default(),
		number: 0,
		state_root: BlockHash::default(),
		extrinsics_root: BlockHash::default(),
		digests: Vec::new(),
	}
}

fn init_logging(filter: &str) {
	use tracing_subscriber::EnvFilter;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(true)
		.init();
}

fn main() {
	let cli = Cli::parse();
	init_logging(&cli.log);

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("failed to build the current-thread tokio runtime");

	let exit_code = runtime.block_on(run(cli));
	std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
	let config = match NodeConfig::load(&cli.config) {
		Ok(config) => config,
		Err(error) => {
			error!(target: "node", %error, "failed to load configuration");
			return 1;
		}
	};

	match run_node(config, cli.prometheus).await {
		Ok(()) => 0,
		Err(error) => {
			error!(target: "node", %error, "node exited with an unrecoverable error");
			1
		}
	}
}

#[derive(thiserror::Error, Debug)]
enum NodeError {
	#[error(transparent)]
	Epoch(#[from] sc_consensus_epochs::Error),
	#[error(transparent)]
	Import(#[from] sc_consensus::ImportError),
}

async fn run_node(config: NodeConfig, prometheus_addr: Option<SocketAddr>) -> Result<(), NodeError> {
	let aux = Arc::new(MemoryAuxStore::new());

	let (babe_authorities, grandpa_authorities, local_babe_id, local_grandpa_id) = match &config.role {
		ChainRole::Authority { babe_key, grandpa_key } => (
			vec![Authority::new(babe_key.authority_id(), 1).expect("weight 1 is valid")],
			vec![Authority::new(grandpa_key.authority_id(), 1).expect("weight 1 is valid")],
			Some(babe_key.authority_id()),
			Some(grandpa_key.authority_id()),
		),
		ChainRole::FullNode => (
			vec![Authority::new(FALLBACK_BABE_ID, 1).expect("weight 1 is valid")],
			vec![Authority::new(FALLBACK_GRANDPA_ID, 1).expect("weight 1 is valid")],
			None,
			None,
		),
	};

	let babe_config = BabeConfiguration {
		slot_duration_millis: config.slot_duration.as_millis() as u64,
		epoch_length: config.epoch_length,
		c: config.babe_c,
		genesis_authorities: babe_authorities.clone(),
		randomness: [0; 32],
	};

	let epoch_store = Arc::new(sc_consensus_epochs::EpochStore::open(aux.clone(), SlotStrategy::FromZero)?);
	let genesis_epoch = EpochDescriptor {
		epoch_index: 0,
		start_slot: 0,
		duration_slots: config.epoch_length,
		authorities: babe_authorities,
		randomness: babe_config.randomness,
	};
	match epoch_store.put_epoch(0, genesis_epoch) {
		Ok(()) | Err(sc_consensus_epochs::Error::Conflict(_)) => {}
		Err(error) => return Err(error.into()),
	}

	let authority_set_manager =
		Arc::new(sc_consensus_grandpa::AuthoritySetManager::new(aux.clone(), AuthoritySet { authorities: grandpa_authorities, set_id: 0 }));

	let devnet_keypair = Arc::new(dev::DevKeypair::new(local_babe_id.unwrap_or(FALLBACK_BABE_ID)));
	let devnet_vote_keypair = Arc::new(dev::DevKeypair::new(local_grandpa_id.unwrap_or(FALLBACK_GRANDPA_ID)));

	let validator = Arc::new(sc_consensus_babe::BlockValidator::new(
		babe_config.clone(),
		config.epoch_length,
		epoch_store.clone(),
		devnet_keypair.clone(),
		devnet_keypair.clone(),
	));

	let runtime_port = Arc::new(dev::DevRuntime);
	let trie = Arc::new(dev::DevTrieStore::new());
	let pool = sc_transaction_pool::TransactionPool::new(config.pool_max_ready, config.pool_max_postponed, config.pool_ban_window_blocks, config.pool_max_age_blocks);
	let tree = sc_consensus::BlockTree::new(genesis_header());

	let justification_handler = Arc::new(DeferredJustificationHandler::default());
	let metrics: Arc<dyn sc_consensus::Metrics> = match prometheus_addr {
		Some(addr) => match build_prometheus_metrics(addr) {
			Ok(metrics) => metrics,
			Err(error) => {
				warn!(target: "node", %error, "failed to start Prometheus exporter, continuing without metrics");
				Arc::new(sc_consensus::NoopMetrics)
			}
		},
		None => Arc::new(sc_consensus::NoopMetrics),
	};

	let executor = Arc::new(Mutex::new(sc_consensus::BlockExecutor::new(
		tree,
		pool,
		epoch_store.clone(),
		runtime_port.clone(),
		trie.clone(),
		validator,
		authority_set_manager.clone(),
		justification_handler.clone(),
		Arc::new(sc_consensus::NoopRpcSink),
		metrics.clone(),
		config.epoch_length,
	)));

	let genesis_base = {
		let guard = executor.lock();
		BlockInfo::new(0, guard.block_tree().genesis_hash())
	};

	let shared_chain = Arc::new(dev::SharedChain::new(executor.clone()));

	let (voter, initial_actions) = GrandpaVoter::new(
		authority_set_manager,
		devnet_vote_keypair.clone(),
		devnet_vote_keypair,
		shared_chain.clone(),
		aux,
		VoterConfig { round_duration: config.grandpa_round_duration, liveness_timeout: config.grandpa_liveness_timeout },
		metrics,
		genesis_base,
	);
	let voter = Arc::new(voter);
	justification_handler.bind(voter.clone());

	let (core_tx, mut core_rx) = mpsc::unbounded_channel::<CoreEvent>();

	for action in initial_actions {
		dispatch_grandpa_action(action, &core_tx);
	}

	if let ChainRole::Authority { .. } = &config.role {
		let authority_index = 0;
		let producer = sc_consensus_babe::BabeProducer::new(
			devnet_keypair.id(),
			authority_index,
			config.babe_c,
			config.slot_duration,
			Arc::new(sc_consensus_babe::SystemClock),
			devnet_keypair.clone(),
			devnet_keypair,
			Arc::new(dev::DevProposer::new(runtime_port, trie.clone(), executor.clone())),
			Arc::new(dev::DevInherents),
			shared_chain.clone(),
			Arc::new(ForwardingBlockSink { tx: core_tx.clone() }),
			Arc::new(dev::DevNetworkHandle),
		);
		let epoch_store_for_producer = epoch_store.clone();
		tokio::spawn(async move {
			run_babe_slot_loop(producer, epoch_store_for_producer).await;
		});
	}

	let mut shutdown = Box::pin(tokio::signal::ctrl_c());

	loop {
		tokio::select! {
			event = core_rx.recv() => {
				let Some(event) = event else { break };
				if matches!(event, CoreEvent::Shutdown) {
					break;
				}
				handle_core_event(event, &executor, &voter, &core_tx);
			}
			_ = &mut shutdown => {
				info!(target: "node", "received shutdown signal");
				voter.handle(Input::Cancel, executor.lock().block_tree());
				break;
			}
		}
	}

	Ok(())
}

/// Hands a BABE-authored block back to the core loop instead of locking the
/// executor from within the producer's own task.
struct ForwardingBlockSink {
	tx: mpsc::UnboundedSender<CoreEvent>,
}

impl sc_consensus_babe::BlockSink for ForwardingBlockSink {
	fn import_own_block(&self, block: Block) -> Result<(), sc_consensus::ImportError> {
		let _ = self.tx.send(CoreEvent::OwnBlock(block));
		Ok(())
	}
}

async fn run_babe_slot_loop<S: AuxStore>(producer: sc_consensus_babe::BabeProducer, epoch_store: Arc<sc_consensus_epochs::EpochStore<S>>) {
	let mut epoch_index = 0u64;
	loop {
		let epoch = loop {
			match epoch_store.get_epoch(epoch_index) {
				Some(epoch) => break epoch,
				None => {
					warn!(target: "babe", epoch = epoch_index, "next epoch descriptor not yet on chain, waiting");
					tokio::time::sleep(Duration::from_millis(500)).await;
				}
			}
		};
		producer.run_epoch(&epoch).await;
		epoch_index += 1;
	}
}

fn handle_core_event<S: AuxStore>(
	event: CoreEvent,
	executor: &Arc<Mutex<sc_consensus::BlockExecutor<S>>>,
	voter: &Arc<GrandpaVoter<S>>,
	core_tx: &mpsc::UnboundedSender<CoreEvent>,
) {
	match event {
		CoreEvent::OwnBlock(block) => {
			let mut guard = executor.lock();
			match guard.apply_block(block, None) {
				Ok(ImportOutcome::Imported(info)) => info!(target: "import", number = info.number, hash = ?info.hash, "imported self-authored block"),
				Ok(ImportOutcome::Finalized(info)) => info!(target: "import", number = info.number, hash = ?info.hash, "self-authored block finalized immediately"),
				Ok(ImportOutcome::GapDetected { .. }) => {
					warn!(target: "import", "self-authored block triggered a gap, which should not happen without peers");
				}
				Err(error) => log_import_error(error),
			}
		}
		CoreEvent::GrandpaTimer(kind) => {
			let guard = executor.lock();
			let ancestry: &dyn Ancestry = guard.block_tree();
			let actions = voter.handle(Input::TimerFired(kind), ancestry);
			drop(guard);
			for action in actions {
				apply_grandpa_action(action, executor, core_tx);
			}
		}
		CoreEvent::Shutdown => {}
	}
}

fn apply_grandpa_action<S: AuxStore>(action: Action, executor: &Arc<Mutex<sc_consensus::BlockExecutor<S>>>, core_tx: &mpsc::UnboundedSender<CoreEvent>) {
	match action {
		Action::Finalized(block, justification) => match executor.lock().finalize_externally(block, justification) {
			Ok(Some(finalized)) => info!(target: "grandpa", number = finalized.number, hash = ?finalized.hash, "finalized via local round"),
			Ok(None) => {}
			Err(error) => log_import_error(error),
		},
		other => dispatch_grandpa_action(other, core_tx),
	}
}

/// Handles the two [`Action`] variants that don't need the executor: arming
/// a timer and broadcasting a message.
fn dispatch_grandpa_action(action: Action, core_tx: &mpsc::UnboundedSender<CoreEvent>) {
	match action {
		Action::Broadcast(message) => {
			// No peers in the standalone devnet: log what would have gone out.
			info!(target: "grandpa", ?message, "would broadcast GRANDPA message");
		}
		Action::ScheduleTimer(kind, duration) => {
			let tx = core_tx.clone();
			tokio::spawn(async move {
				tokio::time::sleep(duration).await;
				let _ = tx.send(CoreEvent::GrandpaTimer(kind));
			});
		}
		Action::Finalized(..) => unreachable!("handled by apply_grandpa_action"),
		Action::None => {}
	}
}

fn log_import_error(error: sc_consensus::ImportError) {
	use sc_consensus::ErrorClass;
	match error.class().action() {
		ImportAction::RetryGap => warn!(target: "import", %error, "structural/transient import error, will retry on next gap-fill"),
		ImportAction::DropBlock => warn!(target: "import", %error, "dropping invalid block"),
		ImportAction::Terminate => error!(target: "import", %error, "integrity error, node should be restarted"),
	}
}

/// Builds the typed metric handles and registers them in a fresh
/// [`prometheus_endpoint::Registry`]. Serving that registry over HTTP is the
/// RPC/metrics transport's job, out of scope here same as the rest of the
/// RPC surface; `addr` is accepted on the CLI and logged so an operator
/// wiring up the real exporter knows where it was meant to listen.
fn build_prometheus_metrics(addr: SocketAddr) -> Result<Arc<dyn sc_consensus::Metrics>, prometheus_endpoint::PrometheusError> {
	let registry = prometheus_endpoint::Registry::new_custom(Some("substrate_diy_node".into()), None)?;
	let metrics = metrics::PrometheusMetrics::register(&registry)?;
	info!(target: "node", %addr, "metrics registered; exporter transport is not wired up in this standalone binary");
	Ok(Arc::new(metrics))
}
