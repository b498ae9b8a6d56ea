//! Hosts the Beacon update-metadata service's HTTP server.
//!
//! Beacon is queried by desktop clients to discover whether a newer build of
//! a named application exists for their platform and architecture. It stores
//! release metadata — version, download URL, checksum, notes — but never
//! hosts artifacts.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;

use beacon_core::storage::Storage;
use beacon_security::pipeline::seed_bootstrap_key;
use beacon_security::rate_limit::{RateLimitConfig, RateLimiter};
use beacon_storage::json_file::JsonFileStore;
use beacon_storage::memory::MemoryStore;
use beacon_storage::observed::ObservedStorage;
use beacon_storage::postgres::PostgresStore;
use beacon_storage::sqlite::SqliteStore;

use crate::http::{AppState, BeaconService};
use crate::resolver::Resolver;
use crate::util::config::{self, StorageKind};

mod admin;
mod http;
mod metrics;
mod resolver;
mod tracing;
mod util;

fn main() {
	let args: Vec<String> = std::env::args().collect();
	let config_path = match args.len() {
		1 => None,
		2 => Some(args[1].as_str()),
		_ => {
			eprintln!("Usage: {} [config-file-path]", args[0]);
			std::process::exit(1);
		},
	};

	let configuration = match config::load_configuration(config_path) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("Failed to load configuration: {e}");
			std::process::exit(1);
		},
	};

	if let Err(e) = util::logger::init(&configuration.logging) {
		eprintln!("Failed to initialize logger: {e}");
		std::process::exit(1);
	}

	if let Err(e) = tracing::configure_tracer(&configuration.observability) {
		log::warn!("Failed to initialize tracer: {e}");
	}

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("Failed to set up tokio runtime: {e}");
			std::process::exit(1);
		},
	};

	let exit_code = runtime.block_on(run(configuration));
	std::process::exit(exit_code);
}

async fn build_storage(kind: StorageKind) -> Result<Box<dyn Storage>, String> {
	match kind {
		StorageKind::Memory => Ok(Box::new(MemoryStore::new())),
		StorageKind::JsonFile { path, cache_ttl } => {
			JsonFileStore::open(path, cache_ttl).await.map(|s| Box::new(s) as Box<dyn Storage>).map_err(|e| e.to_string())
		},
		StorageKind::Sqlite { path } => {
			SqliteStore::open(path).await.map(|s| Box::new(s) as Box<dyn Storage>).map_err(|e| e.to_string())
		},
		StorageKind::Postgres { dsn } => {
			PostgresStore::connect(&dsn).await.map(|s| Box::new(s) as Box<dyn Storage>).map_err(|e| e.to_string())
		},
	}
}

async fn run(configuration: config::Configuration) -> i32 {
	let config::Configuration { server, storage: storage_kind, security, metrics: metrics_config, observability: _observability, logging: _logging } =
		configuration;

	let backend = match build_storage(storage_kind).await {
		Ok(backend) => backend,
		Err(e) => {
			log::error!("Failed to initialize storage backend: {e}");
			return 1;
		},
	};
	let observed = Arc::new(ObservedStorage::new(backend));
	let storage: Arc<dyn Storage> = Arc::clone(&observed);

	let cancel = CancellationToken::new();

	if security.enable_auth {
		if let Some(bootstrap_key) = &security.bootstrap_key {
			if let Err(e) = seed_bootstrap_key(&*storage, &cancel, bootstrap_key).await {
				log::error!("Failed to seed bootstrap key: {e}");
				return 1;
			}
			log::info!(target: "beacon_server::audit", "event=security_audit outcome=bootstrap_seeded");
		}
	}

	let rate_limit_config = RateLimitConfig {
		anonymous_capacity: security.rate_anonymous_capacity,
		anonymous_refill_per_minute: security.rate_anonymous_refill_per_minute,
		authenticated_capacity: security.rate_authenticated_capacity,
		authenticated_refill_per_minute: security.rate_authenticated_refill_per_minute,
		idle_timeout: security.rate_cleanup_interval,
	};
	let rate_limiter = RateLimiter::new(rate_limit_config);
	let reclaimer = rate_limiter.spawn_reclaimer(security.rate_cleanup_interval, cancel.child_token());

	let resolver = Resolver::new(Arc::clone(&storage));
	let state = Arc::new(AppState {
		resolver,
		storage: Arc::clone(&storage),
		rate_limiter,
		enable_auth: security.enable_auth,
		shutdown: cancel.clone(),
	});

	let listener = match TcpListener::bind(server.bind_address).await {
		Ok(listener) => listener,
		Err(e) => {
			log::error!("Failed to bind {}: {e}", server.bind_address);
			return 1;
		},
	};
	log::info!("Listening for incoming connections on {}", server.bind_address);

	let metrics_task = if metrics_config.enabled {
		let metrics_host = server.bind_address.ip();
		let metrics_cancel = cancel.child_token();
		let metrics_observed = Arc::clone(&observed);
		Some(tokio::spawn(async move {
			if let Err(e) =
				metrics::serve(metrics_host, metrics_config.port, metrics_config.path, metrics_observed, metrics_cancel).await
			{
				log::warn!("Metrics listener stopped: {e}");
			}
		}))
	} else {
		None
	};

	let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
		Ok(stream) => stream,
		Err(e) => {
			log::error!("Failed to register SIGTERM handler: {e}");
			return 1;
		},
	};

	let in_flight = Arc::new(tokio::sync::Mutex::new(0u64));
	let in_flight_changed = Arc::new(tokio::sync::Notify::new());

	loop {
		tokio::select! {
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, remote_addr)) => {
						let io = TokioIo::new(stream);
						let service = BeaconService::new(Arc::clone(&state), remote_addr.ip());
						let in_flight = Arc::clone(&in_flight);
						let in_flight_changed = Arc::clone(&in_flight_changed);
						tokio::spawn(async move {
							*in_flight.lock().await += 1;
							if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
								log::debug!("connection error: {err}");
							}
							*in_flight.lock().await -= 1;
							in_flight_changed.notify_waiters();
						});
					},
					Err(e) => log::warn!("Failed to accept connection: {e}"),
				}
			}
			_ = tokio::signal::ctrl_c() => {
				log::info!("Received CTRL-C, shutting down");
				break;
			}
			_ = sigterm_stream.recv() => {
				log::info!("Received SIGTERM, shutting down");
				break;
			}
		}
	}

	cancel.cancel();
	let drained = tokio::time::timeout(server.shutdown_deadline, async {
		loop {
			if *in_flight.lock().await == 0 {
				return;
			}
			in_flight_changed.notified().await;
		}
	})
	.await;
	if drained.is_err() {
		log::warn!("Shutdown deadline elapsed with requests still in flight");
	}

	let _ = reclaimer.await;
	if let Some(task) = metrics_task {
		let _ = task.await;
	}
	if let Err(e) = storage.close().await {
		log::warn!("Error while closing storage: {e}");
	}

	0
}
