//! The metrics endpoint (spec §2 Observability adapter, §6 ambient config
//! surface): a tiny standalone HTTP listener, independent of the main
//! `BeaconService` router, exposing [`ObservedStorage::snapshot`] in
//! Prometheus text exposition format. Kept as its own listener rather than a
//! route on the main router since metrics conventionally bind a separate
//! port, reachable from a scrape network the public API port isn't on.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use beacon_storage::observed::ObservedStorage;

/// Serves `path` on `host:port` until `cancel` fires, rendering
/// `observed`'s counters on every request. Runs as its own accept loop,
/// grounded on the same `tokio::select!` shape as the main server loop in
/// `main.rs`, sized down to a single route.
pub async fn serve(
	host: IpAddr, port: u16, path: String, observed: Arc<ObservedStorage>, cancel: CancellationToken,
) -> std::io::Result<()> {
	let addr = SocketAddr::new(host, port);
	let listener = TcpListener::bind(addr).await?;
	log::info!("Serving metrics on {addr}{path}");

	loop {
		tokio::select! {
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, _)) => {
						let io = TokioIo::new(stream);
						let service = MetricsService { path: path.clone(), observed: Arc::clone(&observed) };
						tokio::spawn(async move {
							if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
								log::debug!("metrics connection error: {err}");
							}
						});
					},
					Err(e) => log::warn!("Failed to accept metrics connection: {e}"),
				}
			}
			_ = cancel.cancelled() => {
				log::debug!("metrics listener shutting down");
				return Ok(());
			}
		}
	}
}

#[derive(Clone)]
struct MetricsService {
	path: String,
	observed: Arc<ObservedStorage>,
}

impl Service<Request<Incoming>> for MetricsService {
	type Response = Response<Full<Bytes>>;
	type Error = Infallible;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let matches_path = req.uri().path() == self.path;
		let observed = Arc::clone(&self.observed);
		Box::pin(async move {
			if !matches_path {
				return Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Full::new(Bytes::new())).unwrap());
			}
			let body = render_prometheus_text(&observed);
			Ok(Response::builder()
				.status(StatusCode::OK)
				.header("content-type", "text/plain; version=0.0.4")
				.body(Full::new(Bytes::from(body)))
				.unwrap())
		})
	}
}

/// Renders a [`ObservedStorage::snapshot`] as Prometheus text exposition
/// format, one gauge family per counter, labeled by storage operation.
fn render_prometheus_text(observed: &ObservedStorage) -> String {
	let snapshot = observed.snapshot();
	let mut out = String::new();
	out.push_str("# HELP beacon_storage_calls_total Storage operations invoked, by operation.\n");
	out.push_str("# TYPE beacon_storage_calls_total counter\n");
	for (op, stats) in &snapshot {
		out.push_str(&format!("beacon_storage_calls_total{{operation=\"{op}\"}} {}\n", stats.calls));
	}
	out.push_str("# HELP beacon_storage_errors_total Storage operations that returned an error, by operation.\n");
	out.push_str("# TYPE beacon_storage_errors_total counter\n");
	for (op, stats) in &snapshot {
		out.push_str(&format!("beacon_storage_errors_total{{operation=\"{op}\"}} {}\n", stats.errors));
	}
	out.push_str("# HELP beacon_storage_mean_latency_microseconds Mean observed latency, by operation.\n");
	out.push_str("# TYPE beacon_storage_mean_latency_microseconds gauge\n");
	for (op, stats) in &snapshot {
		out.push_str(&format!("beacon_storage_mean_latency_microseconds{{operation=\"{op}\"}} {}\n", stats.mean_latency_micros));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_core::storage::Storage;
	use beacon_storage::memory::MemoryStore;

	#[tokio::test]
	async fn renders_recorded_operations_as_gauges() {
		let observed = ObservedStorage::new(Box::new(MemoryStore::new()));
		let cancel = CancellationToken::new();
		observed.list_applications(&cancel).await.unwrap();

		let text = render_prometheus_text(&observed);
		assert!(text.contains("beacon_storage_calls_total{operation=\"list_applications\"} 1"));
		assert!(text.contains("beacon_storage_errors_total{operation=\"list_applications\"} 0"));
	}

	#[tokio::test]
	async fn renders_empty_snapshot_without_panicking() {
		let observed = ObservedStorage::new(Box::new(MemoryStore::new()));
		let text = render_prometheus_text(&observed);
		assert!(text.contains("# TYPE beacon_storage_calls_total counter"));
	}
}
