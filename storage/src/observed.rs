//! A [`Storage`] decorator that records per-operation latency and error
//! counts (spec §2, Observability adapter). Wraps any backend without
//! knowing which one; metrics are exposed via [`ObservedStorage::snapshot`]
//! rather than pushed to an external sink, since metrics transport is an
//! outer concern left to the server crate.

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Application, Release};
use beacon_core::storage::Storage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct OpCounters {
	calls: AtomicU64,
	errors: AtomicU64,
	total_micros: AtomicU64,
}

/// A point-in-time view of one operation's recorded counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpStats {
	/// Number of times the operation was invoked.
	pub calls: u64,
	/// Number of invocations that returned `Err`.
	pub errors: u64,
	/// Mean latency in microseconds across recorded invocations.
	pub mean_latency_micros: u64,
}

/// Wraps a [`Storage`] backend, recording latency and error counts for
/// every operation under its own name.
pub struct ObservedStorage {
	inner: Box<dyn Storage>,
	counters: Mutex<HashMap<&'static str, OpCounters>>,
}

impl ObservedStorage {
	/// Wraps `inner`, starting with empty counters.
	pub fn new(inner: Box<dyn Storage>) -> Self {
		Self { inner, counters: Mutex::new(HashMap::new()) }
	}

	/// A snapshot of every operation observed so far, keyed by operation name.
	pub fn snapshot(&self) -> HashMap<&'static str, OpStats> {
		let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
		counters
			.iter()
			.map(|(name, c)| {
				let calls = c.calls.load(Ordering::Relaxed);
				let mean = if calls > 0 { c.total_micros.load(Ordering::Relaxed) / calls } else { 0 };
				(*name, OpStats { calls, errors: c.errors.load(Ordering::Relaxed), mean_latency_micros: mean })
			})
			.collect()
	}

	fn record(&self, op: &'static str, elapsed_micros: u64, is_err: bool) {
		let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
		let entry = counters.entry(op).or_insert_with(OpCounters::default);
		entry.calls.fetch_add(1, Ordering::Relaxed);
		entry.total_micros.fetch_add(elapsed_micros, Ordering::Relaxed);
		if is_err {
			entry.errors.fetch_add(1, Ordering::Relaxed);
		}
		if is_err {
			log::warn!(target: "beacon_storage::observed", "{op} failed after {elapsed_micros}us");
		} else {
			log::trace!(target: "beacon_storage::observed", "{op} completed in {elapsed_micros}us");
		}
	}

	async fn observe<T, F>(&self, op: &'static str, fut: F) -> Result<T, CoreError>
	where
		F: std::future::Future<Output = Result<T, CoreError>>,
	{
		let start = Instant::now();
		let result = fut.await;
		let elapsed = start.elapsed().as_micros() as u64;
		self.record(op, elapsed, result.is_err());
		result
	}
}

#[async_trait]
impl Storage for ObservedStorage {
	async fn list_applications(&self, cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		self.observe("list_applications", self.inner.list_applications(cancel)).await
	}

	async fn get_application(&self, cancel: &CancellationToken, id: &str) -> Result<Application, CoreError> {
		self.observe("get_application", self.inner.get_application(cancel, id)).await
	}

	async fn save_application(&self, cancel: &CancellationToken, application: Application) -> Result<(), CoreError> {
		self.observe("save_application", self.inner.save_application(cancel, application)).await
	}

	async fn delete_application(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		self.observe("delete_application", self.inner.delete_application(cancel, id)).await
	}

	async fn list_releases(&self, cancel: &CancellationToken, application_id: &str) -> Result<Vec<Release>, CoreError> {
		self.observe("list_releases", self.inner.list_releases(cancel, application_id)).await
	}

	async fn get_release(
		&self, cancel: &CancellationToken, application_id: &str, version: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		self.observe("get_release", self.inner.get_release(cancel, application_id, version, platform, architecture))
			.await
	}

	async fn save_release(&self, cancel: &CancellationToken, release: Release) -> Result<(), CoreError> {
		self.observe("save_release", self.inner.save_release(cancel, release)).await
	}

	async fn delete_release(
		&self, cancel: &CancellationToken, application_id: &str, version: &str, platform: &str, architecture: &str,
	) -> Result<(), CoreError> {
		self.observe(
			"delete_release",
			self.inner.delete_release(cancel, application_id, version, platform, architecture),
		)
		.await
	}

	async fn get_latest_release(
		&self, cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		self.observe("get_latest_release", self.inner.get_latest_release(cancel, application_id, platform, architecture))
			.await
	}

	async fn get_releases_after_version(
		&self, cancel: &CancellationToken, application_id: &str, current: &str, platform: &str, architecture: &str,
	) -> Result<Vec<Release>, CoreError> {
		self.observe(
			"get_releases_after_version",
			self.inner.get_releases_after_version(cancel, application_id, current, platform, architecture),
		)
		.await
	}

	async fn ping(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
		self.observe("ping", self.inner.ping(cancel)).await
	}

	async fn create_api_key(&self, cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		self.observe("create_api_key", self.inner.create_api_key(cancel, key)).await
	}

	async fn get_api_key_by_hash(&self, cancel: &CancellationToken, key_hash: &str) -> Result<ApiKey, CoreError> {
		self.observe("get_api_key_by_hash", self.inner.get_api_key_by_hash(cancel, key_hash)).await
	}

	async fn list_api_keys(&self, cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError> {
		self.observe("list_api_keys", self.inner.list_api_keys(cancel)).await
	}

	async fn update_api_key(&self, cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		self.observe("update_api_key", self.inner.update_api_key(cancel, key)).await
	}

	async fn delete_api_key(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		self.observe("delete_api_key", self.inner.delete_api_key(cancel, id)).await
	}

	async fn close(&self) -> Result<(), CoreError> {
		self.observe("close", self.inner.close()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryStore;

	#[tokio::test]
	async fn successful_calls_are_counted_without_errors() {
		let observed = ObservedStorage::new(Box::new(MemoryStore::new()));
		let cancel = CancellationToken::new();
		observed.list_applications(&cancel).await.unwrap();
		observed.list_applications(&cancel).await.unwrap();

		let snapshot = observed.snapshot();
		let stats = snapshot.get("list_applications").unwrap();
		assert_eq!(stats.calls, 2);
		assert_eq!(stats.errors, 0);
	}

	#[tokio::test]
	async fn failed_calls_increment_the_error_counter() {
		let observed = ObservedStorage::new(Box::new(MemoryStore::new()));
		let cancel = CancellationToken::new();
		let _ = observed.get_application(&cancel, "missing").await.unwrap_err();

		let snapshot = observed.snapshot();
		let stats = snapshot.get("get_application").unwrap();
		assert_eq!(stats.calls, 1);
		assert_eq!(stats.errors, 1);
	}

	#[tokio::test]
	async fn distinct_operations_are_tracked_independently() {
		let observed = ObservedStorage::new(Box::new(MemoryStore::new()));
		let cancel = CancellationToken::new();
		observed.list_applications(&cancel).await.unwrap();
		observed.ping(&cancel).await.unwrap();

		let snapshot = observed.snapshot();
		assert!(snapshot.contains_key("list_applications"));
		assert!(snapshot.contains_key("ping"));
	}
}
