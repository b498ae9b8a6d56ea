//! In-memory [`Storage`] backend: a single readers-writer lock over plain
//! maps, modeled directly on the upstream in-memory backend this workspace
//! descends from (a `Mutex`-guarded `BTreeMap` of composite-keyed records).
//! Fast, non-durable; honours cancellation only nominally since every
//! operation here is O(n) in memory and never blocks on I/O.

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Application};
use beacon_core::model::Release;
use beacon_core::storage::Storage;
use beacon_core::version;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

fn release_key(application_id: &str, version: &str, platform: &str, architecture: &str) -> String {
	format!("{application_id}#{version}#{platform}#{architecture}")
}

#[derive(Default)]
struct Tables {
	applications: HashMap<String, Application>,
	releases: HashMap<String, Release>,
	api_keys: HashMap<String, ApiKey>,
}

/// In-memory implementation of Beacon's storage contract.
pub struct MemoryStore {
	tables: RwLock<Tables>,
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	/// Creates an empty in-memory store.
	pub fn new() -> Self {
		Self { tables: RwLock::new(Tables::default()) }
	}
}

#[async_trait]
impl Storage for MemoryStore {
	async fn list_applications(&self, _cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		let guard = self.tables.read().await;
		Ok(guard.applications.values().cloned().collect())
	}

	async fn get_application(
		&self, _cancel: &CancellationToken, id: &str,
	) -> Result<Application, CoreError> {
		let guard = self.tables.read().await;
		guard
			.applications
			.get(id)
			.cloned()
			.ok_or_else(|| CoreError::not_found(format!("application '{id}' not found")))
	}

	async fn save_application(
		&self, _cancel: &CancellationToken, application: Application,
	) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		guard.applications.insert(application.id.clone(), application);
		Ok(())
	}

	async fn delete_application(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		if !guard.applications.contains_key(id) {
			return Err(CoreError::not_found(format!("application '{id}' not found")));
		}
		let has_dependents = guard.releases.values().any(|r| r.application_id == id);
		if has_dependents {
			return Err(CoreError::conflict(format!(
				"application '{id}' still has releases referencing it"
			)));
		}
		guard.applications.remove(id);
		Ok(())
	}

	async fn list_releases(
		&self, _cancel: &CancellationToken, application_id: &str,
	) -> Result<Vec<Release>, CoreError> {
		let guard = self.tables.read().await;
		let mut releases: Vec<Release> = guard
			.releases
			.values()
			.filter(|r| r.application_id == application_id)
			.cloned()
			.collect();
		releases.sort_by(|a, b| b.release_date.cmp(&a.release_date));
		Ok(releases)
	}

	async fn get_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<Release, CoreError> {
		let guard = self.tables.read().await;
		let key = release_key(application_id, version, platform, architecture);
		guard
			.releases
			.get(&key)
			.cloned()
			.ok_or_else(|| CoreError::not_found(format!("release '{key}' not found")))
	}

	async fn save_release(&self, _cancel: &CancellationToken, release: Release) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		if !guard.applications.contains_key(&release.application_id) {
			return Err(CoreError::not_found(format!(
				"application '{}' not found",
				release.application_id
			)));
		}
		let key =
			release_key(&release.application_id, &release.version, &release.platform, &release.architecture);
		guard.releases.insert(key, release);
		Ok(())
	}

	async fn delete_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		let key = release_key(application_id, version, platform, architecture);
		if guard.releases.remove(&key).is_none() {
			return Err(CoreError::not_found(format!("release '{key}' not found")));
		}
		Ok(())
	}

	async fn get_latest_release(
		&self, _cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		let guard = self.tables.read().await;
		let candidate = guard
			.releases
			.values()
			.filter(|r| {
				r.application_id == application_id && r.platform == platform && r.architecture == architecture
			})
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r)))
			.max_by(|(a, _), (b, _)| a.cmp(b))
			.map(|(_, r)| r.clone());
		candidate.ok_or_else(|| CoreError::not_found("no release matches platform/architecture".to_string()))
	}

	async fn get_releases_after_version(
		&self, _cancel: &CancellationToken, application_id: &str, current: &str, platform: &str,
		architecture: &str,
	) -> Result<Vec<Release>, CoreError> {
		let current_version = version::parse(current)?;
		let guard = self.tables.read().await;
		let mut matches: Vec<(semver::Version, Release)> = guard
			.releases
			.values()
			.filter(|r| {
				r.application_id == application_id && r.platform == platform && r.architecture == architecture
			})
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r.clone())))
			.filter(|(v, _)| *v > current_version)
			.collect();
		matches.sort_by(|(a, _), (b, _)| b.cmp(a));
		Ok(matches.into_iter().map(|(_, r)| r).collect())
	}

	async fn ping(&self, _cancel: &CancellationToken) -> Result<(), CoreError> {
		Ok(())
	}

	async fn create_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		guard.api_keys.insert(key.id.clone(), key);
		Ok(())
	}

	async fn get_api_key_by_hash(
		&self, _cancel: &CancellationToken, key_hash: &str,
	) -> Result<ApiKey, CoreError> {
		let guard = self.tables.read().await;
		guard
			.api_keys
			.values()
			.find(|k| k.key_hash == key_hash)
			.cloned()
			.ok_or_else(|| CoreError::not_found("no api key matches hash".to_string()))
	}

	async fn list_api_keys(&self, _cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError> {
		let guard = self.tables.read().await;
		Ok(guard.api_keys.values().cloned().collect())
	}

	async fn update_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		if !guard.api_keys.contains_key(&key.id) {
			return Err(CoreError::not_found(format!("api key '{}' not found", key.id)));
		}
		let mut key = key;
		key.updated_at = Utc::now();
		guard.api_keys.insert(key.id.clone(), key);
		Ok(())
	}

	async fn delete_api_key(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let mut guard = self.tables.write().await;
		if guard.api_keys.remove(id).is_none() {
			return Err(CoreError::not_found(format!("api key '{id}' not found")));
		}
		Ok(())
	}

	async fn close(&self) -> Result<(), CoreError> {
		Ok(())
	}
}

beacon_core::define_storage_tests!(MemoryStoreConformance, MemoryStore, MemoryStore::new());

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_core::model::{ApplicationConfig};
	use std::collections::HashSet;

	#[tokio::test]
	async fn saving_a_release_for_an_unknown_application_is_not_found() {
		let store = MemoryStore::new();
		let cancel = CancellationToken::new();
		let release = beacon_core::model::Release {
			id: "r1".into(),
			application_id: "ghost".into(),
			version: "1.0.0".into(),
			platform: "windows".into(),
			architecture: "amd64".into(),
			download_url: "https://example.invalid".into(),
			checksum: "abc".into(),
			checksum_type: "sha256".into(),
			file_size: 1,
			release_notes: String::new(),
			release_date: Utc::now(),
			required: false,
			minimum_version: None,
			metadata: HashMap::new(),
			created_at: Utc::now(),
		};
		let err = store.save_release(&cancel, release).await.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn defensive_copies_mean_mutating_a_returned_value_does_not_persist() {
		let store = MemoryStore::new();
		let cancel = CancellationToken::new();
		let now = Utc::now();
		let app = Application {
			id: "demo".into(),
			name: "Demo".into(),
			description: String::new(),
			supported_platforms: HashSet::from(["windows".to_string()]),
			config: ApplicationConfig::default(),
			created_at: now,
			updated_at: now,
		};
		store.save_application(&cancel, app).await.unwrap();

		let mut fetched = store.get_application(&cancel, "demo").await.unwrap();
		fetched.name = "Mutated".into();

		let refetched = store.get_application(&cancel, "demo").await.unwrap();
		assert_eq!(refetched.name, "Demo");
	}
}
