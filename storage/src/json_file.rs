//! File-backed JSON [`Storage`] backend: a single file holding arrays of
//! applications and releases, read through a TTL cache keyed by file mtime
//! with double-checked locking — a fast shared-lock path for a cache hit,
//! a write-lock slow path that re-validates before re-reading the file.
//! Writes are always whole-file rewrites; there is no partial update.

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Application, Release};
use beacon_core::storage::Storage;
use beacon_core::version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileContents {
	applications: Vec<Application>,
	releases: Vec<Release>,
	api_keys: Vec<ApiKey>,
	last_updated: Option<DateTime<Utc>>,
}

struct Cache {
	contents: Arc<FileContents>,
	loaded_mtime: Option<SystemTime>,
	expires_at: Instant,
}

/// A JSON-file-backed implementation of Beacon's storage contract.
pub struct JsonFileStore {
	path: PathBuf,
	ttl: Duration,
	cache: RwLock<Option<Cache>>,
}

impl JsonFileStore {
	/// Opens (or prepares to create) a store backed by the file at `path`,
	/// with a read-cache held for `ttl` before mtime is re-checked.
	pub async fn open(path: impl AsRef<Path>, ttl: Duration) -> Result<Self, CoreError> {
		let path = path.as_ref().to_path_buf();
		if let Some(dir) = path.parent() {
			if !dir.as_os_str().is_empty() {
				tokio::fs::create_dir_all(dir).await?;
				#[cfg(unix)]
				{
					let mut perms = tokio::fs::metadata(dir).await?.permissions();
					perms.set_mode(0o700);
					tokio::fs::set_permissions(dir, perms).await?;
				}
			}
		}
		if tokio::fs::metadata(&path).await.is_err() {
			let store = Self { path: path.clone(), ttl, cache: RwLock::new(None) };
			store.write_contents(&FileContents::default()).await?;
		}
		Ok(Self { path, ttl, cache: RwLock::new(None) })
	}

	async fn write_contents(&self, contents: &FileContents) -> Result<(), CoreError> {
		let serialized = serde_json::to_vec_pretty(contents)
			.map_err(|e| CoreError::internal(format!("failed to serialize store: {e}")))?;
		tokio::fs::write(&self.path, &serialized).await?;
		#[cfg(unix)]
		{
			let mut perms = tokio::fs::metadata(&self.path).await?.permissions();
			perms.set_mode(0o600);
			tokio::fs::set_permissions(&self.path, perms).await?;
		}
		Ok(())
	}

	async fn current_mtime(&self) -> Result<SystemTime, CoreError> {
		let metadata = tokio::fs::metadata(&self.path).await?;
		metadata.modified().map_err(CoreError::from)
	}

	/// Returns the current contents, refreshing the cache if it is expired
	/// or the backing file's mtime has changed since it was last loaded.
	async fn read(&self) -> Result<Arc<FileContents>, CoreError> {
		// Fast path: shared-equivalent read under the cache lock.
		{
			let guard = self.cache.read().await;
			if let Some(cache) = guard.as_ref() {
				if Instant::now() < cache.expires_at {
					return Ok(Arc::clone(&cache.contents));
				}
			}
		}

		// Slow path: re-validate under the write lock before paying for I/O.
		let mut guard = self.cache.write().await;
		let mtime = self.current_mtime().await?;
		if let Some(cache) = guard.as_ref() {
			if Instant::now() < cache.expires_at || cache.loaded_mtime == Some(mtime) {
				return Ok(Arc::clone(&cache.contents));
			}
		}

		let raw = tokio::fs::read_to_string(&self.path).await?;
		let contents: FileContents = serde_json::from_str(&raw)
			.map_err(|e| CoreError::internal(format!("failed to parse store file: {e}")))?;
		let contents = Arc::new(contents);
		*guard = Some(Cache {
			contents: Arc::clone(&contents),
			loaded_mtime: Some(mtime),
			expires_at: Instant::now() + self.ttl,
		});
		Ok(contents)
	}

	/// Reads current contents, applies `mutator`, persists, and invalidates the cache.
	async fn mutate<F>(&self, mutator: F) -> Result<(), CoreError>
	where
		F: FnOnce(&mut FileContents) -> Result<(), CoreError>,
	{
		let mut contents = (*self.read().await?).clone();
		mutator(&mut contents)?;
		contents.last_updated = Some(Utc::now());
		self.write_contents(&contents).await?;
		*self.cache.write().await = None;
		Ok(())
	}
}

#[async_trait]
impl Storage for JsonFileStore {
	async fn list_applications(&self, _cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		Ok(self.read().await?.applications.clone())
	}

	async fn get_application(
		&self, _cancel: &CancellationToken, id: &str,
	) -> Result<Application, CoreError> {
		self.read()
			.await?
			.applications
			.iter()
			.find(|a| a.id == id)
			.cloned()
			.ok_or_else(|| CoreError::not_found(format!("application '{id}' not found")))
	}

	async fn save_application(
		&self, _cancel: &CancellationToken, application: Application,
	) -> Result<(), CoreError> {
		self.mutate(|contents| {
			if let Some(existing) = contents.applications.iter_mut().find(|a| a.id == application.id) {
				*existing = application;
			} else {
				contents.applications.push(application);
			}
			Ok(())
		})
		.await
	}

	async fn delete_application(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let contents = self.read().await?;
		if !contents.applications.iter().any(|a| a.id == id) {
			return Err(CoreError::not_found(format!("application '{id}' not found")));
		}
		if contents.releases.iter().any(|r| r.application_id == id) {
			return Err(CoreError::conflict(format!(
				"application '{id}' still has releases referencing it"
			)));
		}
		drop(contents);
		self.mutate(|contents| {
			contents.applications.retain(|a| a.id != id);
			Ok(())
		})
		.await
	}

	async fn list_releases(
		&self, _cancel: &CancellationToken, application_id: &str,
	) -> Result<Vec<Release>, CoreError> {
		let mut releases: Vec<Release> = self
			.read()
			.await?
			.releases
			.iter()
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
		self.read()
			.await?
			.releases
			.iter()
			.find(|r| {
				r.application_id == application_id
					&& r.version == version
					&& r.platform == platform
					&& r.architecture == architecture
			})
			.cloned()
			.ok_or_else(|| CoreError::not_found("release not found".to_string()))
	}

	async fn save_release(&self, _cancel: &CancellationToken, release: Release) -> Result<(), CoreError> {
		let contents = self.read().await?;
		if !contents.applications.iter().any(|a| a.id == release.application_id) {
			return Err(CoreError::not_found(format!(
				"application '{}' not found",
				release.application_id
			)));
		}
		drop(contents);
		self.mutate(|contents| {
			if let Some(existing) = contents.releases.iter_mut().find(|r| {
				r.application_id == release.application_id
					&& r.version == release.version
					&& r.platform == release.platform
					&& r.architecture == release.architecture
			}) {
				*existing = release;
			} else {
				contents.releases.push(release);
			}
			Ok(())
		})
		.await
	}

	async fn delete_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<(), CoreError> {
		let existed = self.read().await?.releases.iter().any(|r| {
			r.application_id == application_id
				&& r.version == version
				&& r.platform == platform
				&& r.architecture == architecture
		});
		if !existed {
			return Err(CoreError::not_found("release not found".to_string()));
		}
		self.mutate(|contents| {
			contents.releases.retain(|r| {
				!(r.application_id == application_id
					&& r.version == version
					&& r.platform == platform
					&& r.architecture == architecture)
			});
			Ok(())
		})
		.await
	}

	async fn get_latest_release(
		&self, _cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		let contents = self.read().await?;
		contents
			.releases
			.iter()
			.filter(|r| {
				r.application_id == application_id && r.platform == platform && r.architecture == architecture
			})
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r)))
			.max_by(|(a, _), (b, _)| a.cmp(b))
			.map(|(_, r)| r.clone())
			.ok_or_else(|| CoreError::not_found("no release matches platform/architecture".to_string()))
	}

	async fn get_releases_after_version(
		&self, _cancel: &CancellationToken, application_id: &str, current: &str, platform: &str,
		architecture: &str,
	) -> Result<Vec<Release>, CoreError> {
		let current_version = version::parse(current)?;
		let contents = self.read().await?;
		let mut matches: Vec<(semver::Version, Release)> = contents
			.releases
			.iter()
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
		self.current_mtime().await.map(|_| ())
	}

	async fn create_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		self.mutate(|contents| {
			contents.api_keys.push(key);
			Ok(())
		})
		.await
	}

	async fn get_api_key_by_hash(
		&self, _cancel: &CancellationToken, key_hash: &str,
	) -> Result<ApiKey, CoreError> {
		self.read()
			.await?
			.api_keys
			.iter()
			.find(|k| k.key_hash == key_hash)
			.cloned()
			.ok_or_else(|| CoreError::not_found("no api key matches hash".to_string()))
	}

	async fn list_api_keys(&self, _cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError> {
		Ok(self.read().await?.api_keys.clone())
	}

	async fn update_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		let exists = self.read().await?.api_keys.iter().any(|k| k.id == key.id);
		if !exists {
			return Err(CoreError::not_found(format!("api key '{}' not found", key.id)));
		}
		self.mutate(|contents| {
			if let Some(existing) = contents.api_keys.iter_mut().find(|k| k.id == key.id) {
				*existing = key;
			}
			Ok(())
		})
		.await
	}

	async fn delete_api_key(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let exists = self.read().await?.api_keys.iter().any(|k| k.id == id);
		if !exists {
			return Err(CoreError::not_found(format!("api key '{id}' not found")));
		}
		self.mutate(|contents| {
			contents.api_keys.retain(|k| k.id != id);
			Ok(())
		})
		.await
	}

	async fn close(&self) -> Result<(), CoreError> {
		Ok(())
	}
}

beacon_core::define_storage_tests!(JsonFileStoreConformance, JsonFileStore, {
	let dir = tempfile::tempdir().unwrap();
	JsonFileStore::open(dir.path().join("store.json"), Duration::from_millis(0)).await.unwrap()
});

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn opening_twice_preserves_existing_contents() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.json");
		let cancel = CancellationToken::new();

		let store = JsonFileStore::open(&path, Duration::from_secs(30)).await.unwrap();
		let app = beacon_core::model::Application {
			id: "demo".into(),
			name: "Demo".into(),
			description: String::new(),
			supported_platforms: Default::default(),
			config: Default::default(),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		store.save_application(&cancel, app).await.unwrap();

		let reopened = JsonFileStore::open(&path, Duration::from_secs(30)).await.unwrap();
		let fetched = reopened.get_application(&cancel, "demo").await.unwrap();
		assert_eq!(fetched.id, "demo");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn file_is_created_with_restrictive_permissions() {
		use std::os::unix::fs::PermissionsExt;
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.json");
		JsonFileStore::open(&path, Duration::from_secs(30)).await.unwrap();

		let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, 0o600);
	}
}
