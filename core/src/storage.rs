//! The backend-agnostic storage contract (spec §4.2). Every backend in
//! `beacon-storage` implements [`Storage`] and must satisfy the same
//! semantic invariants regardless of its durability or concurrency model.

use crate::error::CoreError;
use crate::model::{ApiKey, Application, Release};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Fields a release listing can be sorted by (spec §4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
	Version,
	ReleaseDate,
	Platform,
	Architecture,
	CreatedAt,
}

impl Default for SortField {
	fn default() -> Self {
		SortField::ReleaseDate
	}
}

/// Sort order for a release listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	Asc,
	Desc,
}

impl Default for SortOrder {
	fn default() -> Self {
		SortOrder::Desc
	}
}

/// Filters accepted by `ListReleases` (spec §4.3.3).
#[derive(Debug, Clone, Default)]
pub struct ReleaseFilter {
	pub platform: Option<String>,
	pub architecture: Option<String>,
	pub version: Option<String>,
	pub required: Option<bool>,
	/// Matches any of the given platforms; combined with `platform` if both are set.
	pub platforms: Option<Vec<String>>,
}

impl ReleaseFilter {
	/// True if `release` satisfies every set filter.
	pub fn matches(&self, release: &Release) -> bool {
		if let Some(platform) = &self.platform {
			if &release.platform != platform {
				return false;
			}
		}
		if let Some(arch) = &self.architecture {
			if &release.architecture != arch {
				return false;
			}
		}
		if let Some(version) = &self.version {
			if &release.version != version {
				return false;
			}
		}
		if let Some(required) = self.required {
			if release.required != required {
				return false;
			}
		}
		if let Some(platforms) = &self.platforms {
			if !platforms.iter().any(|p| p == &release.platform) {
				return false;
			}
		}
		true
	}
}

/// Pagination parameters; `limit` defaults to 50 and is capped at 100 by callers.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
	pub limit: u32,
	pub offset: u32,
}

impl Default for Pagination {
	fn default() -> Self {
		Self { limit: 50, offset: 0 }
	}
}

/// The result of a filtered, paginated, sorted release listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
	pub items: Vec<T>,
	pub total: u64,
	pub offset: u32,
	pub limit: u32,
	pub has_more: bool,
}

impl<T> Page<T> {
	/// Lossy page-number computation per spec §9 Open Question 2; callers
	/// keep `offset` populated alongside this since the division can round
	/// down and misrepresent the true page for a non-aligned offset.
	pub fn page_number(&self) -> u64 {
		if self.limit == 0 {
			1
		} else {
			(self.offset / self.limit) as u64 + 1
		}
	}
}

/// An interface that must be implemented by every backend implementation of
/// Beacon's storage layer. All entities returned are independent,
/// defensively-copied values: mutating a returned value never affects a
/// subsequent read (spec §4.2, §8).
#[async_trait]
pub trait Storage: Send + Sync {
	/// Lists every stored application.
	async fn list_applications(&self, cancel: &CancellationToken) -> Result<Vec<Application>, CoreError>;

	/// Fetches a single application by id; `NotFound` if absent.
	async fn get_application(
		&self, cancel: &CancellationToken, id: &str,
	) -> Result<Application, CoreError>;

	/// Inserts or updates an application (upsert by id).
	async fn save_application(
		&self, cancel: &CancellationToken, application: Application,
	) -> Result<(), CoreError>;

	/// Deletes an application; `Conflict`-shaped as `HasDependencies` if any
	/// release still references it, `NotFound` if it never existed.
	async fn delete_application(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError>;

	/// Lists every release for an application, sorted by `release_date` descending.
	async fn list_releases(
		&self, cancel: &CancellationToken, application_id: &str,
	) -> Result<Vec<Release>, CoreError>;

	/// Fetches the release uniquely identified by (A1); `NotFound` if absent.
	async fn get_release(
		&self, cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<Release, CoreError>;

	/// Inserts or updates a release, keyed by (A1); a colliding upsert overwrites.
	async fn save_release(&self, cancel: &CancellationToken, release: Release) -> Result<(), CoreError>;

	/// Deletes the release uniquely identified by (A1); `NotFound` if absent.
	async fn delete_release(
		&self, cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<(), CoreError>;

	/// The release with maximal SemVer precedence among those matching
	/// `platform`/`architecture`; unparseable stored versions are excluded.
	/// `NotFound` if none match.
	async fn get_latest_release(
		&self, cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError>;

	/// Releases matching `platform`/`architecture` whose version is strictly
	/// greater than `current`, sorted descending. Returns an empty list
	/// (never `NotFound`) if none match.
	async fn get_releases_after_version(
		&self, cancel: &CancellationToken, application_id: &str, current: &str, platform: &str,
		architecture: &str,
	) -> Result<Vec<Release>, CoreError>;

	/// A connectivity check; `Err` if the backend is unreachable.
	async fn ping(&self, cancel: &CancellationToken) -> Result<(), CoreError>;

	/// Inserts a new API key.
	async fn create_api_key(&self, cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError>;

	/// Looks up an API key by the SHA-256 hash of its raw token; `NotFound` if absent.
	async fn get_api_key_by_hash(
		&self, cancel: &CancellationToken, key_hash: &str,
	) -> Result<ApiKey, CoreError>;

	/// Lists every stored API key.
	async fn list_api_keys(&self, cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError>;

	/// Replaces a stored API key in full, keyed by id; `NotFound` if absent.
	async fn update_api_key(&self, cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError>;

	/// Deletes an API key by id; `NotFound` if absent.
	async fn delete_api_key(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError>;

	/// Releases any resources (connections, file handles) held by the backend.
	async fn close(&self) -> Result<(), CoreError>;
}
