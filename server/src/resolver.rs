//! The update-resolution and release-catalog engine (spec §4.3): validates
//! input, reads/writes through [`Storage`], and never touches an external
//! download URL or artifact byte.

use beacon_core::error::{CoreError, ErrorKind};
use beacon_core::model::{ApplicationConfig, Release};
use beacon_core::storage::{Page, Pagination, ReleaseFilter, SortField, SortOrder, Storage};
use beacon_core::version;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use beacon_core::model::{Application, ApplicationStats};

fn normalize_tag(raw: &str) -> String {
	raw.trim().to_lowercase()
}

const RELEASE_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn generate_release_id() -> String {
	let mut rng = rand::thread_rng();
	let body: String = (0..20).map(|_| RELEASE_ID_ALPHABET[rng.gen_range(0..RELEASE_ID_ALPHABET.len())] as char).collect();
	format!("rel_{body}")
}

/// Request body for `check_for_update` and the path-based update-check endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckForUpdateRequest {
	pub application_id: String,
	pub current_version: String,
	pub platform: String,
	pub architecture: String,
	#[serde(default)]
	pub allow_prerelease: bool,
	#[serde(default)]
	pub include_metadata: bool,
}

/// Response for `check_for_update` (spec §4.3.1, step 9).
#[derive(Debug, Clone, Serialize)]
pub struct CheckForUpdateResponse {
	pub update_available: bool,
	pub current_version: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub latest_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub download_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub checksum: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub checksum_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_size: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub release_notes: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub release_date: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub required: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub minimum_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<HashMap<String, String>>,
}

impl CheckForUpdateResponse {
	fn no_update(current_version: String) -> Self {
		Self {
			update_available: false,
			current_version,
			latest_version: None,
			download_url: None,
			checksum: None,
			checksum_type: None,
			file_size: None,
			release_notes: None,
			release_date: None,
			required: None,
			minimum_version: None,
			metadata: None,
		}
	}

	fn available(current_version: String, release: &Release, include_metadata: bool) -> Self {
		Self {
			update_available: true,
			current_version,
			latest_version: Some(release.version.clone()),
			download_url: Some(release.download_url.clone()),
			checksum: Some(release.checksum.clone()),
			checksum_type: Some(release.checksum_type.clone()),
			file_size: Some(release.file_size),
			release_notes: Some(release.release_notes.clone()),
			release_date: Some(release.release_date),
			required: Some(release.required),
			minimum_version: release.minimum_version.clone(),
			metadata: if include_metadata { Some(release.metadata.clone()) } else { None },
		}
	}
}

/// Request for `get_latest_version` (spec §4.3.2).
#[derive(Debug, Clone, Deserialize)]
pub struct GetLatestVersionRequest {
	pub application_id: String,
	pub platform: String,
	pub architecture: String,
	#[serde(default)]
	pub allow_prerelease: bool,
	#[serde(default)]
	pub include_metadata: bool,
}

/// Response for `get_latest_version`; also doubles as the "available" half
/// of a [`CheckForUpdateResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct LatestVersionResponse {
	pub version: String,
	pub download_url: String,
	pub checksum: String,
	pub checksum_type: String,
	pub file_size: u64,
	pub release_notes: String,
	pub release_date: DateTime<Utc>,
	pub required: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub minimum_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<HashMap<String, String>>,
}

impl From<(Release, bool)> for LatestVersionResponse {
	fn from((release, include_metadata): (Release, bool)) -> Self {
		Self {
			version: release.version,
			download_url: release.download_url,
			checksum: release.checksum,
			checksum_type: release.checksum_type,
			file_size: release.file_size,
			release_notes: release.release_notes,
			release_date: release.release_date,
			required: release.required,
			minimum_version: release.minimum_version,
			metadata: if include_metadata { Some(release.metadata) } else { None },
		}
	}
}

/// Query parameters for `list_releases` (spec §4.3.3).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListReleasesQuery {
	pub platform: Option<String>,
	pub architecture: Option<String>,
	pub version: Option<String>,
	pub required: Option<bool>,
	pub platforms: Option<Vec<String>>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
	pub sort: Option<SortField>,
	pub order: Option<SortOrder>,
}

/// Request body for `register_release` (spec §4.3.4).
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterReleaseRequest {
	pub version: String,
	pub platform: String,
	pub architecture: String,
	pub download_url: String,
	pub checksum: String,
	pub checksum_type: String,
	pub file_size: u64,
	#[serde(default)]
	pub release_notes: String,
	pub release_date: Option<DateTime<Utc>>,
	#[serde(default)]
	pub required: bool,
	pub minimum_version: Option<String>,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
}

/// Request body for `create_application`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApplicationRequest {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub supported_platforms: HashSet<String>,
	#[serde(default)]
	pub config: ApplicationConfig,
}

/// Partial-update body for `update_application` (spec §4.3.5): fields left
/// `None` are preserved, not cleared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApplicationRequest {
	pub name: Option<String>,
	pub description: Option<String>,
	pub supported_platforms: Option<HashSet<String>>,
	pub config: Option<ApplicationConfig>,
}

/// An [`Application`] plus its computed statistics, returned from `get_application`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationWithStats {
	#[serde(flatten)]
	pub application: Application,
	pub stats: ApplicationStats,
}

/// Implements the update-resolution and release-catalog operations of
/// spec §4.3 against any [`Storage`] backend.
pub struct Resolver {
	storage: Arc<dyn Storage>,
}

impl Resolver {
	/// Builds a resolver over `storage`.
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	fn validate_platform(&self, app: &Application, platform: &str) -> Result<(), CoreError> {
		if !app.supported_platforms.contains(platform) {
			return Err(CoreError::new(
				ErrorKind::InvalidRequest,
				format!("platform '{platform}' is not supported by application '{}'", app.id),
			));
		}
		Ok(())
	}

	/// Finds the largest stable release matching `platform`/`architecture`
	/// whose version is strictly greater than `current` (spec §4.3.1 step 7).
	async fn largest_stable_after(
		&self, cancel: &CancellationToken, application_id: &str, current: &semver::Version, platform: &str,
		architecture: &str,
	) -> Result<Option<Release>, CoreError> {
		let releases = self.storage.list_releases(cancel, application_id).await?;
		let mut best: Option<(semver::Version, Release)> = None;
		for release in releases {
			if release.platform != platform || release.architecture != architecture {
				continue;
			}
			let Ok(parsed) = version::parse(&release.version) else { continue };
			if !version::is_stable(&parsed) || parsed <= *current {
				continue;
			}
			if best.as_ref().map(|(v, _)| parsed > *v).unwrap_or(true) {
				best = Some((parsed, release));
			}
		}
		Ok(best.map(|(_, r)| r))
	}

	/// `CheckForUpdate` (spec §4.3.1).
	pub async fn check_for_update(
		&self, cancel: &CancellationToken, request: CheckForUpdateRequest,
	) -> Result<CheckForUpdateResponse, CoreError> {
		let platform = normalize_tag(&request.platform);
		let architecture = normalize_tag(&request.architecture);

		let app = self.storage.get_application(cancel, &request.application_id).await.map_err(|e| {
			if e.is_not_found() {
				CoreError::not_found(format!("application '{}' not found", request.application_id))
			} else {
				e
			}
		})?;
		self.validate_platform(&app, &platform)?;

		let current = version::parse(&request.current_version)?;

		let latest = match self.storage.get_latest_release(cancel, &app.id, &platform, &architecture).await {
			Ok(release) => release,
			Err(e) if e.is_not_found() => return Ok(CheckForUpdateResponse::no_update(request.current_version)),
			Err(e) => return Err(e),
		};
		let latest_version = version::parse(&latest.version)?;

		if latest_version <= current {
			return Ok(CheckForUpdateResponse::no_update(request.current_version));
		}

		let chosen = if !version::is_stable(&latest_version) && !request.allow_prerelease {
			match self.largest_stable_after(cancel, &app.id, &current, &platform, &architecture).await? {
				Some(release) => release,
				None => return Ok(CheckForUpdateResponse::no_update(request.current_version)),
			}
		} else {
			latest
		};

		if let Some(minimum) = &chosen.minimum_version {
			let minimum_version = version::parse(minimum)?;
			if current < minimum_version {
				return Err(CoreError::new(
					ErrorKind::InvalidRequest,
					format!("current version '{}' is below the minimum required version '{minimum}'", request.current_version),
				));
			}
		}

		Ok(CheckForUpdateResponse::available(request.current_version, &chosen, request.include_metadata))
	}

	/// `GetLatestVersion` (spec §4.3.2).
	pub async fn get_latest_version(
		&self, cancel: &CancellationToken, request: GetLatestVersionRequest,
	) -> Result<LatestVersionResponse, CoreError> {
		let platform = normalize_tag(&request.platform);
		let architecture = normalize_tag(&request.architecture);

		let app = self.storage.get_application(cancel, &request.application_id).await.map_err(|e| {
			if e.is_not_found() {
				CoreError::not_found(format!("application '{}' not found", request.application_id))
			} else {
				e
			}
		})?;
		self.validate_platform(&app, &platform)?;

		let latest = self.storage.get_latest_release(cancel, &app.id, &platform, &architecture).await?;
		let latest_version = version::parse(&latest.version)?;

		let chosen = if !version::is_stable(&latest_version) && !request.allow_prerelease {
			let releases = self.storage.list_releases(cancel, &app.id).await?;
			let mut best: Option<(semver::Version, Release)> = None;
			for release in releases {
				if release.platform != platform || release.architecture != architecture {
					continue;
				}
				let Ok(parsed) = version::parse(&release.version) else { continue };
				if !version::is_stable(&parsed) {
					continue;
				}
				if best.as_ref().map(|(v, _)| parsed > *v).unwrap_or(true) {
					best = Some((parsed, release));
				}
			}
			match best {
				Some((_, release)) => release,
				None => return Err(CoreError::not_found("no stable release available")),
			}
		} else {
			latest
		};

		Ok(LatestVersionResponse::from((chosen, request.include_metadata)))
	}

	/// `ListReleases` (spec §4.3.3).
	pub async fn list_releases(
		&self, cancel: &CancellationToken, application_id: &str, query: ListReleasesQuery,
	) -> Result<Page<Release>, CoreError> {
		// Fail fast so the caller never pages through a nonexistent application.
		self.storage.get_application(cancel, application_id).await?;

		let filter = ReleaseFilter {
			platform: query.platform,
			architecture: query.architecture,
			version: query.version,
			required: query.required,
			platforms: query.platforms,
		};
		let sort_field = query.sort.unwrap_or_default();
		let sort_order = query.order.unwrap_or_default();
		let limit = query.limit.unwrap_or(50).clamp(1, 100);
		let offset = query.offset.unwrap_or(0);

		let mut releases: Vec<Release> =
			self.storage.list_releases(cancel, application_id).await?.into_iter().filter(|r| filter.matches(r)).collect();

		releases.sort_by(|a, b| {
			let ordering = match sort_field {
				SortField::Version => {
					match (version::parse(&a.version), version::parse(&b.version)) {
						(Ok(av), Ok(bv)) => av.cmp(&bv),
						_ => a.version.cmp(&b.version),
					}
				},
				SortField::ReleaseDate => a.release_date.cmp(&b.release_date),
				SortField::Platform => a.platform.cmp(&b.platform),
				SortField::Architecture => a.architecture.cmp(&b.architecture),
				SortField::CreatedAt => a.created_at.cmp(&b.created_at),
			};
			if sort_order == SortOrder::Desc {
				ordering.reverse()
			} else {
				ordering
			}
		});

		let total = releases.len() as u64;
		let page_items: Vec<Release> =
			releases.into_iter().skip(offset as usize).take(limit as usize).collect();
		let has_more = (offset as u64) + (page_items.len() as u64) < total;

		Ok(Page { items: page_items, total, offset, limit, has_more })
	}

	/// `RegisterRelease` (spec §4.3.4).
	pub async fn register_release(
		&self, cancel: &CancellationToken, application_id: &str, request: RegisterReleaseRequest,
	) -> Result<Release, CoreError> {
		let platform = normalize_tag(&request.platform);
		let architecture = normalize_tag(&request.architecture);

		let app = self.storage.get_application(cancel, application_id).await.map_err(|e| {
			if e.is_not_found() {
				CoreError::not_found(format!("application '{application_id}' not found"))
			} else {
				e
			}
		})?;
		self.validate_platform(&app, &platform)?;

		version::parse(&request.version)?;
		if let Some(minimum) = &request.minimum_version {
			version::parse(minimum)?;
		}
		if request.file_size == 0 {
			return Err(CoreError::validation("file_size must be positive"));
		}

		let release = Release {
			id: generate_release_id(),
			application_id: app.id.clone(),
			version: request.version,
			platform,
			architecture,
			download_url: request.download_url,
			checksum: request.checksum,
			checksum_type: request.checksum_type,
			file_size: request.file_size,
			release_notes: request.release_notes,
			release_date: request.release_date.unwrap_or_else(Utc::now),
			required: request.required,
			minimum_version: request.minimum_version,
			metadata: request.metadata,
			created_at: Utc::now(),
		};

		self.storage.save_release(cancel, release.clone()).await?;
		Ok(release)
	}

	/// `DeleteRelease` (spec §4.3.6): loads the release for the response
	/// body before deleting it.
	pub async fn delete_release(
		&self, cancel: &CancellationToken, application_id: &str, version: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		let release = self.storage.get_release(cancel, application_id, version, platform, architecture).await?;
		self.storage.delete_release(cancel, application_id, version, platform, architecture).await?;
		Ok(release)
	}

	/// Lists every application (no computed stats attached).
	pub async fn list_applications(&self, cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		self.storage.list_applications(cancel).await
	}

	/// `Application` create (spec §4.3.5): rejects a duplicate id with `Conflict`.
	pub async fn create_application(
		&self, cancel: &CancellationToken, request: CreateApplicationRequest,
	) -> Result<Application, CoreError> {
		if request.id.is_empty()
			|| request.id.len() > 64
			|| !request.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
		{
			return Err(CoreError::validation("application id must be 1-64 chars of letters, digits, '-' or '_'"));
		}

		if let Ok(_existing) = self.storage.get_application(cancel, &request.id).await {
			return Err(CoreError::conflict(format!("application '{}' already exists", request.id)));
		}

		let now = Utc::now();
		let application = Application {
			id: request.id,
			name: request.name,
			description: request.description,
			supported_platforms: request.supported_platforms,
			config: request.config,
			created_at: now,
			updated_at: now,
		};
		self.storage.save_application(cancel, application.clone()).await?;
		Ok(application)
	}

	/// `Application` partial update (spec §4.3.5): unset fields are preserved.
	pub async fn update_application(
		&self, cancel: &CancellationToken, id: &str, request: UpdateApplicationRequest,
	) -> Result<Application, CoreError> {
		let mut application = self.storage.get_application(cancel, id).await?;
		if let Some(name) = request.name {
			application.name = name;
		}
		if let Some(description) = request.description {
			application.description = description;
		}
		if let Some(supported_platforms) = request.supported_platforms {
			application.supported_platforms = supported_platforms;
		}
		if let Some(config) = request.config {
			application.config = config;
		}
		application.updated_at = Utc::now();
		self.storage.save_application(cancel, application.clone()).await?;
		Ok(application)
	}

	/// `Application` get with computed [`ApplicationStats`] (spec §4.3.5).
	pub async fn get_application(
		&self, cancel: &CancellationToken, id: &str,
	) -> Result<ApplicationWithStats, CoreError> {
		let application = self.storage.get_application(cancel, id).await?;
		let releases = self.storage.list_releases(cancel, id).await?;

		let total_releases = releases.len() as u64;
		let required_release_count = releases.iter().filter(|r| r.required).count() as u64;
		let platform_count = releases.iter().map(|r| r.platform.as_str()).collect::<HashSet<_>>().len() as u64;

		let mut latest: Option<&Release> = None;
		for release in &releases {
			let Ok(parsed) = version::parse(&release.version) else { continue };
			let is_newer = match latest {
				Some(current) => version::parse(&current.version).map(|cv| parsed > cv).unwrap_or(true),
				None => true,
			};
			if is_newer {
				latest = Some(release);
			}
		}

		let stats = ApplicationStats {
			total_releases,
			latest_version: latest.map(|r| r.version.clone()),
			latest_release_date: latest.map(|r| r.release_date),
			platform_count,
			required_release_count,
		};

		Ok(ApplicationWithStats { application, stats })
	}

	/// `Application` delete (spec §4.3.5): pre-checks for dependent releases
	/// so the common case returns `Conflict` without round-tripping to the
	/// backend's own dependency error.
	pub async fn delete_application(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let releases = self.storage.list_releases(cancel, id).await?;
		if !releases.is_empty() {
			return Err(CoreError::conflict(format!("application '{id}' still has {} release(s)", releases.len())));
		}
		self.storage.delete_application(cancel, id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_storage::memory::MemoryStore;

	fn resolver() -> Resolver {
		Resolver::new(Arc::new(MemoryStore::new()))
	}

	async fn seed_app(resolver: &Resolver, cancel: &CancellationToken, id: &str, platforms: &[&str]) {
		resolver
			.create_application(
				cancel,
				CreateApplicationRequest {
					id: id.to_string(),
					name: id.to_string(),
					description: String::new(),
					supported_platforms: platforms.iter().map(|p| p.to_string()).collect(),
					config: ApplicationConfig::default(),
				},
			)
			.await
			.unwrap();
	}

	fn release_request(version: &str, platform: &str) -> RegisterReleaseRequest {
		RegisterReleaseRequest {
			version: version.to_string(),
			platform: platform.to_string(),
			architecture: "amd64".to_string(),
			download_url: "https://example.com/build".to_string(),
			checksum: "deadbeef".to_string(),
			checksum_type: "sha256".to_string(),
			file_size: 1024,
			release_notes: String::new(),
			release_date: None,
			required: false,
			minimum_version: None,
			metadata: HashMap::new(),
		}
	}

	#[tokio::test]
	async fn scenario_one_update_available() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();
		resolver.register_release(&cancel, "demo", release_request("1.1.0", "windows")).await.unwrap();

		let response = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "1.0.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap();

		assert!(response.update_available);
		assert_eq!(response.latest_version.as_deref(), Some("1.1.0"));
	}

	#[tokio::test]
	async fn scenario_two_already_current() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();
		resolver.register_release(&cancel, "demo", release_request("1.1.0", "windows")).await.unwrap();

		let response = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "1.1.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap();

		assert!(!response.update_available);
	}

	#[tokio::test]
	async fn scenario_three_prerelease_gating() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();
		resolver.register_release(&cancel, "demo", release_request("1.1.0-beta.1", "windows")).await.unwrap();

		let stable_only = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "0.9.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap();
		assert_eq!(stable_only.latest_version.as_deref(), Some("1.0.0"));

		let with_prerelease = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "0.9.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: true,
					include_metadata: false,
				},
			)
			.await
			.unwrap();
		assert_eq!(with_prerelease.latest_version.as_deref(), Some("1.1.0-beta.1"));
	}

	#[tokio::test]
	async fn scenario_four_missing_application_is_not_found() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		let err = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "missing".to_string(),
					current_version: "1.0.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn unsupported_platform_is_an_invalid_request() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;

		let err = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "1.0.0".to_string(),
					platform: "macos".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidRequest);
	}

	#[tokio::test]
	async fn minimum_version_rejects_too_old_clients() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		let mut request = release_request("2.0.0", "windows");
		request.minimum_version = Some("1.5.0".to_string());
		resolver.register_release(&cancel, "demo", request).await.unwrap();

		let err = resolver
			.check_for_update(
				&cancel,
				CheckForUpdateRequest {
					application_id: "demo".to_string(),
					current_version: "1.0.0".to_string(),
					platform: "windows".to_string(),
					architecture: "amd64".to_string(),
					allow_prerelease: false,
					include_metadata: false,
				},
			)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidRequest);
	}

	#[tokio::test]
	async fn creating_a_duplicate_application_is_a_conflict() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		let err = resolver
			.create_application(
				&cancel,
				CreateApplicationRequest {
					id: "demo".to_string(),
					name: "demo".to_string(),
					description: String::new(),
					supported_platforms: HashSet::new(),
					config: ApplicationConfig::default(),
				},
			)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Conflict);
	}

	#[tokio::test]
	async fn deleting_an_application_with_releases_is_a_conflict() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();

		let err = resolver.delete_application(&cancel, "demo").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Conflict);
	}

	#[tokio::test]
	async fn list_releases_paginates_and_reports_has_more() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		for v in ["1.0.0", "1.1.0", "1.2.0"] {
			resolver.register_release(&cancel, "demo", release_request(v, "windows")).await.unwrap();
		}

		let mut query = ListReleasesQuery::default();
		query.limit = Some(2);
		let page = resolver.list_releases(&cancel, "demo", query).await.unwrap();
		assert_eq!(page.items.len(), 2);
		assert_eq!(page.total, 3);
		assert!(page.has_more);
	}

	#[tokio::test]
	async fn get_application_computes_stats() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();
		let mut required = release_request("1.1.0", "windows");
		required.required = true;
		resolver.register_release(&cancel, "demo", required).await.unwrap();

		let with_stats = resolver.get_application(&cancel, "demo").await.unwrap();
		assert_eq!(with_stats.stats.total_releases, 2);
		assert_eq!(with_stats.stats.latest_version.as_deref(), Some("1.1.0"));
		assert_eq!(with_stats.stats.required_release_count, 1);
	}

	#[tokio::test]
	async fn delete_release_returns_the_deleted_payload() {
		let resolver = resolver();
		let cancel = CancellationToken::new();
		seed_app(&resolver, &cancel, "demo", &["windows"]).await;
		resolver.register_release(&cancel, "demo", release_request("1.0.0", "windows")).await.unwrap();

		let deleted = resolver.delete_release(&cancel, "demo", "1.0.0", "windows", "amd64").await.unwrap();
		assert_eq!(deleted.version, "1.0.0");

		let err = resolver.delete_release(&cancel, "demo", "1.0.0", "windows", "amd64").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}
}
