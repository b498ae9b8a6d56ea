//! Domain types shared by the storage contract, the resolver and the
//! transport layer. These derive [`serde::Serialize`]/[`Deserialize`]
//! rather than a wire-codec derive, since JSON over HTTP is this service's
//! transport (see spec §6), not a fixed binary schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A named product with a stable identifier (spec §3, Application).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
	pub id: String,
	pub name: String,
	pub description: String,
	pub supported_platforms: HashSet<String>,
	pub config: ApplicationConfig,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Structured defaults carried by an [`Application`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
	pub auto_update: bool,
	pub update_interval_seconds: u64,
	pub allow_prerelease: bool,
	pub minimum_version: Option<String>,
	#[serde(default)]
	pub custom_fields: HashMap<String, String>,
}

/// Computed statistics attached to an [`Application`] on read (spec §4.3.5).
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationStats {
	pub total_releases: u64,
	pub latest_version: Option<String>,
	pub latest_release_date: Option<DateTime<Utc>>,
	pub platform_count: u64,
	pub required_release_count: u64,
}

/// A single artifact for one application on one platform/architecture at
/// one version (spec §3, Release).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
	pub id: String,
	pub application_id: String,
	pub version: String,
	pub platform: String,
	pub architecture: String,
	pub download_url: String,
	pub checksum: String,
	pub checksum_type: String,
	pub file_size: u64,
	pub release_notes: String,
	pub release_date: DateTime<Utc>,
	pub required: bool,
	pub minimum_version: Option<String>,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
	pub created_at: DateTime<Utc>,
}

/// The natural key that (A1) requires to be unique across releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseKey {
	pub application_id: String,
	pub version: String,
	pub platform: String,
	pub architecture: String,
}

/// Permission levels an API key can hold. Ordered so that
/// `admin ⊇ write ⊇ read` (spec §4.4): comparing two permissions with `>=`
/// answers "does the higher one satisfy the lower one's requirement".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
	Read,
	Write,
	Admin,
}

impl Permission {
	/// True if a key holding `self` satisfies an operation that requires `required`.
	pub fn satisfies(&self, required: Permission) -> bool {
		*self >= required
	}
}

/// An opaque bearer credential (spec §3, APIKey). The raw token is never
/// persisted; only its SHA-256 hash and a display prefix are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
	pub id: String,
	pub name: String,
	pub key_hash: String,
	pub prefix: String,
	pub permissions: HashSet<Permission>,
	pub enabled: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ApiKey {
	/// True if any held permission satisfies `required`.
	pub fn has_permission(&self, required: Permission) -> bool {
		self.permissions.iter().any(|p| p.satisfies(required))
	}
}
