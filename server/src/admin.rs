//! Key CRUD and application CRUD guarded by the `admin` role (spec §4.4,
//! Admin surface). Application CRUD lives on [`crate::resolver::Resolver`]
//! already; this module covers API-key lifecycle, which has no resolver
//! counterpart since keys aren't part of the update-resolution domain.

use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Permission};
use beacon_core::storage::Storage;
use beacon_security::pipeline::{provision_key, ProvisionedKey};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The admin-facing view of an [`ApiKey`]: never carries `key_hash`, only
/// the display `prefix`, mirroring (A4)'s "raw token never persisted" by
/// also never letting the hash leave the process.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyView {
	pub id: String,
	pub name: String,
	pub prefix: String,
	pub permissions: HashSet<Permission>,
	pub enabled: bool,
	pub created_at: chrono::DateTime<Utc>,
	pub updated_at: chrono::DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyView {
	fn from(key: ApiKey) -> Self {
		Self {
			id: key.id,
			name: key.name,
			prefix: key.prefix,
			permissions: key.permissions,
			enabled: key.enabled,
			created_at: key.created_at,
			updated_at: key.updated_at,
		}
	}
}

/// Request body for `POST /api/v1/admin/keys`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
	pub name: String,
	pub permissions: HashSet<Permission>,
}

/// Response for key creation: the raw token is shown exactly once and
/// never persisted or logged.
#[derive(Debug, Clone, Serialize)]
pub struct CreateApiKeyResponse {
	#[serde(flatten)]
	pub key: ApiKeyView,
	pub token: String,
}

/// Partial-update body for `PATCH /api/v1/admin/keys/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKeyRequest {
	pub name: Option<String>,
	pub permissions: Option<HashSet<Permission>>,
	pub enabled: Option<bool>,
}

fn generate_key_id() -> String {
	use rand::Rng;
	const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
	let mut rng = rand::thread_rng();
	let body: String = (0..16).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
	format!("key_{body}")
}

/// Creates a new API key (spec §4.4, Admin surface).
pub async fn create_api_key(
	storage: &dyn Storage, cancel: &CancellationToken, request: CreateApiKeyRequest,
) -> Result<CreateApiKeyResponse, CoreError> {
	if request.permissions.is_empty() {
		return Err(CoreError::validation("an api key must hold at least one permission"));
	}
	let ProvisionedKey { raw_token, record } = provision_key(generate_key_id(), request.name, request.permissions);
	storage.create_api_key(cancel, record.clone()).await?;
	Ok(CreateApiKeyResponse { key: record.into(), token: raw_token })
}

/// Lists every API key.
pub async fn list_api_keys(storage: &dyn Storage, cancel: &CancellationToken) -> Result<Vec<ApiKeyView>, CoreError> {
	Ok(storage.list_api_keys(cancel).await?.into_iter().map(ApiKeyView::from).collect())
}

/// Looks up a single API key by id.
pub async fn get_api_key(storage: &dyn Storage, cancel: &CancellationToken, id: &str) -> Result<ApiKeyView, CoreError> {
	let keys = storage.list_api_keys(cancel).await?;
	keys.into_iter().find(|k| k.id == id).map(ApiKeyView::from).ok_or_else(|| CoreError::not_found(format!("api key '{id}' not found")))
}

/// Applies a partial update to an API key (spec §4.4 admin surface).
pub async fn update_api_key(
	storage: &dyn Storage, cancel: &CancellationToken, id: &str, request: UpdateApiKeyRequest,
) -> Result<ApiKeyView, CoreError> {
	let keys = storage.list_api_keys(cancel).await?;
	let mut key = keys.into_iter().find(|k| k.id == id).ok_or_else(|| CoreError::not_found(format!("api key '{id}' not found")))?;

	if let Some(name) = request.name {
		key.name = name;
	}
	if let Some(permissions) = request.permissions {
		if permissions.is_empty() {
			return Err(CoreError::validation("an api key must hold at least one permission"));
		}
		key.permissions = permissions;
	}
	if let Some(enabled) = request.enabled {
		key.enabled = enabled;
	}
	key.updated_at = Utc::now();

	storage.update_api_key(cancel, key.clone()).await?;
	Ok(key.into())
}

/// Deletes an API key by id.
pub async fn delete_api_key(storage: &dyn Storage, cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
	storage.delete_api_key(cancel, id).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_storage::memory::MemoryStore;

	fn permissions(p: Permission) -> HashSet<Permission> {
		let mut set = HashSet::new();
		set.insert(p);
		set
	}

	#[tokio::test]
	async fn creating_a_key_returns_the_raw_token_once() {
		let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
		let cancel = CancellationToken::new();
		let response =
			create_api_key(&*storage, &cancel, CreateApiKeyRequest { name: "ci".to_string(), permissions: permissions(Permission::Write) })
				.await
				.unwrap();
		assert!(response.token.starts_with("upd_"));
		assert_eq!(response.key.name, "ci");
	}

	#[tokio::test]
	async fn a_key_with_no_permissions_is_rejected() {
		let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
		let cancel = CancellationToken::new();
		let err = create_api_key(&*storage, &cancel, CreateApiKeyRequest { name: "ci".to_string(), permissions: HashSet::new() })
			.await
			.unwrap_err();
		assert_eq!(err.kind(), beacon_core::error::ErrorKind::Validation);
	}

	#[tokio::test]
	async fn disabling_a_key_round_trips() {
		let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
		let cancel = CancellationToken::new();
		let created =
			create_api_key(&*storage, &cancel, CreateApiKeyRequest { name: "ci".to_string(), permissions: permissions(Permission::Admin) })
				.await
				.unwrap();

		let updated = update_api_key(
			&*storage,
			&cancel,
			&created.key.id,
			UpdateApiKeyRequest { enabled: Some(false), ..Default::default() },
		)
		.await
		.unwrap();
		assert!(!updated.enabled);
	}

	#[tokio::test]
	async fn deleting_an_unknown_key_is_not_found() {
		let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
		let cancel = CancellationToken::new();
		let err = delete_api_key(&*storage, &cancel, "missing").await.unwrap_err();
		assert!(err.is_not_found());
	}
}
