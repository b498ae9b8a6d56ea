//! Bearer-token authentication and permission gating (spec §4.4): extract
//! the token, hash it, look the hash up via [`Storage::get_api_key_by_hash`],
//! then compare against the permission an endpoint requires.

use beacon_core::error::{CoreError, ErrorKind};
use beacon_core::model::{ApiKey, Permission};
use beacon_core::storage::Storage;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// An endpoint's access classification (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
	/// No token required; callers with no `Authorization` header are let through.
	Public,
	/// A valid, enabled key holding at least `Permission` is required.
	Required(Permission),
}

/// The result of running a request through [`authenticate`].
#[derive(Debug, Clone)]
pub enum AuthOutcome {
	/// No key was presented; only valid for [`Access::Public`] endpoints.
	Anonymous,
	/// A valid key was presented and satisfied the endpoint's requirement.
	Authenticated(ApiKey),
}

/// Hex-encoded SHA-256 of `raw`; the raw token is never itself persisted.
pub fn hash_token(raw: &str) -> String {
	let digest = Sha256::digest(raw.as_bytes());
	digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Extracts the bearer token from an `Authorization` header value, if present.
pub fn extract_bearer_token(authorization_header: Option<&str>) -> Option<&str> {
	authorization_header.and_then(|value| value.strip_prefix("Bearer ")).map(str::trim).filter(|t| !t.is_empty())
}

/// Runs the authentication and permission-gating pipeline for one request.
///
/// Step 1 (extract) and step 4 (permission compare) happen here directly;
/// steps 2–3 (hash + lookup + enabled check) delegate to `storage`.
pub async fn authenticate(
	storage: &dyn Storage, cancel: &CancellationToken, authorization_header: Option<&str>, access: Access,
) -> Result<AuthOutcome, CoreError> {
	let token = extract_bearer_token(authorization_header);

	let raw = match (token, access) {
		(None, Access::Public) => return Ok(AuthOutcome::Anonymous),
		(None, Access::Required(_)) => {
			return Err(CoreError::new(ErrorKind::Unauthorized, "missing bearer token"))
		},
		(Some(raw), _) => raw,
	};

	let hash = hash_token(raw);
	let key = match storage.get_api_key_by_hash(cancel, &hash).await {
		Ok(key) => key,
		Err(e) if e.is_not_found() => {
			return Err(CoreError::new(ErrorKind::Unauthorized, "unknown api key"))
		},
		Err(e) => return Err(e),
	};

	if !key.enabled {
		return Err(CoreError::new(ErrorKind::Unauthorized, "api key is disabled"));
	}

	if let Access::Required(required) = access {
		if !key.has_permission(required) {
			return Err(CoreError::new(ErrorKind::Forbidden, "api key lacks required permission"));
		}
	}

	Ok(AuthOutcome::Authenticated(key))
}

/// A freshly generated raw token and the [`ApiKey`] record persisted for it.
pub struct ProvisionedKey {
	/// The raw bearer token; shown to the caller exactly once and never persisted.
	pub raw_token: String,
	/// The persisted record (hash only, no raw token).
	pub record: ApiKey,
}

const TOKEN_PREFIX: &str = "upd_";
const TOKEN_BODY_LEN: usize = 32;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn random_token_body() -> String {
	let mut rng = rand::thread_rng();
	(0..TOKEN_BODY_LEN).map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char).collect()
}

/// Generates a new opaque bearer token of the form `upd_<32 random chars>`
/// and the [`ApiKey`] record to persist for it.
pub fn provision_key(id: String, name: String, permissions: std::collections::HashSet<Permission>) -> ProvisionedKey {
	let raw_token = format!("{TOKEN_PREFIX}{}", random_token_body());
	let now = Utc::now();
	let record = ApiKey {
		id,
		name,
		key_hash: hash_token(&raw_token),
		prefix: raw_token.chars().take(8).collect(),
		permissions,
		enabled: true,
		created_at: now,
		updated_at: now,
	};
	ProvisionedKey { raw_token, record }
}

/// Seeds an `admin` key for `bootstrap_token` if no key with its hash exists
/// yet (spec §4.4, step 5). The raw bootstrap value is never persisted,
/// only its hash.
pub async fn seed_bootstrap_key(
	storage: &dyn Storage, cancel: &CancellationToken, bootstrap_token: &str,
) -> Result<(), CoreError> {
	let hash = hash_token(bootstrap_token);
	match storage.get_api_key_by_hash(cancel, &hash).await {
		Ok(_) => Ok(()),
		Err(e) if e.is_not_found() => {
			let now = Utc::now();
			let mut permissions = std::collections::HashSet::new();
			permissions.insert(Permission::Admin);
			let key = ApiKey {
				id: format!("bootstrap-{}", &hash[..12]),
				name: "bootstrap".to_string(),
				key_hash: hash,
				prefix: bootstrap_token.chars().take(8).collect(),
				permissions,
				enabled: true,
				created_at: now,
				updated_at: now,
			};
			storage.create_api_key(cancel, key).await
		},
		Err(e) => Err(e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_storage::memory::MemoryStore;
	use std::collections::HashSet;

	fn store() -> MemoryStore {
		MemoryStore::new()
	}

	#[test]
	fn permission_hierarchy_is_monotonic() {
		assert!(Permission::Admin.satisfies(Permission::Read));
		assert!(Permission::Admin.satisfies(Permission::Write));
		assert!(Permission::Admin.satisfies(Permission::Admin));
		assert!(Permission::Write.satisfies(Permission::Read));
		assert!(!Permission::Read.satisfies(Permission::Write));
		assert!(!Permission::Write.satisfies(Permission::Admin));
	}

	#[test]
	fn bearer_extraction_requires_the_exact_scheme() {
		assert_eq!(extract_bearer_token(Some("Bearer abc")), Some("abc"));
		assert_eq!(extract_bearer_token(Some("Basic abc")), None);
		assert_eq!(extract_bearer_token(Some("Bearer ")), None);
		assert_eq!(extract_bearer_token(None), None);
	}

	#[tokio::test]
	async fn public_endpoints_allow_missing_tokens() {
		let store = store();
		let cancel = CancellationToken::new();
		let outcome = authenticate(&store, &cancel, None, Access::Public).await.unwrap();
		assert!(matches!(outcome, AuthOutcome::Anonymous));
	}

	#[tokio::test]
	async fn required_endpoints_reject_missing_tokens() {
		let store = store();
		let cancel = CancellationToken::new();
		let err = authenticate(&store, &cancel, None, Access::Required(Permission::Read)).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthorized);
	}

	#[tokio::test]
	async fn an_unknown_token_is_unauthorized_not_not_found() {
		let store = store();
		let cancel = CancellationToken::new();
		let header = "Bearer nonexistent-token";
		let err =
			authenticate(&store, &cancel, Some(header), Access::Required(Permission::Read)).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthorized);
	}

	#[tokio::test]
	async fn a_disabled_key_is_unauthorized() {
		let store = store();
		let cancel = CancellationToken::new();
		let mut permissions = HashSet::new();
		permissions.insert(Permission::Admin);
		let mut provisioned = provision_key("k1".into(), "test".into(), permissions);
		provisioned.record.enabled = false;
		store.create_api_key(&cancel, provisioned.record).await.unwrap();

		let header = format!("Bearer {}", provisioned.raw_token);
		let err = authenticate(&store, &cancel, Some(&header), Access::Required(Permission::Read))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Unauthorized);
	}

	#[tokio::test]
	async fn a_read_only_key_is_forbidden_from_write_endpoints() {
		let store = store();
		let cancel = CancellationToken::new();
		let mut permissions = HashSet::new();
		permissions.insert(Permission::Read);
		let provisioned = provision_key("k1".into(), "test".into(), permissions);
		store.create_api_key(&cancel, provisioned.record).await.unwrap();

		let header = format!("Bearer {}", provisioned.raw_token);
		let err = authenticate(&store, &cancel, Some(&header), Access::Required(Permission::Write))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Forbidden);
	}

	#[tokio::test]
	async fn an_admin_key_satisfies_every_requirement() {
		let store = store();
		let cancel = CancellationToken::new();
		let mut permissions = HashSet::new();
		permissions.insert(Permission::Admin);
		let provisioned = provision_key("k1".into(), "test".into(), permissions);
		store.create_api_key(&cancel, provisioned.record).await.unwrap();

		let header = format!("Bearer {}", provisioned.raw_token);
		let outcome = authenticate(&store, &cancel, Some(&header), Access::Required(Permission::Admin))
			.await
			.unwrap();
		assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
	}

	#[tokio::test]
	async fn bootstrap_seeding_is_idempotent() {
		let store = store();
		let cancel = CancellationToken::new();
		seed_bootstrap_key(&store, &cancel, "bootstrap-secret").await.unwrap();
		seed_bootstrap_key(&store, &cancel, "bootstrap-secret").await.unwrap();

		let keys = store.list_api_keys(&cancel).await.unwrap();
		assert_eq!(keys.len(), 1);
		assert!(keys[0].has_permission(Permission::Admin));
	}
}
