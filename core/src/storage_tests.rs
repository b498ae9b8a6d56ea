//! A conformance suite every [`crate::storage::Storage`] backend can opt
//! into via [`define_storage_tests`], mirroring the shape of the upstream
//! `define_kv_store_tests!` macro this workspace descends from: one shared
//! set of property and round-trip tests (spec §8), instantiated per
//! backend so each implementation is held to the same invariants.

use crate::error::CoreError;
use crate::model::{Application, ApplicationConfig, Release};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

/// Generates a `#[tokio::test]` per conformance case for a concrete
/// [`Storage`] implementation.
#[macro_export]
macro_rules! define_storage_tests {
	($test_suite_name:ident, $store_type:path, $create_store_expr:expr) => {
		struct $test_suite_name;

		#[async_trait::async_trait]
		impl $crate::storage_tests::StorageTestSuite for $test_suite_name {
			type Store = $store_type;

			async fn create_store() -> Self::Store {
				$create_store_expr
			}
		}

		macro_rules! create_test {
			($test_fn:ident) => {
				#[tokio::test]
				async fn $test_fn() -> Result<(), $crate::error::CoreError> {
					$test_suite_name::$test_fn().await?;
					Ok(())
				}
			};
		}

		create_test!(save_then_get_application_round_trips);
		create_test!(save_application_is_an_upsert);
		create_test!(get_missing_application_is_not_found);
		create_test!(delete_application_fails_with_dependent_releases);
		create_test!(delete_application_succeeds_once_releases_are_gone);
		create_test!(save_release_upserts_by_natural_key);
		create_test!(get_latest_release_is_maximal_by_precedence);
		create_test!(get_latest_release_excludes_other_platforms);
		create_test!(releases_after_version_are_strictly_greater_and_sorted);
		create_test!(delete_release_then_get_is_not_found);
		create_test!(api_key_round_trips_by_hash);
	};
}

fn test_application(id: &str, platforms: &[&str]) -> Application {
	let now = Utc::now();
	Application {
		id: id.to_string(),
		name: format!("App {id}"),
		description: "a test application".to_string(),
		supported_platforms: platforms.iter().map(|p| p.to_string()).collect(),
		config: ApplicationConfig::default(),
		created_at: now,
		updated_at: now,
	}
}

fn test_release(app_id: &str, version: &str, platform: &str, architecture: &str) -> Release {
	Release {
		id: format!("{app_id}-{version}-{platform}-{architecture}"),
		application_id: app_id.to_string(),
		version: version.to_string(),
		platform: platform.to_string(),
		architecture: architecture.to_string(),
		download_url: "https://example.invalid/artifact".to_string(),
		checksum: "deadbeef".to_string(),
		checksum_type: "sha256".to_string(),
		file_size: 1024,
		release_notes: String::new(),
		release_date: Utc::now(),
		required: false,
		minimum_version: None,
		metadata: HashMap::new(),
		created_at: Utc::now(),
	}
}

fn test_api_key(id: &str, hash: &str) -> crate::model::ApiKey {
	let now = Utc::now();
	let mut permissions = HashSet::new();
	permissions.insert(crate::model::Permission::Read);
	crate::model::ApiKey {
		id: id.to_string(),
		name: "test key".to_string(),
		key_hash: hash.to_string(),
		prefix: hash[..4.min(hash.len())].to_string(),
		permissions,
		enabled: true,
		created_at: now,
		updated_at: now,
	}
}

/// The conformance suite itself; implement via [`define_storage_tests`].
#[async_trait]
pub trait StorageTestSuite {
	/// The concrete backend under test.
	type Store: Storage + 'static;

	/// Builds a fresh, empty instance of the backend.
	async fn create_store() -> Self::Store;

	async fn save_then_get_application_round_trips() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		let app = test_application("demo", &["windows"]);
		store.save_application(&cancel, app.clone()).await?;

		let fetched = store.get_application(&cancel, "demo").await?;
		assert_eq!(fetched.id, app.id);
		assert_eq!(fetched.supported_platforms, app.supported_platforms);
		Ok(())
	}

	async fn save_application_is_an_upsert() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		let mut app = test_application("demo", &["windows"]);
		store.save_application(&cancel, app.clone()).await?;

		app.name = "Renamed".to_string();
		store.save_application(&cancel, app.clone()).await?;

		let fetched = store.get_application(&cancel, "demo").await?;
		assert_eq!(fetched.name, "Renamed");

		let all = store.list_applications(&cancel).await?;
		assert_eq!(all.iter().filter(|a| a.id == "demo").count(), 1);
		Ok(())
	}

	async fn get_missing_application_is_not_found() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		let err = store.get_application(&cancel, "missing").await.unwrap_err();
		assert!(err.is_not_found());
		Ok(())
	}

	async fn delete_application_fails_with_dependent_releases() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;
		store
			.save_release(&cancel, test_release("demo", "1.0.0", "windows", "amd64"))
			.await?;

		let err = store.delete_application(&cancel, "demo").await.unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
		Ok(())
	}

	async fn delete_application_succeeds_once_releases_are_gone() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;
		store
			.save_release(&cancel, test_release("demo", "1.0.0", "windows", "amd64"))
			.await?;
		store.delete_release(&cancel, "demo", "1.0.0", "windows", "amd64").await?;

		store.delete_application(&cancel, "demo").await?;
		let err = store.get_application(&cancel, "demo").await.unwrap_err();
		assert!(err.is_not_found());
		Ok(())
	}

	async fn save_release_upserts_by_natural_key() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;

		let mut release = test_release("demo", "1.0.0", "windows", "amd64");
		store.save_release(&cancel, release.clone()).await?;

		release.checksum = "updated-checksum".to_string();
		store.save_release(&cancel, release.clone()).await?;

		let fetched = store.get_release(&cancel, "demo", "1.0.0", "windows", "amd64").await?;
		assert_eq!(fetched.checksum, "updated-checksum");

		let all = store.list_releases(&cancel, "demo").await?;
		assert_eq!(all.len(), 1);
		Ok(())
	}

	async fn get_latest_release_is_maximal_by_precedence() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;
		for version in ["1.0.0", "1.1.0", "0.9.0"] {
			store.save_release(&cancel, test_release("demo", version, "windows", "amd64")).await?;
		}

		let latest = store.get_latest_release(&cancel, "demo", "windows", "amd64").await?;
		assert_eq!(latest.version, "1.1.0");
		Ok(())
	}

	async fn get_latest_release_excludes_other_platforms() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows", "macos"])).await?;
		store.save_release(&cancel, test_release("demo", "2.0.0", "macos", "arm64")).await?;
		store.save_release(&cancel, test_release("demo", "1.0.0", "windows", "amd64")).await?;

		let latest = store.get_latest_release(&cancel, "demo", "windows", "amd64").await?;
		assert_eq!(latest.version, "1.0.0");
		Ok(())
	}

	async fn releases_after_version_are_strictly_greater_and_sorted() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;
		for version in ["1.0.0", "1.1.0", "1.2.0", "0.5.0"] {
			store.save_release(&cancel, test_release("demo", version, "windows", "amd64")).await?;
		}

		let after =
			store.get_releases_after_version(&cancel, "demo", "1.0.0", "windows", "amd64").await?;
		let versions: Vec<&str> = after.iter().map(|r| r.version.as_str()).collect();
		assert_eq!(versions, vec!["1.2.0", "1.1.0"]);
		Ok(())
	}

	async fn delete_release_then_get_is_not_found() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		store.save_application(&cancel, test_application("demo", &["windows"])).await?;
		store.save_release(&cancel, test_release("demo", "1.0.0", "windows", "amd64")).await?;

		store.delete_release(&cancel, "demo", "1.0.0", "windows", "amd64").await?;
		let err = store.get_release(&cancel, "demo", "1.0.0", "windows", "amd64").await.unwrap_err();
		assert!(err.is_not_found());
		Ok(())
	}

	async fn api_key_round_trips_by_hash() -> Result<(), CoreError> {
		let store = Self::create_store().await;
		let cancel = CancellationToken::new();
		let key = test_api_key("key-1", "abc123hash");
		store.create_api_key(&cancel, key.clone()).await?;

		let fetched = store.get_api_key_by_hash(&cancel, "abc123hash").await?;
		assert_eq!(fetched.id, "key-1");

		store.delete_api_key(&cancel, "key-1").await?;
		let err = store.get_api_key_by_hash(&cancel, "abc123hash").await.unwrap_err();
		assert!(err.is_not_found());
		Ok(())
	}
}
