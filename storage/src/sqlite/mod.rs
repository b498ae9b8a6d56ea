//! Embedded-SQL [`Storage`] backend backed by SQLite: a single process-local
//! file, write-ahead logging enabled, foreign keys enforced, and the
//! connection pool capped at one open connection so writers serialise at
//! the backend rather than through application-level locking.

mod migrations;

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Application, ApplicationConfig, Permission, Release};
use beacon_core::storage::Storage;
use beacon_core::version;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// An embedded SQLite implementation of Beacon's storage contract.
pub struct SqliteStore {
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
	/// Opens (creating if absent) the SQLite database at `path`, applying
	/// pending migrations and enabling WAL mode and foreign keys.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
		let path = path.as_ref().to_path_buf();
		let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
			conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
		});
		let pool = Pool::builder()
			.max_size(1)
			.build(manager)
			.map_err(|e| CoreError::internal(format!("failed to open sqlite pool: {e}")))?;

		let store = Self { pool };
		store
			.with_conn(|conn| migrations::apply(conn))
			.await
			.map_err(|e| CoreError::internal(format!("failed to apply migrations: {e}")))?;
		Ok(store)
	}

	async fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
	where
		F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
		T: Send + 'static,
	{
		let pool = self.pool.clone();
		tokio::task::spawn_blocking(move || {
			let conn = pool.get().map_err(|e| CoreError::internal(format!("sqlite pool error: {e}")))?;
			f(&conn).map_err(map_sqlite_err)
		})
		.await
		.map_err(|e| CoreError::internal(format!("sqlite task panicked: {e}")))?
	}

	/// Like [`Self::with_conn`], but a `QueryReturnedNoRows` or zero-row
	/// affected-rows result becomes `CoreError::not_found(not_found)` instead
	/// of a generic internal error.
	async fn with_conn_nf<F, T>(&self, not_found: &'static str, f: F) -> Result<T, CoreError>
	where
		F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
		T: Send + 'static,
	{
		let pool = self.pool.clone();
		tokio::task::spawn_blocking(move || {
			let conn = pool.get().map_err(|e| CoreError::internal(format!("sqlite pool error: {e}")))?;
			f(&conn).map_err(|e| match e {
				rusqlite::Error::QueryReturnedNoRows => CoreError::not_found(not_found),
				other => map_sqlite_err(other),
			})
		})
		.await
		.map_err(|e| CoreError::internal(format!("sqlite task panicked: {e}")))?
	}
}

fn map_sqlite_err(err: rusqlite::Error) -> CoreError {
	if let rusqlite::Error::SqliteFailure(ref sqlite_err, _) = err {
		if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation {
			return CoreError::conflict(err.to_string());
		}
	}
	CoreError::internal(err.to_string())
}

fn application_from_row(row: &rusqlite::Row) -> rusqlite::Result<Application> {
	let platforms_json: String = row.get("supported_platforms")?;
	let config_json: String = row.get("config")?;
	Ok(Application {
		id: row.get("id")?,
		name: row.get("name")?,
		description: row.get("description")?,
		supported_platforms: serde_json::from_str(&platforms_json).unwrap_or_default(),
		config: serde_json::from_str(&config_json).unwrap_or_else(|_| ApplicationConfig::default()),
		created_at: row.get("created_at")?,
		updated_at: row.get("updated_at")?,
	})
}

fn release_from_row(row: &rusqlite::Row) -> rusqlite::Result<Release> {
	let metadata_json: String = row.get("metadata")?;
	let required: i64 = row.get("required")?;
	let file_size: i64 = row.get("file_size")?;
	Ok(Release {
		id: row.get("id")?,
		application_id: row.get("application_id")?,
		version: row.get("version")?,
		platform: row.get("platform")?,
		architecture: row.get("architecture")?,
		download_url: row.get("download_url")?,
		checksum: row.get("checksum")?,
		checksum_type: row.get("checksum_type")?,
		file_size: file_size as u64,
		release_notes: row.get("release_notes")?,
		release_date: row.get("release_date")?,
		required: required != 0,
		minimum_version: row.get("minimum_version")?,
		metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
		created_at: row.get("created_at")?,
	})
}

fn api_key_from_row(row: &rusqlite::Row) -> rusqlite::Result<ApiKey> {
	let permissions_json: String = row.get("permissions")?;
	let enabled: i64 = row.get("enabled")?;
	let permissions: HashSet<Permission> = serde_json::from_str(&permissions_json).unwrap_or_default();
	Ok(ApiKey {
		id: row.get("id")?,
		name: row.get("name")?,
		key_hash: row.get("key_hash")?,
		prefix: row.get("prefix")?,
		permissions,
		enabled: enabled != 0,
		created_at: row.get("created_at")?,
		updated_at: row.get("updated_at")?,
	})
}

const APPLICATION_COLUMNS: &str =
	"id, name, description, supported_platforms, config, created_at, updated_at";
const RELEASE_COLUMNS: &str = "id, application_id, version, platform, architecture, download_url, \
	checksum, checksum_type, file_size, release_notes, release_date, required, minimum_version, \
	metadata, created_at";
const API_KEY_COLUMNS: &str = "id, name, key_hash, prefix, permissions, enabled, created_at, updated_at";

#[async_trait]
impl Storage for SqliteStore {
	async fn list_applications(&self, _cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		self.with_conn(move |conn| {
			let mut stmt = conn.prepare(&format!("SELECT {APPLICATION_COLUMNS} FROM applications"))?;
			let rows = stmt.query_map([], application_from_row)?;
			rows.collect()
		})
		.await
	}

	async fn get_application(
		&self, _cancel: &CancellationToken, id: &str,
	) -> Result<Application, CoreError> {
		let id = id.to_string();
		self.with_conn_nf("application not found", move |conn| {
			conn.query_row(
				&format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
				params![id],
				application_from_row,
			)
		})
		.await
	}

	async fn save_application(
		&self, _cancel: &CancellationToken, application: Application,
	) -> Result<(), CoreError> {
		self.with_conn(move |conn| {
			let platforms_json = serde_json::to_string(&application.supported_platforms).unwrap();
			let config_json = serde_json::to_string(&application.config).unwrap();
			conn.execute(
				"INSERT INTO applications (id, name, description, supported_platforms, config, created_at, updated_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
				 ON CONFLICT(id) DO UPDATE SET
				   name = excluded.name,
				   description = excluded.description,
				   supported_platforms = excluded.supported_platforms,
				   config = excluded.config,
				   updated_at = excluded.updated_at",
				params![
					application.id,
					application.name,
					application.description,
					platforms_json,
					config_json,
					application.created_at,
					application.updated_at,
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn delete_application(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let id = id.to_string();
		self.with_conn_nf("application not found", move |conn| {
			let dependents: i64 = conn.query_row(
				"SELECT COUNT(*) FROM releases WHERE application_id = ?1",
				params![id],
				|row| row.get(0),
			)?;
			if dependents > 0 {
				return Err(rusqlite::Error::SqliteFailure(
					rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
					Some("application still has releases referencing it".to_string()),
				));
			}
			let affected = conn.execute("DELETE FROM applications WHERE id = ?1", params![id])?;
			if affected == 0 {
				return Err(rusqlite::Error::QueryReturnedNoRows);
			}
			Ok(())
		})
		.await
	}

	async fn list_releases(
		&self, _cancel: &CancellationToken, application_id: &str,
	) -> Result<Vec<Release>, CoreError> {
		let application_id = application_id.to_string();
		self.with_conn(move |conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = ?1 ORDER BY release_date DESC"
			))?;
			let rows = stmt.query_map(params![application_id], release_from_row)?;
			rows.collect()
		})
		.await
	}

	async fn get_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<Release, CoreError> {
		let (application_id, version, platform, architecture) =
			(application_id.to_string(), version.to_string(), platform.to_string(), architecture.to_string());
		self.with_conn_nf("release not found", move |conn| {
			conn.query_row(
				&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = ?1 AND version = ?2 \
					 AND platform = ?3 AND architecture = ?4"
				),
				params![application_id, version, platform, architecture],
				release_from_row,
			)
		})
		.await
	}

	async fn save_release(&self, _cancel: &CancellationToken, release: Release) -> Result<(), CoreError> {
		self.with_conn(move |conn| {
			let metadata_json = serde_json::to_string(&release.metadata).unwrap();
			conn.execute(
				"INSERT INTO releases (id, application_id, version, platform, architecture, download_url, \
				 checksum, checksum_type, file_size, release_notes, release_date, required, minimum_version, \
				 metadata, created_at)
				 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
				 ON CONFLICT(application_id, version, platform, architecture) DO UPDATE SET
				   download_url = excluded.download_url,
				   checksum = excluded.checksum,
				   checksum_type = excluded.checksum_type,
				   file_size = excluded.file_size,
				   release_notes = excluded.release_notes,
				   release_date = excluded.release_date,
				   required = excluded.required,
				   minimum_version = excluded.minimum_version,
				   metadata = excluded.metadata",
				params![
					release.id,
					release.application_id,
					release.version,
					release.platform,
					release.architecture,
					release.download_url,
					release.checksum,
					release.checksum_type,
					release.file_size as i64,
					release.release_notes,
					release.release_date,
					release.required as i64,
					release.minimum_version,
					metadata_json,
					release.created_at,
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn delete_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<(), CoreError> {
		let (application_id, version, platform, architecture) =
			(application_id.to_string(), version.to_string(), platform.to_string(), architecture.to_string());
		self.with_conn_nf("release not found", move |conn| {
			let affected = conn.execute(
				"DELETE FROM releases WHERE application_id = ?1 AND version = ?2 AND platform = ?3 \
				 AND architecture = ?4",
				params![application_id, version, platform, architecture],
			)?;
			if affected == 0 {
				return Err(rusqlite::Error::QueryReturnedNoRows);
			}
			Ok(())
		})
		.await
	}

	async fn get_latest_release(
		&self, _cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		let (application_id, platform, architecture) =
			(application_id.to_string(), platform.to_string(), architecture.to_string());
		let candidates: Vec<Release> = self
			.with_conn(move |conn| {
				let mut stmt = conn.prepare(&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = ?1 AND platform = ?2 \
					 AND architecture = ?3"
				))?;
				let rows = stmt.query_map(params![application_id, platform, architecture], release_from_row)?;
				rows.collect()
			})
			.await?;
		candidates
			.into_iter()
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r)))
			.max_by(|(a, _), (b, _)| a.cmp(b))
			.map(|(_, r)| r)
			.ok_or_else(|| CoreError::not_found("no release matches platform/architecture".to_string()))
	}

	async fn get_releases_after_version(
		&self, _cancel: &CancellationToken, application_id: &str, current: &str, platform: &str,
		architecture: &str,
	) -> Result<Vec<Release>, CoreError> {
		let current_version = version::parse(current)?;
		let (application_id, platform, architecture) =
			(application_id.to_string(), platform.to_string(), architecture.to_string());
		let candidates: Vec<Release> = self
			.with_conn(move |conn| {
				let mut stmt = conn.prepare(&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = ?1 AND platform = ?2 \
					 AND architecture = ?3"
				))?;
				let rows = stmt.query_map(params![application_id, platform, architecture], release_from_row)?;
				rows.collect()
			})
			.await?;
		let mut matches: Vec<(semver::Version, Release)> = candidates
			.into_iter()
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r)))
			.filter(|(v, _)| *v > current_version)
			.collect();
		matches.sort_by(|(a, _), (b, _)| b.cmp(a));
		Ok(matches.into_iter().map(|(_, r)| r).collect())
	}

	async fn ping(&self, _cancel: &CancellationToken) -> Result<(), CoreError> {
		self.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map(|_: ()| ())).await
	}

	async fn create_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		self.with_conn(move |conn| {
			let permissions_json = serde_json::to_string(&key.permissions).unwrap();
			conn.execute(
				&format!(
					"INSERT INTO api_keys ({API_KEY_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)"
				),
				params![
					key.id,
					key.name,
					key.key_hash,
					key.prefix,
					permissions_json,
					key.enabled as i64,
					key.created_at,
					key.updated_at,
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn get_api_key_by_hash(
		&self, _cancel: &CancellationToken, key_hash: &str,
	) -> Result<ApiKey, CoreError> {
		let key_hash = key_hash.to_string();
		self.with_conn_nf("api key not found", move |conn| {
			conn.query_row(
				&format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
				params![key_hash],
				api_key_from_row,
			)
		})
		.await
	}

	async fn list_api_keys(&self, _cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError> {
		self.with_conn(move |conn| {
			let mut stmt = conn.prepare(&format!("SELECT {API_KEY_COLUMNS} FROM api_keys"))?;
			let rows = stmt.query_map([], api_key_from_row)?;
			rows.collect()
		})
		.await
	}

	async fn update_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		self.with_conn_nf("api key not found", move |conn| {
			let permissions_json = serde_json::to_string(&key.permissions).unwrap();
			let affected = conn.execute(
				"UPDATE api_keys SET name = ?1, permissions = ?2, enabled = ?3, updated_at = ?4
				 WHERE id = ?5",
				params![key.name, permissions_json, key.enabled as i64, Utc::now(), key.id],
			)?;
			if affected == 0 {
				return Err(rusqlite::Error::QueryReturnedNoRows);
			}
			Ok(())
		})
		.await
	}

	async fn delete_api_key(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let id = id.to_string();
		self.with_conn_nf("api key not found", move |conn| {
			let affected = conn.execute("DELETE FROM api_keys WHERE id = ?1", params![id])?;
			if affected == 0 {
				return Err(rusqlite::Error::QueryReturnedNoRows);
			}
			Ok(())
		})
		.await
	}

	async fn close(&self) -> Result<(), CoreError> {
		Ok(())
	}
}

beacon_core::define_storage_tests!(SqliteStoreConformance, SqliteStore, {
	let dir = tempfile::tempdir().unwrap();
	SqliteStore::open(dir.path().join("store.sqlite3")).await.unwrap()
});

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_core::model::{ApplicationConfig, Permission};
	use chrono::Utc;
	use std::collections::HashMap;

	#[tokio::test]
	async fn reopening_an_existing_database_does_not_reapply_migrations() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.sqlite3");
		let cancel = CancellationToken::new();

		let first = SqliteStore::open(&path).await.unwrap();
		let now = Utc::now();
		first
			.save_application(
				&cancel,
				Application {
					id: "demo".into(),
					name: "Demo".into(),
					description: String::new(),
					supported_platforms: HashSet::from(["windows".to_string()]),
					config: ApplicationConfig::default(),
					created_at: now,
					updated_at: now,
				},
			)
			.await
			.unwrap();
		drop(first);

		let second = SqliteStore::open(&path).await.unwrap();
		let fetched = second.get_application(&cancel, "demo").await.unwrap();
		assert_eq!(fetched.name, "Demo");
	}

	#[tokio::test]
	async fn permissions_and_booleans_round_trip_through_json_columns() {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteStore::open(dir.path().join("store.sqlite3")).await.unwrap();
		let cancel = CancellationToken::new();
		let now = Utc::now();

		let mut permissions = HashSet::new();
		permissions.insert(Permission::Read);
		permissions.insert(Permission::Admin);
		store
			.create_api_key(
				&cancel,
				ApiKey {
					id: "key-1".into(),
					name: "ci".into(),
					key_hash: "hash-1".into(),
					prefix: "hash".into(),
					permissions,
					enabled: true,
					created_at: now,
					updated_at: now,
				},
			)
			.await
			.unwrap();

		let fetched = store.get_api_key_by_hash(&cancel, "hash-1").await.unwrap();
		assert!(fetched.has_permission(Permission::Admin));
		assert!(fetched.enabled);
	}

	#[tokio::test]
	async fn deleting_an_application_with_releases_is_a_conflict() {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteStore::open(dir.path().join("store.sqlite3")).await.unwrap();
		let cancel = CancellationToken::new();
		let now = Utc::now();

		store
			.save_application(
				&cancel,
				Application {
					id: "demo".into(),
					name: "Demo".into(),
					description: String::new(),
					supported_platforms: HashSet::from(["windows".to_string()]),
					config: ApplicationConfig::default(),
					created_at: now,
					updated_at: now,
				},
			)
			.await
			.unwrap();
		store
			.save_release(
				&cancel,
				Release {
					id: "r1".into(),
					application_id: "demo".into(),
					version: "1.0.0".into(),
					platform: "windows".into(),
					architecture: "amd64".into(),
					download_url: "https://example.invalid".into(),
					checksum: "abc".into(),
					checksum_type: "sha256".into(),
					file_size: 1,
					release_notes: String::new(),
					release_date: now,
					required: false,
					minimum_version: None,
					metadata: HashMap::new(),
					created_at: now,
				},
			)
			.await
			.unwrap();

		let err = store.delete_application(&cancel, "demo").await.unwrap_err();
		assert_eq!(err.kind(), beacon_core::error::ErrorKind::Conflict);
	}
}
