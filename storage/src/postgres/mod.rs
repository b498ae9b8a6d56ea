//! Server-SQL [`Storage`] backend backed by PostgreSQL: a pooled
//! [`tokio_postgres`] client, migrations applied once per database, and
//! application-level checks ahead of the same foreign-key constraints the
//! embedded backend enforces, so both give callers the same error shape.

mod migrations;

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::model::{ApiKey, Application, ApplicationConfig, Permission, Release};
use beacon_core::storage::Storage;
use beacon_core::version;
use chrono::Utc;
use deadpool_postgres::{Client, Manager, ManagerConfig, Pool, RecyclingMethod};
use std::collections::HashSet;
use tokio_postgres::types::Json;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

/// A PostgreSQL implementation of Beacon's storage contract, intended for
/// multi-instance server deployments.
pub struct PostgresStore {
	pool: Pool,
}

impl PostgresStore {
	/// Connects to `dsn`, applying pending migrations before returning.
	pub async fn connect(dsn: &str) -> Result<Self, CoreError> {
		let pg_config: tokio_postgres::Config =
			dsn.parse().map_err(|e| CoreError::internal(format!("invalid postgres dsn: {e}")))?;
		let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
		let manager = Manager::from_config(pg_config, NoTls, manager_config);
		let pool = Pool::builder(manager)
			.max_size(16)
			.build()
			.map_err(|e| CoreError::internal(format!("failed to build postgres pool: {e}")))?;

		let client = pool.get().await.map_err(map_pool_err)?;
		migrations::apply(&client).await.map_err(map_pg_err)?;
		Ok(Self { pool })
	}

	async fn client(&self) -> Result<Client, CoreError> {
		self.pool.get().await.map_err(map_pool_err)
	}
}

fn map_pool_err(err: deadpool_postgres::PoolError) -> CoreError {
	CoreError::internal(format!("postgres pool error: {err}"))
}

fn map_pg_err(err: tokio_postgres::Error) -> CoreError {
	if let Some(db_err) = err.as_db_error() {
		if db_err.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION
			|| db_err.code() == &tokio_postgres::error::SqlState::FOREIGN_KEY_VIOLATION
		{
			return CoreError::conflict(db_err.message().to_string());
		}
	}
	CoreError::internal(err.to_string())
}

fn application_from_row(row: &tokio_postgres::Row) -> Application {
	Application {
		id: row.get("id"),
		name: row.get("name"),
		description: row.get("description"),
		supported_platforms: row.get::<_, Json<HashSet<String>>>("supported_platforms").0,
		config: row.get::<_, Json<ApplicationConfig>>("config").0,
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
	}
}

fn release_from_row(row: &tokio_postgres::Row) -> Release {
	let file_size: i64 = row.get("file_size");
	Release {
		id: row.get("id"),
		application_id: row.get("application_id"),
		version: row.get("version"),
		platform: row.get("platform"),
		architecture: row.get("architecture"),
		download_url: row.get("download_url"),
		checksum: row.get("checksum"),
		checksum_type: row.get("checksum_type"),
		file_size: file_size as u64,
		release_notes: row.get("release_notes"),
		release_date: row.get("release_date"),
		required: row.get("required"),
		minimum_version: row.get("minimum_version"),
		metadata: row.get::<_, Json<_>>("metadata").0,
		created_at: row.get("created_at"),
	}
}

fn api_key_from_row(row: &tokio_postgres::Row) -> ApiKey {
	ApiKey {
		id: row.get("id"),
		name: row.get("name"),
		key_hash: row.get("key_hash"),
		prefix: row.get("prefix"),
		permissions: row.get::<_, Json<HashSet<Permission>>>("permissions").0,
		enabled: row.get("enabled"),
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
	}
}

const APPLICATION_COLUMNS: &str =
	"id, name, description, supported_platforms, config, created_at, updated_at";
const RELEASE_COLUMNS: &str = "id, application_id, version, platform, architecture, download_url, \
	checksum, checksum_type, file_size, release_notes, release_date, required, minimum_version, \
	metadata, created_at";
const API_KEY_COLUMNS: &str = "id, name, key_hash, prefix, permissions, enabled, created_at, updated_at";

#[async_trait]
impl Storage for PostgresStore {
	async fn list_applications(&self, _cancel: &CancellationToken) -> Result<Vec<Application>, CoreError> {
		let client = self.client().await?;
		let rows = client
			.query(&format!("SELECT {APPLICATION_COLUMNS} FROM applications"), &[])
			.await
			.map_err(map_pg_err)?;
		Ok(rows.iter().map(application_from_row).collect())
	}

	async fn get_application(
		&self, _cancel: &CancellationToken, id: &str,
	) -> Result<Application, CoreError> {
		let client = self.client().await?;
		let row = client
			.query_opt(&format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"), &[&id])
			.await
			.map_err(map_pg_err)?;
		row.map(|r| application_from_row(&r))
			.ok_or_else(|| CoreError::not_found(format!("application '{id}' not found")))
	}

	async fn save_application(
		&self, _cancel: &CancellationToken, application: Application,
	) -> Result<(), CoreError> {
		let client = self.client().await?;
		client
			.execute(
				"INSERT INTO applications (id, name, description, supported_platforms, config, created_at, updated_at)
				 VALUES ($1, $2, $3, $4, $5, $6, $7)
				 ON CONFLICT (id) DO UPDATE SET
				   name = excluded.name,
				   description = excluded.description,
				   supported_platforms = excluded.supported_platforms,
				   config = excluded.config,
				   updated_at = excluded.updated_at",
				&[
					&application.id,
					&application.name,
					&application.description,
					&Json(&application.supported_platforms),
					&Json(&application.config),
					&application.created_at,
					&application.updated_at,
				],
			)
			.await
			.map_err(map_pg_err)?;
		Ok(())
	}

	async fn delete_application(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let client = self.client().await?;
		let dependents: i64 = client
			.query_one("SELECT COUNT(*) FROM releases WHERE application_id = $1", &[&id])
			.await
			.map_err(map_pg_err)?
			.get(0);
		if dependents > 0 {
			return Err(CoreError::conflict(format!(
				"application '{id}' still has releases referencing it"
			)));
		}
		let affected =
			client.execute("DELETE FROM applications WHERE id = $1", &[&id]).await.map_err(map_pg_err)?;
		if affected == 0 {
			return Err(CoreError::not_found(format!("application '{id}' not found")));
		}
		Ok(())
	}

	async fn list_releases(
		&self, _cancel: &CancellationToken, application_id: &str,
	) -> Result<Vec<Release>, CoreError> {
		let client = self.client().await?;
		let rows = client
			.query(
				&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = $1 ORDER BY release_date DESC"
				),
				&[&application_id],
			)
			.await
			.map_err(map_pg_err)?;
		Ok(rows.iter().map(release_from_row).collect())
	}

	async fn get_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<Release, CoreError> {
		let client = self.client().await?;
		let row = client
			.query_opt(
				&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = $1 AND version = $2 \
					 AND platform = $3 AND architecture = $4"
				),
				&[&application_id, &version, &platform, &architecture],
			)
			.await
			.map_err(map_pg_err)?;
		row.map(|r| release_from_row(&r)).ok_or_else(|| CoreError::not_found("release not found".to_string()))
	}

	async fn save_release(&self, _cancel: &CancellationToken, release: Release) -> Result<(), CoreError> {
		let client = self.client().await?;
		client
			.execute(
				"INSERT INTO releases (id, application_id, version, platform, architecture, download_url, \
				 checksum, checksum_type, file_size, release_notes, release_date, required, minimum_version, \
				 metadata, created_at)
				 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
				 ON CONFLICT (application_id, version, platform, architecture) DO UPDATE SET
				   download_url = excluded.download_url,
				   checksum = excluded.checksum,
				   checksum_type = excluded.checksum_type,
				   file_size = excluded.file_size,
				   release_notes = excluded.release_notes,
				   release_date = excluded.release_date,
				   required = excluded.required,
				   minimum_version = excluded.minimum_version,
				   metadata = excluded.metadata",
				&[
					&release.id,
					&release.application_id,
					&release.version,
					&release.platform,
					&release.architecture,
					&release.download_url,
					&release.checksum,
					&release.checksum_type,
					&(release.file_size as i64),
					&release.release_notes,
					&release.release_date,
					&release.required,
					&release.minimum_version,
					&Json(&release.metadata),
					&release.created_at,
				],
			)
			.await
			.map_err(map_pg_err)?;
		Ok(())
	}

	async fn delete_release(
		&self, _cancel: &CancellationToken, application_id: &str, version: &str, platform: &str,
		architecture: &str,
	) -> Result<(), CoreError> {
		let client = self.client().await?;
		let affected = client
			.execute(
				"DELETE FROM releases WHERE application_id = $1 AND version = $2 AND platform = $3 \
				 AND architecture = $4",
				&[&application_id, &version, &platform, &architecture],
			)
			.await
			.map_err(map_pg_err)?;
		if affected == 0 {
			return Err(CoreError::not_found("release not found".to_string()));
		}
		Ok(())
	}

	async fn get_latest_release(
		&self, _cancel: &CancellationToken, application_id: &str, platform: &str, architecture: &str,
	) -> Result<Release, CoreError> {
		let client = self.client().await?;
		let rows = client
			.query(
				&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = $1 AND platform = $2 \
					 AND architecture = $3"
				),
				&[&application_id, &platform, &architecture],
			)
			.await
			.map_err(map_pg_err)?;
		rows.iter()
			.map(release_from_row)
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
		let client = self.client().await?;
		let rows = client
			.query(
				&format!(
					"SELECT {RELEASE_COLUMNS} FROM releases WHERE application_id = $1 AND platform = $2 \
					 AND architecture = $3"
				),
				&[&application_id, &platform, &architecture],
			)
			.await
			.map_err(map_pg_err)?;
		let mut matches: Vec<(semver::Version, Release)> = rows
			.iter()
			.map(release_from_row)
			.filter_map(|r| version::parse(&r.version).ok().map(|v| (v, r)))
			.filter(|(v, _)| *v > current_version)
			.collect();
		matches.sort_by(|(a, _), (b, _)| b.cmp(a));
		Ok(matches.into_iter().map(|(_, r)| r).collect())
	}

	async fn ping(&self, _cancel: &CancellationToken) -> Result<(), CoreError> {
		let client = self.client().await?;
		client.query_one("SELECT 1", &[]).await.map_err(map_pg_err)?;
		Ok(())
	}

	async fn create_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		let client = self.client().await?;
		client
			.execute(
				&format!("INSERT INTO api_keys ({API_KEY_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"),
				&[
					&key.id,
					&key.name,
					&key.key_hash,
					&key.prefix,
					&Json(&key.permissions),
					&key.enabled,
					&key.created_at,
					&key.updated_at,
				],
			)
			.await
			.map_err(map_pg_err)?;
		Ok(())
	}

	async fn get_api_key_by_hash(
		&self, _cancel: &CancellationToken, key_hash: &str,
	) -> Result<ApiKey, CoreError> {
		let client = self.client().await?;
		let row = client
			.query_opt(&format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"), &[&key_hash])
			.await
			.map_err(map_pg_err)?;
		row.map(|r| api_key_from_row(&r)).ok_or_else(|| CoreError::not_found("no api key matches hash".to_string()))
	}

	async fn list_api_keys(&self, _cancel: &CancellationToken) -> Result<Vec<ApiKey>, CoreError> {
		let client = self.client().await?;
		let rows =
			client.query(&format!("SELECT {API_KEY_COLUMNS} FROM api_keys"), &[]).await.map_err(map_pg_err)?;
		Ok(rows.iter().map(api_key_from_row).collect())
	}

	async fn update_api_key(&self, _cancel: &CancellationToken, key: ApiKey) -> Result<(), CoreError> {
		let client = self.client().await?;
		let affected = client
			.execute(
				"UPDATE api_keys SET name = $1, permissions = $2, enabled = $3, updated_at = $4
				 WHERE id = $5",
				&[&key.name, &Json(&key.permissions), &key.enabled, &Utc::now(), &key.id],
			)
			.await
			.map_err(map_pg_err)?;
		if affected == 0 {
			return Err(CoreError::not_found(format!("api key '{}' not found", key.id)));
		}
		Ok(())
	}

	async fn delete_api_key(&self, _cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
		let client = self.client().await?;
		let affected = client.execute("DELETE FROM api_keys WHERE id = $1", &[&id]).await.map_err(map_pg_err)?;
		if affected == 0 {
			return Err(CoreError::not_found(format!("api key '{id}' not found")));
		}
		Ok(())
	}

	async fn close(&self) -> Result<(), CoreError> {
		self.pool.close();
		Ok(())
	}
}
