//! Append-only migration list for the PostgreSQL backend, in the same
//! singleton-version-row-plus-log-table spirit as this workspace's
//! original PostgreSQL migration list.

pub(crate) const INIT_VERSION_TABLE: &str =
	"CREATE TABLE IF NOT EXISTS beacon_db_version (db_version INTEGER NOT NULL);";
pub(crate) const INIT_UPGRADES_TABLE: &str =
	"CREATE TABLE IF NOT EXISTS beacon_db_upgrades (upgrade_from INTEGER NOT NULL);";
pub(crate) const SEED_VERSION_ROW: &str =
	"INSERT INTO beacon_db_version (db_version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM beacon_db_version);";
pub(crate) const GET_VERSION_STMT: &str = "SELECT db_version FROM beacon_db_version;";
pub(crate) const UPDATE_VERSION_STMT: &str = "UPDATE beacon_db_version SET db_version = $1;";
pub(crate) const LOG_MIGRATION_STMT: &str = "INSERT INTO beacon_db_upgrades (upgrade_from) VALUES ($1);";

// APPEND-ONLY. Index in this slice (1-based) is the migration's version number.
pub(crate) const MIGRATIONS: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS applications (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		description TEXT NOT NULL,
		supported_platforms JSONB NOT NULL,
		config JSONB NOT NULL,
		created_at TIMESTAMPTZ NOT NULL,
		updated_at TIMESTAMPTZ NOT NULL
	);",
	"CREATE TABLE IF NOT EXISTS releases (
		id TEXT PRIMARY KEY,
		application_id TEXT NOT NULL REFERENCES applications(id),
		version TEXT NOT NULL,
		platform TEXT NOT NULL,
		architecture TEXT NOT NULL,
		download_url TEXT NOT NULL,
		checksum TEXT NOT NULL,
		checksum_type TEXT NOT NULL,
		file_size BIGINT NOT NULL,
		release_notes TEXT NOT NULL,
		release_date TIMESTAMPTZ NOT NULL,
		required BOOLEAN NOT NULL,
		minimum_version TEXT,
		metadata JSONB NOT NULL,
		created_at TIMESTAMPTZ NOT NULL,
		UNIQUE (application_id, version, platform, architecture)
	);",
	"CREATE TABLE IF NOT EXISTS api_keys (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		key_hash TEXT NOT NULL UNIQUE,
		prefix TEXT NOT NULL,
		permissions JSONB NOT NULL,
		enabled BOOLEAN NOT NULL,
		created_at TIMESTAMPTZ NOT NULL,
		updated_at TIMESTAMPTZ NOT NULL
	);",
];

/// Applies every migration whose version is greater than the row in
/// `beacon_db_version`, logging each into `beacon_db_upgrades`.
pub(crate) async fn apply(client: &tokio_postgres::Client) -> Result<(), tokio_postgres::Error> {
	client.batch_execute(INIT_VERSION_TABLE).await?;
	client.batch_execute(INIT_UPGRADES_TABLE).await?;
	client.execute(SEED_VERSION_ROW, &[]).await?;

	let row = client.query_one(GET_VERSION_STMT, &[]).await?;
	let mut current_version: i32 = row.get(0);
	for (idx, statement) in MIGRATIONS.iter().enumerate() {
		let version = (idx + 1) as i32;
		if version <= current_version {
			continue;
		}
		client.batch_execute(statement).await?;
		client.execute(UPDATE_VERSION_STMT, &[&version]).await?;
		client.execute(LOG_MIGRATION_STMT, &[&current_version]).await?;
		current_version = version;
	}
	Ok(())
}
