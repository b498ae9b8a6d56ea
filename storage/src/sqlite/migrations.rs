//! Append-only migration list for the embedded SQLite backend, in the same
//! spirit as this workspace's original PostgreSQL migration list: each
//! statement is applied in order, exactly once per database, gated by a
//! `schema_migrations` table.

pub(crate) const SCHEMA_MIGRATIONS_TABLE: &str =
	"CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER NOT NULL);";
pub(crate) const GET_VERSION_STMT: &str = "SELECT COALESCE(MAX(version), 0) FROM schema_migrations;";
pub(crate) const LOG_MIGRATION_STMT: &str = "INSERT INTO schema_migrations (version) VALUES (?1);";

// APPEND-ONLY. Index in this slice doubles as the migration's version number.
pub(crate) const MIGRATIONS: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS applications (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		description TEXT NOT NULL,
		supported_platforms TEXT NOT NULL,
		config TEXT NOT NULL,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
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
		file_size INTEGER NOT NULL,
		release_notes TEXT NOT NULL,
		release_date TEXT NOT NULL,
		required INTEGER NOT NULL,
		minimum_version TEXT,
		metadata TEXT NOT NULL,
		created_at TEXT NOT NULL,
		UNIQUE (application_id, version, platform, architecture)
	);",
	"CREATE TABLE IF NOT EXISTS api_keys (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		key_hash TEXT NOT NULL UNIQUE,
		prefix TEXT NOT NULL,
		permissions TEXT NOT NULL,
		enabled INTEGER NOT NULL,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	);",
];

/// Applies every migration whose index is `>= current_version`, logging each into
/// `schema_migrations` so a later open resumes from where this one left off.
pub(crate) fn apply(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
	conn.execute_batch(SCHEMA_MIGRATIONS_TABLE)?;
	let current_version: i64 = conn.query_row(GET_VERSION_STMT, [], |row| row.get(0))?;
	for (idx, statement) in MIGRATIONS.iter().enumerate() {
		let version = (idx + 1) as i64;
		if version <= current_version {
			continue;
		}
		conn.execute_batch(statement)?;
		conn.execute(LOG_MIGRATION_STMT, [version])?;
	}
	Ok(())
}
