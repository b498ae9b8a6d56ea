//! Configuration surface (spec §6): a TOML file plus environment-variable
//! overrides, following the teacher's `read_env`/`read_config` precedence
//! helpers generalized across server, storage, security, metrics,
//! observability and logging sections.

use log::LevelFilter;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const BIND_HOST_VAR: &str = "BEACON_HOST";
const BIND_PORT_VAR: &str = "BEACON_PORT";
const TLS_CERT_VAR: &str = "BEACON_TLS_CERT";
const TLS_KEY_VAR: &str = "BEACON_TLS_KEY";
const READ_TIMEOUT_VAR: &str = "BEACON_READ_TIMEOUT_SECONDS";
const WRITE_TIMEOUT_VAR: &str = "BEACON_WRITE_TIMEOUT_SECONDS";
const IDLE_TIMEOUT_VAR: &str = "BEACON_IDLE_TIMEOUT_SECONDS";
const SHUTDOWN_DEADLINE_VAR: &str = "BEACON_SHUTDOWN_DEADLINE_SECONDS";

const STORAGE_KIND_VAR: &str = "BEACON_STORAGE_KIND";
const STORAGE_PATH_VAR: &str = "BEACON_STORAGE_PATH";
const STORAGE_DSN_VAR: &str = "BEACON_STORAGE_DSN";
const STORAGE_CACHE_TTL_VAR: &str = "BEACON_STORAGE_CACHE_TTL_SECONDS";

const ENABLE_AUTH_VAR: &str = "BEACON_ENABLE_AUTH";
const BOOTSTRAP_KEY_VAR: &str = "BEACON_BOOTSTRAP_KEY";
const RATE_ANON_CAPACITY_VAR: &str = "BEACON_RATE_ANON_CAPACITY";
const RATE_ANON_REFILL_VAR: &str = "BEACON_RATE_ANON_REFILL_PER_MINUTE";
const RATE_AUTH_CAPACITY_VAR: &str = "BEACON_RATE_AUTH_CAPACITY";
const RATE_AUTH_REFILL_VAR: &str = "BEACON_RATE_AUTH_REFILL_PER_MINUTE";
const RATE_CLEANUP_INTERVAL_VAR: &str = "BEACON_RATE_CLEANUP_INTERVAL_SECONDS";

const METRICS_ENABLED_VAR: &str = "BEACON_METRICS_ENABLED";
const METRICS_PORT_VAR: &str = "BEACON_METRICS_PORT";
const METRICS_PATH_VAR: &str = "BEACON_METRICS_PATH";

const OTLP_ENDPOINT_VAR: &str = "BEACON_OTLP_ENDPOINT";
const OTLP_SAMPLE_RATE_VAR: &str = "BEACON_OTLP_SAMPLE_RATE";

const LOG_LEVEL_VAR: &str = "BEACON_LOG_LEVEL";
const LOG_FORMAT_VAR: &str = "BEACON_LOG_FORMAT";
const LOG_FILE_VAR: &str = "BEACON_LOG_FILE";

/// The structure of the TOML config file. Any setting here can be
/// overridden by the corresponding environment variable.
#[derive(Deserialize, Default)]
struct TomlConfig {
	server: Option<ServerSection>,
	storage: Option<StorageSection>,
	security: Option<SecuritySection>,
	metrics: Option<MetricsSection>,
	observability: Option<ObservabilitySection>,
	logging: Option<LoggingSection>,
}

#[derive(Deserialize, Default)]
struct ServerSection {
	host: Option<String>,
	port: Option<u16>,
	tls_cert: Option<PathBuf>,
	tls_key: Option<PathBuf>,
	read_timeout_seconds: Option<u64>,
	write_timeout_seconds: Option<u64>,
	idle_timeout_seconds: Option<u64>,
	shutdown_deadline_seconds: Option<u64>,
}

#[derive(Deserialize, Default)]
struct StorageSection {
	kind: Option<String>,
	path: Option<PathBuf>,
	dsn: Option<String>,
	cache_ttl_seconds: Option<u64>,
}

#[derive(Deserialize, Default)]
struct SecuritySection {
	enable_auth: Option<bool>,
	bootstrap_key: Option<String>,
	rate_anonymous_capacity: Option<u32>,
	rate_anonymous_refill_per_minute: Option<u32>,
	rate_authenticated_capacity: Option<u32>,
	rate_authenticated_refill_per_minute: Option<u32>,
	rate_cleanup_interval_seconds: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MetricsSection {
	enabled: Option<bool>,
	port: Option<u16>,
	path: Option<String>,
}

#[derive(Deserialize, Default)]
struct ObservabilitySection {
	otlp_endpoint: Option<String>,
	sample_rate: Option<f64>,
}

#[derive(Deserialize, Default)]
struct LoggingSection {
	level: Option<String>,
	format: Option<String>,
	file: Option<PathBuf>,
}

/// The resolved HTTP transport surface.
pub(crate) struct Server {
	pub(crate) bind_address: SocketAddr,
	pub(crate) tls_cert: Option<PathBuf>,
	pub(crate) tls_key: Option<PathBuf>,
	pub(crate) read_timeout: Duration,
	pub(crate) write_timeout: Duration,
	pub(crate) idle_timeout: Duration,
	pub(crate) shutdown_deadline: Duration,
}

/// The chosen storage backend and its connection parameters.
pub(crate) enum StorageKind {
	Memory,
	JsonFile { path: PathBuf, cache_ttl: Duration },
	Sqlite { path: PathBuf },
	Postgres { dsn: String },
}

/// Auth and rate-limit configuration.
pub(crate) struct Security {
	pub(crate) enable_auth: bool,
	pub(crate) bootstrap_key: Option<String>,
	pub(crate) rate_anonymous_capacity: u32,
	pub(crate) rate_anonymous_refill_per_minute: u32,
	pub(crate) rate_authenticated_capacity: u32,
	pub(crate) rate_authenticated_refill_per_minute: u32,
	pub(crate) rate_cleanup_interval: Duration,
}

/// Metrics-endpoint configuration.
pub(crate) struct Metrics {
	pub(crate) enabled: bool,
	pub(crate) port: u16,
	pub(crate) path: String,
}

/// Distributed-tracing exporter configuration.
pub(crate) struct Observability {
	pub(crate) otlp_endpoint: String,
	pub(crate) sample_rate: f64,
}

/// Logging sink configuration.
pub(crate) struct Logging {
	pub(crate) level: LevelFilter,
	pub(crate) format: String,
	pub(crate) file: Option<PathBuf>,
}

/// Encapsulates the fully resolved configuration surface (spec §6).
pub(crate) struct Configuration {
	pub(crate) server: Server,
	pub(crate) storage: StorageKind,
	pub(crate) security: Security,
	pub(crate) metrics: Metrics,
	pub(crate) observability: Observability,
	pub(crate) logging: Logging,
}

#[inline]
fn read_env(env_var: &str) -> Result<Option<String>, String> {
	match std::env::var(env_var) {
		Ok(env) => Ok(Some(env)),
		Err(std::env::VarError::NotPresent) => Ok(None),
		Err(e) => Err(format!("Failed to load the {} environment variable: {}", env_var, e)),
	}
}

#[inline]
fn read_config<T>(env: Option<T>, config: Option<T>, default: T) -> T {
	env.or(config).unwrap_or(default)
}

#[inline]
fn read_required<T>(env: Option<T>, config: Option<T>, item: &str, var_name: &str) -> Result<T, String> {
	env.or(config).ok_or_else(|| {
		format!("{} must be provided in the configuration file or the environment variable {} must be set.", item, var_name)
	})
}

fn parse_env<T: std::str::FromStr>(raw: Option<String>, var_name: &str) -> Result<Option<T>, String>
where
	T::Err: std::fmt::Display,
{
	raw.map(|value| value.parse().map_err(|e| format!("Unable to parse the {} environment variable: {}", var_name, e)))
		.transpose()
}

/// Loads configuration from an optional TOML file, applying environment
/// overrides per field using `env > file > default` precedence.
pub(crate) fn load_configuration(config_file_path: Option<&str>) -> Result<Configuration, String> {
	let TomlConfig { server, storage, security, metrics, observability, logging } = match config_file_path {
		Some(path) => {
			let config_file =
				std::fs::read_to_string(path).map_err(|e| format!("Failed to read configuration file: {}", e))?;
			toml::from_str(&config_file).map_err(|e| format!("Failed to parse configuration file: {}", e))?
		},
		None => TomlConfig::default(),
	};

	let server = load_server(server)?;
	let storage = load_storage(storage)?;
	let security = load_security(security)?;
	let metrics = load_metrics(metrics)?;
	let observability = load_observability(observability)?;
	let logging = load_logging(logging)?;

	Ok(Configuration { server, storage, security, metrics, observability, logging })
}

fn load_server(section: Option<ServerSection>) -> Result<Server, String> {
	let section = section.unwrap_or_default();

	let host_env = read_env(BIND_HOST_VAR)?;
	let host = read_config(host_env, section.host, "0.0.0.0".to_string());

	let port_env: Option<u16> = parse_env(read_env(BIND_PORT_VAR)?, BIND_PORT_VAR)?;
	let port = read_config(port_env, section.port, 8080);

	let bind_address: SocketAddr =
		format!("{host}:{port}").parse().map_err(|e| format!("Invalid server host/port configuration: {}", e))?;

	let tls_cert_env = read_env(TLS_CERT_VAR)?.map(PathBuf::from);
	let tls_cert = tls_cert_env.or(section.tls_cert);

	let tls_key_env = read_env(TLS_KEY_VAR)?.map(PathBuf::from);
	let tls_key = tls_key_env.or(section.tls_key);

	let read_timeout_env: Option<u64> = parse_env(read_env(READ_TIMEOUT_VAR)?, READ_TIMEOUT_VAR)?;
	let read_timeout = Duration::from_secs(read_config(read_timeout_env, section.read_timeout_seconds, 30));

	let write_timeout_env: Option<u64> = parse_env(read_env(WRITE_TIMEOUT_VAR)?, WRITE_TIMEOUT_VAR)?;
	let write_timeout = Duration::from_secs(read_config(write_timeout_env, section.write_timeout_seconds, 30));

	let idle_timeout_env: Option<u64> = parse_env(read_env(IDLE_TIMEOUT_VAR)?, IDLE_TIMEOUT_VAR)?;
	let idle_timeout = Duration::from_secs(read_config(idle_timeout_env, section.idle_timeout_seconds, 120));

	let shutdown_deadline_env: Option<u64> = parse_env(read_env(SHUTDOWN_DEADLINE_VAR)?, SHUTDOWN_DEADLINE_VAR)?;
	let shutdown_deadline = Duration::from_secs(read_config(shutdown_deadline_env, section.shutdown_deadline_seconds, 30));

	Ok(Server { bind_address, tls_cert, tls_key, read_timeout, write_timeout, idle_timeout, shutdown_deadline })
}

fn load_storage(section: Option<StorageSection>) -> Result<StorageKind, String> {
	let section = section.unwrap_or_default();

	let kind_env = read_env(STORAGE_KIND_VAR)?;
	let kind = read_config(kind_env, section.kind, "memory".to_string());

	match kind.as_str() {
		"memory" => Ok(StorageKind::Memory),
		"json" | "json_file" => {
			let path_env = read_env(STORAGE_PATH_VAR)?.map(PathBuf::from);
			let path = read_required(path_env, section.path, "storage path", STORAGE_PATH_VAR)?;
			let ttl_env: Option<u64> = parse_env(read_env(STORAGE_CACHE_TTL_VAR)?, STORAGE_CACHE_TTL_VAR)?;
			let cache_ttl = Duration::from_secs(read_config(ttl_env, section.cache_ttl_seconds, 5));
			Ok(StorageKind::JsonFile { path, cache_ttl })
		},
		"sqlite" => {
			let path_env = read_env(STORAGE_PATH_VAR)?.map(PathBuf::from);
			let path = read_required(path_env, section.path, "storage path", STORAGE_PATH_VAR)?;
			Ok(StorageKind::Sqlite { path })
		},
		"postgres" | "postgresql" => {
			let dsn_env = read_env(STORAGE_DSN_VAR)?;
			let dsn = read_required(dsn_env, section.dsn, "storage DSN", STORAGE_DSN_VAR)?;
			Ok(StorageKind::Postgres { dsn })
		},
		other => Err(format!("unknown storage kind '{other}'; expected memory, json, sqlite or postgres")),
	}
}

fn load_security(section: Option<SecuritySection>) -> Result<Security, String> {
	let section = section.unwrap_or_default();

	let enable_auth_env: Option<bool> = parse_env(read_env(ENABLE_AUTH_VAR)?, ENABLE_AUTH_VAR)?;
	let enable_auth = read_config(enable_auth_env, section.enable_auth, false);

	let bootstrap_key_env = read_env(BOOTSTRAP_KEY_VAR)?;
	let bootstrap_key = bootstrap_key_env.or(section.bootstrap_key);

	let rate_anonymous_capacity_env: Option<u32> = parse_env(read_env(RATE_ANON_CAPACITY_VAR)?, RATE_ANON_CAPACITY_VAR)?;
	let rate_anonymous_capacity = read_config(rate_anonymous_capacity_env, section.rate_anonymous_capacity, 60);

	let rate_anonymous_refill_env: Option<u32> = parse_env(read_env(RATE_ANON_REFILL_VAR)?, RATE_ANON_REFILL_VAR)?;
	let rate_anonymous_refill_per_minute =
		read_config(rate_anonymous_refill_env, section.rate_anonymous_refill_per_minute, 60);

	let rate_authenticated_capacity_env: Option<u32> = parse_env(read_env(RATE_AUTH_CAPACITY_VAR)?, RATE_AUTH_CAPACITY_VAR)?;
	let rate_authenticated_capacity =
		read_config(rate_authenticated_capacity_env, section.rate_authenticated_capacity, rate_anonymous_capacity * 2);

	let rate_authenticated_refill_env: Option<u32> = parse_env(read_env(RATE_AUTH_REFILL_VAR)?, RATE_AUTH_REFILL_VAR)?;
	let rate_authenticated_refill_per_minute = read_config(
		rate_authenticated_refill_env,
		section.rate_authenticated_refill_per_minute,
		rate_anonymous_refill_per_minute * 2,
	);

	let rate_cleanup_interval_env: Option<u64> =
		parse_env(read_env(RATE_CLEANUP_INTERVAL_VAR)?, RATE_CLEANUP_INTERVAL_VAR)?;
	let rate_cleanup_interval =
		Duration::from_secs(read_config(rate_cleanup_interval_env, section.rate_cleanup_interval_seconds, 600));

	Ok(Security {
		enable_auth,
		bootstrap_key,
		rate_anonymous_capacity,
		rate_anonymous_refill_per_minute,
		rate_authenticated_capacity,
		rate_authenticated_refill_per_minute,
		rate_cleanup_interval,
	})
}

fn load_metrics(section: Option<MetricsSection>) -> Result<Metrics, String> {
	let section = section.unwrap_or_default();

	let enabled_env: Option<bool> = parse_env(read_env(METRICS_ENABLED_VAR)?, METRICS_ENABLED_VAR)?;
	let enabled = read_config(enabled_env, section.enabled, false);

	let port_env: Option<u16> = parse_env(read_env(METRICS_PORT_VAR)?, METRICS_PORT_VAR)?;
	let port = read_config(port_env, section.port, 9090);

	let path_env = read_env(METRICS_PATH_VAR)?;
	let path = read_config(path_env, section.path, "/metrics".to_string());

	Ok(Metrics { enabled, port, path })
}

fn load_observability(section: Option<ObservabilitySection>) -> Result<Observability, String> {
	let section = section.unwrap_or_default();

	let otlp_endpoint_env = read_env(OTLP_ENDPOINT_VAR)?;
	let otlp_endpoint = read_config(otlp_endpoint_env, section.otlp_endpoint, "http://localhost:4317".to_string());

	let sample_rate_env: Option<f64> = parse_env(read_env(OTLP_SAMPLE_RATE_VAR)?, OTLP_SAMPLE_RATE_VAR)?;
	let sample_rate = read_config(sample_rate_env, section.sample_rate, 1.0);

	Ok(Observability { otlp_endpoint, sample_rate })
}

fn load_logging(section: Option<LoggingSection>) -> Result<Logging, String> {
	let section = section.unwrap_or_default();

	let level_env: Option<LevelFilter> = parse_env(read_env(LOG_LEVEL_VAR)?, LOG_LEVEL_VAR)?;
	let level_config: Option<LevelFilter> =
		section.level.as_ref().map(|s| s.parse().map_err(|e| format!("Unable to parse the log level config value: {}", e))).transpose()?;
	let level = read_config(level_env, level_config, LevelFilter::Info);

	let format_env = read_env(LOG_FORMAT_VAR)?;
	let format = read_config(format_env, section.format, "text".to_string());

	let file_env = read_env(LOG_FILE_VAR)?.map(PathBuf::from);
	let file = file_env.or(section.file);

	Ok(Logging { level, format, file })
}
