//! Initializes the `log` facade with `env_logger`, driven by the resolved
//! [`super::config::Logging`] section rather than the `RUST_LOG` convention
//! alone, so the TOML/env configuration surface stays the single source of
//! truth for log level and destination.

use super::config::Logging;
use std::fs::OpenOptions;
use std::io::Write;

/// Builds and installs the process-wide logger. Must be called once, before
/// any other module logs.
pub(crate) fn init(logging: &Logging) -> Result<(), String> {
	let mut builder = env_logger::Builder::new();
	builder.filter_level(logging.level);

	if logging.format == "json" {
		builder.format(|buf, record| {
			writeln!(
				buf,
				r#"{{"level":"{}","target":"{}","message":{:?}}}"#,
				record.level(),
				record.target(),
				record.args().to_string()
			)
		});
	}

	if let Some(path) = &logging.file {
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
		builder.target(env_logger::Target::Pipe(Box::new(file)));
	}

	builder.try_init().map_err(|e| format!("Failed to initialize logger: {}", e))
}
