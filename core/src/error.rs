use std::error::Error;
use std::fmt::{Display, Formatter};

/// The taxonomy of errors the resolver, storage and pipeline layers can
/// raise. Every layer above storage maps a [`CoreError`] to a transport
/// status code; the mapping lives at the pipeline edge, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Malformed input, or a platform unsupported by the application.
	InvalidRequest,
	/// Missing, unknown or disabled API key.
	Unauthorized,
	/// The key does not hold the permission required for the operation.
	Forbidden,
	/// The referenced application, release or key does not exist.
	NotFound,
	/// Duplicate application id, or a delete that would orphan releases.
	Conflict,
	/// Parseable input that fails a semantic check (e.g. an unparseable version).
	Validation,
	/// A JSON endpoint was called with a missing or non-JSON `Content-Type`.
	UnsupportedMediaType,
	/// The caller's rate-limit bucket is empty.
	RateLimited,
	/// An unexpected failure in a backend or dependency.
	Internal,
}

/// A tagged error carried through the resolver, storage and pipeline layers.
///
/// Mirrors the single-enum-with-metadata shape used across this workspace:
/// a stable `kind`, a human-readable `message`, and an optional wrapped
/// cause for logging without leaking internals to callers.
#[derive(Debug)]
pub struct CoreError {
	kind: ErrorKind,
	message: String,
	source: Option<Box<dyn Error + Send + Sync>>,
}

impl CoreError {
	/// Builds a new error of the given kind with a message.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into(), source: None }
	}

	/// Attaches a wrapped cause, useful for logging without exposing it to clients.
	pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
		self.source = Some(Box::new(source));
		self
	}

	/// The error kind, used by the pipeline to pick a status code.
	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	/// The human-readable message.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Shorthand for [`ErrorKind::NotFound`].
	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	/// Shorthand for [`ErrorKind::Conflict`].
	pub fn conflict(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Conflict, message)
	}

	/// Shorthand for [`ErrorKind::InvalidRequest`].
	pub fn invalid(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidRequest, message)
	}

	/// Shorthand for [`ErrorKind::Validation`].
	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Validation, message)
	}

	/// Shorthand for [`ErrorKind::UnsupportedMediaType`].
	pub fn unsupported_media_type(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::UnsupportedMediaType, message)
	}

	/// Shorthand for [`ErrorKind::Internal`].
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Internal, message)
	}

	/// True for [`ErrorKind::NotFound`]; callers that treat "no release" as an empty result use this.
	pub fn is_not_found(&self) -> bool {
		self.kind == ErrorKind::NotFound
	}
}

impl Display for CoreError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message)
	}
}

impl Error for CoreError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
	}
}

impl From<std::io::Error> for CoreError {
	fn from(err: std::io::Error) -> Self {
		CoreError::new(ErrorKind::Internal, err.to_string()).with_source(err)
	}
}
