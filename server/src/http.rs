//! The manual HTTP router (spec §6): generalizes the teacher's
//! `VssService::call` match-on-path-suffix shape to the full JSON surface —
//! auth → permission → rate-limit → resolver/admin dispatch, with panics
//! recovered and mapped to `Internal` per spec §7.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use beacon_core::error::{CoreError, ErrorKind};
use beacon_core::model::Permission;
use beacon_core::storage::Storage;
use beacon_security::pipeline::{self, Access, AuthOutcome};
use beacon_security::rate_limit::{Identity, RateLimiter};

use crate::admin;
use crate::resolver::{
	CheckForUpdateRequest, CreateApplicationRequest, GetLatestVersionRequest, ListReleasesQuery, RegisterReleaseRequest,
	Resolver, UpdateApplicationRequest,
};

/// Request bodies and query strings larger than this are rejected with 413;
/// Beacon exchanges release metadata, never artifact bytes, so this is sized
/// for JSON payloads, not blobs.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Everything a request handler needs, shared across every connection.
pub struct AppState {
	/// Application/release business logic, backed by `storage`.
	pub resolver: Resolver,
	/// The shared storage backend, used directly by handlers that bypass the resolver (health, admin keys).
	pub storage: Arc<dyn Storage>,
	/// Token-bucket rate limiter shared across every connection.
	pub rate_limiter: Arc<RateLimiter>,
	/// Whether bearer-token authentication is enforced for non-public routes.
	pub enable_auth: bool,
	/// Cancelled once the process begins graceful shutdown; every request derives a child token from this.
	pub shutdown: CancellationToken,
}

/// A [`hyper::service::Service`] bound to one accepted connection's remote
/// address, needed to key the anonymous rate-limit pool (spec §4.5).
#[derive(Clone)]
pub struct BeaconService {
	state: Arc<AppState>,
	remote_addr: IpAddr,
}

impl BeaconService {
	/// Builds a service for a single accepted connection.
	pub fn new(state: Arc<AppState>, remote_addr: IpAddr) -> Self {
		Self { state, remote_addr }
	}
}

impl Service<Request<Incoming>> for BeaconService {
	type Response = Response<Full<Bytes>>;
	type Error = hyper::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let state = Arc::clone(&self.state);
		let remote_addr = self.remote_addr;

		Box::pin(async move {
			let request_id = format!("{:016x}", rand::random::<u64>());
			let outcome = AssertUnwindSafe(route(state, remote_addr, req, request_id.clone())).catch_unwind().await;
			match outcome {
				Ok(response) => Ok(response),
				Err(_) => {
					log::error!(target: "beacon_server", "handler panicked, request_id={request_id}");
					Ok(error_response(
						StatusCode::INTERNAL_SERVER_ERROR,
						"INTERNAL_ERROR",
						"an unexpected error occurred",
						Some(&request_id),
					))
				},
			}
		})
	}
}

fn path_segments(path: &str) -> Vec<&str> {
	path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
	match query {
		Some(q) => form_urlencoded::parse(q.as_bytes()).into_owned().collect(),
		None => HashMap::new(),
	}
}

fn query_bool(query: &HashMap<String, String>, key: &str) -> bool {
	query.get(key).map(|v| v == "true" || v == "1").unwrap_or(false)
}

async fn route(state: Arc<AppState>, remote_addr: IpAddr, req: Request<Incoming>, request_id: String) -> Response<Full<Bytes>> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let query = parse_query(req.uri().query());
	let segments = path_segments(&path);

	let headers: HashMap<String, String> =
		req.headers().iter().map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string())).collect();
	let content_type = headers.get("content-type").cloned();
	let authorization = headers.get("authorization").cloned();

	// Links this request's span to an inbound W3C traceparent, if any, so a
	// client's own trace continues across the hop into Beacon (spec §6).
	let trace_context = crate::tracing::extract_context(&headers);
	let request_span = tracing::info_span!("http_request", method = %method, path = %path, request_id = %request_id);
	request_span.set_parent(trace_context);

	async move {
		if segments.as_slice() == ["health"] && method == Method::GET {
			return handle_health(&state, &request_id).await;
		}

		let Some(access) = classify_access(&method, &segments) else {
			return if route_shape_exists(&segments) {
				error_response(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "method not allowed for this path", Some(&request_id))
			} else {
				error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "no such route", Some(&request_id))
			};
		};

		let cancel = state.shutdown.child_token();

		let outcome = if state.enable_auth {
			match pipeline::authenticate(&*state.storage, &cancel, authorization.as_deref(), access).await {
				Ok(outcome) => outcome,
				Err(e) => {
					log::warn!(
						target: "beacon_server::audit",
						"event=security_audit outcome=denied kind={:?} path={path} remote={remote_addr}",
						e.kind()
					);
					return core_error_response(e, Some(&request_id));
				},
			}
		} else {
			AuthOutcome::Anonymous
		};

		let identity = match &outcome {
			AuthOutcome::Authenticated(key) => Identity::Authenticated(key.id.clone()),
			AuthOutcome::Anonymous => Identity::Anonymous(remote_addr),
		};
		let decision = state.rate_limiter.check(&identity).await;
		if !decision.allowed {
			let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "rate limit exceeded", Some(&request_id));
			apply_rate_limit_headers(&mut response, &decision);
			return response;
		}

		let is_admin_route = matches!(access, Access::Required(Permission::Admin));
		if is_admin_route {
			log::info!(target: "beacon_server::audit", "event=security_audit outcome=admin_op path={path} remote={remote_addr}");
		}

		let mut response = match dispatch(&state, &cancel, &method, &segments, &query, content_type.as_deref(), req, &request_id).await
		{
			Ok(response) => response,
			Err(e) => core_error_response(e, Some(&request_id)),
		};
		apply_rate_limit_headers(&mut response, &decision);
		response
	}
	.instrument(request_span)
	.await
}

/// Endpoint access classification (spec §4.4); `None` means the path shape
/// is unrecognized for this method.
fn classify_access(method: &Method, segments: &[&str]) -> Option<Access> {
	use Method as M;
	match (method, segments) {
		(&M::GET, ["api", "v1", "updates", _, "check"]) => Some(Access::Public),
		(&M::POST, ["api", "v1", "check"]) => Some(Access::Public),
		(&M::GET, ["api", "v1", "updates", _, "latest"]) => Some(Access::Public),
		(&M::GET, ["api", "v1", "updates", _, "releases"]) => Some(Access::Required(Permission::Read)),
		(&M::POST, ["api", "v1", "updates", _, "register"]) => Some(Access::Required(Permission::Write)),
		(&M::DELETE, ["api", "v1", "updates", _, "releases", _, _, _]) => Some(Access::Required(Permission::Admin)),
		(&M::GET, ["api", "v1", "applications"]) => Some(Access::Required(Permission::Read)),
		(&M::POST, ["api", "v1", "applications"]) => Some(Access::Required(Permission::Write)),
		(&M::GET, ["api", "v1", "applications", _]) => Some(Access::Required(Permission::Read)),
		(&M::PUT, ["api", "v1", "applications", _]) => Some(Access::Required(Permission::Admin)),
		(&M::DELETE, ["api", "v1", "applications", _]) => Some(Access::Required(Permission::Admin)),
		(&M::GET, ["api", "v1", "admin", "keys"]) => Some(Access::Required(Permission::Admin)),
		(&M::POST, ["api", "v1", "admin", "keys"]) => Some(Access::Required(Permission::Admin)),
		(&M::GET, ["api", "v1", "admin", "keys", _]) => Some(Access::Required(Permission::Admin)),
		(&M::PATCH, ["api", "v1", "admin", "keys", _]) => Some(Access::Required(Permission::Admin)),
		(&M::DELETE, ["api", "v1", "admin", "keys", _]) => Some(Access::Required(Permission::Admin)),
		_ => None,
	}
}

/// True if `segments` matches a known route shape under any method, used to
/// tell a 404 (no such route) apart from a 405 (wrong method for the route).
fn route_shape_exists(segments: &[&str]) -> bool {
	matches!(
		segments,
		["api", "v1", "updates", _, "check"]
			| ["api", "v1", "check"]
			| ["api", "v1", "updates", _, "latest"]
			| ["api", "v1", "updates", _, "releases"]
			| ["api", "v1", "updates", _, "register"]
			| ["api", "v1", "updates", _, "releases", _, _, _]
			| ["api", "v1", "applications"]
			| ["api", "v1", "applications", _]
			| ["api", "v1", "admin", "keys"]
			| ["api", "v1", "admin", "keys", _]
	)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
	state: &Arc<AppState>, cancel: &CancellationToken, method: &Method, segments: &[&str], query: &HashMap<String, String>,
	content_type: Option<&str>, req: Request<Incoming>, request_id: &str,
) -> Result<Response<Full<Bytes>>, CoreError> {
	use Method as M;
	match (method, segments) {
		(&M::GET, ["api", "v1", "updates", app_id, "check"]) => {
			let request = CheckForUpdateRequest {
				application_id: app_id.to_string(),
				current_version: query.get("current_version").cloned().unwrap_or_default(),
				platform: query.get("platform").cloned().unwrap_or_default(),
				architecture: query.get("architecture").cloned().unwrap_or_default(),
				allow_prerelease: query_bool(query, "allow_prerelease"),
				include_metadata: query_bool(query, "include_metadata"),
			};
			let response = state.resolver.check_for_update(cancel, request).await?;
			Ok(json_response(StatusCode::OK, &response))
		},
		(&M::POST, ["api", "v1", "check"]) => {
			let request: CheckForUpdateRequest = read_json_body(req, content_type).await?;
			let response = state.resolver.check_for_update(cancel, request).await?;
			Ok(json_response(StatusCode::OK, &response))
		},
		(&M::GET, ["api", "v1", "updates", app_id, "latest"]) => {
			let request = GetLatestVersionRequest {
				application_id: app_id.to_string(),
				platform: query.get("platform").cloned().unwrap_or_default(),
				architecture: query.get("architecture").cloned().unwrap_or_default(),
				allow_prerelease: query_bool(query, "allow_prerelease"),
				include_metadata: query_bool(query, "include_metadata"),
			};
			let response = state.resolver.get_latest_version(cancel, request).await?;
			Ok(json_response(StatusCode::OK, &response))
		},
		(&M::GET, ["api", "v1", "updates", app_id, "releases"]) => {
			let listing_query = parse_list_releases_query(query)?;
			let page = state.resolver.list_releases(cancel, app_id, listing_query).await?;
			Ok(json_response(StatusCode::OK, &page))
		},
		(&M::POST, ["api", "v1", "updates", app_id, "register"]) => {
			let request: RegisterReleaseRequest = read_json_body(req, content_type).await?;
			let release = state.resolver.register_release(cancel, app_id, request).await?;
			Ok(json_response(StatusCode::CREATED, &release))
		},
		(&M::DELETE, ["api", "v1", "updates", app_id, "releases", version, platform, arch]) => {
			state.resolver.delete_release(cancel, app_id, version, platform, arch).await?;
			Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Full::new(Bytes::new())).unwrap())
		},
		(&M::GET, ["api", "v1", "applications"]) => {
			let applications = state.resolver.list_applications(cancel).await?;
			Ok(json_response(StatusCode::OK, &applications))
		},
		(&M::POST, ["api", "v1", "applications"]) => {
			let request: CreateApplicationRequest = read_json_body(req, content_type).await?;
			let application = state.resolver.create_application(cancel, request).await?;
			Ok(json_response(StatusCode::CREATED, &application))
		},
		(&M::GET, ["api", "v1", "applications", id]) => {
			let with_stats = state.resolver.get_application(cancel, id).await?;
			Ok(json_response(StatusCode::OK, &with_stats))
		},
		(&M::PUT, ["api", "v1", "applications", id]) => {
			let request: UpdateApplicationRequest = read_json_body(req, content_type).await?;
			let application = state.resolver.update_application(cancel, id, request).await?;
			Ok(json_response(StatusCode::OK, &application))
		},
		(&M::DELETE, ["api", "v1", "applications", id]) => {
			state.resolver.delete_application(cancel, id).await?;
			Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Full::new(Bytes::new())).unwrap())
		},
		(&M::GET, ["api", "v1", "admin", "keys"]) => {
			let keys = admin::list_api_keys(&*state.storage, cancel).await?;
			Ok(json_response(StatusCode::OK, &keys))
		},
		(&M::POST, ["api", "v1", "admin", "keys"]) => {
			let request = read_json_body(req, content_type).await?;
			let created = admin::create_api_key(&*state.storage, cancel, request).await?;
			log::info!(target: "beacon_server::audit", "event=security_audit outcome=key_created key_id={} request_id={request_id}", created.key.id);
			Ok(json_response(StatusCode::CREATED, &created))
		},
		(&M::GET, ["api", "v1", "admin", "keys", id]) => {
			let key = admin::get_api_key(&*state.storage, cancel, id).await?;
			Ok(json_response(StatusCode::OK, &key))
		},
		(&M::PATCH, ["api", "v1", "admin", "keys", id]) => {
			let request = read_json_body(req, content_type).await?;
			let key = admin::update_api_key(&*state.storage, cancel, id, request).await?;
			Ok(json_response(StatusCode::OK, &key))
		},
		(&M::DELETE, ["api", "v1", "admin", "keys", id]) => {
			admin::delete_api_key(&*state.storage, cancel, id).await?;
			log::info!(target: "beacon_server::audit", "event=security_audit outcome=key_deleted key_id={id} request_id={request_id}");
			Ok(Response::builder().status(StatusCode::NO_CONTENT).body(Full::new(Bytes::new())).unwrap())
		},
		_ => Err(CoreError::not_found("no such route")),
	}
}

fn parse_list_releases_query(query: &HashMap<String, String>) -> Result<ListReleasesQuery, CoreError> {
	let required = match query.get("required") {
		Some(v) => Some(v.parse::<bool>().map_err(|_| CoreError::validation("'required' must be a boolean"))?),
		None => None,
	};
	let limit = match query.get("limit") {
		Some(v) => Some(v.parse::<u32>().map_err(|_| CoreError::validation("'limit' must be a non-negative integer"))?),
		None => None,
	};
	let offset = match query.get("offset") {
		Some(v) => Some(v.parse::<u32>().map_err(|_| CoreError::validation("'offset' must be a non-negative integer"))?),
		None => None,
	};
	let sort = match query.get("sort") {
		Some(v) => {
			Some(serde_json::from_value(serde_json::Value::String(v.clone())).map_err(|_| CoreError::validation("unrecognized 'sort' value"))?)
		},
		None => None,
	};
	let order = match query.get("order") {
		Some(v) => {
			Some(serde_json::from_value(serde_json::Value::String(v.clone())).map_err(|_| CoreError::validation("unrecognized 'order' value"))?)
		},
		None => None,
	};
	let platforms = query.get("platforms").map(|v| v.split(',').map(|s| s.to_string()).collect());

	Ok(ListReleasesQuery {
		platform: query.get("platform").cloned(),
		architecture: query.get("architecture").cloned(),
		version: query.get("version").cloned(),
		required,
		platforms,
		limit,
		offset,
		sort,
		order,
	})
}

async fn read_json_body<T: DeserializeOwned>(req: Request<Incoming>, content_type: Option<&str>) -> Result<T, CoreError> {
	if !content_type.map(|ct| ct.starts_with("application/json")).unwrap_or(false) {
		return Err(CoreError::unsupported_media_type("expected content-type application/json"));
	}

	let body = req.into_body();
	let limited = Limited::new(body, MAX_BODY_SIZE);
	let bytes = limited.collect().await.map_err(|_| CoreError::new(ErrorKind::InvalidRequest, "request body too large"))?.to_bytes();

	serde_json::from_slice(&bytes).map_err(|e| CoreError::new(ErrorKind::InvalidRequest, format!("malformed request body: {e}")))
}

async fn handle_health(state: &Arc<AppState>, request_id: &str) -> Response<Full<Bytes>> {
	let cancel = state.shutdown.child_token();
	match state.storage.ping(&cancel).await {
		Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" })),
		Err(e) => core_error_response(e, Some(request_id)),
	}
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
	let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
	Response::builder().status(status).header("content-type", "application/json").body(Full::new(Bytes::from(payload))).unwrap()
}

fn apply_rate_limit_headers(response: &mut Response<Full<Bytes>>, decision: &beacon_security::rate_limit::RateLimitDecision) {
	let headers = response.headers_mut();
	headers.insert("x-ratelimit-limit", decision.limit.into());
	headers.insert("x-ratelimit-remaining", decision.remaining.into());
	headers.insert("x-ratelimit-reset", decision.reset_at.into());
}

/// Status code for each [`ErrorKind`] (spec §7).
fn status_for_kind(kind: ErrorKind) -> StatusCode {
	match kind {
		ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
		ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
		ErrorKind::Forbidden => StatusCode::FORBIDDEN,
		ErrorKind::NotFound => StatusCode::NOT_FOUND,
		ErrorKind::Conflict => StatusCode::CONFLICT,
		ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
		ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
		ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
		ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

/// Refines a generic [`ErrorKind::NotFound`]/[`ErrorKind::Conflict`] into the
/// resource-specific code implied by the error message, since [`CoreError`]
/// carries one flat kind rather than a per-resource variant.
fn error_code(err: &CoreError) -> String {
	let message = err.message().to_ascii_lowercase();
	match err.kind() {
		ErrorKind::NotFound if message.contains("application") => "APPLICATION_NOT_FOUND".to_string(),
		ErrorKind::NotFound if message.contains("release") => "RELEASE_NOT_FOUND".to_string(),
		ErrorKind::NotFound if message.contains("api key") || message.contains("key") => "API_KEY_NOT_FOUND".to_string(),
		ErrorKind::InvalidRequest => "INVALID_REQUEST".to_string(),
		ErrorKind::Unauthorized => "UNAUTHORIZED".to_string(),
		ErrorKind::Forbidden => "FORBIDDEN".to_string(),
		ErrorKind::NotFound => "NOT_FOUND".to_string(),
		ErrorKind::Conflict => "CONFLICT".to_string(),
		ErrorKind::Validation => "VALIDATION_ERROR".to_string(),
		ErrorKind::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE".to_string(),
		ErrorKind::RateLimited => "RATE_LIMITED".to_string(),
		ErrorKind::Internal => "INTERNAL_ERROR".to_string(),
	}
}

fn core_error_response(err: CoreError, request_id: Option<&str>) -> Response<Full<Bytes>> {
	let status = status_for_kind(err.kind());
	let code = error_code(&err);
	if err.kind() == ErrorKind::Internal {
		log::error!(target: "beacon_server", "internal error: {err}");
	}
	error_response(status, &code, err.message(), request_id)
}

/// Builds the error envelope (spec §6): `{error, message, code, timestamp, request_id?}`.
fn error_response(status: StatusCode, code: &str, message: &str, request_id: Option<&str>) -> Response<Full<Bytes>> {
	let body = serde_json::json!({
		"error": code.to_ascii_lowercase(),
		"message": message,
		"code": code,
		"timestamp": Utc::now(),
		"request_id": request_id,
	});
	json_response(status, &body)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unsupported_media_type_maps_to_415() {
		let err = CoreError::unsupported_media_type("expected content-type application/json");
		assert_eq!(status_for_kind(err.kind()), StatusCode::UNSUPPORTED_MEDIA_TYPE);
		assert_eq!(error_code(&err), "UNSUPPORTED_MEDIA_TYPE");
	}

	#[test]
	fn malformed_json_body_stays_400() {
		let err = CoreError::new(ErrorKind::InvalidRequest, "malformed request body: EOF");
		assert_eq!(status_for_kind(err.kind()), StatusCode::BAD_REQUEST);
		assert_eq!(error_code(&err), "INVALID_REQUEST");
	}
}
