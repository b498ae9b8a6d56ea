//! Per-identity token-bucket rate limiting (spec §4.5): two pools, one
//! keyed by client address for anonymous callers, one keyed by API-key id
//! for authenticated callers, each under its own lock in the teacher's
//! `Mutex`-first concurrency idiom rather than reaching for a new crate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The identity a rate-limit check is performed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
	/// An unauthenticated caller, keyed by client address.
	Anonymous(IpAddr),
	/// An authenticated caller, keyed by API-key id.
	Authenticated(String),
}

/// Configuration for both token-bucket pools.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
	/// Burst capacity for anonymous buckets.
	pub anonymous_capacity: u32,
	/// Refill rate for anonymous buckets, in tokens per minute.
	pub anonymous_refill_per_minute: u32,
	/// Burst capacity for authenticated buckets.
	pub authenticated_capacity: u32,
	/// Refill rate for authenticated buckets, in tokens per minute.
	pub authenticated_refill_per_minute: u32,
	/// How long a bucket may sit unused before the reclaimer evicts it.
	pub idle_timeout: Duration,
}

impl RateLimitConfig {
	/// Builds a config with the authenticated tier defaulted to 2x the
	/// anonymous tier's capacity and refill rate, per spec §4.5.
	pub fn with_anonymous_defaults(anonymous_capacity: u32, anonymous_refill_per_minute: u32) -> Self {
		Self {
			anonymous_capacity,
			anonymous_refill_per_minute,
			authenticated_capacity: anonymous_capacity.saturating_mul(2),
			authenticated_refill_per_minute: anonymous_refill_per_minute.saturating_mul(2),
			idle_timeout: Duration::from_secs(600),
		}
	}
}

/// The outcome of a rate-limit check, carrying the values the pipeline
/// surfaces as `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// The bucket's burst capacity.
	pub limit: u32,
	/// Tokens remaining after this check.
	pub remaining: u32,
	/// Unix timestamp (seconds) at which the bucket will next hold a full token.
	pub reset_at: u64,
}

struct Bucket {
	tokens: f64,
	capacity: f64,
	refill_per_second: f64,
	last_refill: Instant,
	last_used: Instant,
}

impl Bucket {
	fn new(capacity: u32, refill_per_minute: u32) -> Self {
		let now = Instant::now();
		Self {
			tokens: capacity as f64,
			capacity: capacity as f64,
			refill_per_second: refill_per_minute as f64 / 60.0,
			last_refill: now,
			last_used: now,
		}
	}

	fn refill(&mut self, now: Instant) {
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
		self.last_refill = now;
	}

	fn try_consume(&mut self) -> RateLimitDecision {
		let now = Instant::now();
		self.refill(now);
		self.last_used = now;

		let allowed = self.tokens >= 1.0;
		if allowed {
			self.tokens -= 1.0;
		}

		let deficit = (1.0 - self.tokens).max(0.0);
		let seconds_to_full_token = if self.refill_per_second > 0.0 { deficit / self.refill_per_second } else { 0.0 };
		let reset_at = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs()
			.saturating_add(seconds_to_full_token.ceil() as u64);

		RateLimitDecision {
			allowed,
			limit: self.capacity as u32,
			remaining: self.tokens.floor().max(0.0) as u32,
			reset_at,
		}
	}

	fn idle_since(&self, now: Instant) -> Duration {
		now.duration_since(self.last_used)
	}
}

/// Holds both token-bucket pools and a background reclaimer that evicts
/// buckets idle longer than [`RateLimitConfig::idle_timeout`].
pub struct RateLimiter {
	config: RateLimitConfig,
	anonymous: Mutex<HashMap<IpAddr, Bucket>>,
	authenticated: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
	/// Builds a limiter ready to be shared across request handlers.
	pub fn new(config: RateLimitConfig) -> Arc<Self> {
		Arc::new(Self { config, anonymous: Mutex::new(HashMap::new()), authenticated: Mutex::new(HashMap::new()) })
	}

	/// Consumes one token from `identity`'s bucket, creating it on first use.
	pub async fn check(&self, identity: &Identity) -> RateLimitDecision {
		match identity {
			Identity::Anonymous(addr) => {
				let mut pool = self.anonymous.lock().await;
				let bucket = pool.entry(*addr).or_insert_with(|| {
					Bucket::new(self.config.anonymous_capacity, self.config.anonymous_refill_per_minute)
				});
				bucket.try_consume()
			},
			Identity::Authenticated(key_id) => {
				let mut pool = self.authenticated.lock().await;
				let bucket = pool.entry(key_id.clone()).or_insert_with(|| {
					Bucket::new(
						self.config.authenticated_capacity,
						self.config.authenticated_refill_per_minute,
					)
				});
				bucket.try_consume()
			},
		}
	}

	/// Evicts buckets idle longer than [`RateLimitConfig::idle_timeout`].
	/// Intended to be driven periodically by [`Self::spawn_reclaimer`].
	pub async fn reclaim_idle(&self) {
		let now = Instant::now();
		let idle_timeout = self.config.idle_timeout;
		self.anonymous.lock().await.retain(|_, bucket| bucket.idle_since(now) < idle_timeout);
		self.authenticated.lock().await.retain(|_, bucket| bucket.idle_since(now) < idle_timeout);
	}

	/// Spawns a background task that calls [`Self::reclaim_idle`] every
	/// `interval`, analogous to the teacher's `tokio::select!` shutdown loop:
	/// it runs until `cancel` fires, at which point the returned handle
	/// resolves. A `JoinHandle` detaches rather than aborting its task on
	/// drop, so `cancel` — not dropping the handle — is what actually stops
	/// the reclaimer.
	pub fn spawn_reclaimer(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
		let limiter = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			loop {
				tokio::select! {
					_ = ticker.tick() => limiter.reclaim_idle().await,
					_ = cancel.cancelled() => return,
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn a_fresh_bucket_starts_at_full_capacity() {
		let limiter = RateLimiter::new(RateLimitConfig::with_anonymous_defaults(5, 60));
		let identity = Identity::Anonymous("127.0.0.1".parse().unwrap());
		let decision = limiter.check(&identity).await;
		assert!(decision.allowed);
		assert_eq!(decision.limit, 5);
		assert_eq!(decision.remaining, 4);
	}

	#[tokio::test]
	async fn exhausting_the_bucket_rejects_further_requests() {
		let limiter = RateLimiter::new(RateLimitConfig::with_anonymous_defaults(2, 60));
		let identity = Identity::Anonymous("127.0.0.1".parse().unwrap());
		assert!(limiter.check(&identity).await.allowed);
		assert!(limiter.check(&identity).await.allowed);
		assert!(!limiter.check(&identity).await.allowed);
	}

	#[tokio::test]
	async fn anonymous_and_authenticated_pools_are_independent() {
		let limiter = RateLimiter::new(RateLimitConfig::with_anonymous_defaults(1, 60));
		let anon = Identity::Anonymous("10.0.0.1".parse().unwrap());
		let auth = Identity::Authenticated("key-1".to_string());
		assert!(limiter.check(&anon).await.allowed);
		assert!(!limiter.check(&anon).await.allowed);
		// Authenticated tier defaults to 2x capacity, so it starts fresh and independent.
		assert!(limiter.check(&auth).await.allowed);
		assert!(limiter.check(&auth).await.allowed);
	}

	#[tokio::test]
	async fn authenticated_tier_defaults_to_double_the_anonymous_tier() {
		let config = RateLimitConfig::with_anonymous_defaults(5, 30);
		assert_eq!(config.authenticated_capacity, 10);
		assert_eq!(config.authenticated_refill_per_minute, 60);
	}

	#[tokio::test]
	async fn reclaiming_drops_only_idle_buckets() {
		let mut config = RateLimitConfig::with_anonymous_defaults(5, 60);
		config.idle_timeout = Duration::from_millis(1);
		let limiter = RateLimiter::new(config);
		let identity = Identity::Anonymous("192.168.0.1".parse().unwrap());
		limiter.check(&identity).await;

		tokio::time::sleep(Duration::from_millis(5)).await;
		limiter.reclaim_idle().await;

		assert!(limiter.anonymous.lock().await.is_empty());
	}
}
