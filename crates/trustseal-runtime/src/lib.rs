//! # trustseal-runtime
//!
//! Async half of TrustSeal: everything that touches the network.
//!
//! The deterministic algorithms live in `trustseal-core`; this crate drives
//! them against the outside world:
//!
//! - [`client`]: the inference-router completion client, with
//!   classification-aware retry ([`retry`]),
//! - [`executor`]: bounded, order-preserving fan-out of independent calls,
//! - [`netguard`]: SSRF-safe URL validation with full DNS answer
//!   classification,
//! - [`fetch`]: readable-text fetching with guarded redirects,
//! - [`pipeline`]: the redundant-inference verification pipeline,
//! - [`cache`]: TTL reuse of identical validations,
//! - [`monitor`]: the lease-based monitor registry and scheduler,
//! - [`config`]: environment configuration, fatal before any request.
//!
//! Failure policy throughout: isolate to the smallest unit. One run failing
//! never aborts its panel, one claim never aborts its audit, one monitor
//! never takes down a tick.

pub mod cache;
pub mod client;
pub mod config;
pub mod executor;
pub mod feed;
pub mod fetch;
pub mod hash;
pub mod monitor;
pub mod netguard;
pub mod pipeline;
pub mod prompts;
pub mod retry;

pub use cache::VerificationCache;
pub use client::{completion_to_text, ClientError, CompletionClient};
pub use config::{ConfigError, RuntimeConfig};
pub use executor::{map_concurrent, ExecutorError};
pub use feed::{parse_feed, FeedError, FeedItem};
pub use fetch::{fetch_readable_text, FetchError, ReadableText};
pub use monitor::{
    should_alert, MemoryStore, Monitor, MonitorError, MonitorKind, MonitorRun, MonitorScheduler,
    MonitorSpec, MonitorStore, RunStatus, SealStore, WebhookAlerter,
};
pub use netguard::{assert_safe_remote_url, validate_remote_url, UrlGuardError};
pub use pipeline::{PipelineError, PipelineOptions, VerificationPipeline};
