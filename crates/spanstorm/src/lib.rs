//! Synthetic trace-tree load generator for OTLP-compatible tracing backends.
//!
//! The engine continuously fabricates hierarchical trace trees with
//! configurable shape and timing and streams them to a collector endpoint,
//! so tracing pipelines can be exercised without instrumenting a real
//! application. Three moving parts:
//!
//! - [`ConfigStore`]: validated tunables with change notification
//! - [`ExporterPipeline`]: the live OTLP export handle, rebuilt atomically
//!   whenever the configuration changes
//! - [`TraceSpammer`]: the rate-governed loop driving [`emit_trace`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spanstorm::{ConfigStore, TraceSpammer, TracingConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), spanstorm::ValidationError> {
//! let store = Arc::new(ConfigStore::new(TracingConfig::default())?);
//! let spammer = TraceSpammer::new(store);
//! spammer.start();
//! spammer.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pipeline;
pub mod span_tree;
pub mod spammer;

pub use config::{ConfigStore, ConfigUpdate, OtlpProtocol, TracingConfig, ValidationError};
pub use pipeline::{BuildError, ExporterPipeline};
pub use span_tree::emit_trace;
pub use spammer::{SpammerStats, TraceSpammer};
