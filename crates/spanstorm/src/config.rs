use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Wire protocol used to reach the OTLP collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

impl fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc => write!(f, "grpc"),
            Self::HttpProtobuf => write!(f, "http-protobuf"),
        }
    }
}

impl FromStr for OtlpProtocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grpc" => Ok(Self::Grpc),
            "http-protobuf" | "http_protobuf" => Ok(Self::HttpProtobuf),
            other => Err(ValidationError::new(
                "protocol",
                format!("unknown protocol {other:?}, expected \"grpc\" or \"http-protobuf\""),
            )),
        }
    }
}

/// A rejected configuration mutation: the field that failed and why.
///
/// Never fatal and never mutates state; the store logs it and hands it back
/// to the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Tunables for the generator.
///
/// Snapshots are immutable once read; mutation happens only through the
/// validated [`ConfigStore`] setters, so a snapshot is never observed in a
/// partially-validated state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// OTLP collector base URL.
    pub endpoint: String,
    pub protocol: OtlpProtocol,
    /// Root traces per second while running.
    pub rate_per_second: u32,
    /// Recursive levels below each root.
    pub trace_depth: u32,
    /// Fan-out at every non-leaf level.
    pub children_per_node: u32,
    pub min_child_duration_ms: u64,
    pub max_child_duration_ms: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317/".to_string(),
            protocol: OtlpProtocol::Grpc,
            rate_per_second: 3,
            trace_depth: 1,
            children_per_node: 1,
            min_child_duration_ms: 10,
            max_child_duration_ms: 100,
        }
    }
}

impl TracingConfig {
    /// Check every field at once, for configurations assembled outside the
    /// store (e.g. from CLI flags).
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_endpoint(&self.endpoint)?;
        validate_rate(self.rate_per_second)?;
        validate_depth(self.trace_depth)?;
        validate_children(self.children_per_node)?;
        validate_duration_bounds(self.min_child_duration_ms, self.max_child_duration_ms)
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    if endpoint.is_empty() {
        return Err(ValidationError::new("endpoint", "endpoint must not be empty"));
    }
    let uri: http::Uri = endpoint
        .parse()
        .map_err(|_| ValidationError::new("endpoint", format!("{endpoint:?} is not a valid URL")))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ValidationError::new(
            "endpoint",
            format!("{endpoint:?} must be an absolute URL with scheme and host"),
        ));
    }
    Ok(())
}

fn validate_rate(rate: u32) -> Result<(), ValidationError> {
    if rate < 1 {
        return Err(ValidationError::new("rate_per_second", "rate must be at least 1"));
    }
    Ok(())
}

fn validate_depth(depth: u32) -> Result<(), ValidationError> {
    if depth < 1 {
        return Err(ValidationError::new("trace_depth", "trace depth must be at least 1"));
    }
    Ok(())
}

fn validate_children(children: u32) -> Result<(), ValidationError> {
    if children < 1 {
        return Err(ValidationError::new(
            "children_per_node",
            "children per node must be at least 1",
        ));
    }
    Ok(())
}

fn validate_duration_bounds(min_ms: u64, max_ms: u64) -> Result<(), ValidationError> {
    if max_ms < 1 {
        return Err(ValidationError::new(
            "max_child_duration_ms",
            "max duration must be at least 1ms",
        ));
    }
    if max_ms < min_ms {
        return Err(ValidationError::new(
            "max_child_duration_ms",
            format!("max duration ({max_ms}ms) must be >= min duration ({min_ms}ms)"),
        ));
    }
    Ok(())
}

/// Partial update, as accepted by the HTTP control surface.
///
/// Absent fields are left untouched. When both duration bounds are present
/// they are validated as a pair, so the two can move past each other in a
/// single update.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub endpoint: Option<String>,
    pub protocol: Option<OtlpProtocol>,
    pub rate_per_second: Option<u32>,
    pub trace_depth: Option<u32>,
    pub children_per_node: Option<u32>,
    pub min_child_duration_ms: Option<u64>,
    pub max_child_duration_ms: Option<u64>,
}

/// Owns the mutable configuration.
///
/// Setters validate a single field, mutate under the lock and publish the
/// new snapshot to subscribers. A rejected set leaves the configuration
/// untouched and notifies nobody. The lock is held across the publish, so
/// concurrent mutations never interleave and notifications arrive in
/// mutation order.
pub struct ConfigStore {
    current: Mutex<TracingConfig>,
    tx: watch::Sender<TracingConfig>,
}

impl ConfigStore {
    pub fn new(initial: TracingConfig) -> Result<Self, ValidationError> {
        initial.validate()?;
        let (tx, _) = watch::channel(initial.clone());
        Ok(Self {
            current: Mutex::new(initial),
            tx,
        })
    }

    /// The current configuration.
    pub fn snapshot(&self) -> TracingConfig {
        self.current.lock().clone()
    }

    /// Receiver for change notifications. Every accepted mutation publishes
    /// exactly one new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<TracingConfig> {
        self.tx.subscribe()
    }

    pub fn set_endpoint(&self, endpoint: &str) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_endpoint(endpoint).map_err(rejected)?;
        current.endpoint = endpoint.to_string();
        self.publish(&current);
        Ok(())
    }

    pub fn set_protocol(&self, protocol: OtlpProtocol) {
        let mut current = self.current.lock();
        current.protocol = protocol;
        self.publish(&current);
    }

    pub fn set_rate_per_second(&self, rate: u32) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_rate(rate).map_err(rejected)?;
        current.rate_per_second = rate;
        self.publish(&current);
        Ok(())
    }

    pub fn set_trace_depth(&self, depth: u32) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_depth(depth).map_err(rejected)?;
        current.trace_depth = depth;
        self.publish(&current);
        Ok(())
    }

    pub fn set_children_per_node(&self, children: u32) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_children(children).map_err(rejected)?;
        current.children_per_node = children;
        self.publish(&current);
        Ok(())
    }

    /// Cross-validated against the max bound currently held.
    pub fn set_min_child_duration_ms(&self, min_ms: u64) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        if min_ms > current.max_child_duration_ms {
            return Err(rejected(ValidationError::new(
                "min_child_duration_ms",
                format!(
                    "min duration ({min_ms}ms) must be <= max duration ({}ms)",
                    current.max_child_duration_ms
                ),
            )));
        }
        current.min_child_duration_ms = min_ms;
        self.publish(&current);
        Ok(())
    }

    /// Cross-validated against the min bound currently held.
    pub fn set_max_child_duration_ms(&self, max_ms: u64) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_duration_bounds(current.min_child_duration_ms, max_ms).map_err(rejected)?;
        current.max_child_duration_ms = max_ms;
        self.publish(&current);
        Ok(())
    }

    /// Move both duration bounds in one atomic mutation (one notification).
    pub fn set_child_duration_bounds(&self, min_ms: u64, max_ms: u64) -> Result<(), ValidationError> {
        let mut current = self.current.lock();
        validate_duration_bounds(min_ms, max_ms).map_err(rejected)?;
        current.min_child_duration_ms = min_ms;
        current.max_child_duration_ms = max_ms;
        self.publish(&current);
        Ok(())
    }

    /// Apply a partial update field by field, stopping at the first
    /// rejection. Returns the resulting snapshot.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<TracingConfig, ValidationError> {
        if let Some(endpoint) = &update.endpoint {
            self.set_endpoint(endpoint)?;
        }
        if let Some(protocol) = update.protocol {
            self.set_protocol(protocol);
        }
        if let Some(rate) = update.rate_per_second {
            self.set_rate_per_second(rate)?;
        }
        if let Some(depth) = update.trace_depth {
            self.set_trace_depth(depth)?;
        }
        if let Some(children) = update.children_per_node {
            self.set_children_per_node(children)?;
        }
        match (update.min_child_duration_ms, update.max_child_duration_ms) {
            (Some(min_ms), Some(max_ms)) => self.set_child_duration_bounds(min_ms, max_ms)?,
            (Some(min_ms), None) => self.set_min_child_duration_ms(min_ms)?,
            (None, Some(max_ms)) => self.set_max_child_duration_ms(max_ms)?,
            (None, None) => {}
        }
        Ok(self.snapshot())
    }

    fn publish(&self, config: &TracingConfig) {
        self.tx.send_replace(config.clone());
    }
}

fn rejected(err: ValidationError) -> ValidationError {
    tracing::warn!(field = err.field, reason = %err.reason, "configuration change rejected");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        ConfigStore::new(TracingConfig::default()).expect("default config is valid")
    }

    #[test]
    fn defaults_are_valid() {
        assert!(TracingConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_rate_and_keeps_previous() {
        let store = store();
        let err = store.set_rate_per_second(0).unwrap_err();
        assert_eq!(err.field, "rate_per_second");
        assert_eq!(store.snapshot().rate_per_second, 3);
    }

    #[test]
    fn rejects_malformed_endpoint_and_keeps_previous() {
        let store = store();
        let err = store.set_endpoint("not-a-url").unwrap_err();
        assert_eq!(err.field, "endpoint");
        assert_eq!(store.snapshot().endpoint, "http://localhost:4317/");
    }

    #[test]
    fn rejects_empty_endpoint() {
        let store = store();
        assert!(store.set_endpoint("").is_err());
    }

    #[test]
    fn accepts_well_formed_endpoint() {
        let store = store();
        store
            .set_endpoint("http://collector:4318/v1/traces")
            .expect("absolute URL accepted");
        assert_eq!(store.snapshot().endpoint, "http://collector:4318/v1/traces");
    }

    #[test]
    fn rejects_max_below_current_min() {
        let store = store();
        let err = store.set_max_child_duration_ms(5).unwrap_err();
        assert_eq!(err.field, "max_child_duration_ms");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.min_child_duration_ms, 10);
        assert_eq!(snapshot.max_child_duration_ms, 100);
    }

    #[test]
    fn rejects_min_above_current_max() {
        let store = store();
        let err = store.set_min_child_duration_ms(200).unwrap_err();
        assert_eq!(err.field, "min_child_duration_ms");
        assert_eq!(store.snapshot().min_child_duration_ms, 10);
    }

    #[test]
    fn equal_duration_bounds_are_valid() {
        let store = store();
        store
            .set_child_duration_bounds(50, 50)
            .expect("min == max is a fixed duration, not an error");
    }

    #[test]
    fn bounds_can_move_past_each_other_in_one_update() {
        let store = store();
        store
            .set_child_duration_bounds(200, 300)
            .expect("pair update validates as a pair");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.min_child_duration_ms, 200);
        assert_eq!(snapshot.max_child_duration_ms, 300);
    }

    #[test]
    fn rejects_zero_depth_and_zero_children() {
        let store = store();
        assert_eq!(store.set_trace_depth(0).unwrap_err().field, "trace_depth");
        assert_eq!(
            store.set_children_per_node(0).unwrap_err().field,
            "children_per_node"
        );
    }

    #[test]
    fn accepted_set_notifies_exactly_once() {
        let store = store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_rate_per_second(10).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().rate_per_second, 10);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn rejected_set_does_not_notify() {
        let store = store();
        let mut rx = store.subscribe();
        let _ = store.set_rate_per_second(0);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn partial_update_stops_at_first_rejection() {
        let store = store();
        let update = ConfigUpdate {
            rate_per_second: Some(0),
            trace_depth: Some(4),
            ..ConfigUpdate::default()
        };
        assert!(store.apply(&update).is_err());
        // The rejected field stopped the update before depth was reached.
        assert_eq!(store.snapshot().trace_depth, 1);
    }

    #[test]
    fn protocol_parses_from_str() {
        assert_eq!("grpc".parse::<OtlpProtocol>().unwrap(), OtlpProtocol::Grpc);
        assert_eq!(
            "http-protobuf".parse::<OtlpProtocol>().unwrap(),
            OtlpProtocol::HttpProtobuf
        );
        assert!("smoke-signals".parse::<OtlpProtocol>().is_err());
    }
}
