use std::time::SystemTime;

/// How values of a user-defined metric relate to each other over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Instantaneous value, may go up or down.
    Gauge,
    /// Monotonically increasing since container creation.
    Cumulative,
    /// Change since the last collection.
    Delta,
}

/// Declaration of one user-defined metric endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMetricSpec {
    pub name: String,
    pub kind: MetricKind,
    /// Unit the values are reported in, e.g. `ms`.
    pub units: String,
}

/// A single collected value of a user-defined metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValue {
    pub timestamp: SystemTime,
    pub value: MetricSample,
}

/// Value payload of a [`MetricValue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricSample {
    Int(i64),
    Float(f64),
}
