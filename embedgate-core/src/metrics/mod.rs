//! Metrics for the admission core
//!
//! Two event sinks: [`GateMetrics`] keeps in-process atomic counters with a
//! serializable snapshot, [`PrometheusSink`] feeds the Prometheus registry.

mod counters;
pub mod prometheus;

pub use counters::{GateMetrics, MetricsSnapshot};
pub use self::prometheus::{encode_metrics, observe_queue, register_metrics, PrometheusSink};
