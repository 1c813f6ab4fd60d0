use tally_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for the metrics store.
pub enum MetricCounters {
    /// Incremented by the number of raw events submitted in a batch.
    EventsReceived,

    /// Incremented by the number of counter deltas written to the store.
    ///
    /// With pre-aggregation enabled this is lower than `EventsReceived` whenever a batch contains
    /// several reports for the same hour.
    DeltasMerged,

    /// Incremented for every batch rejected by validation.
    BatchRejected,

    /// Incremented for every batch that failed to write.
    ///
    /// Tagged by the failing `operation`.
    PersistenceFailed,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::EventsReceived => "metrics_store.events.received",
            Self::DeltasMerged => "metrics_store.deltas.merged",
            Self::BatchRejected => "metrics_store.batch.rejected",
            Self::PersistenceFailed => "metrics_store.persistence.failed",
        }
    }
}

/// Timer metrics for the metrics store.
pub enum MetricTimers {
    /// Time in milliseconds spent merging one batch, including validation and grouping.
    BatchInsertDuration,

    /// Time in milliseconds spent on a rollup query.
    ///
    /// Tagged by `query`.
    RollupDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::BatchInsertDuration => "metrics_store.batch.duration",
            Self::RollupDuration => "metrics_store.rollup.duration",
        }
    }
}

/// Gauge metrics for the metrics store.
pub enum MetricGauges {
    /// Number of hourly counter rows in the store, reported whenever it is counted.
    StoredRows,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::StoredRows => "metrics_store.rows",
        }
    }
}
