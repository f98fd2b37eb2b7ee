// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Opentelemetry instrumentation of the enforcement path
//!
//! The instruments follow the engine's shape rather than being plain
//! timers. Every check records its duration and the number of policy rows
//! the effect reducer consumed before settling, both labeled with the
//! decision and the effect expression that produced it; a slow check is
//! almost always a wide rule set with a late short-circuit, and the row
//! histogram makes that visible without tracing. Policy loads are timed
//! separately since they are bound by the adapter, not by predicate
//! evaluation.
//!
//! Instruments are handed to the engine at startup through
//! [`EngineConfig::with_metrics`](crate::EngineConfig::with_metrics) and
//! live as long as the instance.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Histogram, Meter};
use opentelemetry_sdk::metrics::{
    Aggregation, Instrument, MeterProviderBuilder, MetricError, Stream, new_view,
};

use crate::effect::Effector;

const ENFORCE_DURATION: &str = "arbiter.enforce.duration_seconds";
const ENFORCE_RULES_EVALUATED: &str = "arbiter.enforce.rules_evaluated";
const POLICY_LOAD_DURATION: &str = "arbiter.policy_load.duration_seconds";

/// Instruments recorded by a running engine
pub struct EngineMetrics {
    enforce_duration: Histogram<f64>,
    enforce_rules_evaluated: Histogram<u64>,
    policy_load_duration: Histogram<f64>,
}

impl EngineMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            enforce_duration: meter
                .f64_histogram(ENFORCE_DURATION)
                .with_description("Time spent deciding one request")
                .with_unit("seconds")
                .build(),
            enforce_rules_evaluated: meter
                .u64_histogram(ENFORCE_RULES_EVALUATED)
                .with_description("Policy rows classified before the effect reducer settled")
                .with_unit("rules")
                .build(),
            policy_load_duration: meter
                .f64_histogram(POLICY_LOAD_DURATION)
                .with_description("Time spent loading the rule set from the adapter")
                .with_unit("seconds")
                .build(),
        }
    }

    /// Registers explicit bucket boundaries for the engine's histograms.
    ///
    /// A check runs one compiled predicate per candidate row, so healthy
    /// durations sit well under a millisecond; the enforce boundaries
    /// resolve that range while the top bucket still isolates pathological
    /// scans. The row boundaries grow geometrically to cover everything
    /// from single-rule hits to unbounded table sweeps, and adapter loads
    /// get ordinary I/O-sized buckets.
    pub fn append_views(
        provider_builder: MeterProviderBuilder,
    ) -> Result<MeterProviderBuilder, MetricError> {
        Ok(provider_builder
            .with_view(new_view(
                Instrument::new().name(ENFORCE_DURATION),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![0.000_05, 0.000_25, 0.001, 0.005, 0.025],
                    record_min_max: false,
                }),
            )?)
            .with_view(new_view(
                Instrument::new().name(ENFORCE_RULES_EVALUATED),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![1.0, 8.0, 64.0, 512.0, 4096.0],
                    record_min_max: false,
                }),
            )?)
            .with_view(new_view(
                Instrument::new().name(POLICY_LOAD_DURATION),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![0.01, 0.05, 0.25, 1.0, 5.0],
                    record_min_max: false,
                }),
            )?))
    }

    pub(crate) fn record_enforce(
        &self,
        effector: Effector,
        decision: bool,
        rules_evaluated: usize,
        seconds: f64,
    ) {
        let attributes = [
            KeyValue::new("decision", if decision { "allow" } else { "deny" }),
            KeyValue::new("effect", effector.as_str()),
        ];

        self.enforce_duration.record(seconds, &attributes);
        self.enforce_rules_evaluated
            .record(rules_evaluated as u64, &attributes);
    }

    pub(crate) fn record_policy_load(&self, seconds: f64) {
        self.policy_load_duration.record(seconds, &[]);
    }
}
