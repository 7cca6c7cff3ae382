//! Metrics collection for the notification engine
//!
//! Prometheus counters for per-channel delivery totals and a histogram of
//! drain-cycle durations, exported through the operational `/metrics`
//! endpoint and persisted periodically by the metrics-snapshot trigger.

use crate::config::MetricsConfig;
use crate::error::Result;
use crate::types::{Channel, ChannelTotals};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

/// Metrics collector for the engine
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,

    items_sent: IntCounterVec,
    items_failed: IntCounterVec,
    items_skipped: IntCounterVec,
    drain_cycles: IntCounter,
    cycle_duration: Histogram,
}

impl EngineMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let items_sent = IntCounterVec::new(
            Opts::new("items_sent_total", "Work items delivered successfully")
                .namespace(config.namespace.clone()),
            &["channel"],
        )?;

        let items_failed = IntCounterVec::new(
            Opts::new("items_failed_total", "Work items that failed delivery")
                .namespace(config.namespace.clone()),
            &["channel"],
        )?;

        let items_skipped = IntCounterVec::new(
            Opts::new(
                "items_skipped_total",
                "Work items skipped by the eligibility filter this cycle",
            )
            .namespace(config.namespace.clone()),
            &["channel"],
        )?;

        let drain_cycles = IntCounter::with_opts(
            Opts::new("drain_cycles_total", "Completed drain cycles")
                .namespace(config.namespace.clone()),
        )?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("drain_cycle_duration_seconds", "Duration of one drain cycle")
                .namespace(config.namespace.clone())
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(items_sent.clone()))?;
        registry.register(Box::new(items_failed.clone()))?;
        registry.register(Box::new(items_skipped.clone()))?;
        registry.register(Box::new(drain_cycles.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            items_sent,
            items_failed,
            items_skipped,
            drain_cycles,
            cycle_duration,
        })
    }

    pub fn record_sent(&self, channel: Channel) {
        self.items_sent.with_label_values(&[channel.as_str()]).inc();
    }

    pub fn record_failed(&self, channel: Channel) {
        self.items_failed
            .with_label_values(&[channel.as_str()])
            .inc();
    }

    pub fn record_skipped(&self, channel: Channel) {
        self.items_skipped
            .with_label_values(&[channel.as_str()])
            .inc();
    }

    pub fn record_cycle(&self, duration: std::time::Duration) {
        self.drain_cycles.inc();
        self.cycle_duration.observe(duration.as_secs_f64());
    }

    /// Current per-channel totals, as persisted by the snapshot trigger
    pub fn channel_totals(&self) -> HashMap<Channel, ChannelTotals> {
        Channel::ALL
            .into_iter()
            .map(|channel| {
                let totals = ChannelTotals {
                    sent: self.items_sent.with_label_values(&[channel.as_str()]).get(),
                    failed: self
                        .items_failed
                        .with_label_values(&[channel.as_str()])
                        .get(),
                };
                (channel, totals)
            })
            .collect()
    }

    /// Render the registry in Prometheus text exposition format
    pub fn export(&self) -> Result<String> {
        let mut buffer = String::new();
        let encoder = TextEncoder::new();
        encoder.encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_metrics() -> EngineMetrics {
        EngineMetrics::new(&MetricsConfig::default()).unwrap()
    }

    #[test]
    fn test_counters_accumulate_per_channel() {
        let metrics = create_test_metrics();
        metrics.record_sent(Channel::Email);
        metrics.record_sent(Channel::Email);
        metrics.record_failed(Channel::Sms);

        let totals = metrics.channel_totals();
        assert_eq!(totals[&Channel::Email].sent, 2);
        assert_eq!(totals[&Channel::Email].failed, 0);
        assert_eq!(totals[&Channel::Sms].failed, 1);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = create_test_metrics();
        metrics.record_sent(Channel::ChatPush);
        metrics.record_cycle(std::time::Duration::from_millis(25));

        let text = metrics.export().unwrap();
        assert!(text.contains("notify_engine_items_sent_total"));
        assert!(text.contains("notify_engine_drain_cycle_duration_seconds"));
    }
}
