use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Histogram, Opts};
use tracing::{debug, warn};

use super::scaled::ScaledGauge;
use crate::engine::{ProbeEngine, ProbeStats};
use crate::target::{TargetId, LABEL_NAMES};

/// Renders the probing engine's statistics as Prometheus gauges.
///
/// Every scrape pulls a fresh snapshot from the engine. An empty pull means
/// the engine has nothing new, so the previously retained snapshot is
/// rendered again. The pull and the render happen under one lock, so
/// concurrent scrapes each see a single consistent snapshot.
pub struct SnapshotExporter {
    engine: Arc<dyn ProbeEngine>,
    state: Mutex<HashMap<TargetId, ProbeStats>>,
    best: ScaledGauge,
    worst: ScaledGauge,
    mean: ScaledGauge,
    std_dev: ScaledGauge,
    loss: GaugeVec,
    up: Gauge,
    render_duration: Option<Histogram>,
}

impl SnapshotExporter {
    pub fn new(engine: Arc<dyn ProbeEngine>) -> Result<Self> {
        let loss = GaugeVec::new(
            Opts::new("loss_percent", "Packet loss in percent").namespace("ping"),
            &LABEL_NAMES,
        )?;
        let up = Gauge::with_opts(
            Opts::new("up", concat!("peerping version ", env!("CARGO_PKG_VERSION")))
                .namespace("ping"),
        )?;

        Ok(Self {
            engine,
            state: Mutex::new(HashMap::new()),
            best: ScaledGauge::new("rtt_best", "Best round trip time")?,
            worst: ScaledGauge::new("rtt_worst", "Worst round trip time")?,
            mean: ScaledGauge::new("rtt_mean", "Mean round trip time")?,
            std_dev: ScaledGauge::new("rtt_std_deviation", "Standard deviation")?,
            loss,
            up,
            render_duration: None,
        })
    }

    /// Observe each render's duration in `histogram`.
    pub fn with_render_duration(mut self, histogram: Histogram) -> Self {
        self.render_duration = Some(histogram);
        self
    }

    /// Pull the latest snapshot and render all gauges.
    pub fn render(&self) -> Vec<MetricFamily> {
        let start = Instant::now();
        let mut retained = self.state.lock();

        let pulled = self.engine.export();
        if !pulled.is_empty() {
            *retained = pulled;
        }

        self.best.reset();
        self.worst.reset();
        self.mean.reset();
        self.std_dev.reset();
        self.loss.reset();

        for (id, stats) in retained.iter() {
            if let Err(e) = self.render_target(id, stats) {
                warn!(target_id = %id, error = %e, "skipping target");
            }
        }

        self.up.set(1.0);

        let mut families = Vec::with_capacity(6);
        families.extend(self.best.collect());
        families.extend(self.worst.collect());
        families.extend(self.mean.collect());
        families.extend(self.std_dev.collect());
        families.extend(self.loss.collect());
        families.extend(self.up.collect());

        debug!(targets = retained.len(), "rendered probe snapshot");

        if let Some(h) = &self.render_duration {
            h.observe(start.elapsed().as_secs_f64());
        }

        families
    }

    fn render_target(&self, id: &TargetId, stats: &ProbeStats) -> Result<()> {
        let labels = id.labels()?;

        if stats.has_replies() {
            self.best.set(&labels, stats.best)?;
            self.worst.set(&labels, stats.worst)?;
            self.mean.set(&labels, stats.mean)?;
            self.std_dev.set(&labels, stats.std_dev)?;
        }

        // NaN when nothing was sent yet.
        self.loss
            .get_metric_with_label_values(labels.values())?
            .set(stats.loss_ratio());

        Ok(())
    }
}

impl Collector for SnapshotExporter {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::with_capacity(6);
        descs.extend(self.best.desc());
        descs.extend(self.worst.desc());
        descs.extend(self.mean.desc());
        descs.extend(self.std_dev.desc());
        descs.extend(self.loss.desc());
        descs.extend(self.up.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;

    const TARGET: &str = "a n1 10.0.0.1 h1 b n2 10.0.0.2 h2";

    fn stats(sent: u64, lost: u64) -> ProbeStats {
        ProbeStats {
            best: 1.0,
            worst: 9.0,
            mean: 4.0,
            std_dev: 2.5,
            packets_sent: sent,
            packets_lost: lost,
        }
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        families.iter().find(|mf| mf.get_name() == name)
    }

    fn single_value(families: &[MetricFamily], name: &str) -> Option<f64> {
        let mf = family(families, name)?;
        let metrics = mf.get_metric();
        if metrics.len() != 1 {
            return None;
        }
        Some(metrics[0].get_gauge().get_value())
    }

    fn exporter_with(entries: Vec<(&str, ProbeStats)>) -> (Arc<FakeEngine>, SnapshotExporter) {
        let engine = Arc::new(FakeEngine::default());
        engine.pending_export.lock().extend(
            entries
                .into_iter()
                .map(|(id, s)| (TargetId::from_raw(id), s)),
        );
        let exporter = SnapshotExporter::new(engine.clone()).expect("valid metrics");
        (engine, exporter)
    }

    #[test]
    fn test_render_scales_rtt_and_reports_loss_ratio() {
        let (_engine, exporter) = exporter_with(vec![(TARGET, stats(10, 3))]);

        let families = exporter.render();

        assert_eq!(single_value(&families, "ping_rtt_best_seconds"), Some(0.001));
        assert_eq!(single_value(&families, "ping_rtt_worst_seconds"), Some(0.009));
        assert_eq!(single_value(&families, "ping_rtt_mean_seconds"), Some(0.004));
        assert_eq!(
            single_value(&families, "ping_rtt_std_deviation_seconds"),
            Some(0.0025)
        );
        let loss = single_value(&families, "ping_loss_percent").expect("loss gauge");
        assert!((loss - 0.3).abs() < 1e-12, "loss={loss}");
        assert_eq!(single_value(&families, "ping_up"), Some(1.0));
    }

    #[test]
    fn test_render_labels_with_decoded_identity() {
        let (_engine, exporter) = exporter_with(vec![(TARGET, stats(10, 0))]);

        let families = exporter.render();
        let mf = family(&families, "ping_loss_percent").expect("loss family");
        let labels: HashMap<&str, &str> = mf.get_metric()[0]
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();

        assert_eq!(labels.len(), 8);
        assert_eq!(labels["src_pod"], "a");
        assert_eq!(labels["src_node"], "n1");
        assert_eq!(labels["src_pod_ip"], "10.0.0.1");
        assert_eq!(labels["src_host_ip"], "h1");
        assert_eq!(labels["dst_pod"], "b");
        assert_eq!(labels["dst_node"], "n2");
        assert_eq!(labels["dst_pod_ip"], "10.0.0.2");
        assert_eq!(labels["dst_host_ip"], "h2");
    }

    #[test]
    fn test_all_lost_emits_only_loss() {
        let (_engine, exporter) = exporter_with(vec![(TARGET, stats(5, 5))]);

        let families = exporter.render();

        assert_eq!(single_value(&families, "ping_loss_percent"), Some(1.0));
        let rtt = family(&families, "ping_rtt_best_seconds");
        assert!(rtt.map_or(true, |mf| mf.get_metric().is_empty()));
    }

    #[test]
    fn test_nothing_sent_reports_nan_loss() {
        let (_engine, exporter) = exporter_with(vec![(TARGET, stats(0, 0))]);

        let families = exporter.render();

        let loss = single_value(&families, "ping_loss_percent").expect("loss gauge");
        assert!(loss.is_nan());
    }

    #[test]
    fn test_empty_pull_keeps_previous_snapshot() {
        let (engine, exporter) = exporter_with(vec![(TARGET, stats(10, 1))]);

        let first = exporter.render();
        assert!(engine.pending_export.lock().is_empty());

        let second = exporter.render();
        assert_eq!(
            single_value(&first, "ping_loss_percent"),
            single_value(&second, "ping_loss_percent")
        );
    }

    #[test]
    fn test_non_empty_pull_replaces_snapshot_wholesale() {
        let other = "a n1 10.0.0.1 h1 c n3 10.0.0.3 h3";
        let (engine, exporter) = exporter_with(vec![(TARGET, stats(10, 1))]);
        exporter.render();

        engine
            .pending_export
            .lock()
            .insert(TargetId::from_raw(other), stats(4, 2));
        let families = exporter.render();

        let mf = family(&families, "ping_loss_percent").expect("loss family");
        assert_eq!(mf.get_metric().len(), 1);
        assert_eq!(mf.get_metric()[0].get_gauge().get_value(), 0.5);
    }

    #[test]
    fn test_first_empty_pull_renders_only_up() {
        let (_engine, exporter) = exporter_with(Vec::new());

        let families = exporter.render();

        assert_eq!(single_value(&families, "ping_up"), Some(1.0));
        let loss = family(&families, "ping_loss_percent");
        assert!(loss.map_or(true, |mf| mf.get_metric().is_empty()));
    }

    #[test]
    fn test_malformed_key_is_skipped() {
        let (_engine, exporter) =
            exporter_with(vec![("short key", stats(3, 0)), (TARGET, stats(3, 0))]);

        let families = exporter.render();

        let mf = family(&families, "ping_loss_percent").expect("loss family");
        assert_eq!(mf.get_metric().len(), 1);
    }

    #[test]
    fn test_descriptors_cover_all_families() {
        let (_engine, exporter) = exporter_with(Vec::new());
        let names: Vec<&str> = exporter
            .desc()
            .iter()
            .map(|d| d.fq_name.as_str())
            .collect();

        assert_eq!(
            names,
            vec![
                "ping_rtt_best_seconds",
                "ping_rtt_worst_seconds",
                "ping_rtt_mean_seconds",
                "ping_rtt_std_deviation_seconds",
                "ping_loss_percent",
                "ping_up",
            ]
        );
    }
}
