use anyhow::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};

use crate::target::{TargetLabels, LABEL_NAMES};

/// Engine-native round-trip times are milliseconds.
const NATIVE_UNITS_PER_SECOND: f64 = 1000.0;

/// Gauge family reporting an engine-native duration in seconds.
pub struct ScaledGauge {
    seconds: GaugeVec,
}

impl ScaledGauge {
    /// Creates `ping_<name>_seconds` labelled with the target identity.
    pub fn new(name: &str, help: &str) -> Result<Self> {
        let seconds = GaugeVec::new(
            Opts::new(format!("{name}_seconds"), format!("{help} in seconds")).namespace("ping"),
            &LABEL_NAMES,
        )?;

        Ok(Self { seconds })
    }

    pub fn desc(&self) -> Vec<&Desc> {
        self.seconds.desc()
    }

    /// Record `value` (native units) for one target.
    pub fn set(&self, labels: &TargetLabels<'_>, value: f32) -> Result<()> {
        self.seconds
            .get_metric_with_label_values(labels.values())?
            .set(f64::from(value) / NATIVE_UNITS_PER_SECOND);
        Ok(())
    }

    pub fn reset(&self) {
        self.seconds.reset();
    }

    pub fn collect(&self) -> Vec<MetricFamily> {
        self.seconds.collect()
    }
}
