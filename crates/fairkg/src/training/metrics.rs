//! Metric sinks and the discriminator accuracy tally.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Receives scalar metrics keyed by name and step.
pub trait MetricLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize);
}

impl<L: MetricLogger + ?Sized> MetricLogger for Box<L> {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        (**self).log_metric(name, value, step);
    }
}

/// Emits every metric as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricLogger;

impl MetricLogger for TracingMetricLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        tracing::info!(metric = name, value, step, "metric");
    }
}

/// One metric row, as written to JSONL.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub step: usize,
}

/// Appends metrics to a JSONL file, one object per line.
pub struct JsonlMetricLogger {
    writer: std::io::BufWriter<std::fs::File>,
}

impl JsonlMetricLogger {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open metrics file {}: {e}", path.display()))?;
        Ok(Self {
            writer: std::io::BufWriter::new(file),
        })
    }
}

impl MetricLogger for JsonlMetricLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        let record = MetricRecord {
            name: name.to_string(),
            value,
            step,
        };
        let written = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            tracing::warn!(metric = name, "Failed to write metric: {e}");
        }
    }
}

/// Keeps every logged metric in memory.
#[derive(Debug, Default, Clone)]
pub struct MetricsHistory {
    records: Vec<MetricRecord>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Values logged under `name`, in order, with their steps.
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        self.records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| (r.step, r.value))
            .collect()
    }

    /// Most recent value logged under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl MetricLogger for MetricsHistory {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        self.records.push(MetricRecord {
            name: name.to_string(),
            value,
            step,
        });
    }
}

/// Fans each metric out to several loggers.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, logger: impl MetricLogger + 'static) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricLogger for MultiLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        for logger in &mut self.loggers {
            logger.log_metric(name, value, step);
        }
    }
}

/// Correct-prediction counts per fairness slot, accumulated across batches.
///
/// Owned by the trainer; counts only reset when an accuracy is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccuracyTally {
    correct: Vec<usize>,
}

impl AccuracyTally {
    pub fn new(num_slots: usize) -> Self {
        Self {
            correct: vec![0; num_slots],
        }
    }

    pub fn add(&mut self, slot: usize, correct: usize) {
        self.correct[slot] += correct;
    }

    pub fn correct(&self, slot: usize) -> usize {
        self.correct[slot]
    }

    /// `100 * correct / dataset_size`, then reset the slot to zero.
    pub fn take_accuracy(&mut self, slot: usize, dataset_size: usize) -> f64 {
        let correct = std::mem::take(&mut self.correct[slot]);
        if dataset_size == 0 {
            return 0.0;
        }
        100.0 * correct as f64 / dataset_size as f64
    }
}
