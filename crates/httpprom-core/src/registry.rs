//! Metric registry.
//!
//! Series live in per-vector `DashMap`s keyed by label values in declaration
//! order. Counters are plain atomics; each histogram series sits behind its
//! own mutex so buckets, sum and count always move together. Nothing here
//! takes a registry-wide lock on the observation path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{MetricsError, Result};
use crate::histogram::HistogramSpec;
use crate::labels::LabelSet;

/// Metric type as written on the `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl MetricKind {
    /// Lower-case exposition name.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Registration request for one metric vector.
#[derive(Debug, Clone)]
pub struct MetricOpts {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    pub buckets: Option<HistogramSpec>,
}

impl MetricOpts {
    /// Counter vector with the given label names.
    pub fn counter(name: impl Into<String>, help: impl Into<String>, label_names: &[String]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Counter,
            label_names: label_names.to_vec(),
            buckets: None,
        }
    }

    /// Histogram vector with the given label names and buckets.
    pub fn histogram(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[String],
        buckets: HistogramSpec,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Histogram,
            label_names: label_names.to_vec(),
            buckets: Some(buckets),
        }
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_metric_name(&self.name) {
            return Err(MetricsError::InvalidName(self.name.clone()));
        }
        for (i, label) in self.label_names.iter().enumerate() {
            let reserved = self.kind == MetricKind::Histogram && label == "le";
            let duplicate = self.label_names[..i].contains(label);
            if !is_valid_label_name(label) || reserved || duplicate {
                return Err(MetricsError::InvalidLabelName {
                    metric: self.name.clone(),
                    label: label.clone(),
                });
            }
        }
        match (self.kind, &self.buckets) {
            (MetricKind::Histogram, None) => Err(MetricsError::InvalidBuckets(format!(
                "histogram {} has no buckets",
                self.name
            ))),
            (MetricKind::Counter, Some(_)) => Err(MetricsError::InvalidBuckets(format!(
                "counter {} cannot have buckets",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Valid metric names match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Valid label names match `[a-zA-Z_][a-zA-Z0-9_]*` and do not start with `__`.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Point-in-time view of one histogram series. Buckets are cumulative.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSample {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug)]
struct HistogramState {
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(len: usize) -> Self {
        Self { buckets: vec![0; len], sum: 0.0, count: 0 }
    }

    fn observe(&mut self, bounds: &[f64], v: f64) {
        self.count += 1;
        self.sum += v;
        // Cumulative: every bucket whose bound is >= v.
        for (slot, &le) in self.buckets.iter_mut().zip(bounds) {
            if v <= le {
                *slot += 1;
            }
        }
    }

    fn sample(&self, bounds: &[f64]) -> HistogramSample {
        HistogramSample {
            buckets: bounds.iter().copied().zip(self.buckets.iter().copied()).collect(),
            sum: self.sum,
            count: self.count,
        }
    }
}

enum Store {
    Counter(DashMap<Vec<String>, AtomicU64>),
    Histogram {
        spec: HistogramSpec,
        series: DashMap<Vec<String>, Mutex<HistogramState>>,
    },
}

/// A named metric partitioned by a fixed, ordered list of label names.
pub struct MetricVec {
    name: String,
    help: String,
    label_names: Vec<String>,
    store: Store,
}

impl MetricVec {
    fn new(opts: MetricOpts) -> Self {
        let store = match opts.buckets {
            Some(spec) => Store::Histogram { spec, series: DashMap::new() },
            None => Store::Counter(DashMap::new()),
        };
        Self {
            name: opts.name,
            help: opts.help,
            label_names: opts.label_names,
            store,
        }
    }

    /// Fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text of the `# HELP` line.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Declared label names, in exposition order.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Counter or histogram.
    pub fn kind(&self) -> MetricKind {
        match self.store {
            Store::Counter(_) => MetricKind::Counter,
            Store::Histogram { .. } => MetricKind::Histogram,
        }
    }

    fn buckets(&self) -> Option<&HistogramSpec> {
        match &self.store {
            Store::Counter(_) => None,
            Store::Histogram { spec, .. } => Some(spec),
        }
    }

    fn check_compatible(&self, opts: &MetricOpts) -> Result<()> {
        let reason = if self.kind() != opts.kind {
            Some(format!("kind {} != {}", self.kind().as_str(), opts.kind.as_str()))
        } else if self.label_names != opts.label_names {
            Some(format!("labels {:?} != {:?}", self.label_names, opts.label_names))
        } else if self.buckets() != opts.buckets.as_ref() {
            Some("bucket boundaries differ".to_string())
        } else if self.help != opts.help {
            Some("help text differs".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(MetricsError::Conflict { name: self.name.clone(), reason }),
            None => Ok(()),
        }
    }

    /// Resolve a label set into the series key (values in declaration order).
    fn key(&self, labels: &LabelSet) -> Result<Vec<String>> {
        let mismatch = || MetricsError::LabelMismatch {
            metric: self.name.clone(),
            expected: self.label_names.clone(),
            got: labels.names(),
        };
        if labels.len() != self.label_names.len() {
            return Err(mismatch());
        }
        self.label_names
            .iter()
            .map(|n| labels.get(n).map(str::to_string).ok_or_else(mismatch))
            .collect()
    }

    fn snapshot(&self) -> FamilySnapshot {
        let mut series: Vec<SeriesSnapshot> = match &self.store {
            Store::Counter(map) => map
                .iter()
                .map(|r| SeriesSnapshot {
                    label_values: r.key().clone(),
                    value: SampleValue::Counter(r.value().load(Ordering::Relaxed)),
                })
                .collect(),
            Store::Histogram { spec, series } => series
                .iter()
                .map(|r| {
                    let state = r.value().lock().unwrap_or_else(PoisonError::into_inner);
                    SeriesSnapshot {
                        label_values: r.key().clone(),
                        value: SampleValue::Histogram(state.sample(spec.bounds())),
                    }
                })
                .collect(),
        };
        series.sort_by(|a, b| a.label_values.cmp(&b.label_values));

        FamilySnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind(),
            label_names: self.label_names.clone(),
            series,
        }
    }
}

/// Counter handle.
#[derive(Clone)]
pub struct CounterVec(Arc<MetricVec>);

impl CounterVec {
    /// Increment by 1.
    pub fn inc(&self, labels: &LabelSet) -> Result<()> {
        self.inc_by(labels, 1)
    }

    /// Increment by an arbitrary value.
    pub fn inc_by(&self, labels: &LabelSet, v: u64) -> Result<()> {
        let key = self.0.key(labels)?;
        let Store::Counter(map) = &self.0.store else {
            return Err(MetricsError::Internal(format!("{} is not a counter", self.0.name)));
        };
        if let Some(c) = map.get(&key) {
            c.fetch_add(v, Ordering::Relaxed);
            return Ok(());
        }
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
        Ok(())
    }

    /// Current value of one series (0 if never incremented).
    pub fn get(&self, labels: &LabelSet) -> Result<u64> {
        let key = self.0.key(labels)?;
        match &self.0.store {
            Store::Counter(map) => Ok(map.get(&key).map_or(0, |c| c.load(Ordering::Relaxed))),
            Store::Histogram { .. } => {
                Err(MetricsError::Internal(format!("{} is not a counter", self.0.name)))
            }
        }
    }

    /// Registration details of the underlying vector.
    pub fn metric(&self) -> &MetricVec {
        &self.0
    }
}

/// Histogram handle.
#[derive(Clone)]
pub struct HistogramVec(Arc<MetricVec>);

impl HistogramVec {
    /// Record one value into the series for `labels`.
    pub fn observe(&self, labels: &LabelSet, v: f64) -> Result<()> {
        let key = self.0.key(labels)?;
        let Store::Histogram { spec, series } = &self.0.store else {
            return Err(MetricsError::Internal(format!("{} is not a histogram", self.0.name)));
        };
        let record = |state: &Mutex<HistogramState>| {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(spec.bounds(), v);
        };
        if let Some(state) = series.get(&key) {
            record(&state);
            return Ok(());
        }
        let state = series
            .entry(key)
            .or_insert_with(|| Mutex::new(HistogramState::new(spec.len())));
        record(&state);
        Ok(())
    }

    /// Current sample of one series (all zero if never observed).
    pub fn get(&self, labels: &LabelSet) -> Result<HistogramSample> {
        let key = self.0.key(labels)?;
        match &self.0.store {
            Store::Histogram { spec, series } => Ok(match series.get(&key) {
                Some(state) => state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .sample(spec.bounds()),
                None => HistogramState::new(spec.len()).sample(spec.bounds()),
            }),
            Store::Counter(_) => {
                Err(MetricsError::Internal(format!("{} is not a histogram", self.0.name)))
            }
        }
    }

    /// Registration details of the underlying vector.
    pub fn metric(&self) -> &MetricVec {
        &self.0
    }
}

/// Value of one series at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Counter(u64),
    Histogram(HistogramSample),
}

/// One label combination and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub label_values: Vec<String>,
    pub value: SampleValue,
}

/// One metric vector with all of its series.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    pub series: Vec<SeriesSnapshot>,
}

/// Immutable copy of every registered family, sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub families: Vec<FamilySnapshot>,
}

impl Snapshot {
    /// Family registered under `name`, if any.
    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.name == name)
    }
}

/// Process-level collection of metric vectors. Construct one and share it
/// through `Arc`; there is no global instance.
#[derive(Default)]
pub struct Registry {
    families: DashMap<String, Arc<MetricVec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vector, or return the existing one if it is identical.
    pub fn register(&self, opts: MetricOpts) -> Result<Arc<MetricVec>> {
        opts.validate()?;
        match self.families.entry(opts.name.clone()) {
            Entry::Occupied(e) => {
                e.get().check_compatible(&opts)?;
                Ok(Arc::clone(e.get()))
            }
            Entry::Vacant(e) => {
                tracing::debug!(metric = %opts.name, kind = opts.kind.as_str(), "registered metric");
                let vec = Arc::new(MetricVec::new(opts));
                e.insert(Arc::clone(&vec));
                Ok(vec)
            }
        }
    }

    /// Register a counter vector; see [`Registry::register`].
    pub fn register_counter(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[String],
    ) -> Result<CounterVec> {
        self.register(MetricOpts::counter(name, help, label_names))
            .map(CounterVec)
    }

    /// Register a histogram vector; see [`Registry::register`].
    pub fn register_histogram(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[String],
        buckets: HistogramSpec,
    ) -> Result<HistogramVec> {
        self.register(MetricOpts::histogram(name, help, label_names, buckets))
            .map(HistogramVec)
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Copy the current state of every family. Each series is read atomically;
    /// the page as a whole is not a transaction.
    pub fn snapshot(&self) -> Snapshot {
        let vecs: Vec<Arc<MetricVec>> = self.families.iter().map(|r| Arc::clone(r.value())).collect();
        let mut families: Vec<FamilySnapshot> = vecs.iter().map(|v| v.snapshot()).collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        Snapshot { families }
    }
}
