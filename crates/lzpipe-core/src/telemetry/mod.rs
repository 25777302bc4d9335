use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod tags;
pub mod worker;

pub use worker::{DefaultSchedulerTelemetry, SchedulerTelemetry};

/// Histogram summary captured in telemetry snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

impl HistogramSnapshot {
    fn merge(self, other: HistogramSnapshot) -> HistogramSnapshot {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count.saturating_add(other.count);
        let total = self.total.saturating_add(other.total);
        HistogramSnapshot {
            count,
            total,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            mean: total as f64 / count as f64,
        }
    }
}

/// Current value of one metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(u64),
    Histogram(HistogramSnapshot),
}

/// One metric name plus the labels it was recorded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
}

impl SeriesSnapshot {
    fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name
            && labels
                .iter()
                .all(|(key, value)| self.labels.get(*key).map(String::as_str) == Some(*value))
    }
}

/// Point-in-time view of every recorded series, ordered by name then labels.
///
/// The lookup helpers fold all series of a name that carry the requested
/// labels: counters and gauges are summed, histograms are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub series: Vec<SeriesSnapshot>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counter_with(name, &[])
    }

    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        self.fold(name, labels, |value| match value {
            MetricValue::Counter(count) => Some(count),
            _ => None,
        })
        .map(|counts| counts.fold(0u64, u64::saturating_add))
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauge_with(name, &[])
    }

    pub fn gauge_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        self.fold(name, labels, |value| match value {
            MetricValue::Gauge(level) => Some(level),
            _ => None,
        })
        .map(|levels| levels.fold(0u64, u64::saturating_add))
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histogram_with(name, &[])
    }

    pub fn histogram_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        self.fold(name, labels, |value| match value {
            MetricValue::Histogram(histogram) => Some(histogram),
            _ => None,
        })
        .map(|histograms| histograms.fold(HistogramSnapshot::default(), HistogramSnapshot::merge))
    }

    /// Selects matching values, or `None` when no series matches at all.
    fn fold<'a, T: 'a>(
        &'a self,
        name: &'a str,
        labels: &'a [(&'a str, &'a str)],
        select: impl Fn(MetricValue) -> Option<T> + 'a,
    ) -> Option<impl Iterator<Item = T> + 'a> {
        let mut values = self
            .series
            .iter()
            .filter(move |series| series.matches(name, labels))
            .filter_map(move |series| select(series.value))
            .peekable();
        values.peek()?;
        Some(values)
    }
}

/// Increments a counter series by `value`.
#[inline]
pub fn increment_counter(name: &'static str, value: u64, labels: &[(&str, &str)]) {
    #[cfg(feature = "telemetry")]
    registry::update(name, labels, registry::Update::Add(value));

    let _ = (name, value, labels);
}

/// Records a histogram sample.
#[inline]
pub fn record_histogram(name: &'static str, value: u64, labels: &[(&str, &str)]) {
    #[cfg(feature = "telemetry")]
    registry::update(name, labels, registry::Update::Sample(value));

    let _ = (name, value, labels);
}

/// Sets a gauge series to an absolute value.
#[inline]
pub fn set_gauge(name: &'static str, value: u64, labels: &[(&str, &str)]) {
    #[cfg(feature = "telemetry")]
    registry::update(name, labels, registry::Update::Set(value));

    let _ = (name, value, labels);
}

/// Raises a gauge series to `value` if it is currently lower.
#[inline]
pub fn max_gauge(name: &'static str, value: u64, labels: &[(&str, &str)]) {
    #[cfg(feature = "telemetry")]
    registry::update(name, labels, registry::Update::Raise(value));

    let _ = (name, value, labels);
}

pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    {
        registry::snapshot()
    }

    #[cfg(not(feature = "telemetry"))]
    {
        TelemetrySnapshot::default()
    }
}

pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::reset();
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use super::{HistogramSnapshot, MetricValue, SeriesSnapshot, TelemetrySnapshot};

    pub(super) enum Update {
        Add(u64),
        Set(u64),
        Raise(u64),
        Sample(u64),
    }

    type SeriesKey = (&'static str, Vec<(String, String)>);

    #[derive(Debug, Clone, Copy)]
    enum Series {
        Counter(u64),
        Gauge(u64),
        Histogram {
            count: u64,
            total: u64,
            min: u64,
            max: u64,
        },
    }

    impl Series {
        fn new(update: &Update) -> Self {
            match update {
                Update::Add(_) => Series::Counter(0),
                Update::Set(_) | Update::Raise(_) => Series::Gauge(0),
                Update::Sample(_) => Series::Histogram {
                    count: 0,
                    total: 0,
                    min: u64::MAX,
                    max: 0,
                },
            }
        }

        /// Applies `update`; a series keeps the kind it was created with and
        /// ignores updates of another kind.
        fn apply(&mut self, update: Update) {
            match (self, update) {
                (Series::Counter(count), Update::Add(value)) => {
                    *count = count.saturating_add(value);
                }
                (Series::Gauge(level), Update::Set(value)) => *level = value,
                (Series::Gauge(level), Update::Raise(value)) => *level = (*level).max(value),
                (
                    Series::Histogram {
                        count,
                        total,
                        min,
                        max,
                    },
                    Update::Sample(value),
                ) => {
                    *count = count.saturating_add(1);
                    *total = total.saturating_add(value);
                    *min = (*min).min(value);
                    *max = (*max).max(value);
                }
                _ => {}
            }
        }

        fn value(self) -> MetricValue {
            match self {
                Series::Counter(count) => MetricValue::Counter(count),
                Series::Gauge(level) => MetricValue::Gauge(level),
                Series::Histogram {
                    count,
                    total,
                    min,
                    max,
                } => MetricValue::Histogram(HistogramSnapshot {
                    count,
                    total,
                    min: if count == 0 { 0 } else { min },
                    max,
                    mean: if count == 0 {
                        0.0
                    } else {
                        total as f64 / count as f64
                    },
                }),
            }
        }
    }

    fn store() -> MutexGuard<'static, BTreeMap<SeriesKey, Series>> {
        static STORE: OnceLock<Mutex<BTreeMap<SeriesKey, Series>>> = OnceLock::new();
        match STORE.get_or_init(Mutex::default).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn key(name: &'static str, labels: &[(&str, &str)]) -> SeriesKey {
        let mut owned: Vec<(String, String)> = labels
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        owned.sort();
        (name, owned)
    }

    pub(super) fn update(name: &'static str, labels: &[(&str, &str)], update: Update) {
        let mut store = store();
        store
            .entry(key(name, labels))
            .or_insert_with(|| Series::new(&update))
            .apply(update);
    }

    pub(super) fn snapshot() -> TelemetrySnapshot {
        let series = store()
            .iter()
            .map(|((name, labels), series)| SeriesSnapshot {
                name: (*name).to_owned(),
                labels: labels.iter().cloned().collect(),
                value: series.value(),
            })
            .collect();
        TelemetrySnapshot { series }
    }

    pub(super) fn reset() {
        store().clear();
    }
}
