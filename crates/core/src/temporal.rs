//! Deviation over time.
//!
//! [`TemporalAnalyzer::build_source_series`] stamps every article deviation
//! with its publication time and buckets it by source. The remaining
//! operations are pure functions over lists of [`TimePoint`]s. Each one sorts
//! its own input by timestamp when order matters, because series are stored
//! in insertion order and never pre-sorted.

use crate::bias::BiasAnalyzer;
use crate::index::EventArticleIndex;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest number of bursts that makes a repetitive-burst window.
pub const DEFAULT_MIN_BURSTS: usize = 2;

/// One timestamped sample.
///
/// `value` is a deviation, a drift magnitude or an average depending on which
/// operation produced the point; the identity fields are carried through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub source: String,
    pub event_id: String,
    pub article_id: String,
}

impl TimePoint {
    /// Same identity and timestamp, new value.
    fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }
}

/// All samples for one source, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTimeSeries {
    pub source: String,
    pub points: Vec<TimePoint>,
}

impl SourceTimeSeries {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            points: Vec::new(),
        }
    }

    /// Copy of the points in timestamp order. Ties keep insertion order.
    pub fn sorted_points(&self) -> Vec<TimePoint> {
        sorted_by_time(&self.points)
    }
}

/// Span used to group bursts: either a duration or a number of seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BurstWindow {
    Span(Duration),
    Seconds(f64),
}

impl BurstWindow {
    pub fn to_duration(self) -> Duration {
        match self {
            BurstWindow::Span(d) => d,
            BurstWindow::Seconds(secs) => Duration::microseconds((secs * 1_000_000.0).round() as i64),
        }
    }
}

impl From<Duration> for BurstWindow {
    fn from(d: Duration) -> Self {
        BurstWindow::Span(d)
    }
}
impl From<f64> for BurstWindow {
    fn from(secs: f64) -> Self {
        BurstWindow::Seconds(secs)
    }
}
/// Out-of-range second counts saturate at the widest representable span.
impl From<i64> for BurstWindow {
    fn from(secs: i64) -> Self {
        let saturated = if secs < 0 { Duration::MIN } else { Duration::MAX };
        BurstWindow::Span(Duration::try_seconds(secs).unwrap_or(saturated))
    }
}

/// Builds per-source deviation series and derives drift and burst signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemporalAnalyzer;

impl TemporalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// One [`TimePoint`] per (event, article) pair that has both a deviation
    /// and a parseable publication time, bucketed by source.
    ///
    /// Events are visited in first-seen order and each centroid is computed
    /// once. Points within a series are in emission order, not chronological.
    /// An article linked to several events contributes one point per event.
    ///
    /// # Errors
    ///
    /// Propagates vector kind/length mismatches from [`BiasAnalyzer`].
    pub fn build_source_series(
        &self,
        index: &EventArticleIndex,
        bias: &BiasAnalyzer,
    ) -> Result<BTreeMap<String, SourceTimeSeries>> {
        let mut series: BTreeMap<String, SourceTimeSeries> = BTreeMap::new();
        for event_id in index.event_ids() {
            let Some(centroid) = bias.compute_event_centroid(index, event_id)? else {
                continue;
            };
            for article_id in index.article_ids_for_event(event_id) {
                let Some(article) = index.article(article_id) else {
                    continue;
                };
                let Some(deviation) = bias.compute_article_deviation(article, &centroid)? else {
                    continue;
                };
                let Some(timestamp) = article.published_timestamp() else {
                    tracing::debug!(
                        article_id = %article_id,
                        "no parseable published_at; dropping from series"
                    );
                    continue;
                };
                series
                    .entry(article.source.clone())
                    .or_insert_with(|| SourceTimeSeries::new(article.source.clone()))
                    .points
                    .push(TimePoint {
                        timestamp,
                        value: deviation,
                        source: article.source.clone(),
                        event_id: event_id.clone(),
                        article_id: article_id.clone(),
                    });
            }
        }
        Ok(series)
    }

    /// Absolute change in value between consecutive samples, time ordered.
    ///
    /// Each output point takes its timestamp and identity from the later
    /// sample of its pair. Fewer than two samples yield nothing.
    pub fn narrative_drift(&self, series: &SourceTimeSeries) -> Vec<TimePoint> {
        series
            .sorted_points()
            .windows(2)
            .map(|pair| pair[1].with_value((pair[1].value - pair[0].value).abs()))
            .collect()
    }

    /// Trailing mean over at most `window_size` samples, time ordered.
    ///
    /// The window shrinks near the start of the series and never looks ahead.
    /// A zero window yields nothing.
    pub fn rolling_average(&self, points: &[TimePoint], window_size: usize) -> Vec<TimePoint> {
        if window_size == 0 {
            return Vec::new();
        }
        let sorted = sorted_by_time(points);
        (0..sorted.len())
            .map(|i| {
                let start = (i + 1).saturating_sub(window_size);
                let window = &sorted[start..=i];
                let mean = window.iter().map(|p| p.value).sum::<f64>() / window.len() as f64;
                sorted[i].with_value(mean)
            })
            .collect()
    }

    /// Samples whose value is strictly greater than `threshold`, in input order.
    pub fn detect_bursts(&self, points: &[TimePoint], threshold: f64) -> Vec<TimePoint> {
        points
            .iter()
            .filter(|p| p.value > threshold)
            .cloned()
            .collect()
    }

    /// Clusters of at least `min_bursts` bursts that start within `window`
    /// of an anchoring burst.
    ///
    /// Bursts are taken in timestamp order. Every burst anchors a chain that
    /// collects the following bursts while each lies within `window`
    /// (inclusive) of the anchor; the first one outside the window ends the
    /// chain even if a later burst would fit. Chains from different anchors
    /// may overlap.
    pub fn repetitive_burst_windows(
        &self,
        points: &[TimePoint],
        threshold: f64,
        window: impl Into<BurstWindow>,
        min_bursts: usize,
    ) -> Vec<Vec<TimePoint>> {
        let window = window.into().to_duration();
        let bursts: Vec<TimePoint> = sorted_by_time(points)
            .into_iter()
            .filter(|p| p.value > threshold)
            .collect();

        let mut windows = Vec::new();
        for (i, anchor) in bursts.iter().enumerate() {
            let mut chain = vec![anchor.clone()];
            for candidate in &bursts[i + 1..] {
                if candidate.timestamp - anchor.timestamp <= window {
                    chain.push(candidate.clone());
                } else {
                    break;
                }
            }
            if chain.len() >= min_bursts {
                windows.push(chain);
            }
        }
        windows
    }
}

fn sorted_by_time(points: &[TimePoint]) -> Vec<TimePoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.timestamp);
    sorted
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
