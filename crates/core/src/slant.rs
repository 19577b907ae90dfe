//! Slant: editorial-bias and narrative-signal analytics over an event/article graph.
//!
//! The core primitive is an [`ArticleRecord`] linked to one or more
//! [`EventRecord`]s. Every article covering the same event contributes its
//! feature vector to the event's **centroid** (the consensus coverage); an
//! article's **deviation** is its distance from that centroid.
//!
//! Three layers build on each other:
//!
//! - [`EventArticleIndex`] stores the bidirectional event↔article graph.
//! - [`BiasAnalyzer`] reduces linked vectors to centroids, deviations,
//!   per-source fingerprints and rumor flags.
//! - [`TemporalAnalyzer`] turns deviations into per-source time series and
//!   derives drift, rolling averages and burst windows.
//!
//! # Quick start
//!
//! ```rust
//! use slant::{ArticleRecord, BiasAnalyzer, EventArticleIndex, FeatureVector};
//!
//! let mut index = EventArticleIndex::new();
//! index.add_article(
//!     ArticleRecord::new("a1", "wire")
//!         .with_event("quake")
//!         .with_vector(FeatureVector::Dense(vec![0.0, 0.0])),
//! );
//! index.add_article(
//!     ArticleRecord::new("a2", "tabloid")
//!         .with_event("quake")
//!         .with_vector(FeatureVector::Dense(vec![2.0, 0.0])),
//! );
//!
//! let bias = BiasAnalyzer::new();
//! let fingerprint = bias.source_bias_fingerprint(&index, "quake").unwrap();
//! assert_eq!(fingerprint["tabloid"], 1.0);
//! ```

mod bias;
mod index;
mod temporal;
mod vector;

pub use bias::BiasAnalyzer;
pub use index::{
    parse_timestamp, ArticleRecord, EventArticleIndex, EventRecord, IndexSnapshot, Metadata,
    MetadataValue, PublishedAt,
};
pub use temporal::{
    BurstWindow, SourceTimeSeries, TemporalAnalyzer, TimePoint, DEFAULT_MIN_BURSTS,
};
pub use vector::{average_vectors, euclidean_distance, FeatureVector, VectorKind};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SlantError {
    #[error("vector length mismatch: expected {expected}, got {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("vector kind mismatch: cannot combine {left} with {right}")]
    KindMismatch { left: VectorKind, right: VectorKind },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SlantError>;
