//! Bidirectional event↔article graph.
//!
//! The index is append-only: records are upserted and links are added, never
//! removed. It is also never assumed to be fully consistent with the outside
//! world. An article may be linked to an event before either record has been
//! supplied, and lookups simply skip ids that do not resolve. Dangling ids are
//! lenience, not errors.

use crate::vector::FeatureVector;
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A scalar metadata value attached to an event or article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}
impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Int(n)
    }
}
impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Float(n)
    }
}
impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A real-world happening that several articles cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub title: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EventRecord {
    pub fn new(event_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            title: title.into(),
            start_time: None,
            end_time: None,
            entities: Vec::new(),
            topics: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_span(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start);
        self.end_time = end;
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// When an article was published, as supplied by the retrieval layer.
///
/// Upstream feeds hand over either a parsed timestamp or the raw string they
/// scraped. Strings are parsed lazily by [`PublishedAt::to_datetime`]; one
/// that does not parse is kept verbatim but contributes no time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedAt {
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl PublishedAt {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PublishedAt::Timestamp(ts) => Some(*ts),
            PublishedAt::Text(s) => parse_timestamp(s),
        }
    }
}

impl From<DateTime<Utc>> for PublishedAt {
    fn from(ts: DateTime<Utc>) -> Self {
        PublishedAt::Timestamp(ts)
    }
}
impl From<&str> for PublishedAt {
    fn from(s: &str) -> Self {
        PublishedAt::Text(s.to_string())
    }
}
impl From<String> for PublishedAt {
    fn from(s: String) -> Self {
        PublishedAt::Text(s)
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339, offset-bearing date-times without seconds or with a
/// colon-less offset (`Z` counts as `+00:00`), naive date-times (`T` or space
/// separated, optional fractional seconds, optional minutes and seconds) and
/// bare dates. Naive values are taken as UTC; bare dates as midnight UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const OFFSET_FORMATS: [&str; 8] = [
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%:z",
        "%Y-%m-%dT%H:%M%z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M%:z",
        "%Y-%m-%d %H:%M%z",
    ];
    let zoned = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&zoned, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Some(naive) = parse_date_hour(s) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `YYYY-MM-DDTHH`; chrono's parser insists on minutes.
fn parse_date_hour(s: &str) -> Option<NaiveDateTime> {
    let (date, hour) = s.split_once(['T', ' '])?;
    if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(hour.parse().ok()?, 0, 0)
}

/// One piece of coverage from one outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub article_id: String,
    /// Publishing outlet. Fingerprints and time series are keyed by this.
    pub source: String,
    #[serde(default)]
    pub published_at: Option<PublishedAt>,
    #[serde(default)]
    pub url: Option<String>,
    /// Events this article covers. Kept in sync by [`EventArticleIndex`].
    #[serde(default)]
    pub event_ids: Vec<String>,
    #[serde(default)]
    pub feature_vector: Option<FeatureVector>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ArticleRecord {
    pub fn new(article_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            source: source.into(),
            published_at: None,
            url: None,
            event_ids: Vec::new(),
            feature_vector: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_ids.push(event_id.into());
        self
    }

    pub fn with_published_at(mut self, published_at: impl Into<PublishedAt>) -> Self {
        self.published_at = Some(published_at.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_vector(mut self, vector: impl Into<FeatureVector>) -> Self {
        self.feature_vector = Some(vector.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Publication time, if present and parseable.
    pub fn published_timestamp(&self) -> Option<DateTime<Utc>> {
        self.published_at.as_ref().and_then(PublishedAt::to_datetime)
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// In-memory bidirectional map between events and articles.
///
/// Iteration order everywhere is first-seen order: events in the order they
/// were added or first linked, articles in the order they were added or first
/// linked, adjacency lists in link order.
///
/// # Example
///
/// ```rust
/// use slant::{ArticleRecord, EventArticleIndex};
///
/// let mut index = EventArticleIndex::new();
/// index.add_article(ArticleRecord::new("a1", "wire").with_event("e1"));
///
/// // Linking an unknown event creates a placeholder titled by its id.
/// assert_eq!(index.event("e1").unwrap().title, "e1");
/// assert_eq!(index.get_articles_for_event("e1").len(), 1);
/// assert!(index.get_articles_for_event("missing").is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct EventArticleIndex {
    events: HashMap<String, EventRecord>,
    articles: HashMap<String, ArticleRecord>,
    event_articles: HashMap<String, Vec<String>>,
    article_events: HashMap<String, Vec<String>>,
    event_order: Vec<String>,
    article_order: Vec<String>,
}

impl EventArticleIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an event by id.
    pub fn add_event(&mut self, event: EventRecord) {
        self.ensure_event_slot(&event.event_id);
        self.events.insert(event.event_id.clone(), event);
    }

    /// Insert or replace an article by id, then link every event it names.
    ///
    /// Links recorded before the replacement are kept: they are merged back
    /// into the new record's `event_ids` so the record never disagrees with
    /// the adjacency maps.
    pub fn add_article(&mut self, mut article: ArticleRecord) {
        let article_id = article.article_id.clone();
        self.ensure_article_slot(&article_id);

        let declared = std::mem::take(&mut article.event_ids);
        if let Some(existing) = self.article_events.get(&article_id) {
            article.event_ids = existing.clone();
        }
        self.articles.insert(article_id.clone(), article);

        for event_id in declared {
            self.link_article_to_event(&article_id, &event_id);
        }
    }

    /// Link `article_id` to `event_id`.
    ///
    /// This is the only place the two adjacency maps and the article's own
    /// `event_ids` are written. An unknown event is created as a placeholder
    /// titled by its id. Linking twice is a no-op.
    pub fn link_article_to_event(&mut self, article_id: &str, event_id: &str) {
        if !self.events.contains_key(event_id) {
            tracing::debug!(event_id, article_id, "creating placeholder event on link");
            self.add_event(EventRecord::new(event_id, event_id));
        }
        self.ensure_article_slot(article_id);

        if let Some(ids) = self.event_articles.get_mut(event_id) {
            push_unique(ids, article_id);
        }
        if let Some(ids) = self.article_events.get_mut(article_id) {
            push_unique(ids, event_id);
        }
        if let Some(article) = self.articles.get_mut(article_id) {
            push_unique(&mut article.event_ids, event_id);
        }
    }

    /// Articles linked to `event_id`, in link order. Unknown ids resolve to
    /// an empty list; linked ids without a record are skipped.
    pub fn get_articles_for_event(&self, event_id: &str) -> Vec<&ArticleRecord> {
        self.article_ids_for_event(event_id)
            .iter()
            .filter_map(|id| self.articles.get(id))
            .collect()
    }

    /// Events linked to `article_id`, in link order.
    pub fn get_events_for_article(&self, article_id: &str) -> Vec<&EventRecord> {
        self.event_ids_for_article(article_id)
            .iter()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    /// Raw adjacency list for an event, including ids with no article record.
    pub fn article_ids_for_event(&self, event_id: &str) -> &[String] {
        self.event_articles
            .get(event_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Raw adjacency list for an article, including ids with no event record.
    pub fn event_ids_for_article(&self, article_id: &str) -> &[String] {
        self.article_events
            .get(article_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn event(&self, event_id: &str) -> Option<&EventRecord> {
        self.events.get(event_id)
    }

    pub fn article(&self, article_id: &str) -> Option<&ArticleRecord> {
        self.articles.get(article_id)
    }

    /// Event ids in first-seen order.
    pub fn event_ids(&self) -> &[String] {
        &self.event_order
    }

    /// Article records in first-seen order.
    pub fn articles(&self) -> impl Iterator<Item = &ArticleRecord> {
        self.article_order
            .iter()
            .filter_map(|id| self.articles.get(id))
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    fn ensure_event_slot(&mut self, event_id: &str) {
        if !self.event_articles.contains_key(event_id) {
            self.event_articles.insert(event_id.to_string(), Vec::new());
            self.event_order.push(event_id.to_string());
        }
    }

    fn ensure_article_slot(&mut self, article_id: &str) {
        if !self.article_events.contains_key(article_id) {
            self.article_events.insert(article_id.to_string(), Vec::new());
            self.article_order.push(article_id.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Serializable copy of the whole index, in first-seen order.
    pub fn snapshot(&self) -> IndexSnapshot {
        let events = self
            .event_order
            .iter()
            .filter_map(|id| self.events.get(id).map(|e| (id.clone(), e.clone())))
            .collect();
        let articles = self
            .articles()
            .map(|a| (a.article_id.clone(), a.clone()))
            .collect();
        let event_articles = self
            .event_order
            .iter()
            .map(|id| (id.clone(), self.article_ids_for_event(id).to_vec()))
            .collect();
        let article_events = self
            .article_order
            .iter()
            .map(|id| (id.clone(), self.event_ids_for_article(id).to_vec()))
            .collect();
        IndexSnapshot {
            events,
            articles,
            event_articles,
            article_events,
        }
    }

    /// Rebuild an index from a snapshot.
    ///
    /// Adjacency lists are restored verbatim, then every pair is re-linked so
    /// a hand-edited snapshot that lists a link on only one side comes back
    /// mutually consistent.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        let mut index = Self::new();
        for (_, event) in snapshot.events {
            index.add_event(event);
        }
        for (id, ids) in &snapshot.event_articles {
            index.ensure_event_slot(id);
            if let Some(slot) = index.event_articles.get_mut(id) {
                *slot = ids.clone();
            }
        }
        for (id, ids) in &snapshot.article_events {
            index.ensure_article_slot(id);
            if let Some(slot) = index.article_events.get_mut(id) {
                *slot = ids.clone();
            }
        }
        for (_, article) in snapshot.articles {
            index.ensure_article_slot(&article.article_id);
            index.articles.insert(article.article_id.clone(), article);
        }

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (event_id, article_ids) in &snapshot.event_articles {
            pairs.extend(article_ids.iter().map(|a| (a.clone(), event_id.clone())));
        }
        for (article_id, event_ids) in &snapshot.article_events {
            pairs.extend(event_ids.iter().map(|e| (article_id.clone(), e.clone())));
        }
        let declared: Vec<(String, String)> = index
            .articles
            .values()
            .flat_map(|a| {
                a.event_ids
                    .iter()
                    .map(|e| (a.article_id.clone(), e.clone()))
            })
            .collect();
        pairs.extend(declared);
        for (article_id, event_id) in pairs {
            index.link_article_to_event(&article_id, &event_id);
        }
        index
    }

    /// Write a pretty-printed JSON snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.snapshot())?;
        writer.flush()?;
        Ok(())
    }

    /// Read a JSON snapshot written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: IndexSnapshot = serde_json::from_reader(reader)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Flat, serializable form of an [`EventArticleIndex`].
///
/// Every field serializes as a JSON object keyed by id. Entries are kept as
/// ordered pairs so the index's first-seen order survives a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(with = "ordered_map")]
    pub events: Vec<(String, EventRecord)>,
    #[serde(with = "ordered_map")]
    pub articles: Vec<(String, ArticleRecord)>,
    #[serde(with = "ordered_map")]
    pub event_articles: Vec<(String, Vec<String>)>,
    #[serde(with = "ordered_map")]
    pub article_events: Vec<(String, Vec<String>)>,
}

/// JSON object <-> `Vec<(String, V)>`, preserving document order.
mod ordered_map {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use serde::ser::{Serialize, SerializeMap, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
