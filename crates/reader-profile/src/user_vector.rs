//! Reader stance model built on Slant.
//!
//! A [`UserVector`] maps entities and topics ("AI", "Regulation") to a signed
//! stance in `[-1, 1]` plus a confidence in `[0, 1]`. It learns from feedback:
//! liking an article pulls the reader's stances toward the article's, disliking
//! pushes them toward the opposite. Update strength decays as the reader
//! engages with more articles, so long-run estimates settle.
//!
//! Article stance maps are supplied by the caller; this crate never extracts
//! them from text.
//!
//! # Usage
//!
//! ```rust
//! use slant_reader::{StanceMap, UserVector};
//!
//! fn stances(pairs: &[(&str, f64)]) -> StanceMap {
//!     pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
//! }
//!
//! let mut user = UserVector::new("user_1");
//! user.like(&stances(&[("AI", 0.8), ("Regulation", -0.4)]), None);
//! user.dislike(&stances(&[("AI", -0.7), ("Regulation", 0.2)]), None);
//! assert!(user.get_value("AI", 0.0) > 0.0);
//!
//! let candidates = vec![
//!     stances(&[("AI", 0.9)]),
//!     stances(&[("AI", -0.9)]),
//!     stances(&[("Crypto", 1.0)]), // no overlap: never ranked
//! ];
//! let ranked = user.top_k(&candidates, 1, true, true);
//! assert_eq!(ranked.closest.unwrap()[0].id.to_string(), "0");
//! assert_eq!(ranked.farthest.unwrap()[0].id.to_string(), "1");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub use slant::SlantError as Error;
pub type Result<T> = std::result::Result<T, Error>;

/// An article's stance on each entity it covers.
pub type StanceMap = BTreeMap<String, f64>;

/// `alpha = DECAY_CONSTANT / (DECAY_CONSTANT + n_articles_engaged)`.
pub const DECAY_CONSTANT: f64 = 2.0;
/// Dislikes move stances less than likes.
pub const DISLIKE_STRENGTH_FACTOR: f64 = 0.6;
/// Confidence added to every entity touched by feedback.
pub const CONFIDENCE_STEP: f64 = 0.05;
/// Confidence an entity starts from the first time feedback touches it.
pub const INITIAL_CONFIDENCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Stance entries
// ---------------------------------------------------------------------------

/// One stance: a clamped value and a clamped confidence.
///
/// Fields are private so every write, including deserialization, goes
/// through the clamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStanceEntry")]
pub struct StanceEntry {
    value: f64,
    confidence: f64,
}

impl StanceEntry {
    pub fn new(value: f64, confidence: f64) -> Self {
        Self {
            value: value.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// -1 (against) to 1 (for).
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

#[derive(Deserialize)]
struct RawStanceEntry {
    value: f64,
    #[serde(default = "full_confidence")]
    confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl From<RawStanceEntry> for StanceEntry {
    fn from(raw: RawStanceEntry) -> Self {
        StanceEntry::new(raw.value, raw.confidence)
    }
}

// ---------------------------------------------------------------------------
// Ranking types
// ---------------------------------------------------------------------------

/// Articles to rank: keyed by id, or a plain list where the position is the id.
#[derive(Debug, Clone, Copy)]
pub enum Candidates<'a> {
    Keyed(&'a BTreeMap<String, StanceMap>),
    Listed(&'a [StanceMap]),
}

impl<'a> From<&'a BTreeMap<String, StanceMap>> for Candidates<'a> {
    fn from(m: &'a BTreeMap<String, StanceMap>) -> Self {
        Candidates::Keyed(m)
    }
}
impl<'a> From<&'a [StanceMap]> for Candidates<'a> {
    fn from(v: &'a [StanceMap]) -> Self {
        Candidates::Listed(v)
    }
}
impl<'a> From<&'a Vec<StanceMap>> for Candidates<'a> {
    fn from(v: &'a Vec<StanceMap>) -> Self {
        Candidates::Listed(v.as_slice())
    }
}

/// Identifier of a ranked candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateId {
    Key(String),
    Position(usize),
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateId::Key(k) => write!(f, "{k}"),
            CandidateId::Position(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArticle {
    pub id: CandidateId,
    pub distance: f64,
}

/// Result of [`UserVector::top_k`]. A side is `None` when it was not requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopK {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closest: Option<Vec<RankedArticle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farthest: Option<Vec<RankedArticle>>,
}

// ---------------------------------------------------------------------------
// UserVector
// ---------------------------------------------------------------------------

/// One reader's stance profile.
///
/// Persisted as `{user_id, stances: {entity: {value, confidence}},
/// n_articles_engaged}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserVector {
    user_id: String,
    #[serde(default)]
    stances: BTreeMap<String, StanceEntry>,
    /// Number of like/dislike calls so far. Drives the learning-rate decay.
    #[serde(default)]
    n_articles_engaged: u64,
}

impl UserVector {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stances: BTreeMap::new(),
            n_articles_engaged: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn stances(&self) -> &BTreeMap<String, StanceEntry> {
        &self.stances
    }

    pub fn n_articles_engaged(&self) -> u64 {
        self.n_articles_engaged
    }

    /// Set (or overwrite) the stance for `entity`. Both numbers are clamped.
    pub fn set_stance(&mut self, entity: impl Into<String>, value: f64, confidence: f64) {
        self.stances
            .insert(entity.into(), StanceEntry::new(value, confidence));
    }

    pub fn get_stance(&self, entity: &str) -> Option<&StanceEntry> {
        self.stances.get(entity)
    }

    /// Stance value for `entity`, or `default` if unknown.
    pub fn get_value(&self, entity: &str, default: f64) -> f64 {
        self.stances.get(entity).map_or(default, StanceEntry::value)
    }

    /// Euclidean distance to an article over the entities both sides know.
    ///
    /// Lower means more similar. Returns `f64::INFINITY` when there is no
    /// overlap, including when `article_stances` is empty.
    pub fn distance_to(&self, article_stances: &StanceMap) -> f64 {
        let mut overlap = false;
        let mut sum_sq = 0.0;
        for (entity, article_val) in article_stances {
            if let Some(entry) = self.stances.get(entity) {
                overlap = true;
                sum_sq += (entry.value - article_val).powi(2);
            }
        }
        if overlap {
            sum_sq.sqrt()
        } else {
            f64::INFINITY
        }
    }

    /// The `k` closest and/or `k` farthest candidates.
    ///
    /// Candidates with no overlapping entity (infinite distance) are dropped
    /// before ranking. Ranking is ascending by distance and stable, so ties
    /// keep candidate order: position order for listed candidates, key order
    /// (lexicographic, since keyed candidates are a `BTreeMap`) for keyed ones. `closest` is the first `k`, `farthest` the last
    /// `k` reversed (farthest first). Either side may hold fewer than `k`
    /// entries; `k == 0` yields empty sides.
    pub fn top_k<'a>(
        &self,
        articles: impl Into<Candidates<'a>>,
        k: usize,
        closest: bool,
        farthest: bool,
    ) -> TopK {
        let mut ranked: Vec<RankedArticle> = match articles.into() {
            Candidates::Keyed(m) => m
                .iter()
                .map(|(id, stances)| RankedArticle {
                    id: CandidateId::Key(id.clone()),
                    distance: self.distance_to(stances),
                })
                .collect(),
            Candidates::Listed(v) => v
                .iter()
                .enumerate()
                .map(|(i, stances)| RankedArticle {
                    id: CandidateId::Position(i),
                    distance: self.distance_to(stances),
                })
                .collect(),
        };
        ranked.retain(|r| r.distance.is_finite());
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let take = k.min(ranked.len());
        TopK {
            closest: closest.then(|| ranked[..take].to_vec()),
            farthest: farthest.then(|| ranked[ranked.len() - take..].iter().rev().cloned().collect()),
        }
    }

    /// Current learning rate. Starts at 1 and shrinks with every engagement.
    pub fn learning_rate(&self) -> f64 {
        DECAY_CONSTANT / (DECAY_CONSTANT + self.n_articles_engaged as f64)
    }

    /// The reader liked an article: pull stances toward the article's.
    ///
    /// `strength` defaults to the article's mean absolute stance and is
    /// clamped to `[0, 1]`. Only entities the article mentions change. An
    /// empty article is ignored and does not count as an engagement.
    pub fn like(&mut self, article_stances: &StanceMap, strength: Option<f64>) {
        self.apply_feedback(article_stances, strength, Feedback::Like);
    }

    /// The reader disliked an article: push stances toward the opposite of
    /// the article's, at [`DISLIKE_STRENGTH_FACTOR`] of the like strength.
    pub fn dislike(&mut self, article_stances: &StanceMap, strength: Option<f64>) {
        self.apply_feedback(article_stances, strength, Feedback::Dislike);
    }

    fn apply_feedback(&mut self, article_stances: &StanceMap, strength: Option<f64>, kind: Feedback) {
        if article_stances.is_empty() {
            return;
        }
        let strength = strength.unwrap_or_else(|| {
            article_stances.values().map(|v| v.abs()).sum::<f64>() / article_stances.len() as f64
        });
        let strength = match kind {
            Feedback::Like => strength.clamp(0.0, 1.0),
            Feedback::Dislike => strength.clamp(0.0, 1.0) * DISLIKE_STRENGTH_FACTOR,
        };
        let alpha = self.learning_rate();

        for (entity, article_val) in article_stances {
            let target = match kind {
                Feedback::Like => *article_val,
                Feedback::Dislike => -article_val,
            };
            let (current, confidence) = self
                .stances
                .get(entity)
                .map_or((0.0, INITIAL_CONFIDENCE), |e| (e.value, e.confidence));
            let updated = (current + alpha * strength * (target - current)).clamp(-1.0, 1.0);
            let confidence = (confidence + CONFIDENCE_STEP).min(1.0);
            self.set_stance(entity.clone(), updated, confidence);
        }
        self.n_articles_engaged += 1;

        tracing::debug!(
            user_id = %self.user_id,
            feedback = ?kind,
            entities = article_stances.len(),
            alpha,
            strength,
            "applied reader feedback"
        );
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the profile as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a profile written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Debug, Clone, Copy)]
enum Feedback {
    Like,
    Dislike,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn stances(pairs: &[(&str, f64)]) -> StanceMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn stance_entries_clamp_on_write() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 3.0, -1.0);
        let entry = user.get_stance("AI").unwrap();
        assert_eq!(entry.value(), 1.0);
        assert_eq!(entry.confidence(), 0.0);
        assert_eq!(user.get_value("missing", 0.25), 0.25);
    }

    #[test]
    fn stance_entries_clamp_on_deserialize() {
        let user: UserVector = serde_json::from_str(
            r#"{"user_id": "u", "stances": {"AI": {"value": -4.0, "confidence": 2.0}, "EU": {"value": 0.3}}}"#,
        )
        .unwrap();
        assert_eq!(user.get_stance("AI"), Some(&StanceEntry::new(-1.0, 1.0)));
        assert_eq!(user.get_stance("EU").unwrap().confidence(), 1.0);
        assert_eq!(user.n_articles_engaged(), 0);
    }

    #[test]
    fn distance_uses_only_shared_entities() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 0.5, 1.0);
        user.set_stance("EU", -0.5, 1.0);
        let d = user.distance_to(&stances(&[("AI", 0.5), ("EU", 0.5), ("Crypto", 1.0)]));
        assert!(close(d, 1.0));
    }

    #[test]
    fn distance_is_infinite_without_overlap() {
        let mut user = UserVector::new("u");
        assert!(user.distance_to(&stances(&[("AI", 0.5)])).is_infinite());
        user.set_stance("AI", 0.5, 1.0);
        assert!(user.distance_to(&StanceMap::new()).is_infinite());
        assert!(user.distance_to(&stances(&[("EU", 0.5)])).is_infinite());
    }

    #[test]
    fn learning_rate_decays_with_engagement() {
        let mut user = UserVector::new("u");
        assert!(close(user.learning_rate(), 1.0));
        user.like(&stances(&[("AI", 0.5)]), None);
        assert!(close(user.learning_rate(), 2.0 / 3.0));
        user.dislike(&stances(&[("AI", 0.5)]), None);
        assert!(close(user.learning_rate(), 0.5));
    }

    #[test]
    fn like_moves_toward_article_with_default_strength() {
        let mut user = UserVector::new("u");
        // strength = mean(|0.8|, |-0.4|) = 0.6, alpha = 1
        user.like(&stances(&[("AI", 0.8), ("Regulation", -0.4)]), None);
        assert!(close(user.get_value("AI", 0.0), 0.48));
        assert!(close(user.get_value("Regulation", 0.0), -0.24));
        assert!(close(user.get_stance("AI").unwrap().confidence(), 0.55));
        assert_eq!(user.n_articles_engaged(), 1);
    }

    #[test]
    fn repeated_likes_converge_without_overshoot() {
        let mut user = UserVector::new("u");
        let article = stances(&[("AI", 0.8)]);
        let mut previous = user.get_value("AI", 0.0);
        for _ in 0..25 {
            user.like(&article, None);
            let now = user.get_value("AI", 0.0);
            assert!(now > previous, "like must keep moving toward the stance");
            assert!(now <= 0.8, "like must not overshoot the stance");
            previous = now;
        }
        assert!(close(user.get_stance("AI").unwrap().confidence(), 1.0));
    }

    #[test]
    fn dislike_moves_toward_opposite_with_smaller_step() {
        let article = stances(&[("AI", 0.8)]);

        let mut liker = UserVector::new("l");
        liker.like(&article, None);

        let mut disliker = UserVector::new("d");
        disliker.dislike(&article, None);

        let liked = liker.get_value("AI", 0.0);
        let disliked = disliker.get_value("AI", 0.0);
        assert!(disliked < 0.0, "dislike must push toward -article_val");
        assert!(disliked.abs() < liked.abs());
        assert!(close(disliked.abs(), liked.abs() * DISLIKE_STRENGTH_FACTOR));
    }

    #[test]
    fn explicit_strength_is_clamped() {
        let mut user = UserVector::new("u");
        user.like(&stances(&[("AI", 0.5)]), Some(7.0));
        // strength clamps to 1, alpha = 1: jump straight to the article value.
        assert!(close(user.get_value("AI", 0.0), 0.5));

        let mut still = UserVector::new("s");
        still.like(&stances(&[("AI", 0.5)]), Some(-1.0));
        assert!(close(still.get_value("AI", 1.0), 0.0));
        assert_eq!(still.n_articles_engaged(), 1);
    }

    #[test]
    fn feedback_leaves_other_entities_alone_and_counts_once() {
        let mut user = UserVector::new("u");
        user.set_stance("EU", 0.3, 0.9);
        user.like(&stances(&[("AI", 0.5), ("Crypto", -0.5)]), None);
        assert_eq!(user.get_stance("EU"), Some(&StanceEntry::new(0.3, 0.9)));
        assert_eq!(user.n_articles_engaged(), 1);

        user.like(&StanceMap::new(), None);
        user.dislike(&StanceMap::new(), Some(1.0));
        assert_eq!(user.n_articles_engaged(), 1, "empty feedback is not engagement");
    }

    #[test]
    fn confidence_bump_caps_at_one() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 0.0, 0.98);
        user.dislike(&stances(&[("AI", 0.5)]), None);
        assert!(close(user.get_stance("AI").unwrap().confidence(), 1.0));
    }

    #[test]
    fn top_k_ranks_and_drops_infinite_candidates() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 1.0, 1.0);
        let articles: BTreeMap<String, StanceMap> = [
            ("near", stances(&[("AI", 0.9)])),
            ("mid", stances(&[("AI", 0.0)])),
            ("far", stances(&[("AI", -1.0)])),
            ("offtopic", stances(&[("Sports", 1.0)])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let top = user.top_k(&articles, 2, true, true);
        let closest: Vec<String> = top
            .closest
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        let farthest: Vec<String> = top
            .farthest
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(closest, vec!["near", "mid"]);
        assert_eq!(farthest, vec!["far", "mid"]);
    }

    #[test]
    fn top_k_ties_follow_key_order_for_keyed_candidates() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 0.0, 1.0);
        let articles: BTreeMap<String, StanceMap> = [
            ("zeta", stances(&[("AI", 0.5)])),
            ("alpha", stances(&[("AI", -0.5)])),
            ("mid", stances(&[("AI", 0.5)])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let closest = user.top_k(&articles, 3, true, false).closest.unwrap();
        let ids: Vec<CandidateId> = closest.into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![
                CandidateId::Key("alpha".into()),
                CandidateId::Key("mid".into()),
                CandidateId::Key("zeta".into()),
            ]
        );

        let list = vec![stances(&[("AI", 0.5)]), stances(&[("AI", -0.5)])];
        let closest = user.top_k(&list, 2, true, false).closest.unwrap();
        assert_eq!(closest[0].id, CandidateId::Position(0));
        assert_eq!(closest[1].id, CandidateId::Position(1));
    }

    #[test]
    fn top_k_returns_fewer_when_candidates_run_out() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 0.0, 1.0);
        let list = vec![stances(&[("AI", 0.5)]), stances(&[("EU", 0.5)])];
        let top = user.top_k(&list, 5, true, false);
        let closest = top.closest.unwrap();
        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0].id, CandidateId::Position(0));
        assert!(top.farthest.is_none());

        let none = user.top_k(&list, 0, true, true);
        assert_eq!(none.closest, Some(Vec::new()));
        assert_eq!(none.farthest, Some(Vec::new()));
    }

    #[test]
    fn top_k_farthest_head_is_not_closer_than_closest_tail() {
        let mut user = UserVector::new("u");
        user.set_stance("AI", 0.2, 1.0);
        user.set_stance("EU", -0.3, 1.0);
        let list: Vec<StanceMap> = (0..9)
            .map(|i| {
                let x = -1.0 + i as f64 * 0.25;
                stances(&[("AI", x), ("EU", -x / 2.0)])
            })
            .collect();
        let k = 3;
        let top = user.top_k(&list, k, true, true);
        let closest = top.closest.unwrap();
        let farthest = top.farthest.unwrap();
        assert_eq!(closest.len(), k);
        assert_eq!(farthest.len(), k);
        assert!(farthest[0].distance >= closest[k - 1].distance);
        assert!(closest.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(farthest.windows(2).all(|w| w[0].distance >= w[1].distance));
    }

    #[test]
    fn persisted_form_round_trips() {
        let mut user = UserVector::new("user_1");
        user.like(&stances(&[("AI", 0.8), ("Regulation", -0.4)]), None);
        user.dislike(&stances(&[("AI", -0.7), ("Open Source AI", -0.5)]), None);

        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["user_id"], "user_1");
        assert_eq!(json["n_articles_engaged"], 2);
        assert!(json["stances"]["AI"]["value"].is_number());
        assert!(json["stances"]["AI"]["confidence"].is_number());

        let back: UserVector = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn save_and_load_through_file() {
        let file = NamedTempFile::new().unwrap();
        let mut user = UserVector::new("user_1");
        user.like(&stances(&[("AI", 0.8)]), Some(0.5));
        user.save(file.path()).unwrap();

        let loaded = UserVector::load(file.path()).unwrap();
        assert_eq!(loaded, user);
        assert_eq!(loaded.n_articles_engaged(), 1);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = UserVector::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
