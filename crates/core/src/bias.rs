//! Per-event consensus and deviation from it.
//!
//! The centroid of an event is the mean feature vector of every linked article
//! that carries one. An article's deviation is its Euclidean distance from that
//! centroid; high deviation marks coverage that diverges from the pack.

use crate::index::{ArticleRecord, EventArticleIndex};
use crate::vector::{average_vectors, euclidean_distance, FeatureVector};
use crate::Result;
use std::collections::BTreeMap;

/// Computes event centroids, article deviations and source-level bias metrics.
///
/// Stateless; every method reads the index it is given. Missing events,
/// missing vectors and empty events degrade to `None` or empty results. Only
/// structurally incompatible vectors (mixed kinds, dense length mismatch)
/// produce errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct BiasAnalyzer;

impl BiasAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Mean feature vector of the articles linked to `event_id`.
    ///
    /// Returns `Ok(None)` if no linked article has a vector.
    pub fn compute_event_centroid(
        &self,
        index: &EventArticleIndex,
        event_id: &str,
    ) -> Result<Option<FeatureVector>> {
        let articles = index.get_articles_for_event(event_id);
        average_vectors(articles.iter().filter_map(|a| a.feature_vector.as_ref()))
    }

    /// Distance of `article` from `centroid`, or `None` if it has no vector.
    pub fn compute_article_deviation(
        &self,
        article: &ArticleRecord,
        centroid: &FeatureVector,
    ) -> Result<Option<f64>> {
        match &article.feature_vector {
            Some(vector) => euclidean_distance(vector, centroid).map(Some),
            None => Ok(None),
        }
    }

    /// Deviation of every vector-carrying article linked to `event_id`.
    ///
    /// The centroid is computed once. An event without a centroid yields an
    /// empty map.
    pub fn deviations_for_event(
        &self,
        index: &EventArticleIndex,
        event_id: &str,
    ) -> Result<BTreeMap<String, f64>> {
        Ok(self
            .ordered_deviations(index, event_id)?
            .into_iter()
            .map(|(article, deviation)| (article.article_id.clone(), deviation))
            .collect())
    }

    /// Mean deviation per source for one event.
    ///
    /// Sources with no contributing article are absent rather than zero.
    pub fn source_bias_fingerprint(
        &self,
        index: &EventArticleIndex,
        event_id: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let mut by_source: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for (article, deviation) in self.ordered_deviations(index, event_id)? {
            let slot = by_source.entry(article.source.clone()).or_insert((0.0, 0));
            slot.0 += deviation;
            slot.1 += 1;
        }
        Ok(by_source
            .into_iter()
            .map(|(source, (total, count))| (source, total / count as f64))
            .collect())
    }

    /// Ids of articles whose deviation is strictly greater than `threshold`,
    /// in link order.
    pub fn flag_rumors(
        &self,
        index: &EventArticleIndex,
        event_id: &str,
        threshold: f64,
    ) -> Result<Vec<String>> {
        Ok(self
            .ordered_deviations(index, event_id)?
            .into_iter()
            .filter(|(_, deviation)| *deviation > threshold)
            .map(|(article, _)| article.article_id.clone())
            .collect())
    }

    /// `(article, deviation)` pairs in link order. Articles linked to the same
    /// event more than once cannot occur; the index deduplicates links.
    fn ordered_deviations<'a>(
        &self,
        index: &'a EventArticleIndex,
        event_id: &str,
    ) -> Result<Vec<(&'a ArticleRecord, f64)>> {
        let Some(centroid) = self.compute_event_centroid(index, event_id)? else {
            tracing::debug!(event_id, "no feature vectors linked; skipping event");
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for article in index.get_articles_for_event(event_id) {
            if let Some(deviation) = self.compute_article_deviation(article, &centroid)? {
                out.push((article, deviation));
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlantError;

    /// Three outlets cover "e1". Dense vectors on a line make deviations easy
    /// to read: the centroid of 0, 0, 3 is 1, so deviations are 1, 1, 2.
    fn line_index() -> EventArticleIndex {
        let mut index = EventArticleIndex::new();
        index.add_article(
            ArticleRecord::new("a1", "wire")
                .with_event("e1")
                .with_vector(vec![0.0]),
        );
        index.add_article(
            ArticleRecord::new("a2", "wire")
                .with_event("e1")
                .with_vector(vec![0.0]),
        );
        index.add_article(
            ArticleRecord::new("a3", "tabloid")
                .with_event("e1")
                .with_vector(vec![3.0]),
        );
        index.add_article(ArticleRecord::new("a4", "blog").with_event("e1"));
        index
    }

    #[test]
    fn centroid_is_mean_of_linked_vectors() {
        let index = line_index();
        let centroid = BiasAnalyzer::new()
            .compute_event_centroid(&index, "e1")
            .unwrap();
        assert_eq!(centroid, Some(FeatureVector::Dense(vec![1.0])));
    }

    #[test]
    fn centroid_of_unknown_event_is_none() {
        let index = line_index();
        let centroid = BiasAnalyzer::new()
            .compute_event_centroid(&index, "nope")
            .unwrap();
        assert!(centroid.is_none());
    }

    #[test]
    fn deviation_is_none_without_vector() {
        let index = line_index();
        let bias = BiasAnalyzer::new();
        let centroid = FeatureVector::Dense(vec![1.0]);
        let a4 = index.article("a4").unwrap();
        assert_eq!(bias.compute_article_deviation(a4, &centroid).unwrap(), None);
    }

    #[test]
    fn deviations_skip_articles_without_vectors() {
        let index = line_index();
        let devs = BiasAnalyzer::new().deviations_for_event(&index, "e1").unwrap();
        assert_eq!(devs.len(), 3);
        assert!((devs["a1"] - 1.0).abs() < 1e-9);
        assert!((devs["a3"] - 2.0).abs() < 1e-9);
        assert!(!devs.contains_key("a4"));
    }

    #[test]
    fn deviations_empty_when_no_vectors() {
        let mut index = EventArticleIndex::new();
        index.add_article(ArticleRecord::new("a1", "wire").with_event("e1"));
        let devs = BiasAnalyzer::new().deviations_for_event(&index, "e1").unwrap();
        assert!(devs.is_empty());
    }

    #[test]
    fn fingerprint_averages_per_source_and_omits_silent_sources() {
        let index = line_index();
        let fp = BiasAnalyzer::new()
            .source_bias_fingerprint(&index, "e1")
            .unwrap();
        assert_eq!(fp.len(), 2);
        assert!((fp["wire"] - 1.0).abs() < 1e-9);
        assert!((fp["tabloid"] - 2.0).abs() < 1e-9);
        assert!(!fp.contains_key("blog"));
    }

    #[test]
    fn flag_rumors_excludes_exact_threshold() {
        let index = line_index();
        let bias = BiasAnalyzer::new();
        assert_eq!(bias.flag_rumors(&index, "e1", 2.0).unwrap(), Vec::<String>::new());
        assert_eq!(bias.flag_rumors(&index, "e1", 1.0).unwrap(), vec!["a3"]);
        assert_eq!(
            bias.flag_rumors(&index, "e1", 0.5).unwrap(),
            vec!["a1", "a2", "a3"]
        );
    }

    #[test]
    fn sparse_event_uses_key_union() {
        let mut index = EventArticleIndex::new();
        let a: BTreeMap<String, f64> = [("a".to_string(), 1.0)].into_iter().collect();
        let b: BTreeMap<String, f64> = [("a".to_string(), 3.0), ("b".to_string(), 2.0)]
            .into_iter()
            .collect();
        index.add_article(ArticleRecord::new("a1", "x").with_event("e").with_vector(a));
        index.add_article(ArticleRecord::new("a2", "y").with_event("e").with_vector(b));

        let bias = BiasAnalyzer::new();
        let centroid = bias.compute_event_centroid(&index, "e").unwrap().unwrap();
        let expected: BTreeMap<String, f64> = [("a".to_string(), 2.0), ("b".to_string(), 1.0)]
            .into_iter()
            .collect();
        assert_eq!(centroid, FeatureVector::Sparse(expected));

        // Both articles sit sqrt(1 + 1) from the centroid.
        let devs = bias.deviations_for_event(&index, "e").unwrap();
        assert!((devs["a1"] - 2f64.sqrt()).abs() < 1e-9);
        assert!((devs["a2"] - 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn mixed_kinds_in_one_event_raise() {
        let mut index = EventArticleIndex::new();
        let sparse: BTreeMap<String, f64> = [("a".to_string(), 1.0)].into_iter().collect();
        index.add_article(ArticleRecord::new("a1", "x").with_event("e").with_vector(sparse));
        index.add_article(
            ArticleRecord::new("a2", "y")
                .with_event("e")
                .with_vector(vec![1.0]),
        );
        let err = BiasAnalyzer::new()
            .deviations_for_event(&index, "e")
            .unwrap_err();
        assert!(matches!(err, SlantError::KindMismatch { .. }));
    }

    #[test]
    fn dense_length_mismatch_raises() {
        let mut index = EventArticleIndex::new();
        index.add_article(
            ArticleRecord::new("a1", "x")
                .with_event("e")
                .with_vector(vec![1.0, 2.0]),
        );
        index.add_article(
            ArticleRecord::new("a2", "y")
                .with_event("e")
                .with_vector(vec![1.0]),
        );
        let err = BiasAnalyzer::new()
            .compute_event_centroid(&index, "e")
            .unwrap_err();
        assert!(matches!(
            err,
            SlantError::LengthMismatch {
                expected: 2,
                found: 1
            }
        ));
    }
}
