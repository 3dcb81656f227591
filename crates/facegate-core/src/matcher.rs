use image::RgbImage;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::gallery::Gallery;
use crate::provider::{Embedding, EmbeddingProvider};

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

pub trait DistanceMetric {
    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64;
}

impl<M: DistanceMetric + ?Sized> DistanceMetric for &M {
    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
        (**self).distance(lhs, rhs)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceMetric for EuclideanDistance {
    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
        lhs.iter()
            .zip(rhs.iter())
            .map(|(l, r)| (l - r) * (l - r))
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    NoMatch,
    Match { name: String, distance: f64 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            MatchResult::Match { name, .. } => Some(name),
            MatchResult::NoMatch => None,
        }
    }
}

/// Turns a face crop into an embedding and compares it against a gallery.
///
/// Matching is first-hit: entries are compared in gallery order and the first
/// one strictly under the threshold wins, even if a later entry is closer.
pub struct MatchEngine<P, M = EuclideanDistance> {
    provider: P,
    metric: M,
    threshold: f64,
}

impl<P: EmbeddingProvider> MatchEngine<P> {
    pub fn new(provider: P, threshold: f64) -> Self {
        Self::with_metric(provider, EuclideanDistance, threshold)
    }
}

impl<P: EmbeddingProvider, M: DistanceMetric> MatchEngine<P, M> {
    pub fn with_metric(provider: P, metric: M, threshold: f64) -> Self {
        Self {
            provider,
            metric,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs detection on `image` and encodes the first face found. `None`
    /// when no face is detected or the provider returns nothing for it.
    pub fn embed(&self, image: &RgbImage) -> AppResult<Option<Embedding>> {
        let regions = self.provider.detect_faces(image)?;
        let Some(first) = regions.first() else {
            debug!("no face detected in probe image");
            return Ok(None);
        };
        let embedding = self
            .provider
            .encode(image, std::slice::from_ref(first))?
            .into_iter()
            .next();
        Ok(embedding.filter(|embedding| !embedding.is_empty()))
    }

    pub fn check_dimension(&self, probe: &Embedding, gallery: &Gallery) -> AppResult<()> {
        match gallery.dimension() {
            Some(expected) if expected != probe.len() => Err(AppError::EmbeddingMismatch {
                expected,
                found: probe.len(),
            }),
            _ => Ok(()),
        }
    }

    pub fn find_match(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        for entry in gallery.entries() {
            let distance = self
                .metric
                .distance(probe.as_slice(), entry.embedding.as_slice());
            if distance < self.threshold {
                debug!(name = %entry.name, distance, "gallery hit");
                return MatchResult::Match {
                    name: entry.name.clone(),
                    distance,
                };
            }
        }
        MatchResult::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FaceRegion;
    use std::cell::Cell;

    struct FixedProvider(Vec<f64>);

    impl EmbeddingProvider for FixedProvider {
        fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>> {
            if image.width() == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![
                FaceRegion::new(0, 0, image.width() as i64, image.height() as i64),
                FaceRegion::new(0, 0, 1, 1),
            ])
        }

        fn encode(&self, _image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>> {
            Ok(regions.iter().map(|_| Embedding::new(self.0.clone())).collect())
        }
    }

    #[derive(Default)]
    struct CountingMetric {
        calls: Cell<usize>,
    }

    impl DistanceMetric for CountingMetric {
        fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
            self.calls.set(self.calls.get() + 1);
            EuclideanDistance.distance(lhs, rhs)
        }
    }

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn empty_gallery_never_consults_the_metric() {
        let metric = CountingMetric::default();
        let engine = MatchEngine::with_metric(FixedProvider(vec![0.0]), &metric, 0.6);
        assert_eq!(engine.find_match(&emb(&[0.0]), &Gallery::new()), MatchResult::NoMatch);
        assert_eq!(metric.calls.get(), 0);
    }

    #[test]
    fn identical_embedding_matches_at_distance_zero() {
        let engine = MatchEngine::new(FixedProvider(vec![0.0]), DEFAULT_MATCH_THRESHOLD);
        let gallery = Gallery::new().append("alice", emb(&[0.3, 0.4]));
        assert_eq!(
            engine.find_match(&emb(&[0.3, 0.4]), &gallery),
            MatchResult::Match {
                name: "alice".into(),
                distance: 0.0
            }
        );
    }

    #[test]
    fn first_entry_under_threshold_wins_over_a_closer_one() {
        let metric = CountingMetric::default();
        let engine = MatchEngine::with_metric(FixedProvider(vec![0.0]), &metric, 0.6);
        let gallery = Gallery::new()
            .append("far", emb(&[3.0, 4.0]))
            .append("near-ish", emb(&[0.5, 0.0]))
            .append("exact", emb(&[0.0, 0.0]));

        let result = engine.find_match(&emb(&[0.0, 0.0]), &gallery);
        assert_eq!(result.name(), Some("near-ish"));
        assert_eq!(metric.calls.get(), 2);
    }

    #[test]
    fn distance_equal_to_threshold_is_rejected() {
        let engine = MatchEngine::new(FixedProvider(vec![0.0]), 0.5);
        let gallery = Gallery::new().append("edge", emb(&[0.0, 0.5]));
        assert!(!engine.find_match(&emb(&[0.0, 0.0]), &gallery).is_match());
    }

    #[test]
    fn embed_encodes_only_the_first_detected_face() {
        let engine = MatchEngine::new(FixedProvider(vec![0.1, 0.2]), 0.6);
        let embedding = engine.embed(&RgbImage::new(4, 4)).unwrap();
        assert_eq!(embedding, Some(emb(&[0.1, 0.2])));
    }

    #[test]
    fn embed_without_a_detected_face_is_none() {
        let engine = MatchEngine::new(FixedProvider(vec![0.1, 0.2]), 0.6);
        assert_eq!(engine.embed(&RgbImage::new(0, 0)).unwrap(), None);
    }

    #[test]
    fn empty_encoding_counts_as_no_embedding() {
        let engine = MatchEngine::new(FixedProvider(vec![]), 0.6);
        assert_eq!(engine.embed(&RgbImage::new(4, 4)).unwrap(), None);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let engine = MatchEngine::new(FixedProvider(vec![0.0]), 0.6);
        let gallery = Gallery::new().append("alice", emb(&[0.1, 0.2]));
        let err = engine.check_dimension(&emb(&[0.1]), &gallery).unwrap_err();
        assert!(matches!(
            err,
            AppError::EmbeddingMismatch {
                expected: 2,
                found: 1
            }
        ));
        assert!(engine.check_dimension(&emb(&[0.1]), &Gallery::new()).is_ok());
    }
}
