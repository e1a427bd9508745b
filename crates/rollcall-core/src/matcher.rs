//! Gallery matching: linear Euclidean scan with a fixed score threshold and top-k ranking.

use crate::types::Embedding;
use serde::Serialize;
use std::cmp::Ordering;

/// Score at or above which a probe is accepted as the best candidate.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;
/// Number of ranked candidates reported per scan.
pub const DEFAULT_TOP_K: usize = 5;

/// One enrolled face to compare against.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub subject_id: String,
    pub label: String,
    pub embedding: Embedding,
}

/// A scored gallery entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub subject_id: String,
    pub label: String,
    pub distance: f32,
    pub score: f32,
}

/// Outcome of scanning one or more gallery pages.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    /// Highest scoring candidate, if it clears the threshold.
    pub best: Option<Candidate>,
    /// Top-k candidates by descending score, regardless of threshold.
    pub ranked: Vec<Candidate>,
    pub threshold: f32,
    /// Entries compared against the probe.
    pub scanned: usize,
    /// Entries skipped because their dimension differs from the probe.
    pub skipped: usize,
}

impl MatchReport {
    pub fn is_match(&self) -> bool {
        self.best.is_some()
    }
}

/// Bounded top-k accumulator, fed across any number of gallery pages.
#[derive(Debug)]
pub struct Ranking {
    top_k: usize,
    candidates: Vec<Candidate>,
    scanned: usize,
    skipped: usize,
}

impl Ranking {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            candidates: Vec::with_capacity(top_k + 1),
            scanned: 0,
            skipped: 0,
        }
    }

    /// Add a candidate, keeping only the best `top_k`.
    ///
    /// Sorting is stable, so among equal scores and distances the earlier
    /// candidate wins.
    pub fn offer(&mut self, candidate: Candidate) {
        self.scanned += 1;
        if self.top_k == 0 {
            return;
        }
        self.candidates.push(candidate);
        self.candidates.sort_by(rank_order);
        self.candidates.truncate(self.top_k);
    }

    fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn into_report(self, threshold: f32) -> MatchReport {
        let best = self
            .candidates
            .first()
            .filter(|c| c.score >= threshold)
            .cloned();
        MatchReport {
            best,
            ranked: self.candidates,
            threshold,
            scanned: self.scanned,
            skipped: self.skipped,
        }
    }
}

fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
}

/// Strategy for comparing a probe embedding against gallery entries.
pub trait Matcher {
    /// Score threshold for a positive match.
    fn threshold(&self) -> f32;

    /// Number of candidates kept in a ranking.
    fn top_k(&self) -> usize;

    /// Score a single entry. `None` means the pair is not comparable.
    fn score(&self, probe: &Embedding, entry: &GalleryEntry) -> Option<Candidate>;

    /// Scan every entry of `gallery` into `ranking`. Never exits early.
    fn scan(&self, probe: &Embedding, gallery: &[GalleryEntry], ranking: &mut Ranking) {
        for entry in gallery {
            match self.score(probe, entry) {
                Some(candidate) => ranking.offer(candidate),
                None => {
                    tracing::warn!(
                        subject = %entry.subject_id,
                        probe_dim = probe.dim(),
                        entry_dim = entry.embedding.dim(),
                        "skipping gallery entry with mismatched embedding dimension"
                    );
                    ranking.skip();
                }
            }
        }
    }

    /// Convenience: rank a single in-memory gallery.
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchReport {
        let mut ranking = Ranking::new(self.top_k());
        self.scan(probe, gallery, &mut ranking);
        ranking.into_report(self.threshold())
    }
}

/// Euclidean-distance matcher with `score = 1 - distance / 2`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn threshold(&self) -> f32 {
        self.threshold
    }

    fn top_k(&self) -> usize {
        self.top_k
    }

    fn score(&self, probe: &Embedding, entry: &GalleryEntry) -> Option<Candidate> {
        let distance = probe.euclidean_distance(&entry.embedding)?;
        Some(Candidate {
            subject_id: entry.subject_id.clone(),
            label: entry.label.clone(),
            distance,
            score: crate::types::score_from_distance(distance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            subject_id: id.into(),
            label: format!("student {id}"),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_best_match_is_last_entry() {
        // Every entry is visited: the exact match sits at the end.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("1", vec![0.0, 1.0, 0.0]),
            entry("2", vec![0.0, 0.0, 1.0]),
            entry("3", vec![1.0, 0.0, 0.0]),
        ];

        let report = EuclideanMatcher::default().compare(&probe, &gallery);
        assert!(report.is_match());
        let best = report.best.unwrap();
        assert_eq!(best.subject_id, "3");
        assert!((best.score - 1.0).abs() < 1e-6);
        assert_eq!(report.scanned, 3);
    }

    #[test]
    fn test_below_threshold_is_not_a_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry("1", vec![0.0, 1.0])];

        let report = EuclideanMatcher::default().compare(&probe, &gallery);
        assert!(!report.is_match());
        // Still ranked so the caller can show near misses.
        assert_eq!(report.ranked.len(), 1);
        assert!(report.ranked[0].score < DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry("1", vec![0.0, 0.0])]; // distance 1.0 → score 0.5
        let matcher = EuclideanMatcher { threshold: 0.5, top_k: 5 };
        assert!(matcher.compare(&probe, &gallery).is_match());
    }

    #[test]
    fn test_top_k_sorted_and_truncated() {
        let probe = Embedding::new(vec![0.0]);
        let gallery: Vec<GalleryEntry> = (0..8)
            .map(|i| entry(&i.to_string(), vec![i as f32 * 0.1]))
            .rev()
            .collect();

        let report = EuclideanMatcher::default().compare(&probe, &gallery);
        let ids: Vec<&str> = report.ranked.iter().map(|c| c.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(report.scanned, 8);
    }

    #[test]
    fn test_ties_keep_scan_order() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry("a", vec![0.3, 0.0]), entry("b", vec![0.0, 0.3])];
        let report = EuclideanMatcher::default().compare(&probe, &gallery);
        assert_eq!(report.ranked[0].subject_id, "a");
        assert_eq!(report.ranked[1].subject_id, "b");
    }

    #[test]
    fn test_mismatched_dimension_skipped() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry("bad", vec![1.0, 0.0, 0.0]), entry("ok", vec![1.0, 0.0])];

        let report = EuclideanMatcher::default().compare(&probe, &gallery);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.scanned, 1);
        assert_eq!(report.best.unwrap().subject_id, "ok");
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let report = EuclideanMatcher::default().compare(&probe, &[]);
        assert!(!report.is_match());
        assert!(report.ranked.is_empty());
        assert_eq!(report.scanned, 0);
    }

    #[test]
    fn test_ranking_across_pages() {
        let matcher = EuclideanMatcher { threshold: 0.45, top_k: 2 };
        let probe = Embedding::new(vec![0.0]);
        let mut ranking = Ranking::new(matcher.top_k);

        matcher.scan(&probe, &[entry("far", vec![0.8]), entry("mid", vec![0.4])], &mut ranking);
        matcher.scan(&probe, &[entry("near", vec![0.1])], &mut ranking);

        let report = ranking.into_report(matcher.threshold);
        let ids: Vec<&str> = report.ranked.iter().map(|c| c.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(report.scanned, 3);
    }

    #[test]
    fn test_report_serializes() {
        let probe = Embedding::new(vec![1.0]);
        let report = EuclideanMatcher::default().compare(&probe, &[entry("1", vec![1.0])]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["best"]["subject_id"], "1");
        assert_eq!(json["ranked"].as_array().unwrap().len(), 1);
    }
}
