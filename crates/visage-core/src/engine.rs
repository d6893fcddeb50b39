//! Exact top-N ranking by cosine similarity
//!
//! Scoring fans out over a bounded rayon pool; small snapshots are scored
//! inline. Selection keeps a min-heap of the best `top_n` candidates keyed on
//! `(score, snapshot index)`, so the output order does not depend on which
//! worker finished first: higher scores come first and equal scores keep
//! their insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::entity::{validate_features, Entity, MatchResult, ValidationError};
use crate::simd::{cosine_with_unit_query, unit_vector};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Worker threads in the scoring pool
    pub threads: usize,
    /// Snapshots smaller than this are scored on the calling thread
    pub sequential_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|v| v.get())
            .unwrap_or(2);
        Self {
            threads: (available / 2).clamp(1, 4),
            sequential_threshold: 512,
        }
    }
}

pub struct SimilarityEngine {
    pool: Arc<ThreadPool>,
    sequential_threshold: usize,
}

impl SimilarityEngine {
    pub fn new(config: EngineConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|idx| format!("visage-score-{idx}"))
            .build()?;

        Ok(Self {
            pool: Arc::new(pool),
            sequential_threshold: config.sequential_threshold,
        })
    }

    /// Rank `snapshot` against `query`, returning at most `top_n` matches.
    pub fn rank(
        &self,
        query: &[f64],
        snapshot: &[Arc<Entity>],
        top_n: usize,
    ) -> Result<Vec<MatchResult>, ValidationError> {
        if top_n == 0 {
            return Err(ValidationError::InvalidTopN);
        }
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let dim = snapshot[0].features.len();
        validate_features(query, dim)?;
        if let Some(bad) = snapshot.iter().find(|e| e.features.len() != dim) {
            return Err(ValidationError::DimensionMismatch {
                expected: dim,
                actual: bad.features.len(),
            });
        }

        // A zero query scores every entity 0.
        let unit_query = unit_vector(query);
        let score = |(index, entity): (usize, &Arc<Entity>)| Candidate {
            index,
            score: unit_query
                .as_deref()
                .map_or(0.0, |q| cosine_with_unit_query(q, &entity.features)),
        };

        let scores: Vec<Candidate> = if snapshot.len() < self.sequential_threshold {
            snapshot.iter().enumerate().map(score).collect()
        } else {
            self.pool
                .install(|| snapshot.par_iter().enumerate().map(score).collect())
        };

        Ok(select_top(scores, top_n)
            .into_iter()
            .map(|c| MatchResult {
                entity: snapshot[c.index].clone(),
                score: c.score,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    score: f64,
}

impl Candidate {
    /// Ranking order: higher score first, then lower snapshot index.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Heap entry whose greatest element is the worst-ranked candidate.
struct Worst(Candidate);

impl PartialEq for Worst {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Worst {}

impl PartialOrd for Worst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Worst {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

fn select_top(scores: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    if top_n >= scores.len() {
        let mut all = scores;
        all.sort_by(Candidate::rank_cmp);
        return all;
    }

    let mut heap = BinaryHeap::with_capacity(top_n + 1);
    for candidate in scores {
        if heap.len() < top_n {
            heap.push(Worst(candidate));
        } else if let Some(worst) = heap.peek() {
            if candidate.rank_cmp(&worst.0) == Ordering::Less {
                heap.pop();
                heap.push(Worst(candidate));
            }
        }
    }

    let mut best: Vec<Candidate> = heap.into_iter().map(|w| w.0).collect();
    best.sort_by(Candidate::rank_cmp);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn entity(name: &str, features: Vec<f64>) -> Arc<Entity> {
        Arc::new(Entity::new(name, features))
    }

    fn engine(threshold: usize) -> SimilarityEngine {
        SimilarityEngine::new(EngineConfig {
            threads: 2,
            sequential_threshold: threshold,
        })
        .unwrap()
    }

    fn random_snapshot(rng: &mut StdRng, n: usize, dim: usize) -> Vec<Arc<Entity>> {
        (0..n)
            .map(|i| {
                let v = (0..dim).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
                entity(&format!("e{i}"), v)
            })
            .collect()
    }

    #[test]
    fn test_example_scenario() {
        let snapshot = vec![
            entity("alice", vec![1.0, 0.0, 0.0, 0.0]),
            entity("bob", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        let results = engine(512)
            .rank(&[1.0, 0.0, 0.0, 0.0], &snapshot, 2)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity.name, "alice");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].entity.name, "bob");
        assert_eq!(results[1].score, 0.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let results = engine(512).rank(&[1.0, 2.0], &[], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let snapshot = vec![entity("a", vec![1.0, 0.0])];
        assert_eq!(
            engine(512).rank(&[1.0, 0.0], &snapshot, 0).unwrap_err(),
            ValidationError::InvalidTopN
        );
    }

    #[test]
    fn test_query_dimension_mismatch_rejected() {
        let snapshot = vec![entity("a", vec![1.0, 0.0, 0.0])];
        assert!(matches!(
            engine(512).rank(&[1.0, 0.0], &snapshot, 1),
            Err(ValidationError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_top_n_larger_than_snapshot_returns_all() {
        let mut rng = StdRng::seed_from_u64(3);
        let snapshot = random_snapshot(&mut rng, 7, 8);
        let results = engine(512).rank(&[1.0; 8], &snapshot, 100).unwrap();
        assert_eq!(results.len(), 7);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        // Same direction, different magnitudes: identical scores.
        let snapshot = vec![
            entity("z", vec![0.0, 1.0]),
            entity("first", vec![1.0, 0.0]),
            entity("second", vec![2.0, 0.0]),
            entity("third", vec![3.0, 0.0]),
            entity("zero", vec![0.0, 0.0]),
        ];

        for threshold in [0, 512] {
            let results = engine(threshold).rank(&[5.0, 0.0], &snapshot, 4).unwrap();
            let names: Vec<_> = results.iter().map(|r| r.entity.name.as_str()).collect();
            assert_eq!(names, vec!["first", "second", "third", "z"]);

            let results = engine(threshold).rank(&[5.0, 0.0], &snapshot, 2).unwrap();
            let names: Vec<_> = results.iter().map(|r| r.entity.name.as_str()).collect();
            assert_eq!(names, vec!["first", "second"]);
        }
    }

    #[test]
    fn test_zero_query_scores_everything_zero() {
        let mut rng = StdRng::seed_from_u64(5);
        let snapshot = random_snapshot(&mut rng, 10, 4);
        let results = engine(512).rank(&[0.0; 4], &snapshot, 10).unwrap();

        assert!(results.iter().all(|r| r.score == 0.0));
        // All tied, so insertion order is the output order.
        let names: Vec<_> = results.iter().map(|r| r.entity.name.clone()).collect();
        let expected: Vec<_> = snapshot.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(42);
        let snapshot = random_snapshot(&mut rng, 2_000, 32);
        let query: Vec<f64> = (0..32).map(|_| rng.gen::<f64>() - 0.5).collect();

        let sequential = engine(usize::MAX).rank(&query, &snapshot, 25).unwrap();
        let parallel = engine(0).rank(&query, &snapshot, 25).unwrap();

        assert_eq!(sequential.len(), 25);
        for (s, p) in sequential.iter().zip(&parallel) {
            assert!(Arc::ptr_eq(&s.entity, &p.entity));
            assert_eq!(s.score.to_bits(), p.score.to_bits());
        }
    }

    #[test]
    fn test_ranking_length_and_order_property() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let engine = engine(64);

        for round in 0..50 {
            let n = rng.gen_range(0..300);
            let dim = rng.gen_range(1..16);
            let top_n = rng.gen_range(1..40);
            let snapshot = random_snapshot(&mut rng, n, dim);
            let query: Vec<f64> = (0..dim).map(|_| rng.gen::<f64>() - 0.5).collect();

            let results = engine.rank(&query, &snapshot, top_n).unwrap();
            assert_eq!(results.len(), top_n.min(n), "round {round}");
            for pair in results.windows(2) {
                assert!(pair[0].score >= pair[1].score, "round {round}");
            }

            // Matches a brute-force stable sort.
            let unit = unit_vector(&query).unwrap();
            let mut expected: Vec<(usize, f64)> = snapshot
                .iter()
                .enumerate()
                .map(|(i, e)| (i, cosine_with_unit_query(&unit, &e.features)))
                .collect();
            expected.sort_by(|a, b| b.1.total_cmp(&a.1));
            expected.truncate(top_n);
            for (got, (idx, _)) in results.iter().zip(&expected) {
                assert!(Arc::ptr_eq(&got.entity, &snapshot[*idx]), "round {round}");
            }
        }
    }

    #[test]
    fn test_extreme_magnitudes_rank_by_direction() {
        let snapshot = vec![
            entity("huge", vec![1e200, 0.0]),
            entity("unit", vec![1.0, 0.0]),
            entity("opposite", vec![-1.0, 0.0]),
            entity("tiny", vec![1e-200, 0.0]),
        ];

        for threshold in [0, 512] {
            let results = engine(threshold).rank(&[1e200, 0.0], &snapshot, 4).unwrap();
            let ranked: Vec<_> = results
                .iter()
                .map(|r| (r.entity.name.as_str(), r.score))
                .collect();
            assert_eq!(
                ranked,
                vec![("huge", 1.0), ("unit", 1.0), ("tiny", 1.0), ("opposite", -1.0)]
            );

            let results = engine(threshold).rank(&[1e-200, 0.0], &snapshot, 1).unwrap();
            assert_eq!(results[0].entity.name, "huge");
            assert_eq!(results[0].score, 1.0);
        }
    }

    #[test]
    fn test_signed_zero_scores_tie_in_insertion_order() {
        let snapshot = vec![
            entity("down", vec![0.0, -1.0]),
            entity("up", vec![0.0, 1e200]),
            entity("zero", vec![0.0, 0.0]),
            entity("away", vec![-1.0, 0.0]),
        ];

        let results = engine(512).rank(&[1e-200, 0.0], &snapshot, 4).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(names, vec!["down", "up", "zero", "away"]);
        for r in &results[..3] {
            assert_eq!(r.score.to_bits(), 0.0f64.to_bits(), "{}", r.entity.name);
        }
    }
}
