//! Vector math for similarity scoring
//!
//! These functions use iterator patterns that LLVM auto-vectorizes when
//! compiled with `-C target-cpu=native`.
//!
//! Feature vectors are not assumed to be normalized, so scoring uses full
//! cosine similarity rather than a bare dot product:
//! ```text
//! cos(θ) = (A · B) / (||A|| · ||B||)
//! ```
//!
//! Any finite input is accepted. A vector whose squared norm would overflow
//! or underflow is divided by its largest magnitude before the sums are taken,
//! which leaves the cosine unchanged.

/// Squared norms inside this range are summed directly.
const NORM_SQ_MIN: f64 = 1e-280;
const NORM_SQ_MAX: f64 = 1e280;

/// Squared L2 norm, ||v||²
#[inline(always)]
fn norm_squared(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

#[inline]
fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |max, x| max.max(x.abs()))
}

/// Maps `-0.0` to `0.0` so equal scores compare equal under `total_cmp`.
#[inline(always)]
fn canonical_zero(score: f64) -> f64 {
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// `v` scaled to unit length, or `None` for the zero vector.
pub fn unit_vector(v: &[f64]) -> Option<Vec<f64>> {
    let max = max_abs(v);
    if max == 0.0 {
        return None;
    }

    // Every component is now in [-1, 1] with at least one at magnitude 1,
    // so the norm lies in [1, sqrt(D)].
    let scaled: Vec<f64> = v.iter().map(|x| x / max).collect();
    let norm = norm_squared(&scaled).sqrt();
    Some(scaled.into_iter().map(|x| x / norm).collect())
}

/// Cosine similarity of `candidate` against a query already scaled to unit
/// length by [`unit_vector`].
///
/// The engine scores one query against many entities, so the query side is
/// prepared once. Returns exactly `0.0` when `candidate` is the zero vector.
#[inline]
pub fn cosine_with_unit_query(unit_query: &[f64], candidate: &[f64]) -> f64 {
    debug_assert_eq!(unit_query.len(), candidate.len(), "Vector length mismatch");

    let mut dot = 0.0_f64;
    let mut norm_c = 0.0_f64;
    for (q, c) in unit_query.iter().zip(candidate) {
        dot += q * c;
        norm_c += c * c;
    }

    if (NORM_SQ_MIN..=NORM_SQ_MAX).contains(&norm_c) {
        return canonical_zero(dot / norm_c.sqrt());
    }

    let max = max_abs(candidate);
    if max == 0.0 {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_c = 0.0_f64;
    for (q, c) in unit_query.iter().zip(candidate) {
        let c = c / max;
        dot += q * c;
        norm_c += c * c;
    }
    canonical_zero(dot / norm_c.sqrt())
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns exactly `0.0` when either vector has zero norm.
#[inline]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    match unit_vector(a) {
        Some(unit_a) => cosine_with_unit_query(&unit_a, b),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f64> {
        (0..dim).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_cosine_basic() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];

        // 70 / (sqrt(30) * sqrt(174))
        let expected = 70.0 / (30.0f64.sqrt() * 174.0f64.sqrt());
        assert!((cosine_similarity(&a, &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_self_is_one() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let v = random_vector(&mut rng, 256);
            assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let mut rng = StdRng::seed_from_u64(11);
        let z = vec![0.0; 256];
        let v = random_vector(&mut rng, 256);

        assert_eq!(cosine_similarity(&v, &z), 0.0);
        assert_eq!(cosine_similarity(&z, &v), 0.0);
        assert_eq!(cosine_similarity(&z, &z), 0.0);
        assert!(unit_vector(&z).is_none());
    }

    #[test]
    fn test_cosine_symmetric() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let a = random_vector(&mut rng, 64);
            let b = random_vector(&mut rng, 64);
            assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let a = [3.0, 4.0];
        let b = [30.0, 40.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_extreme_magnitudes() {
        let huge = [1e200, 0.0];
        let tiny = [1e-200, 0.0];
        let unit = [1.0, 0.0];
        let opposite = [-1.0, 0.0];

        assert_eq!(cosine_similarity(&huge, &huge), 1.0);
        assert_eq!(cosine_similarity(&huge, &unit), 1.0);
        assert_eq!(cosine_similarity(&huge, &opposite), -1.0);
        assert_eq!(cosine_similarity(&tiny, &tiny), 1.0);
        assert_eq!(cosine_similarity(&tiny, &huge), 1.0);
        assert_eq!(cosine_similarity(&unit, &tiny), 1.0);

        let max = [f64::MAX; 8];
        assert!((cosine_similarity(&max, &max) - 1.0).abs() < 1e-12);

        let subnormal = [f64::MIN_POSITIVE / 1024.0, 0.0];
        assert_eq!(cosine_similarity(&subnormal, &unit), 1.0);
    }

    #[test]
    fn test_zero_score_is_positive_zero() {
        // Products and quotients that would otherwise round to -0.0.
        let cases: [(&[f64], &[f64]); 3] = [
            (&[-1.0, 0.0], &[0.0, 5.0]),
            (&[1e200, 0.0], &[-0.0, 1.0]),
            (&[0.0, -1e-200], &[1.0, 0.0]),
        ];
        for (a, b) in cases {
            let score = cosine_similarity(a, b);
            assert_eq!(score.to_bits(), 0.0f64.to_bits(), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_unit_query_matches_full_cosine() {
        let mut rng = StdRng::seed_from_u64(17);
        let q = random_vector(&mut rng, 128);
        let unit = unit_vector(&q).unwrap();
        assert!((norm_squared(&unit) - 1.0).abs() < 1e-12);
        for _ in 0..50 {
            let c = random_vector(&mut rng, 128);
            let expected = cosine_similarity(&q, &c);
            assert_eq!(cosine_with_unit_query(&unit, &c).to_bits(), expected.to_bits());
        }
        assert_eq!(cosine_with_unit_query(&unit, &[0.0; 128]), 0.0);
    }
}
