//! Distance functions (spec §4.3). Grounded on the teacher's
//! `compute_similarity`, but re-expressed in distance terms (lower = closer)
//! rather than similarity terms (higher = closer) to match
//! `weave_core::config::DistanceMetric`'s doc comment: "ascending distance =
//! descending similarity" for every metric, including dot product.

use weave_core::config::DistanceMetric;

/// Distance between two equal-length vectors under `metric`. Lower means
/// closer. Panics in debug builds on a dimension mismatch — callers are
/// expected to have already validated dimension against the index's
/// configured dimension.
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimension mismatch");
    match metric {
        DistanceMetric::L2 => l2(a, b),
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        DistanceMetric::Dot => -dot(a, b),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot(a, b) / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_distance_is_zero_for_identical_vectors() {
        let v = [1.0, 2.0, 3.0];
        assert!(distance(&v, &v, DistanceMetric::L2) < 1e-6);
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_direction() {
        let v = [1.0, 2.0, 3.0];
        assert!(distance(&v, &v, DistanceMetric::Cosine).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_is_two_for_opposite_vectors() {
        let a = [1.0, 0.0];
        let b = [-1.0, 0.0];
        assert!((distance(&a, &b, DistanceMetric::Cosine) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn dot_distance_is_more_negative_for_more_similar_vectors() {
        let q = [1.0, 0.0];
        let close = [2.0, 0.0];
        let far = [0.0, 1.0];
        assert!(distance(&q, &close, DistanceMetric::Dot) < distance(&q, &far, DistanceMetric::Dot));
    }
}
