//! Cosine distance between embedding vectors.
//!
//! Accumulates in `f64` and never returns NaN: vectors of unequal length or
//! empty vectors get [`MAX_DISTANCE`], and a zero-norm vector has similarity
//! 0 (distance 1).

/// Sentinel distance for vectors that cannot be compared.
pub const MAX_DISTANCE: f64 = 2.0;

/// Cosine similarity in `[-1, 1]`. Returns 0.0 when either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return MAX_DISTANCE;
    }
    let d = 1.0 - cosine_similarity(a, b);
    if d.is_finite() {
        d.clamp(0.0, MAX_DISTANCE)
    } else {
        MAX_DISTANCE
    }
}
