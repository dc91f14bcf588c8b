//! L2 normalization of embedding vectors.

/// Euclidean norm of `values`.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `values` to unit length.
///
/// A vector whose norm is not positive (all zeros) is returned unchanged
/// rather than turned into NaNs.
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = l2_norm(values);
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}
