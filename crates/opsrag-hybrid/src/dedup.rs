use opsrag_vector::cosine_similarity;

/// Highest cosine similarity between `candidate` and any accepted vector.
pub fn max_similarity<'a, I>(candidate: &[f32], accepted: I) -> f32
where
    I: IntoIterator<Item = &'a [f32]>,
{
    accepted
        .into_iter()
        .map(|v| cosine_similarity(candidate, v))
        .fold(f32::NEG_INFINITY, f32::max)
}

/// A candidate is a near-duplicate when its similarity to some accepted
/// vector strictly exceeds `threshold`.
pub fn is_near_duplicate<'a, I>(candidate: &[f32], accepted: I, threshold: f32) -> bool
where
    I: IntoIterator<Item = &'a [f32]>,
{
    max_similarity(candidate, accepted) > threshold
}

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
