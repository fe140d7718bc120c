//! Small shared vector math: cosine similarity and centroids.

/// Cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` on mismatched lengths
/// or when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(
            len_a = a.len(),
            len_b = b.len(),
            "cosine_similarity: mismatched vector lengths, returning 0.0"
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Element-wise average of a set of vectors.
///
/// Returns an empty vector if the input is empty.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }

    let dim = vectors[0].len();
    let count = vectors.len() as f32;

    let mut out = vec![0.0f32; dim];
    for v in vectors {
        for (acc, val) in out.iter_mut().zip(v.iter()) {
            *acc += val;
        }
    }
    for val in &mut out {
        *val /= count;
    }

    out
}

/// Mean pairwise cosine similarity across a set of vectors.
///
/// Returns `0.0` for fewer than two vectors (a single document is
/// trivially "diverse").
pub fn mean_pairwise_similarity(vectors: &[Vec<f32>]) -> f32 {
    if vectors.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            sum += cosine_similarity(&vectors[i], &vectors[j]);
            pairs += 1;
        }
    }
    sum / pairs as f32
}
