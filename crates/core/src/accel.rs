use std::path::Path;

/// External AI accelerator: image NSFW scoring. Supplied by the caller;
/// absent a configured classifier, gating is a no-op.
pub trait ImageClassifier: Send + Sync {
    fn classify_image(&self, path: &Path) -> Option<f32>;
}

/// External AI accelerator: text embedding for semantic search.
pub trait TextEmbedder: Send + Sync {
    fn embed_text(&self, text: &str) -> Option<Vec<f32>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dims_is_none() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), None);
    }
}
