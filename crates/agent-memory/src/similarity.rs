//! Built-in embedder and density clusterer.
//!
//! [`HashingEmbedder`] turns strings into hashed character-trigram vectors;
//! [`SimilarityClusterer`] runs DBSCAN over the L2-normalised embeddings and
//! reports each dense region as a group. Points DBSCAN leaves unassigned, and
//! groups smaller than the requested minimum, are noise.

use std::collections::HashMap;
use std::sync::Arc;

use linfa::dataset::AsTargets;
use linfa::traits::Transformer;
use linfa::DatasetBase;
use linfa_clustering::Dbscan;
use ndarray::Array2;
use sha2::{Digest, Sha256};

use crate::capabilities::{Clusterer, Clusters, Embedder, NOISE_LABEL};

/// Default embedding width for [`HashingEmbedder`].
pub const DEFAULT_DIM: usize = 256;

/// Smallest neighbourhood DBSCAN accepts for a core point.
const MIN_DBSCAN_POINTS: usize = 2;

/// Character-trigram feature hashing.
///
/// Input is lower-cased and padded with spaces so short names still produce
/// a few trigrams. Buckets come from a SHA-256 digest, so vectors are the
/// same across builds and platforms. Output vectors are L2-normalised; an
/// empty string maps to the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, gram: &[char]) -> usize {
        let gram: String = gram.iter().collect();
        let digest = Sha256::digest(gram.as_bytes());
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dim as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dim];
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return v;
        }
        let padded: Vec<char> = format!("  {normalized} ").chars().collect();
        for gram in padded.windows(3) {
            v[self.bucket(gram)] += 1.0;
        }
        let norm = l2_norm(&v);
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// DBSCAN over embeddings, parameterised by cosine similarity.
///
/// On unit vectors Euclidean distance and cosine similarity are related by
/// `d = sqrt(2 * (1 - cos))`, so two items are DBSCAN neighbours exactly
/// when their cosine similarity is at least `threshold`. `min_group_size`
/// becomes DBSCAN's `min_points` (never below 2).
pub struct SimilarityClusterer {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl SimilarityClusterer {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    /// Euclidean radius equivalent to the cosine threshold on unit vectors.
    fn tolerance(&self) -> f64 {
        let gap = (1.0 - f64::from(self.threshold)).clamp(0.0, 2.0);
        (2.0 * gap).sqrt().max(f64::EPSILON)
    }

    fn unit_rows(vectors: &[Vec<f32>]) -> anyhow::Result<Array2<f64>> {
        let dim = vectors.first().map_or(0, Vec::len);
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            anyhow::bail!("embedder returned vectors of zero or mixed width");
        }
        let mut data = Array2::<f64>::zeros((vectors.len(), dim));
        for (i, v) in vectors.iter().enumerate() {
            let norm = l2_norm(v);
            if norm == 0.0 {
                continue;
            }
            for (j, &x) in v.iter().enumerate() {
                data[[i, j]] = f64::from(x / norm);
            }
        }
        Ok(data)
    }
}

impl std::fmt::Debug for SimilarityClusterer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityClusterer")
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Clusterer for SimilarityClusterer {
    fn cluster(&self, items: &[String], min_group_size: usize) -> anyhow::Result<Clusters> {
        if items.is_empty() {
            return Ok(Clusters::new());
        }

        let vectors = self.embedder.embed(items)?;
        if vectors.len() != items.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} items",
                vectors.len(),
                items.len()
            );
        }
        let data = Self::unit_rows(&vectors)?;

        let memberships = Dbscan::params(min_group_size.max(MIN_DBSCAN_POINTS))
            .tolerance(self.tolerance())
            .transform(DatasetBase::from(data))
            .map_err(|e| anyhow::anyhow!("DBSCAN failed: {e:?}"))?;
        let labels: Vec<Option<usize>> = memberships.targets().iter().copied().collect();

        // Relabel by first appearance so output is stable for a given input order.
        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut noise: Vec<String> = Vec::new();
        for (item, label) in items.iter().zip(labels) {
            match label {
                Some(id) => {
                    let slot = *slots.entry(id).or_insert_with(|| {
                        groups.push(Vec::new());
                        groups.len() - 1
                    });
                    groups[slot].push(item.clone());
                }
                None => noise.push(item.clone()),
            }
        }

        let mut clusters = Clusters::new();
        let mut next_label = 0_i64;
        for members in groups {
            if members.len() >= min_group_size {
                clusters.insert(next_label, members);
                next_label += 1;
            } else {
                noise.extend(members);
            }
        }
        if !noise.is_empty() {
            clusters.insert(NOISE_LABEL, noise);
        }
        Ok(clusters)
    }
}

/// Euclidean (L2) norm of `v`.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
