
mod hnsw;
mod kmeans;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use hnsw::Hnsw;

use super::{IndexConfig, IndexError, IndexKind, RecordId, l2_distance};

/// A candidate returned by the nearest-neighbor structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: RecordId,
    pub distance: f32,
}

/// Nearest-neighbor structure holding raw vectors keyed by record id.
///
/// Vectors are never removed; logical deletion happens in the metadata layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnnIndex {
    Flat(FlatL2),
    Ivf(IvfFlat),
    Hnsw(Hnsw),
}

impl AnnIndex {
    #[inline]
    pub fn new(dimension: usize, config: &IndexConfig) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidConfig(
                "dimension must be greater than zero".to_string(),
            ));
        }

        match config.kind {
            IndexKind::Flat => Ok(Self::Flat(FlatL2::new(dimension))),
            IndexKind::Ivf => {
                if config.nlist == 0 || config.nprobe == 0 {
                    return Err(IndexError::InvalidConfig(format!(
                        "nlist ({}) and nprobe ({}) must be greater than zero",
                        config.nlist, config.nprobe
                    )));
                }
                Ok(Self::Ivf(IvfFlat::new(dimension, config)))
            }
            IndexKind::Hnsw => {
                if config.m < 2 || config.ef_search == 0 {
                    return Err(IndexError::InvalidConfig(format!(
                        "m ({}) must be at least 2 and ef_search ({}) greater than zero",
                        config.m, config.ef_search
                    )));
                }
                Ok(Self::Hnsw(Hnsw::new(dimension, config)))
            }
        }
    }

    #[inline]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Ivf(_) => IndexKind::Ivf,
            Self::Hnsw(_) => IndexKind::Hnsw,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.dimension,
            Self::Ivf(ivf) => ivf.dimension,
            Self::Hnsw(graph) => graph.dimension(),
        }
    }

    /// Stored vectors, trained or not
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(flat) => flat.vectors.len(),
            Self::Ivf(ivf) => ivf.len(),
            Self::Hnsw(graph) => graph.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_trained(&self) -> bool {
        match self {
            Self::Flat(_) | Self::Hnsw(_) => true,
            Self::Ivf(ivf) => ivf.is_trained(),
        }
    }

    #[inline]
    pub fn synthetic_training(&self) -> bool {
        match self {
            Self::Flat(_) | Self::Hnsw(_) => false,
            Self::Ivf(ivf) => ivf.synthetic_training,
        }
    }

    /// Layers in a graph index
    #[inline]
    pub fn graph_levels(&self) -> Option<usize> {
        match self {
            Self::Hnsw(graph) => Some(graph.levels()),
            Self::Flat(_) | Self::Ivf(_) => None,
        }
    }

    /// Store `vectors` under consecutive ids starting at `first_id`
    #[inline]
    pub fn add(&mut self, first_id: RecordId, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        let expected = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let entries = (first_id..).zip(vectors.iter().cloned());
        match self {
            Self::Flat(flat) => flat.vectors.extend(entries),
            Self::Ivf(ivf) => ivf.add(entries),
            Self::Hnsw(graph) => {
                for (id, vector) in entries {
                    graph.insert(id, vector);
                }
            }
        }
        Ok(())
    }

    /// The `k` nearest stored vectors, ascending by distance then id
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        match self {
            Self::Flat(flat) => Ok(nearest(
                flat.vectors.iter().map(|(id, v)| (*id, v.as_slice())),
                query,
                k,
            )),
            Self::Ivf(ivf) => ivf.search(query, k),
            Self::Hnsw(graph) => Ok(graph.search(query, k)),
        }
    }

    /// Train the coarse quantizer; a no-op for indexes without one
    #[inline]
    pub fn train(&mut self) -> Result<(), IndexError> {
        match self {
            Self::Flat(_) | Self::Hnsw(_) => Ok(()),
            Self::Ivf(ivf) => ivf.train(),
        }
    }
}

/// Exact brute-force L2 search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2 {
    dimension: usize,
    vectors: Vec<(RecordId, Vec<f32>)>,
}

impl FlatL2 {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }
}

/// Inverted-file index: vectors are bucketed by their nearest k-means
/// centroid and only the `nprobe` closest buckets are scanned per query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfFlat {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    seed: u64,
    allow_synthetic_training: bool,
    synthetic_training: bool,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<(RecordId, Vec<f32>)>>,
    /// Vectors waiting for training
    pending: Vec<(RecordId, Vec<f32>)>,
}

impl IvfFlat {
    fn new(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            dimension,
            nlist: config.nlist,
            nprobe: config.nprobe,
            seed: config.training_seed,
            allow_synthetic_training: config.allow_synthetic_training,
            synthetic_training: false,
            centroids: Vec::new(),
            lists: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn len(&self) -> usize {
        self.lists.iter().map(Vec::len).sum::<usize>() + self.pending.len()
    }

    fn add(&mut self, entries: impl Iterator<Item = (RecordId, Vec<f32>)>) {
        if self.is_trained() {
            for (id, vector) in entries {
                let list = self.assign(&vector);
                if let Some(bucket) = self.lists.get_mut(list) {
                    bucket.push((id, vector));
                }
            }
            return;
        }

        self.pending.extend(entries);

        if self.pending.len() >= self.nlist {
            info!(
                "Training IVF index on {} vectors ({} lists)",
                self.pending.len(),
                self.nlist
            );
            self.fit(self.nlist, false);
        } else if self.allow_synthetic_training {
            warn!(
                "Only {} vectors available for {} lists, training on synthetic data",
                self.pending.len(),
                self.nlist
            );
            self.fit(self.nlist, true);
        } else {
            debug!(
                "IVF index untrained, {} of {} vectors needed",
                self.pending.len(),
                self.nlist
            );
        }
    }

    /// Train on real data, replacing synthetic training when enough real
    /// vectors have accumulated
    fn train(&mut self) -> Result<(), IndexError> {
        if self.is_trained() && !self.synthetic_training {
            debug!("IVF index already trained");
            return Ok(());
        }

        let available = self.len();
        if available >= self.nlist {
            info!("Training IVF index on {} real vectors", available);
            self.fit(self.nlist, false);
        } else if self.is_trained() {
            warn!(
                "Keeping synthetic training: {} real vectors for {} lists",
                available, self.nlist
            );
        } else if self.allow_synthetic_training {
            self.fit(self.nlist, true);
        } else if available == 0 {
            return Err(IndexError::EmptyInput);
        } else {
            warn!(
                "Training IVF index with {} lists instead of {}: too few vectors",
                available, self.nlist
            );
            self.fit(available, false);
        }

        Ok(())
    }

    /// Compute `lists` centroids and redistribute every stored vector
    fn fit(&mut self, lists: usize, synthetic: bool) {
        let mut stored: Vec<(RecordId, Vec<f32>)> = self.lists.drain(..).flatten().collect();
        stored.append(&mut self.pending);
        stored.sort_by_key(|(id, _)| *id);

        let mut training: Vec<Vec<f32>> = stored.iter().map(|(_, v)| v.clone()).collect();
        if synthetic {
            let missing = lists.saturating_sub(training.len());
            training.extend(synthetic_vectors(&training, self.dimension, missing, self.seed));
        }

        self.centroids = kmeans::train(&training, lists, self.seed);
        self.synthetic_training = synthetic;
        self.lists = vec![Vec::new(); self.centroids.len()];

        for (id, vector) in stored {
            let list = self.assign(&vector);
            if let Some(bucket) = self.lists.get_mut(list) {
                bucket.push((id, vector));
            }
        }

        debug!(
            "IVF index trained with {} centroids (synthetic: {})",
            self.centroids.len(),
            synthetic
        );
    }

    fn assign(&self, vector: &[f32]) -> usize {
        kmeans::closest(&self.centroids, vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }

        let mut probes: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, l2_distance(c, query)))
            .collect();
        probes.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let candidates = probes
            .iter()
            .take(self.nprobe)
            .filter_map(|(list, _)| self.lists.get(*list))
            .flatten()
            .map(|(id, v)| (*id, v.as_slice()));

        Ok(nearest(candidates, query, k))
    }
}

fn nearest<'a>(
    candidates: impl Iterator<Item = (RecordId, &'a [f32])>,
    query: &[f32],
    k: usize,
) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = candidates
        .map(|(id, vector)| Neighbor {
            id,
            distance: l2_distance(vector, query),
        })
        .collect();
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    neighbors.truncate(k);
    neighbors
}

/// Seeded random vectors within the per-dimension range of `real`, or
/// `[-1, 1)` when there is nothing to take a range from
fn synthetic_vectors(real: &[Vec<f32>], dimension: usize, count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut bounds = vec![(-1.0_f32, 1.0_f32); dimension];
    if let Some(first) = real.first() {
        for (d, bound) in bounds.iter_mut().enumerate() {
            let start = first.get(d).copied().unwrap_or_default();
            *bound = real.iter().fold((start, start), |(lo, hi), v| {
                let x = v.get(d).copied().unwrap_or_default();
                (lo.min(x), hi.max(x))
            });
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            bounds
                .iter()
                .map(|&(lo, hi)| {
                    if hi > lo {
                        rng.gen_range(lo..hi)
                    } else {
                        lo + rng.gen_range(-1.0..1.0)
                    }
                })
                .collect()
        })
        .collect()
}
