use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use crate::index::l2_distance;

const MAX_ITERATIONS: usize = 25;

/// Lloyd's k-means with seeded initialisation. Returns at most `k`
/// centroids; fewer when there are fewer points than `k`.
pub(super) fn train(points: &[Vec<f32>], k: usize, seed: u64) -> Vec<Vec<f32>> {
    let k = k.min(points.len());
    if k == 0 {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut initial = sample(&mut rng, points.len(), k).into_vec();
    initial.sort_unstable();
    let mut centroids: Vec<Vec<f32>> = initial
        .into_iter()
        .filter_map(|i| points.get(i).cloned())
        .collect();

    let dimension = centroids.first().map_or(0, Vec::len);
    let mut assignment = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (point, slot) in points.iter().zip(assignment.iter_mut()) {
            let nearest = closest(&centroids, point);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0_f64; dimension]; centroids.len()];
        let mut counts = vec![0_usize; centroids.len()];
        for (point, &cluster) in points.iter().zip(&assignment) {
            if let (Some(sum), Some(count)) = (sums.get_mut(cluster), counts.get_mut(cluster)) {
                for (s, x) in sum.iter_mut().zip(point) {
                    *s += f64::from(*x);
                }
                *count += 1;
            }
        }

        // Empty clusters keep their previous centroid
        for ((centroid, sum), count) in centroids.iter_mut().zip(&sums).zip(&counts) {
            if *count > 0 {
                for (c, s) in centroid.iter_mut().zip(sum) {
                    *c = (*s / *count as f64) as f32;
                }
            }
        }
    }

    centroids
}

/// Index of the centroid closest to `vector`, lowest index on ties
pub(super) fn closest(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, l2_distance(c, vector)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map_or(0, |(i, _)| i)
}
