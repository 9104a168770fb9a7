use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Neighbor;
use crate::index::{IndexConfig, RecordId, l2_distance};

/// Upper bound on graph layers
const MAX_LEVEL: usize = 16;

/// Hierarchical navigable small world graph over raw vectors.
///
/// Every node lives on layer 0; a node drawn at level `l` also appears on
/// layers `1..=l`, where links are sparser. Queries descend greedily from the
/// top layer and run a beam search of width `ef_search` on layer 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hnsw {
    dimension: usize,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    seed: u64,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    id: RecordId,
    vector: Vec<f32>,
    /// Neighbor node positions, one list per layer the node is on
    links: Vec<Vec<usize>>,
}

impl Node {
    fn level(&self) -> usize {
        self.links.len().saturating_sub(1)
    }
}

/// Distance to a node, ordered by distance then node position
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    node: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hnsw {
    pub(super) fn new(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            dimension,
            m: config.m,
            ef_construction: config.ef_construction.max(config.m),
            ef_search: config.ef_search,
            seed: config.training_seed,
            nodes: Vec::new(),
            entry_point: None,
        }
    }

    pub(super) fn dimension(&self) -> usize {
        self.dimension
    }

    pub(super) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Highest layer currently in the graph
    pub(super) fn levels(&self) -> usize {
        self.entry_point
            .and_then(|ep| self.nodes.get(ep))
            .map_or(0, |node| node.level() + 1)
    }

    pub(super) fn insert(&mut self, id: RecordId, vector: Vec<f32>) {
        let position = self.nodes.len();
        let level = self.draw_level(position);
        self.nodes.push(Node {
            id,
            vector,
            links: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(position);
            return;
        };
        let top = self.nodes.get(entry).map_or(0, Node::level);
        let query = self.vector(position).to_vec();

        let mut nearest = entry;
        for layer in (level + 1..=top).rev() {
            nearest = self.greedy_closest(&query, nearest, layer);
        }

        for layer in (0..=level.min(top)).rev() {
            let found = self.search_layer(&query, nearest, self.ef_construction, layer);
            let chosen: Vec<usize> = found
                .iter()
                .take(self.max_links(layer))
                .map(|c| c.node)
                .collect();

            for &other in &chosen {
                self.link(other, position, layer);
            }
            if let Some(links) = self.nodes.get_mut(position).and_then(|n| n.links.get_mut(layer)) {
                *links = chosen;
            }
            if let Some(closest) = found.first() {
                nearest = closest.node;
            }
        }

        if level > top {
            self.entry_point = Some(position);
        }
    }

    /// The `k` nearest stored vectors, ascending by distance then id
    pub(super) fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        let top = self.nodes.get(entry).map_or(0, Node::level);

        let mut nearest = entry;
        for layer in (1..=top).rev() {
            nearest = self.greedy_closest(query, nearest, layer);
        }

        let mut neighbors: Vec<Neighbor> = self
            .search_layer(query, nearest, self.ef_search.max(k), 0)
            .into_iter()
            .filter_map(|c| {
                self.nodes.get(c.node).map(|node| Neighbor {
                    id: node.id,
                    distance: c.distance,
                })
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        neighbors.truncate(k);
        neighbors
    }

    /// Seeded geometric level draw with normalisation factor `1 / ln(m)`
    fn draw_level(&self, position: usize) -> usize {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(position as u64));
        let uniform: f64 = 1.0 - rng.r#gen::<f64>();
        let scale = 1.0 / (self.m.max(2) as f64).ln();
        ((-uniform.ln() * scale).floor() as usize).min(MAX_LEVEL)
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn vector(&self, node: usize) -> &[f32] {
        self.nodes
            .get(node)
            .map(|n| n.vector.as_slice())
            .unwrap_or_default()
    }

    fn distance(&self, query: &[f32], node: usize) -> f32 {
        l2_distance(query, self.vector(node))
    }

    fn neighbors(&self, node: usize, layer: usize) -> &[usize] {
        self.nodes
            .get(node)
            .and_then(|n| n.links.get(layer))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Add `to` to the links of `from`, keeping only the closest when over
    /// the layer's link limit
    fn link(&mut self, from: usize, to: usize, layer: usize) {
        let limit = self.max_links(layer);
        let origin = self.vector(from).to_vec();
        let mut links = self.neighbors(from, layer).to_vec();
        links.push(to);

        if links.len() > limit {
            let mut ranked: Vec<Candidate> = links
                .iter()
                .map(|&node| Candidate {
                    distance: self.distance(&origin, node),
                    node,
                })
                .collect();
            ranked.sort();
            links = ranked.into_iter().take(limit).map(|c| c.node).collect();
        }

        if let Some(slot) = self.nodes.get_mut(from).and_then(|n| n.links.get_mut(layer)) {
            *slot = links;
        }
    }

    fn greedy_closest(&self, query: &[f32], start: usize, layer: usize) -> usize {
        let mut current = Candidate {
            distance: self.distance(query, start),
            node: start,
        };
        loop {
            let best = self
                .neighbors(current.node, layer)
                .iter()
                .map(|&node| Candidate {
                    distance: self.distance(query, node),
                    node,
                })
                .min();
            match best {
                Some(next) if next < current => current = next,
                _ => return current.node,
            }
        }
    }

    /// Beam search on one layer, returning up to `ef` nodes ascending by
    /// distance
    fn search_layer(&self, query: &[f32], start: usize, ef: usize, layer: usize) -> Vec<Candidate> {
        let first = Candidate {
            distance: self.distance(query, start),
            node: start,
        };
        let mut visited = HashSet::from([start]);
        let mut frontier = BinaryHeap::from([Reverse(first)]);
        let mut found = BinaryHeap::from([first]);

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = found.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && found.len() >= ef {
                break;
            }

            for &node in self.neighbors(current.node, layer) {
                if !visited.insert(node) {
                    continue;
                }
                let candidate = Candidate {
                    distance: self.distance(query, node),
                    node,
                };
                let worst = found.peek().map_or(f32::INFINITY, |c| c.distance);
                if found.len() < ef || candidate.distance < worst {
                    frontier.push(Reverse(candidate));
                    found.push(candidate);
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }

        found.into_sorted_vec()
    }
}
