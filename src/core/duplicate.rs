// Duplicate clustering within one bucket:
// - score every unordered pair of scoreable images
// - union pairs at or above the threshold
// - report every set of two or more images with the scores behind it

use crate::core::features::FeatureSet;
use crate::core::similarity::PairScorer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Similarity computed from `a` into `b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub a: PathBuf,
    pub b: PathBuf,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCluster {
    /// Members sorted by path; always at least two.
    pub images: Vec<PathBuf>,
    /// Every defined score computed between two members.
    pub scores: Vec<PairScore>,
}

impl DuplicateCluster {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn contains(&self, image: &Path) -> bool {
        self.images.iter().any(|p| p == image)
    }

    /// Score between two members in either direction, if one was computed.
    pub fn score_between(&self, x: &Path, y: &Path) -> Option<f32> {
        self.scores
            .iter()
            .find(|s| (s.a == x && s.b == y) || (s.a == y && s.b == x))
            .map(|s| s.score)
    }
}

/// Disjoint sets over `0..n` with union by rank and path compression.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`; false when they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }

    /// All sets, members in ascending order, sets ordered by smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for x in 0..self.parent.len() {
            let root = self.find(x);
            by_root.entry(root).or_default().push(x);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

pub struct DuplicateClusterer<'a> {
    scorer: &'a dyn PairScorer,
    threshold: f32,
}

impl<'a> DuplicateClusterer<'a> {
    pub fn new(scorer: &'a dyn PairScorer, threshold: f32) -> Self {
        Self { scorer, threshold }
    }

    /// Group a bucket's images into duplicate clusters. Images without
    /// features take no part. Clusters come largest first.
    pub fn cluster(&self, images: Vec<(PathBuf, Option<FeatureSet>)>) -> Vec<DuplicateCluster> {
        let scoreable = scoreable(images);
        if scoreable.len() < 2 {
            return Vec::new();
        }

        let mut uf = UnionFind::new(scoreable.len());
        let mut computed: Vec<(usize, usize, f32)> = Vec::new();

        for i in 0..scoreable.len() {
            for j in i + 1..scoreable.len() {
                let Some(score) = self.scorer.score(&scoreable[i].1, &scoreable[j].1) else {
                    continue;
                };
                computed.push((i, j, score));
                if score >= self.threshold {
                    uf.union(i, j);
                }
            }
        }

        let mut root_of = Vec::with_capacity(scoreable.len());
        for i in 0..scoreable.len() {
            root_of.push(uf.find(i));
        }

        let mut clusters: Vec<DuplicateCluster> = uf
            .groups()
            .into_iter()
            .filter(|members| members.len() >= 2)
            .map(|members| {
                let root = root_of[members[0]];
                let scores = computed
                    .iter()
                    .filter(|(i, j, _)| root_of[*i] == root && root_of[*j] == root)
                    .map(|(i, j, score)| PairScore {
                        a: scoreable[*i].0.clone(),
                        b: scoreable[*j].0.clone(),
                        score: *score,
                    })
                    .collect();
                DuplicateCluster {
                    images: members.iter().map(|&m| scoreable[m].0.clone()).collect(),
                    scores,
                }
            })
            .collect();

        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.images.cmp(&b.images)));
        clusters
    }

    /// Every pair scoring at or above the threshold, without grouping.
    pub fn pairs(&self, images: Vec<(PathBuf, Option<FeatureSet>)>) -> Vec<PairScore> {
        let scoreable = scoreable(images);
        let mut pairs = Vec::new();

        for i in 0..scoreable.len() {
            for j in i + 1..scoreable.len() {
                if let Some(score) = self.scorer.score(&scoreable[i].1, &scoreable[j].1) {
                    if score >= self.threshold {
                        pairs.push(PairScore {
                            a: scoreable[i].0.clone(),
                            b: scoreable[j].0.clone(),
                            score,
                        });
                    }
                }
            }
        }

        pairs
    }
}

fn scoreable(images: Vec<(PathBuf, Option<FeatureSet>)>) -> Vec<(PathBuf, FeatureSet)> {
    let mut scoreable: Vec<(PathBuf, FeatureSet)> = images
        .into_iter()
        .filter_map(|(path, features)| features.map(|f| (path, f)))
        .collect();
    scoreable.sort_by(|a, b| a.0.cmp(&b.0));
    scoreable
}
