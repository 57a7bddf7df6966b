//! Binary classifier capability and the shipped random forest.
//!
//! The rest of the crate only depends on [`Classifier`]; the forest is one
//! implementation of it. Settings default to 300 depth-7 trees with balanced
//! class weights and a fixed seed so training runs are reproducible.

use std::cmp::Ordering;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AnalysisError;
use crate::pipeline::{FEATURE_COUNT, FeatureVector, feature_names};

const DECISION_BOUNDARY: f64 = 0.5;
const MIN_GAIN: f64 = 1e-12;

/// `fit(X, y)` / `predict_proba(X)` over contract-ordered feature vectors.
pub trait Classifier {
    fn fit(&mut self, features: &[FeatureVector], labels: &[u8]) -> Result<()>;

    /// Probability of the "up" class (label 1) for each row.
    fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64>;

    /// Column names the classifier was fitted with, in input order.
    fn feature_names(&self) -> &[String];

    fn predict(&self, features: &[FeatureVector]) -> Vec<u8> {
        self.predict_proba(features)
            .into_iter()
            .map(|p| u8::from(p > DECISION_BOUNDARY))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per split; `None` uses `floor(sqrt(n_features))`.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    /// Reweight classes inversely to their frequency.
    pub balanced_class_weight: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 300,
            max_depth: 7,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            balanced_class_weight: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TreeNode {
    Leaf {
        p_up: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn p_up(&self, features: &FeatureVector) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { p_up } => return *p_up,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Weighted class totals of a node.
#[derive(Debug, Clone, Copy, Default)]
struct ClassWeights {
    down: f64,
    up: f64,
}

impl ClassWeights {
    fn add(&mut self, label: u8, weight: f64) {
        if label == 1 {
            self.up += weight;
        } else {
            self.down += weight;
        }
    }

    fn total(&self) -> f64 {
        self.down + self.up
    }

    fn gini(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let p = self.up / total;
        2.0 * p * (1.0 - p)
    }

    fn p_up(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 { 0.5 } else { self.up / total }
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    features: &'a [FeatureVector],
    labels: &'a [u8],
    weights: Vec<f64>,
    config: &'a ForestConfig,
    max_features: usize,
    rng: ChaCha8Rng,
}

impl TreeBuilder<'_> {
    fn node_weights(&self, indices: &[usize]) -> ClassWeights {
        let mut totals = ClassWeights::default();
        for &i in indices {
            totals.add(self.labels[i], self.weights[i]);
        }
        totals
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> TreeNode {
        let totals = self.node_weights(indices);
        if depth >= self.config.max_depth
            || indices.len() < self.config.min_samples_split
            || totals.gini() <= MIN_GAIN
        {
            return TreeNode::Leaf {
                p_up: totals.p_up(),
            };
        }

        let Some(split) = self.best_split(indices, totals) else {
            return TreeNode::Leaf {
                p_up: totals.p_up(),
            };
        };

        let feature = split.feature;
        let threshold = split.threshold;
        indices.sort_by(|&a, &b| {
            let left_a = self.features[a][feature] <= threshold;
            let left_b = self.features[b][feature] <= threshold;
            left_b.cmp(&left_a)
        });
        let n_left = indices
            .iter()
            .take_while(|&&i| self.features[i][feature] <= threshold)
            .count();
        let (left_idx, right_idx) = indices.split_at_mut(n_left);

        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);
        TreeNode::Split {
            feature,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Scan candidate features in sorted order and return the split with the
    /// largest weighted Gini decrease.
    fn best_split(&mut self, indices: &[usize], totals: ClassWeights) -> Option<Split> {
        let mut candidates: Vec<usize> = (0..FEATURE_COUNT).collect();
        candidates.shuffle(&mut self.rng);
        candidates.truncate(self.max_features);

        let parent_gini = totals.gini();
        let parent_weight = totals.total();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut best: Option<Split> = None;
        let mut order = indices.to_vec();

        for feature in candidates {
            order.sort_by(|&a, &b| {
                self.features[a][feature]
                    .partial_cmp(&self.features[b][feature])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left = ClassWeights::default();
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(self.labels[i], self.weights[i]);

                let value = self.features[i][feature];
                let next = self.features[order[pos + 1]][feature];
                if next <= value {
                    continue;
                }
                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }

                let right = ClassWeights {
                    down: totals.down - left.down,
                    up: totals.up - left.up,
                };
                let weighted =
                    (left.total() * left.gini() + right.total() * right.gini()) / parent_weight;
                let gain = parent_gini - weighted;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mid = value + (next - value) / 2.0;
                    let threshold = if mid < next { mid } else { value };
                    best = Some(Split {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    config: ForestConfig,
    feature_names: Vec<String>,
    trees: Vec<TreeNode>,
}

impl RandomForestClassifier {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            feature_names: feature_names(),
            trees: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(TreeNode::depth).max().unwrap_or(0)
    }

    fn max_features(&self) -> usize {
        let limit = self
            .config
            .max_features
            .unwrap_or_else(|| (FEATURE_COUNT as f64).sqrt().floor() as usize);
        limit.clamp(1, FEATURE_COUNT)
    }

    fn class_weights(&self, labels: &[u8]) -> [f64; 2] {
        if !self.config.balanced_class_weight {
            return [1.0, 1.0];
        }
        let n = labels.len() as f64;
        let n_up = labels.iter().filter(|&&l| l == 1).count() as f64;
        let n_down = n - n_up;
        let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
        [weight(n_down), weight(n_up)]
    }

    fn fit_tree(
        &self,
        features: &[FeatureVector],
        labels: &[u8],
        class_weights: [f64; 2],
        tree_index: usize,
    ) -> TreeNode {
        let n = labels.len();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(tree_index as u64));

        let mut counts = vec![0usize; n];
        if self.config.bootstrap {
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1;
            }
        } else {
            counts.fill(1);
        }

        let weights: Vec<f64> = counts
            .iter()
            .zip(labels)
            .map(|(&count, &label)| count as f64 * class_weights[usize::from(label == 1)])
            .collect();
        let mut indices: Vec<usize> = (0..n).filter(|&i| counts[i] > 0).collect();

        let mut builder = TreeBuilder {
            features,
            labels,
            weights,
            config: &self.config,
            max_features: self.max_features(),
            rng,
        };
        builder.build(&mut indices, 0)
    }
}

impl Default for RandomForestClassifier {
    fn default() -> Self {
        Self::new(ForestConfig::default())
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, features: &[FeatureVector], labels: &[u8]) -> Result<()> {
        if features.len() != labels.len() {
            return Err(AnalysisError::length_mismatch(
                "features",
                features.len(),
                "labels",
                labels.len(),
            )
            .into());
        }
        if features.is_empty() {
            return Err(AnalysisError::InsufficientHistory {
                rows: 0,
                required: 1,
            }
            .into());
        }

        let class_weights = self.class_weights(labels);
        let trees: Vec<TreeNode> = (0..self.config.n_trees.max(1))
            .into_par_iter()
            .map(|i| self.fit_tree(features, labels, class_weights, i))
            .collect();
        self.trees = trees;
        self.feature_names = feature_names();

        info!(
            trees = self.trees.len(),
            samples = features.len(),
            max_depth = self.max_tree_depth(),
            "Random forest fitted"
        );
        Ok(())
    }

    fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![DECISION_BOUNDARY; features.len()];
        }
        let n_trees = self.trees.len() as f64;
        features
            .par_iter()
            .map(|row| self.trees.iter().map(|tree| tree.p_up(row)).sum::<f64>() / n_trees)
            .collect()
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}
