//! CART classification tree.
//!
//! Nodes live in a flat vector (children by index) so serialized models stay
//! shallow regardless of tree depth. Splits are axis-aligned `x[f] <= t`, with
//! `t` the midpoint between two adjacent distinct sample values.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Split quality measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
}

impl Criterion {
    fn impurity(self, counts: &[f64], total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => 1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
            Criterion::Entropy => counts
                .iter()
                .filter(|c| **c > 0.0)
                .map(|c| {
                    let p = c / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }
}

/// Growth limits for a single tree. `max_features` is already resolved to a
/// count in `1..=n_features`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: usize,
    pub criterion: Criterion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Class probabilities, indexed like the owning model's class list.
    Leaf { value: Vec<f64> },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grow a tree on `samples` (row indices into `rows`, repeats allowed).
    ///
    /// `y` holds class indices in `0..n_classes`. Feature sub-sampling at each
    /// node draws from `rng`.
    pub fn fit(
        rows: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        mut samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = rows.first().map(Vec::len).unwrap_or(0);
        let min_leaf = params.min_samples_leaf.max(1);
        let max_features = params.max_features.clamp(1, n_features.max(1));

        let mut nodes = vec![Node::Leaf { value: Vec::new() }];
        // (node id, start, end, depth) over `samples`.
        let mut stack = vec![(0usize, 0usize, samples.len(), 0usize)];

        while let Some((id, start, end, depth)) = stack.pop() {
            let slice = &mut samples[start..end];
            let counts = class_counts(slice, y, n_classes);
            let n = slice.len();

            let pure = counts.iter().filter(|c| **c > 0.0).count() <= 1;
            let stop = pure
                || n_features == 0
                || params.max_depth.is_some_and(|d| depth >= d)
                || n < params.min_samples_split.max(2)
                || n < 2 * min_leaf;

            let split = if stop {
                None
            } else {
                best_split(rows, y, slice, &counts, n_features, max_features, min_leaf, params.criterion, rng)
            };

            match split {
                None => nodes[id] = Node::Leaf { value: normalize(counts) },
                Some((feature, threshold)) => {
                    let mid = start + partition(slice, |i| rows[i][feature] <= threshold);
                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(Node::Leaf { value: Vec::new() });
                    nodes.push(Node::Leaf { value: Vec::new() });
                    nodes[id] = Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    };
                    stack.push((right, mid, end, depth + 1));
                    stack.push((left, start, mid, depth + 1));
                }
            }
        }

        Self { nodes }
    }

    /// Class probabilities for one feature row.
    pub fn proba(&self, x: &[f64]) -> &[f64] {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, d)) = stack.pop() {
            max = max.max(d);
            if let Node::Split { left, right, .. } = &self.nodes[id] {
                stack.push((*left, d + 1));
                stack.push((*right, d + 1));
            }
        }
        max
    }
}

#[allow(clippy::too_many_arguments)]
fn best_split(
    rows: &[Vec<f64>],
    y: &[usize],
    samples: &[usize],
    counts: &[f64],
    n_features: usize,
    max_features: usize,
    min_leaf: usize,
    criterion: Criterion,
    rng: &mut StdRng,
) -> Option<(usize, f64)> {
    let n = samples.len();
    let total = n as f64;
    let parent = criterion.impurity(counts, total);

    // Partial Fisher-Yates: the first `max_features` entries are the candidates.
    let mut features: Vec<usize> = (0..n_features).collect();
    for i in 0..max_features {
        let j = rng.gen_range(i..n_features);
        features.swap(i, j);
    }

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order: Vec<(f64, usize)> = Vec::with_capacity(n);

    for &f in &features[..max_features] {
        order.clear();
        order.extend(samples.iter().map(|&i| (rows[i][f], y[i])));
        order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left = vec![0.0; counts.len()];
        let mut right = counts.to_vec();
        for k in 0..n - 1 {
            let (v, class) = order[k];
            left[class] += 1.0;
            right[class] -= 1.0;

            let next = order[k + 1].0;
            if v == next {
                continue;
            }
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let (nl, nr) = (n_left as f64, n_right as f64);
            let score = (nl * criterion.impurity(&left, nl) + nr * criterion.impurity(&right, nr)) / total;
            if score < parent - 1e-12 && best.is_none_or(|(_, _, s)| score < s) {
                let mut threshold = 0.5 * (v + next);
                if threshold >= next {
                    threshold = v;
                }
                best = Some((f, threshold, score));
            }
        }
    }

    best.map(|(f, t, _)| (f, t))
}

fn class_counts(samples: &[usize], y: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &i in samples {
        counts[y[i]] += 1.0;
    }
    counts
}

fn normalize(counts: Vec<f64>) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return counts;
    }
    counts.into_iter().map(|c| c / total).collect()
}

/// Move entries matching `pred` to the front; returns how many matched.
fn partition(slice: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut k = 0;
    for i in 0..slice.len() {
        if pred(slice[i]) {
            slice.swap(k, i);
            k += 1;
        }
    }
    k
}
