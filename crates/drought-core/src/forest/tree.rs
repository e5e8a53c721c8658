//! CART decision tree used as the forest's base learner.
//!
//! Array-based node layout: leaves have `feature == -2` and children `-1`.
//! Classification splits minimise Gini impurity, regression splits minimise
//! the sum of squared errors. Each accepted split adds its impurity decrease
//! (weighted by node population) to the per-feature importance.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

const LEAF: i32 = -2;
const NO_CHILD: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Classification { n_classes: usize },
    Regression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Feature index to split on (`-2` for leaves).
    pub feature: i32,
    /// Features `<= threshold` go left.
    pub threshold: f64,
    pub left_child: i32,
    pub right_child: i32,
    /// Class index (classification) or mean target (regression).
    pub value: f64,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self { feature: LEAF, threshold: 0.0, left_child: NO_CHILD, right_child: NO_CHILD, value }
    }

    #[inline]
    pub const fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub min_leaf_population: usize,
    /// Candidate features drawn at each split.
    pub max_features: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
}

/// Best split found for one node.
struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
    /// Number of samples going left, in the order sorted by `feature`.
    n_left: usize,
}

impl DecisionTree {
    /// Grow a tree on the rows of `x` listed in `rows` (duplicates allowed,
    /// as produced by bootstrap sampling).
    ///
    /// `importance` must have one slot per feature; decreases are added to it.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        rows: Vec<usize>,
        task: Task,
        params: &TreeParams,
        rng: &mut StdRng,
        importance: &mut [f64],
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let min_leaf = params.min_leaf_population.max(1);
        let mtry = params.max_features.clamp(1, n_features.max(1));

        let mut nodes = vec![TreeNode::leaf(0.0)];
        // (node index, rows reaching it, depth)
        let mut work = vec![(0usize, rows, 0usize)];

        while let Some((node, rows, depth)) = work.pop() {
            let (value, impurity) = node_stats(y, &rows, task);
            nodes[node].value = value;

            if rows.len() < 2 * min_leaf || impurity <= 1e-12 || depth >= params.max_depth || n_features == 0 {
                continue;
            }

            let candidates = sample(rng, n_features, mtry);
            let mut best: Option<(Split, Vec<usize>)> = None;
            for feature in candidates.iter() {
                let mut sorted = rows.clone();
                sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
                if let Some(split) = best_split(x, y, &sorted, feature, task, impurity, min_leaf) {
                    if best.as_ref().map_or(true, |(b, _)| split.decrease > b.decrease) {
                        best = Some((split, sorted));
                    }
                }
            }

            let Some((split, sorted)) = best else { continue };
            importance[split.feature] += split.decrease;

            let left = nodes.len() as i32;
            nodes.push(TreeNode::leaf(0.0));
            let right = nodes.len() as i32;
            nodes.push(TreeNode::leaf(0.0));
            nodes[node].feature = split.feature as i32;
            nodes[node].threshold = split.threshold;
            nodes[node].left_child = left;
            nodes[node].right_child = right;

            let right_rows = sorted[split.n_left..].to_vec();
            let mut left_rows = sorted;
            left_rows.truncate(split.n_left);
            work.push((right as usize, right_rows, depth + 1));
            work.push((left as usize, left_rows, depth + 1));
        }

        Self { nodes, n_features }
    }

    /// Leaf value reached by `features`.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf() {
                return node.value;
            }
            let v = features.get(node.feature as usize).copied().unwrap_or(0.0);
            idx = if v <= node.threshold { node.left_child as usize } else { node.right_child as usize };
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Longest root-to-leaf path (edges).
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            let n = &nodes[idx];
            if n.is_leaf() {
                0
            } else {
                1 + walk(nodes, n.left_child as usize).max(walk(nodes, n.right_child as usize))
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }
}

/// (leaf value, impurity) of the rows reaching a node.
fn node_stats(y: &[f64], rows: &[usize], task: Task) -> (f64, f64) {
    if rows.is_empty() {
        return (0.0, 0.0);
    }
    let n = rows.len() as f64;
    match task {
        Task::Classification { n_classes } => {
            let mut counts = vec![0usize; n_classes];
            for &r in rows {
                counts[y[r] as usize] += 1;
            }
            // Ties go to the lowest class index.
            let (class, _) = counts
                .iter()
                .enumerate()
                .fold((0usize, 0usize), |(bc, bn), (c, &k)| if k > bn { (c, k) } else { (bc, bn) });
            (class as f64, gini(&counts, n))
        }
        Task::Regression => {
            let sum: f64 = rows.iter().map(|&r| y[r]).sum();
            let sum_sq: f64 = rows.iter().map(|&r| y[r] * y[r]).sum();
            let mean = sum / n;
            (mean, (sum_sq / n - mean * mean).max(0.0))
        }
    }
}

fn gini(counts: &[usize], n: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|&k| (k as f64 / n).powi(2)).sum::<f64>()
}

/// Sweep all cut points of `sorted` (rows ordered by `feature`).
fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    sorted: &[usize],
    feature: usize,
    task: Task,
    parent_impurity: f64,
    min_leaf: usize,
) -> Option<Split> {
    let n = sorted.len();
    let parent = parent_impurity * n as f64;
    let mut best: Option<Split> = None;

    let consider = |k: usize, child: f64, best: &mut Option<Split>| {
        let (a, b) = (x[sorted[k - 1]][feature], x[sorted[k]][feature]);
        if a >= b {
            return; // no threshold separates equal values
        }
        let decrease = parent - child;
        if decrease > 1e-12 && best.as_ref().map_or(true, |s| decrease > s.decrease) {
            *best = Some(Split { feature, threshold: a + (b - a) / 2.0, decrease, n_left: k });
        }
    };

    match task {
        Task::Classification { n_classes } => {
            let mut left = vec![0usize; n_classes];
            let mut right = vec![0usize; n_classes];
            for &r in sorted {
                right[y[r] as usize] += 1;
            }
            for k in 1..n {
                let c = y[sorted[k - 1]] as usize;
                left[c] += 1;
                right[c] -= 1;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let (nl, nr) = (k as f64, (n - k) as f64);
                let child = nl * gini(&left, nl) + nr * gini(&right, nr);
                consider(k, child, &mut best);
            }
        }
        Task::Regression => {
            let total: f64 = sorted.iter().map(|&r| y[r]).sum();
            let total_sq: f64 = sorted.iter().map(|&r| y[r] * y[r]).sum();
            let (mut sl, mut sql) = (0.0f64, 0.0f64);
            for k in 1..n {
                let v = y[sorted[k - 1]];
                sl += v;
                sql += v * v;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let (nl, nr) = (k as f64, (n - k) as f64);
                let (sr, sqr) = (total - sl, total_sq - sql);
                let sse_l = (sql - sl * sl / nl).max(0.0);
                let sse_r = (sqr - sr * sr / nr).max(0.0);
                consider(k, sse_l + sse_r, &mut best);
            }
        }
    }
    best
}
