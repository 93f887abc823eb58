//! KD-tree over points in N dimensions, used for nearest-neighbour lookups of
//! catalog positions stored as 3D unit vectors.
//!
//! Ties are resolved towards the smallest caller-supplied index, so a caller
//! that numbers its points in a meaningful order (for example, sorted by
//! object id) gets a reproducible answer for equidistant neighbours.

/// Result of a spatial search: original index and squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub index: usize,
    pub dist_sq: f64,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        dim: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    /// Range [start..end) into the points/indices arrays.
    Leaf { start: usize, end: usize },
}

const LEAF_SIZE: usize = 16;

pub struct KdTree<const DIM: usize> {
    nodes: Vec<Node>,
    points: Vec<[f64; DIM]>,
    indices: Vec<usize>,
}

impl<const DIM: usize> KdTree<DIM> {
    /// Build a KD-tree from points. `indices` maps each point to its original ID.
    pub fn build(points: Vec<[f64; DIM]>, indices: Vec<usize>) -> Self {
        assert_eq!(points.len(), indices.len());

        let n = points.len();
        let mut tree = KdTree {
            nodes: Vec::new(),
            points,
            indices,
        };
        if n == 0 {
            return tree;
        }

        let mut order: Vec<usize> = (0..n).collect();
        tree.build_recursive(&mut order, 0, n);

        let points = order.iter().map(|&i| tree.points[i]).collect();
        let indices = order.iter().map(|&i| tree.indices[i]).collect();
        tree.points = points;
        tree.indices = indices;
        tree
    }

    fn build_recursive(&mut self, order: &mut [usize], start: usize, end: usize) -> usize {
        let count = end - start;

        if count <= LEAF_SIZE {
            let node_idx = self.nodes.len();
            self.nodes.push(Node::Leaf { start, end });
            return node_idx;
        }

        let split_dim = self.widest_dim(&order[start..end]);
        let median_pos = start + count / 2;
        order[start..end].select_nth_unstable_by(count / 2, |&a, &b| {
            self.points[a][split_dim].total_cmp(&self.points[b][split_dim])
        });
        let split_value = self.points[order[median_pos]][split_dim];

        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { start: 0, end: 0 });

        let left = self.build_recursive(order, start, median_pos);
        let right = self.build_recursive(order, median_pos, end);

        self.nodes[node_idx] = Node::Split {
            dim: split_dim,
            value: split_value,
            left,
            right,
        };

        node_idx
    }

    fn widest_dim(&self, order: &[usize]) -> usize {
        let mut best_dim = 0;
        let mut best_spread = f64::NEG_INFINITY;

        for d in 0..DIM {
            let (lo, hi) = order.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = self.points[i][d];
                (lo.min(v), hi.max(v))
            });
            if hi - lo > best_spread {
                best_spread = hi - lo;
                best_dim = d;
            }
        }

        best_dim
    }

    /// Find the single nearest neighbour.
    ///
    /// When several points are at exactly the same distance, the one with the
    /// smallest original index wins.
    pub fn nearest(&self, query: &[f64; DIM]) -> Option<SearchResult> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = SearchResult {
            index: usize::MAX,
            dist_sq: f64::INFINITY,
        };
        self.nearest_recursive(0, query, &mut best);
        if best.dist_sq.is_infinite() {
            None
        } else {
            Some(best)
        }
    }

    fn nearest_recursive(&self, node_idx: usize, query: &[f64; DIM], best: &mut SearchResult) {
        match self.nodes[node_idx] {
            Node::Leaf { start, end } => {
                for i in start..end {
                    let dsq = squared_distance(query, &self.points[i]);
                    let index = self.indices[i];
                    if dsq < best.dist_sq || (dsq == best.dist_sq && index < best.index) {
                        best.dist_sq = dsq;
                        best.index = index;
                    }
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = query[dim] - value;
                let (near, far) = if diff <= 0.0 { (left, right) } else { (right, left) };

                self.nearest_recursive(near, query, best);

                // `<=` so that an equidistant point across the split is still
                // considered for the tie-break.
                if diff * diff <= best.dist_sq {
                    self.nearest_recursive(far, query, best);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[inline]
fn squared_distance<const DIM: usize>(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    let mut sum = 0.0;
    for i in 0..DIM {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}
