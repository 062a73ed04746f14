//! Static 2-d tree over planar points.
//!
//! Nodes live in one arena and refer to each other by position. Points are
//! identified by their position in the slice the tree was built from;
//! non-finite points are left out.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
struct Node {
    item: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Balanced k-d tree (k = 2) built by median splits.
#[derive(Debug, Clone, Default)]
pub struct KdTree {
    points: Vec<[f64; 2]>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

/// Max-heap entry: the worst kept candidate sits on top.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist2: f64,
    item: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .total_cmp(&other.dist2)
            .then(self.item.cmp(&other.item))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

impl KdTree {
    /// Build from points; indices in query results refer to this slice.
    ///
    /// # Example
    ///
    /// ```
    /// use geowrangle_core::functions::kdtree::KdTree;
    ///
    /// let tree = KdTree::build(&[[0.0, 0.0], [3.0, 4.0], [1.0, 0.0]]);
    /// let nearest = tree.nearest([0.2, 0.0], 2);
    /// assert_eq!(nearest.iter().map(|n| n.0).collect::<Vec<_>>(), vec![0, 2]);
    /// assert_eq!(tree.within_radius([0.0, 0.0], 5.0).len(), 3);
    /// ```
    pub fn build(points: &[[f64; 2]]) -> Self {
        let mut items: Vec<usize> = (0..points.len())
            .filter(|&i| points[i][0].is_finite() && points[i][1].is_finite())
            .collect();
        let mut tree = Self {
            points: points.to_vec(),
            nodes: Vec::with_capacity(items.len()),
            root: None,
        };
        tree.root = tree.build_node(&mut items, 0);
        tree
    }

    fn build_node(&mut self, items: &mut [usize], depth: usize) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        let axis = depth % 2;
        let mid = items.len() / 2;
        let points = &self.points;
        items.select_nth_unstable_by(mid, |&a, &b| {
            points[a][axis]
                .total_cmp(&points[b][axis])
                .then(a.cmp(&b))
        });
        let item = items[mid];
        let (lower, upper) = items.split_at_mut(mid);
        let left = self.build_node(lower, depth + 1);
        let right = self.build_node(&mut upper[1..], depth + 1);
        self.nodes.push(Node {
            item,
            axis,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    /// Number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The `k` closest points as `(index, distance)`, ascending by distance
    /// with ties broken by index.
    pub fn nearest(&self, query: [f64; 2], k: usize) -> Vec<(usize, f64)> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.nearest_in(root, query, k, &mut heap);
        }
        let mut found: Vec<Candidate> = heap.into_vec();
        found.sort();
        found
            .into_iter()
            .map(|c| (c.item, c.dist2.sqrt()))
            .collect()
    }

    fn nearest_in(&self, node: usize, query: [f64; 2], k: usize, heap: &mut BinaryHeap<Candidate>) {
        let Node {
            item,
            axis,
            left,
            right,
        } = self.nodes[node];
        let candidate = Candidate {
            dist2: dist2(self.points[item], query),
            item,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        let diff = query[axis] - self.points[item][axis];
        let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
        if let Some(near) = near {
            self.nearest_in(near, query, k, heap);
        }
        if let Some(far) = far {
            // `<=` keeps equal-distance points with a lower index reachable
            let worth_it = heap.len() < k || heap.peek().is_some_and(|worst| diff * diff <= worst.dist2);
            if worth_it {
                self.nearest_in(far, query, k, heap);
            }
        }
    }

    /// Every point within `radius` (inclusive) as `(index, distance)`,
    /// ascending by distance with ties broken by index.
    pub fn within_radius(&self, query: [f64; 2], radius: f64) -> Vec<(usize, f64)> {
        let mut found = Vec::new();
        if radius >= 0.0 {
            if let Some(root) = self.root {
                self.radius_in(root, query, radius * radius, &mut found);
            }
        }
        found.sort();
        found
            .into_iter()
            .map(|c| (c.item, c.dist2.sqrt()))
            .collect()
    }

    fn radius_in(&self, node: usize, query: [f64; 2], r2: f64, found: &mut Vec<Candidate>) {
        let Node {
            item,
            axis,
            left,
            right,
        } = self.nodes[node];
        let d2 = dist2(self.points[item], query);
        if d2 <= r2 {
            found.push(Candidate { dist2: d2, item });
        }
        let diff = query[axis] - self.points[item][axis];
        let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
        if let Some(near) = near {
            self.radius_in(near, query, r2, found);
        }
        if let Some(far) = far {
            if diff * diff <= r2 {
                self.radius_in(far, query, r2, found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brute_force(points: &[[f64; 2]], query: [f64; 2]) -> Vec<(usize, f64)> {
        let mut all: Vec<(usize, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, dist2(*p, query)))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        all.into_iter().map(|(i, d)| (i, d.sqrt())).collect()
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let tree = KdTree::build(&[]);
        assert!(tree.is_empty());
        assert!(tree.nearest([0.0, 0.0], 3).is_empty());
        assert!(tree.within_radius([0.0, 0.0], 10.0).is_empty());
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let tree = KdTree::build(&[[f64::NAN, 0.0], [1.0, 1.0]]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.nearest([0.0, 0.0], 5), vec![(1, 2f64.sqrt())]);
    }

    #[test]
    fn ties_break_by_index() {
        let points = [[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]];
        let tree = KdTree::build(&points);
        let ids: Vec<usize> = tree.nearest([0.0, 0.0], 2).into_iter().map(|n| n.0).collect();
        assert_eq!(ids, vec![0, 1]);
        let ids: Vec<usize> = tree.within_radius([0.0, 0.0], 1.0).into_iter().map(|n| n.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn radius_is_inclusive() {
        let tree = KdTree::build(&[[3.0, 4.0], [3.0, 4.1]]);
        assert_eq!(tree.within_radius([0.0, 0.0], 5.0), vec![(0, 5.0)]);
        assert!(tree.within_radius([0.0, 0.0], -1.0).is_empty());
    }

    proptest! {
        #[test]
        fn nearest_matches_brute_force(
            points in prop::collection::vec((-100.0f64..100.0, -100.0f64..100.0), 1..60),
            query in (-120.0f64..120.0, -120.0f64..120.0),
            k in 1usize..10,
        ) {
            let points: Vec<[f64; 2]> = points.into_iter().map(|(x, y)| [x, y]).collect();
            let query = [query.0, query.1];
            let tree = KdTree::build(&points);
            let expected: Vec<(usize, f64)> = brute_force(&points, query).into_iter().take(k).collect();
            prop_assert_eq!(tree.nearest(query, k), expected);
        }

        #[test]
        fn radius_matches_brute_force(
            points in prop::collection::vec((-50.0f64..50.0, -50.0f64..50.0), 0..60),
            query in (-60.0f64..60.0, -60.0f64..60.0),
            radius in 0.0f64..40.0,
        ) {
            let points: Vec<[f64; 2]> = points.into_iter().map(|(x, y)| [x, y]).collect();
            let query = [query.0, query.1];
            let tree = KdTree::build(&points);
            let expected: Vec<(usize, f64)> = brute_force(&points, query)
                .into_iter()
                .filter(|&(i, _)| dist2(points[i], query) <= radius * radius)
                .collect();
            prop_assert_eq!(tree.within_radius(query, radius), expected);
        }
    }
}
