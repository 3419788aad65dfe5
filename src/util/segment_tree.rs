use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Simplified segment tree, used to find every try region covering a program counter
///
/// Intervals get cloned once per node on which they get stored, so they should be cheap to clone
/// (try regions are stored as small `Copy` structs).
#[derive(Debug)]
pub struct SegmentTree<I: Interval + Clone>(Option<SegmentNode<I>>);

impl<I: Interval + Clone> SegmentTree<I> {
    /// Find all intervals containing the specified point
    pub fn intervals_containing(&self, point: &I::Endpoint) -> Vec<&I> {
        let mut node = match self.0.as_ref() {
            Some(root_node) if root_node.contains(point) => root_node,
            _ => return vec![],
        };

        // Point being looked for in the current subtree. This only differs from `point` after
        // falling into a gap between two elementary endpoints.
        let mut probe = *point;
        let mut in_gap = false;

        let mut containing_intervals: Vec<&I> = vec![];
        loop {
            for interval in node.intervals() {
                if !in_gap || interval.until() >= *point {
                    containing_intervals.push(interval);
                }
            }

            if let SegmentNode::Inner {
                left_child,
                right_child,
                ..
            } = node
            {
                if left_child.contains(&probe) {
                    node = left_child;
                    continue;
                } else if right_child.contains(&probe) {
                    node = right_child;
                    continue;
                } else if !in_gap {
                    // The point sits strictly between the two children. Any interval containing
                    // it must also contain the last endpoint of the left child.
                    probe = left_child.until();
                    in_gap = true;
                    node = left_child;
                    continue;
                }
            }
            break;
        }

        containing_intervals
    }

    /// Make a new segment tree containing all the specified intervals
    pub fn new(intervals: Vec<I>) -> SegmentTree<I> {
        let endpoints: Vec<I::Endpoint> = intervals
            .iter()
            .flat_map(|interval| [interval.from(), interval.until()])
            .collect::<BTreeSet<I::Endpoint>>()
            .into_iter()
            .collect();

        if endpoints.is_empty() {
            return SegmentTree(None);
        }

        let mut tree = SegmentTree(Some(Self::build_empty(&endpoints)));
        for interval in intervals {
            tree.insert(interval);
        }

        tree
    }

    /// Build a new empty segment tree with the specified endpoints as elementary intervals
    fn build_empty(endpoints: &[I::Endpoint]) -> SegmentNode<I> {
        match endpoints.len() {
            0 => unreachable!(),
            1 => SegmentNode::Leaf {
                endpoint: endpoints[0],
                intervals: vec![],
            },
            n => {
                let (left_endpoints, right_endpoints) = endpoints.split_at(n / 2);
                SegmentNode::Inner {
                    from: endpoints[0],
                    until: endpoints[n - 1],
                    left_child: Box::new(Self::build_empty(left_endpoints)),
                    right_child: Box::new(Self::build_empty(right_endpoints)),
                    intervals: vec![],
                }
            }
        }
    }

    /// Insert a new interval in the tree
    ///
    /// Invariant: the interval endpoints should already be elementary intervals!
    fn insert(&mut self, interval: I) {
        let mut to_visit: Vec<&mut SegmentNode<I>> = vec![];
        if let Some(root) = self.0.as_mut() {
            to_visit.push(root);
        }

        while let Some(node) = to_visit.pop() {
            if node.contained_in(&interval) {
                node.push_interval(interval.clone());
                continue;
            }

            if let SegmentNode::Inner {
                ref mut left_child,
                ref mut right_child,
                ..
            } = node
            {
                if left_child.overlaps(&interval) {
                    to_visit.push(left_child);
                }
                if right_child.overlaps(&interval) {
                    to_visit.push(right_child);
                }
            }
        }
    }
}

#[derive(Debug)]
enum SegmentNode<I: Interval> {
    Leaf {
        /// Single endpoint contained in the segment
        endpoint: I::Endpoint,

        /// Intervals stored at the node
        intervals: Vec<I>,
    },
    Inner {
        /// Start (inclusive) of the segment
        from: I::Endpoint,

        /// End (inclusive) of the segment
        until: I::Endpoint,

        left_child: Box<SegmentNode<I>>,
        right_child: Box<SegmentNode<I>>,

        /// Intervals stored at the node
        intervals: Vec<I>,
    },
}

impl<I: Interval + Clone> SegmentNode<I> {
    /// Is a point represented by this node?
    fn contains(&self, point: &I::Endpoint) -> bool {
        match self {
            SegmentNode::Leaf { endpoint, .. } => point == endpoint,
            SegmentNode::Inner { from, until, .. } => from <= point && point <= until,
        }
    }

    fn intervals(&self) -> &[I] {
        match self {
            SegmentNode::Leaf { intervals, .. } => intervals,
            SegmentNode::Inner { intervals, .. } => intervals,
        }
    }

    fn push_interval(&mut self, interval: I) {
        match self {
            SegmentNode::Leaf { intervals, .. } => intervals.push(interval),
            SegmentNode::Inner { intervals, .. } => intervals.push(interval),
        }
    }

    /// Is the segment of this node fully contained inside the other interval?
    fn contained_in(&self, other: &I) -> bool {
        other.from() <= self.from() && self.until() <= other.until()
    }

    fn overlaps(&self, other: &I) -> bool {
        other.from() <= self.until() && self.from() <= other.until()
    }
}

/// Closed interval
pub trait Interval {
    type Endpoint: Ord + Copy + std::fmt::Debug;

    /// Start of the interval (inclusive)
    fn from(&self) -> Self::Endpoint;

    /// End of the interval (inclusive)
    fn until(&self) -> Self::Endpoint;
}

impl<I: Interval> Interval for SegmentNode<I> {
    type Endpoint = I::Endpoint;

    fn from(&self) -> Self::Endpoint {
        match self {
            SegmentNode::Leaf { endpoint, .. } => *endpoint,
            SegmentNode::Inner { from, .. } => *from,
        }
    }

    fn until(&self) -> Self::Endpoint {
        match self {
            SegmentNode::Leaf { endpoint, .. } => *endpoint,
            SegmentNode::Inner { until, .. } => *until,
        }
    }
}

impl<Idx: Copy + Ord + std::fmt::Debug> Interval for RangeInclusive<Idx> {
    type Endpoint = Idx;

    fn from(&self) -> Idx {
        *self.start()
    }

    fn until(&self) -> Idx {
        *self.end()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::hash::Hash;
    use std::ops::RangeInclusive;

    fn intervals_set<I: Hash + Interval + Clone + Eq>(
        tree: &SegmentTree<I>,
        point: I::Endpoint,
    ) -> HashSet<I> {
        tree.intervals_containing(&point).into_iter().cloned().collect()
    }

    #[test]
    fn no_intervals() {
        let tree: SegmentTree<RangeInclusive<u32>> = SegmentTree::new(vec![]);
        assert!(intervals_set(&tree, 0).is_empty());
        assert!(intervals_set(&tree, 7).is_empty());
    }

    #[test]
    fn single_region() {
        let tree: SegmentTree<RangeInclusive<u32>> = SegmentTree::new(vec![4..=11]);
        assert!(intervals_set(&tree, 3).is_empty());
        assert_eq!(intervals_set(&tree, 4), HashSet::from([4..=11]));
        assert_eq!(intervals_set(&tree, 8), HashSet::from([4..=11]));
        assert_eq!(intervals_set(&tree, 11), HashSet::from([4..=11]));
        assert!(intervals_set(&tree, 12).is_empty());
    }

    #[test]
    fn nested_regions() {
        let tree: SegmentTree<RangeInclusive<u32>> = SegmentTree::new(vec![0..=20, 5..=9]);
        assert_eq!(intervals_set(&tree, 2), HashSet::from([0..=20]));
        assert_eq!(intervals_set(&tree, 6), HashSet::from([0..=20, 5..=9]));
        assert_eq!(intervals_set(&tree, 9), HashSet::from([0..=20, 5..=9]));
        assert_eq!(intervals_set(&tree, 15), HashSet::from([0..=20]));
    }

    #[test]
    fn points_between_endpoints() {
        let tree: SegmentTree<RangeInclusive<u32>> =
            SegmentTree::new(vec![0..=2, 2..=4, 4..=6, 2..=8, 0..=10]);
        assert_eq!(intervals_set(&tree, 0), HashSet::from([0..=2, 0..=10]));
        assert_eq!(intervals_set(&tree, 1), HashSet::from([0..=2, 0..=10]));
        assert_eq!(
            intervals_set(&tree, 2),
            HashSet::from([0..=2, 0..=10, 2..=4, 2..=8])
        );
        assert_eq!(intervals_set(&tree, 3), HashSet::from([0..=10, 2..=4, 2..=8]));
        assert_eq!(
            intervals_set(&tree, 5),
            HashSet::from([0..=10, 2..=8, 4..=6])
        );
        assert_eq!(intervals_set(&tree, 7), HashSet::from([0..=10, 2..=8]));
        assert_eq!(intervals_set(&tree, 9), HashSet::from([0..=10]));
        assert!(intervals_set(&tree, 11).is_empty());
    }

    #[test]
    fn disjoint_regions() {
        let tree: SegmentTree<RangeInclusive<u32>> = SegmentTree::new(vec![0..=3, 10..=13]);
        assert_eq!(intervals_set(&tree, 2), HashSet::from([0..=3]));
        assert!(intervals_set(&tree, 6).is_empty());
        assert_eq!(intervals_set(&tree, 12), HashSet::from([10..=13]));
    }
}
