use std::cmp::Ordering;
use std::mem::size_of;

use humansize::{file_size_opts, FileSize};
use smallvec::SmallVec;

use super::*;

impl<E: TreeEntry, C: Comparator<E>, const K: usize> TTreeRaw<E, C, K> {
    pub fn new() -> Self
    where
        C: Default,
    {
        Self::with_comparator(C::default())
    }

    pub fn with_comparator(cmp: C) -> Self {
        assert!(
            (MIN_KEYS_PER_NODE..=MAX_KEYS_PER_NODE).contains(&K),
            "keys-per-node must be between {} and {}",
            MIN_KEYS_PER_NODE,
            MAX_KEYS_PER_NODE
        );
        Self {
            root: None,
            cmp,
            count: 0,
        }
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The search primitive everything else is built on. Descends comparing
    /// the query against each node's boundary entries until it either runs
    /// into the bounding node (binary search settles it there) or falls off
    /// the tree, in which case the returned cursor records where the key
    /// would go: inside the last node if it has room, else as a fresh leaf.
    pub(crate) fn search_raw<Q: ?Sized>(&self, query: &Q) -> UnsafeCursor<E, K>
    where
        C: Comparator<E, Q>,
    {
        let Some(mut n) = self.root else {
            return UnsafeCursor::pending_empty();
        };
        loop {
            let nn = unsafe { n.as_ref() };
            if self.cmp.compare(nn.min_entry(), query) == Ordering::Greater {
                if let Some(left) = nn.child(Side::Left) {
                    n = left;
                    continue;
                }
                return if nn.is_full() {
                    UnsafeCursor::pending_leaf(n, Side::Left)
                } else {
                    UnsafeCursor::pending_bound(n, nn.min_idx as usize)
                };
            }
            if self.cmp.compare(nn.max_entry(), query) == Ordering::Less {
                if let Some(right) = nn.child(Side::Right) {
                    n = right;
                    continue;
                }
                return if nn.is_full() {
                    UnsafeCursor::pending_leaf(n, Side::Right)
                } else {
                    UnsafeCursor::pending_bound(n, nn.max_idx as usize + 1)
                };
            }
            // n bounds the query; the entry array has the answer.
            return match nn
                .entries()
                .binary_search_by(|e| self.cmp.compare(e, query))
            {
                Ok(i) => UnsafeCursor::tied(n, nn.min_idx as usize + i),
                Err(i) => UnsafeCursor::pending_bound(n, nn.min_idx as usize + i),
            };
        }
    }

    /// Look up the entry matching `query`.
    pub fn find<Q: ?Sized>(&self, query: &Q) -> Option<&E>
    where
        C: Comparator<E, Q>,
    {
        let cursor = self.search_raw(query);
        if cursor.state != CursorState::Tied {
            return None;
        }
        let n = cursor.node.unwrap();
        Some(unsafe { &(*n.as_ptr()).data[cursor.idx] })
    }

    pub fn contains<Q: ?Sized>(&self, query: &Q) -> bool
    where
        C: Comparator<E, Q>,
    {
        self.find(query).is_some()
    }

    pub fn first(&self) -> Option<&E> {
        let root = self.root?;
        let n = unsafe { Node::extremum(root, Side::Left) };
        Some(unsafe { (*n.as_ptr()).min_entry() })
    }

    pub fn last(&self) -> Option<&E> {
        let root = self.root?;
        let n = unsafe { Node::extremum(root, Side::Right) };
        Some(unsafe { (*n.as_ptr()).max_entry() })
    }

    /// Free every node. Entries are plain copies; nothing of the caller's is
    /// touched.
    pub fn clear(&mut self) {
        let mut stack: SmallVec<[NonNull<Node<E, K>>; 32]> = SmallVec::new();
        if let Some(root) = self.root.take() {
            stack.push(root);
        }
        while let Some(n) = stack.pop() {
            unsafe {
                for side in [Side::Left, Side::Right] {
                    if let Some(child) = n.as_ref().child(side) {
                        stack.push(child);
                    }
                }
                Node::dealloc(n);
            }
        }
        self.count = 0;
    }

    // Returns the subtree height.
    unsafe fn check_node(&self, n: NonNull<Node<E, K>>) -> usize {
        let nn = n.as_ref();
        assert!(nn.len() >= 1, "empty node left in the tree");
        assert!(nn.len() <= K, "node window over capacity");
        assert!((nn.max_idx as usize) < K, "node window out of bounds");

        for pair in nn.entries().windows(2) {
            assert_ne!(
                self.cmp.compare(&pair[0], &pair[1]),
                Ordering::Greater,
                "node entries out of order"
            );
        }

        if nn.is_internal() {
            assert!(
                nn.len() >= (K + 1) / 2,
                "internal node below minimum occupancy"
            );
        }

        let mut heights = [0usize; 2];
        for side in [Side::Left, Side::Right] {
            if let Some(c) = nn.child(side) {
                let cc = c.as_ref();
                assert_eq!(cc.parent, Some(n), "child parent link broken");
                assert_eq!(cc.side, Some(side), "child side tag wrong");
                match side {
                    Side::Left => {
                        let sub_max = Node::extremum(c, Side::Right);
                        assert_ne!(
                            self.cmp
                                .compare(sub_max.as_ref().max_entry(), nn.min_entry()),
                            Ordering::Greater,
                            "left subtree exceeds node minimum"
                        );
                    }
                    Side::Right => {
                        let sub_min = Node::extremum(c, Side::Left);
                        assert_ne!(
                            self.cmp
                                .compare(sub_min.as_ref().min_entry(), nn.max_entry()),
                            Ordering::Less,
                            "right subtree undercuts node maximum"
                        );
                    }
                }
                heights[side as usize] = self.check_node(c);
            }
        }

        let bf = heights[1] as i64 - heights[0] as i64;
        assert_eq!(nn.bf as i64, bf, "stored balance factor is stale");
        assert!(bf.abs() <= 1, "AVL balance violated");
        1 + heights[0].max(heights[1])
    }

    unsafe fn collect_in_order(n: NonNull<Node<E, K>>, out: &mut Vec<NonNull<Node<E, K>>>) {
        if let Some(left) = n.as_ref().child(Side::Left) {
            Self::collect_in_order(left, out);
        }
        out.push(n);
        if let Some(right) = n.as_ref().child(Side::Right) {
            Self::collect_in_order(right, out);
        }
    }

    /// Walk the whole tree asserting every structural invariant: windows
    /// dense and sorted, AVL balance with accurate balance factors,
    /// parent/side agreement, internal-node occupancy, the bounding
    /// property, the successor thread, and the entry count.
    pub fn check(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.count, 0, "count nonzero on an empty tree");
            return;
        };
        unsafe {
            assert!(root.as_ref().parent.is_none(), "root has a parent");
            assert!(root.as_ref().side.is_none(), "root has a side tag");
            self.check_node(root);

            let mut order = Vec::new();
            Self::collect_in_order(root, &mut order);
            for pair in order.windows(2) {
                assert_eq!(
                    pair[0].as_ref().successor,
                    Some(pair[1]),
                    "successor thread broken"
                );
                assert_ne!(
                    self.cmp
                        .compare(pair[0].as_ref().max_entry(), pair[1].as_ref().min_entry()),
                    Ordering::Greater,
                    "in-order node sequence out of order"
                );
            }
            assert_eq!(
                order.last().unwrap().as_ref().successor,
                None,
                "last node has a successor"
            );

            let total: usize = order.iter().map(|n| n.as_ref().len()).sum();
            assert_eq!(total, self.count, "tree.count is incorrect");
        }
    }

    fn nodes_below(n: Option<NonNull<Node<E, K>>>) -> usize {
        match n {
            None => 0,
            Some(p) => unsafe {
                1 + Self::nodes_below(p.as_ref().child(Side::Left))
                    + Self::nodes_below(p.as_ref().child(Side::Right))
            },
        }
    }

    pub fn count_nodes(&self) -> usize {
        Self::nodes_below(self.root)
    }

    fn depth_below(n: Option<NonNull<Node<E, K>>>) -> usize {
        match n {
            None => 0,
            Some(p) => unsafe {
                1 + Self::depth_below(p.as_ref().child(Side::Left))
                    .max(Self::depth_below(p.as_ref().child(Side::Right)))
            },
        }
    }

    pub fn get_depth(&self) -> usize {
        Self::depth_below(self.root)
    }

    fn print_node_tree(n: NonNull<Node<E, K>>, depth: usize) {
        for _ in 0..depth {
            eprint!("  ");
        }
        unsafe {
            let nn = n.as_ref();
            eprintln!(
                "Node {:?} side {:?} bf {} entries {:?} (parent: {:?}, successor: {:?})",
                n.as_ptr(),
                nn.side,
                nn.bf,
                nn.entries(),
                nn.parent.map(|p| p.as_ptr()),
                nn.successor.map(|p| p.as_ptr()),
            );
            for side in [Side::Left, Side::Right] {
                if let Some(c) = nn.child(side) {
                    Self::print_node_tree(c, depth + 1);
                }
            }
        }
    }

    #[allow(unused)]
    pub fn print_ptr_tree(&self) {
        eprintln!("Tree count {} ptr {:?}", self.count, self as *const _);
        if let Some(root) = self.root {
            Self::print_node_tree(root, 1);
        }
    }

    #[allow(unused)]
    pub fn print_stats(&self, name: &str, detailed: bool) {
        let num_nodes = self.count_nodes();
        let node_bytes = num_nodes * size_of::<Node<E, K>>();
        let capacity = num_nodes * K;

        println!("-------- T*-tree {} stats --------", name);
        println!(
            "{} entries of {} bytes in {} nodes of {} slots ({:.1}% occupancy)",
            self.count,
            size_of::<E>(),
            num_nodes,
            K,
            if capacity == 0 {
                0.0
            } else {
                100.0 * self.count as f64 / capacity as f64
            }
        );
        println!("Depth {}", self.get_depth());
        println!(
            "Number of {} byte nodes: {} ({})",
            size_of::<Node<E, K>>(),
            num_nodes,
            node_bytes.file_size(file_size_opts::CONVENTIONAL).unwrap()
        );

        if detailed {
            // Distribution of per-node occupancy.
            let mut size_counts = vec![];
            for node in self.node_iter() {
                let bucket = node.len();
                if bucket >= size_counts.len() {
                    size_counts.resize(bucket + 1, 0);
                }
                size_counts[bucket] += 1;
            }
            println!("Node occupancy distribution {:?}", size_counts);
        }
    }
}

impl<E: TreeEntry, C: Comparator<E>, const K: usize> Drop for TTreeRaw<E, C, K> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<E: TreeEntry, C: Comparator<E> + Default, const K: usize> Default for TTreeRaw<E, C, K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Tree4 = TTreeRaw<i32, OrdComparator, 4>;

    #[test]
    fn empty_tree_behaves() {
        let tree = Tree4::new();
        tree.check();
        assert!(tree.is_empty());
        assert_eq!(tree.find(&1), None);
        assert_eq!(tree.first(), None);
        assert_eq!(tree.last(), None);
        assert_eq!(tree.count_nodes(), 0);
        assert_eq!(tree.get_depth(), 0);
    }

    #[test]
    fn find_first_last() {
        let mut tree = Tree4::new();
        for k in [8, 3, 11, 1, 6] {
            tree.insert(k).unwrap();
        }
        tree.check();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.find(&6), Some(&6));
        assert_eq!(tree.find(&7), None);
        assert!(tree.contains(&11));
        assert_eq!(tree.first(), Some(&1));
        assert_eq!(tree.last(), Some(&11));
    }

    #[test]
    fn clear_frees_everything() {
        let mut tree = Tree4::new();
        for k in 0..50 {
            tree.insert(k).unwrap();
        }
        assert!(tree.count_nodes() > 1);
        tree.clear();
        tree.check();
        assert!(tree.is_empty());
        assert_eq!(tree.count_nodes(), 0);
        // The tree is still usable afterwards.
        tree.insert(5).unwrap();
        assert_eq!(tree.find(&5), Some(&5));
    }

    #[test]
    #[should_panic(expected = "keys-per-node")]
    fn rejects_tiny_nodes() {
        let _ = TTreeRaw::<i32, OrdComparator, 1>::new();
    }

    #[test]
    fn custom_comparator_order() {
        use std::cmp::Ordering;
        let descending = |a: &i32, b: &i32| -> Ordering { b.cmp(a) };
        let mut tree: TTreeRaw<i32, _, 4> = TTreeRaw::with_comparator(descending);
        for k in [1, 5, 3, 2, 4] {
            tree.insert(k).unwrap();
            tree.check();
        }
        assert_eq!(tree.iter().collect::<Vec<_>>(), vec![5, 4, 3, 2, 1]);
        assert_eq!(tree.first(), Some(&5));
    }
}
