use std::ptr::NonNull;

use super::*;

/// This file contains the structural mutation core: the placeful insert and
/// delete that everything routes through, node overflow/underflow handling,
/// rotations and the rebalancing walks.
///
/// A note on the successor thread: the successor is defined on node
/// identity, and rotations (key redistribution included) preserve the
/// in-order node sequence. Only attaching a fresh leaf and unlinking an
/// empty node splice the thread.

impl<E: TreeEntry, C: Comparator<E>, const K: usize> TTreeRaw<E, C, K> {
    /// Insert `entry`, rejecting keys that are already present.
    pub fn insert(&mut self, entry: E) -> Result<(), TreeError> {
        let mut cursor = self.search_raw(&entry);
        if cursor.state == CursorState::Tied {
            return Err(TreeError::Duplicate);
        }
        unsafe {
            self.unsafe_insert(&mut cursor, entry);
        }
        Ok(())
    }

    /// Remove and return the entry matching `query`.
    pub fn remove<Q: ?Sized>(&mut self, query: &Q) -> Option<E>
    where
        C: Comparator<E, Q>,
    {
        let mut cursor = self.search_raw(query);
        if cursor.state != CursorState::Tied {
            return None;
        }
        Some(unsafe { self.unsafe_remove(&mut cursor) })
    }

    /// Swap the entry matching `query` for `new_entry`, returning the old
    /// one. No structural change, no rebalance; the caller guarantees the
    /// two entries compare equal.
    pub fn replace<Q: ?Sized>(&mut self, query: &Q, new_entry: E) -> Result<E, TreeError>
    where
        C: Comparator<E, Q>,
    {
        let cursor = self.search_raw(query);
        if cursor.state != CursorState::Tied {
            return Err(TreeError::NotFound);
        }
        let n = cursor.node.unwrap();
        let slot = unsafe { &mut (*n.as_ptr()).data[cursor.idx] };
        debug_assert_eq!(
            self.cmp.compare(slot, &new_entry),
            std::cmp::Ordering::Equal,
            "replacement entry must compare equal to the old one"
        );
        Ok(std::mem::replace(slot, new_entry))
    }

    /// Insert `entry` at the position the cursor records, skipping the
    /// descent a plain `insert` would redo. A pending cursor inserts at its
    /// recorded position; a tied cursor inserts just before the equal entry
    /// it points at (this is the only route by which duplicate keys enter
    /// the tree); an untied cursor is valid only against an empty tree.
    ///
    /// On return the cursor is tied to the inserted entry (should the
    /// rebalance have relocated entries, it is re-anchored with a fresh
    /// descent, and with duplicates present it lands on the first equal
    /// entry).
    ///
    /// Safety: the cursor must have been produced by this tree, with no
    /// mutation in between.
    pub unsafe fn unsafe_insert(&mut self, cursor: &mut UnsafeCursor<E, K>, entry: E) {
        let Some(n) = cursor.node else {
            assert!(self.root.is_none(), "untied cursor used on a non-empty tree");
            let root = Node::alloc(entry, None, None);
            self.root = Some(root);
            self.count = 1;
            cursor.tie(root, 0);
            return;
        };

        match cursor.place {
            Place::Bound => {
                if !(*n.as_ptr()).is_full() {
                    let at = (*n.as_ptr()).insert_at(cursor.idx, entry);
                    self.count += 1;
                    cursor.tie(n, at);
                    return;
                }
                // Overflow: the entry belongs inside a full node. Evict the
                // node minimum to make room, then sink the evicted entry
                // into the greatest-lower-bound position below. A tied
                // cursor on the node minimum skips the eviction: the
                // incoming entry *is* the one to sink.
                let (spilled, track_spilled, at) = if cursor.idx <= (*n.as_ptr()).min_idx as usize {
                    (entry, true, 0)
                } else {
                    let (evicted, at) = (*n.as_ptr()).spill_min_insert(cursor.idx, entry);
                    (evicted, false, at)
                };
                let (home, rotated) = self.sink_below(n, spilled);
                self.count += 1;
                if rotated {
                    *cursor = self.search_raw(&entry);
                    debug_assert_eq!(cursor.state, CursorState::Tied);
                } else if track_spilled {
                    cursor.tie(home, (*home.as_ptr()).max_idx as usize);
                } else {
                    cursor.tie(n, at);
                }
            }
            Place::Leaf(side) => {
                debug_assert!((*n.as_ptr()).is_full());
                let (z, rotated) = self.attach_leaf(entry, n, side);
                self.count += 1;
                if rotated {
                    *cursor = self.search_raw(&entry);
                    debug_assert_eq!(cursor.state, CursorState::Tied);
                } else {
                    cursor.tie(z, (*z.as_ptr()).min_idx as usize);
                }
            }
        }
    }

    /// Remove the entry a tied cursor points at, skipping the descent a
    /// plain `remove` would redo. On return the cursor is tied to the
    /// removed entry's in-order successor, or untied when that was the last
    /// entry — which is what makes a cursor-driven drain a straight loop.
    ///
    /// Safety: same provenance rule as `unsafe_insert`, and the cursor must
    /// be tied.
    pub unsafe fn unsafe_remove(&mut self, cursor: &mut UnsafeCursor<E, K>) -> E {
        assert_eq!(
            cursor.state,
            CursorState::Tied,
            "placeful delete needs a tied cursor"
        );
        let n = cursor.node.unwrap();
        let (removed, next_at) = (*n.as_ptr()).remove_at(cursor.idx);
        self.count -= 1;

        let structural = if (*n.as_ptr()).is_internal() {
            if (*n.as_ptr()).len() < (K + 1) / 2 {
                // Underflow: refill from the greatest-lower-bound leaf, and
                // unlink that leaf if the donation took its last entry.
                let glb = Node::extremum((*n.as_ptr()).child(Side::Left).unwrap(), Side::Right);
                let donated = (*glb.as_ptr()).pop_max();
                (*n.as_ptr()).push_min(donated);
                if (*glb.as_ptr()).is_empty() {
                    self.unlink(glb);
                }
                true
            } else {
                false
            }
        } else if (*n.as_ptr()).is_empty() {
            self.unlink(n);
            true
        } else {
            false
        };

        if structural {
            // The shape changed under the cursor; re-anchor it at the
            // removed entry's successor position.
            if self.root.is_none() {
                cursor.untie();
            } else {
                *cursor = self.search_raw(&removed);
                cursor.roll_forward_to_tied();
            }
        } else if next_at <= (*n.as_ptr()).max_idx as usize {
            cursor.tie(n, next_at);
        } else {
            match (*n.as_ptr()).successor {
                Some(s) => cursor.tie(s, (*s.as_ptr()).min_idx as usize),
                None => cursor.untie(),
            }
        }
        removed
    }

    /// Sink an entry evicted from `n` (comparing at or below all of `n`'s
    /// remaining entries) towards the greatest-lower-bound position of `n`'s
    /// left subtree: into the glb leaf if it has room, as a fresh leaf below
    /// it otherwise. Returns the node the entry landed in and whether the
    /// rebalance rotated.
    unsafe fn sink_below(&mut self, n: NonNull<Node<E, K>>, spilled: E) -> (NonNull<Node<E, K>>, bool) {
        match (*n.as_ptr()).child(Side::Left) {
            None => self.attach_leaf(spilled, n, Side::Left),
            Some(left) => {
                let glb = Node::extremum(left, Side::Right);
                if !(*glb.as_ptr()).is_full() {
                    (*glb.as_ptr()).push_max(spilled);
                    (glb, false)
                } else {
                    self.attach_leaf(spilled, glb, Side::Right)
                }
            }
        }
    }

    /// Attach a fresh single-entry leaf under `p` (which must lack a child
    /// on that side and, to keep internal occupancy inductive, must be
    /// full), splice it into the successor thread and rebalance. Returns the
    /// new node and whether the rebalance rotated.
    unsafe fn attach_leaf(
        &mut self,
        entry: E,
        p: NonNull<Node<E, K>>,
        side: Side,
    ) -> (NonNull<Node<E, K>>, bool) {
        debug_assert!((*p.as_ptr()).child(side).is_none());
        debug_assert!((*p.as_ptr()).is_full());
        let z = Node::alloc(entry, Some(p), Some(side));
        (*p.as_ptr()).set_child(side, Some(z));
        match side {
            Side::Left => {
                // The new node slots in just before its parent.
                (*z.as_ptr()).successor = Some(p);
                if let Some(pred) = Node::pred_above(p) {
                    (*pred.as_ptr()).successor = Some(z);
                }
            }
            Side::Right => {
                // ... and here just after it.
                (*z.as_ptr()).successor = (*p.as_ptr()).successor;
                (*p.as_ptr()).successor = Some(z);
            }
        }
        let rotated = self.rebalance_grown(z);
        (z, rotated)
    }

    /// Detach a node that ran out of entries (a leaf or half-leaf), splicing
    /// its lone child — if any — into its place, repairing the successor
    /// thread and rebalancing from the detach point.
    unsafe fn unlink(&mut self, d: NonNull<Node<E, K>>) {
        debug_assert!(!(*d.as_ptr()).is_internal());
        debug_assert!((*d.as_ptr()).is_empty());
        let child = (*d.as_ptr())
            .child(Side::Left)
            .or((*d.as_ptr()).child(Side::Right));

        // Whoever pointed at d now points past it.
        if let Some(pred) = Node::pred_node(d) {
            (*pred.as_ptr()).successor = (*d.as_ptr()).successor;
        }

        let parent = (*d.as_ptr()).parent;
        let side = (*d.as_ptr()).side;
        if let Some(c) = child {
            (*c.as_ptr()).parent = parent;
            (*c.as_ptr()).side = side;
        }
        match parent {
            None => self.root = child,
            Some(p) => (*p.as_ptr()).set_child(side.unwrap(), child),
        }
        Node::dealloc(d);
        if let Some(p) = parent {
            self.rebalance_shrunk(p, side.unwrap());
        }
    }

    /// Walk rootward from a node whose subtree just grew one level, updating
    /// balance factors. Insertion needs at most one rotation; returns
    /// whether it happened.
    unsafe fn rebalance_grown(&mut self, from: NonNull<Node<E, K>>) -> bool {
        let mut child = from;
        while let Some(p) = (*child.as_ptr()).parent {
            match (*child.as_ptr()).side.unwrap() {
                Side::Left => (*p.as_ptr()).bf -= 1,
                Side::Right => (*p.as_ptr()).bf += 1,
            }
            match (*p.as_ptr()).bf {
                0 => return false, // Height absorbed.
                -1 | 1 => child = p,
                _ => {
                    self.rotate_fix(p);
                    return true;
                }
            }
        }
        false
    }

    /// Walk rootward from `p`, whose child subtree on `side` just shrank one
    /// level. Deletion can rotate at every level of the walk.
    unsafe fn rebalance_shrunk(&mut self, p: NonNull<Node<E, K>>, side: Side) {
        let mut p = p;
        let mut side = side;
        loop {
            match side {
                Side::Left => (*p.as_ptr()).bf += 1,
                Side::Right => (*p.as_ptr()).bf -= 1,
            }
            let cur = match (*p.as_ptr()).bf {
                -1 | 1 => return, // Height unchanged from here up.
                0 => p,
                _ => {
                    let (subtree, reduced) = self.rotate_fix(p);
                    if !reduced {
                        return;
                    }
                    subtree
                }
            };
            match (*cur.as_ptr()).parent {
                None => return,
                Some(parent) => {
                    side = (*cur.as_ptr()).side.unwrap();
                    p = parent;
                }
            }
        }
    }

    /// Repair a node whose balance factor reached ±2. Returns the subtree's
    /// new root and whether the subtree got shorter.
    unsafe fn rotate_fix(&mut self, p: NonNull<Node<E, K>>) -> (NonNull<Node<E, K>>, bool) {
        let heavy = if (*p.as_ptr()).bf > 0 {
            Side::Right
        } else {
            Side::Left
        };
        let sign: i8 = match heavy {
            Side::Right => 1,
            Side::Left => -1,
        };
        debug_assert_eq!((*p.as_ptr()).bf, 2 * sign);

        let c = (*p.as_ptr()).child(heavy).unwrap();
        let cbf = (*c.as_ptr()).bf;
        let (t, reduced) = if sign * cbf >= 0 {
            // Single rotation.
            let t = self.rotate_single(p, heavy);
            debug_assert_eq!(t, c);
            if cbf == 0 {
                // Only reachable on the delete path.
                (*c.as_ptr()).bf = -sign;
                (*p.as_ptr()).bf = sign;
                (t, false)
            } else {
                (*c.as_ptr()).bf = 0;
                (*p.as_ptr()).bf = 0;
                (t, true)
            }
        } else {
            // Double rotation: the pivot is c's child towards p.
            let g = (*c.as_ptr()).child(heavy.opposite()).unwrap();
            let gbf = (*g.as_ptr()).bf;
            self.rotate_single(c, heavy.opposite());
            let t = self.rotate_single(p, heavy);
            debug_assert_eq!(t, g);
            (*g.as_ptr()).bf = 0;
            (*p.as_ptr()).bf = if gbf == sign { -sign } else { 0 };
            (*c.as_ptr()).bf = if gbf == -sign { sign } else { 0 };
            (t, true)
        };
        self.redistribute(t);
        (t, reduced)
    }

    /// Promote `p`'s child on `side` into `p`'s place. Successor links are
    /// untouched: rotation preserves the in-order node sequence.
    unsafe fn rotate_single(&mut self, p: NonNull<Node<E, K>>, side: Side) -> NonNull<Node<E, K>> {
        let c = (*p.as_ptr()).child(side).unwrap();
        let inner = (*c.as_ptr()).child(side.opposite());

        (*p.as_ptr()).set_child(side, inner);
        if let Some(i) = inner {
            (*i.as_ptr()).parent = Some(p);
            (*i.as_ptr()).side = Some(side);
        }

        let parent = (*p.as_ptr()).parent;
        let pside = (*p.as_ptr()).side;
        (*c.as_ptr()).parent = parent;
        (*c.as_ptr()).side = pside;
        match parent {
            None => self.root = Some(c),
            Some(gp) => (*gp.as_ptr()).set_child(pside.unwrap(), Some(c)),
        }

        (*c.as_ptr()).set_child(side.opposite(), Some(p));
        (*p.as_ptr()).parent = Some(c);
        (*p.as_ptr()).side = Some(side.opposite());
        c
    }

    /// The T* refinement. A rotation may promote a sparsely filled leaf or
    /// half-leaf into an internal position; refill it from the boundary
    /// leaves of its new subtree, one entry at a time from whichever can
    /// better spare one, until the internal minimum holds again.
    unsafe fn redistribute(&mut self, t: NonNull<Node<E, K>>) {
        debug_assert!((*t.as_ptr()).is_internal());
        while (*t.as_ptr()).len() < (K + 1) / 2 {
            let glb = Node::extremum((*t.as_ptr()).child(Side::Left).unwrap(), Side::Right);
            let lub = Node::extremum((*t.as_ptr()).child(Side::Right).unwrap(), Side::Left);
            let from_left = (*glb.as_ptr()).len() >= (*lub.as_ptr()).len();
            let donor = if from_left { glb } else { lub };
            if (*donor.as_ptr()).len() <= 1 {
                debug_assert!(false, "no boundary donor for an underfull internal node");
                break;
            }
            if from_left {
                let e = (*donor.as_ptr()).pop_max();
                (*t.as_ptr()).push_min(e);
            } else {
                let e = (*donor.as_ptr()).pop_min();
                (*t.as_ptr()).push_max(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testitem::{ByKey, TestItem};
    use crate::*;

    type Tree4 = TTreeRaw<i32, OrdComparator, 4>;
    type Tree8 = TTreeRaw<i32, OrdComparator, 8>;

    fn tree_with(keys: impl IntoIterator<Item = i32>) -> Tree4 {
        let mut tree = Tree4::new();
        for k in keys {
            tree.insert(k).unwrap();
            tree.check();
        }
        tree
    }

    #[test]
    fn ascending_fill() {
        let tree = tree_with(1..=10);
        assert!(tree.get_depth() <= 3);
        assert_eq!(tree.iter().collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
        assert_eq!(tree.first(), Some(&1));
        assert_eq!(tree.last(), Some(&10));
        let mut nodes = tree.node_iter();
        assert_eq!(nodes.next().unwrap().entries()[0], 1);
        assert_eq!(*nodes.last().unwrap().entries().last().unwrap(), 10);
    }

    #[test]
    fn descending_fill_rebalances() {
        let tree = tree_with((1..=10).rev());
        assert!(tree.get_depth() <= 3);
        assert_eq!(tree.iter().collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn delete_from_internal_node() {
        let mut tree = tree_with(1..=10);
        assert_eq!(tree.remove(&5), Some(5));
        tree.check();
        assert_eq!(tree.find(&5), None);
        assert_eq!(
            tree.iter().collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn scattered_insert_then_cursor_walk() {
        let tree = tree_with([7, 3, 11, 1, 5, 9, 13, 2, 4, 6, 8]);
        let mut cursor = tree.cursor_at(&5);
        assert_eq!(cursor.get_entry(), Some(&5));
        assert!(cursor.next_entry());
        assert_eq!(cursor.get_entry(), Some(&6));
        assert!(cursor.next_entry());
        assert_eq!(cursor.get_entry(), Some(&7));
    }

    #[test]
    fn overflow_attaches_left_leaf() {
        let mut tree = Tree8::new();
        for k in 1..=8 {
            tree.insert(k).unwrap();
        }
        assert_eq!(tree.count_nodes(), 1);

        tree.insert(0).unwrap();
        tree.check();
        assert_eq!(tree.count_nodes(), 2);

        // node_iter follows the successor thread, so this also pins down
        // that the new leaf's successor is the old root.
        let mut nodes = tree.node_iter();
        let first = nodes.next().unwrap();
        let second = nodes.next().unwrap();
        assert!(nodes.next().is_none());
        assert_eq!(first.entries(), &[0]);
        assert_eq!(second.entries().to_vec(), (1..=8).collect::<Vec<_>>());
        assert_eq!(tree.iter().collect::<Vec<_>>(), (0..=8).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_overflow_spills_minimum() {
        // Root fills up, then a key landing inside its range evicts the
        // minimum into a fresh left leaf.
        let mut tree = tree_with([10, 20, 30, 40]);
        assert_eq!(tree.count_nodes(), 1);
        tree.insert(25).unwrap();
        tree.check();
        assert_eq!(tree.count_nodes(), 2);
        assert_eq!(
            tree.iter().collect::<Vec<_>>(),
            vec![10, 20, 25, 30, 40]
        );
        // The glb leaf now has room, so the next overflow reuses it instead
        // of allocating.
        tree.insert(35).unwrap();
        tree.check();
        assert_eq!(tree.count_nodes(), 2);
        assert_eq!(
            tree.iter().collect::<Vec<_>>(),
            vec![10, 20, 25, 30, 35, 40]
        );
    }

    #[test]
    fn duplicate_insert_is_rejected_untouched() {
        let mut tree = tree_with([4, 2, 6, 1, 3, 5, 7]);
        let before: Vec<_> = tree.iter().collect();
        let nodes_before = tree.count_nodes();
        assert_eq!(tree.insert(4), Err(TreeError::Duplicate));
        assert_eq!(tree.insert(4), Err(TreeError::Duplicate));
        tree.check();
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.count_nodes(), nodes_before);
        assert_eq!(tree.iter().collect::<Vec<_>>(), before);
    }

    #[test]
    fn replace_swaps_in_place() {
        let mut tree: TTreeRaw<TestItem, ByKey, 4> = TTreeRaw::with_comparator(ByKey);
        for key in [10, 20, 30, 40, 50, 60] {
            tree.insert(TestItem { key, payload: key }).unwrap();
        }
        let nodes_before = tree.count_nodes();

        let old = tree.replace(&30, TestItem { key: 30, payload: 999 }).unwrap();
        assert_eq!(old.payload, 30);
        tree.check();
        assert_eq!(tree.count_nodes(), nodes_before);
        assert_eq!(tree.find(&30).unwrap().payload, 999);

        assert_eq!(
            tree.replace(&31, TestItem { key: 31, payload: 0 }),
            Err(TreeError::NotFound)
        );
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn placeful_insert_at_pending_cursor() {
        let mut tree = tree_with([2, 4, 6, 8]);
        let mut cursor = tree.mut_cursor_at(&5);
        assert_eq!(cursor.state(), CursorState::Pending);
        cursor.insert(5);
        assert_eq!(cursor.get_entry(), Some(&5));
        drop(cursor);
        tree.check();
        assert_eq!(tree.iter().collect::<Vec<_>>(), vec![2, 4, 5, 6, 8]);
    }

    #[test]
    fn placeful_duplicate_insert() {
        let mut tree: TTreeRaw<TestItem, ByKey, 4> = TTreeRaw::with_comparator(ByKey);
        for key in [10, 20, 30] {
            tree.insert(TestItem { key, payload: 0 }).unwrap();
        }
        // The primary entry point refuses duplicates...
        assert_eq!(
            tree.insert(TestItem { key: 20, payload: 1 }),
            Err(TreeError::Duplicate)
        );
        // ... but a tied cursor lets one through, just before its twin.
        let mut cursor = tree.mut_cursor_at(&20);
        assert_eq!(cursor.state(), CursorState::Tied);
        cursor.insert(TestItem { key: 20, payload: 1 });
        drop(cursor);
        tree.check();
        assert_eq!(tree.len(), 4);
        let payloads: Vec<_> = tree.iter().map(|it| (it.key, it.payload)).collect();
        assert_eq!(payloads, vec![(10, 0), (20, 1), (20, 0), (30, 0)]);
    }

    #[test]
    fn underflow_borrows_from_glb_leaf() {
        // Shape: root {25,30,35,40} with left leaf {10,20} and right leaf
        // {45,50}. Deleting out of the root pulls it under half full, which
        // borrows the left leaf's maximum up into the root.
        let mut tree = tree_with([10, 20, 30, 40, 25, 35, 45, 50]);
        assert_eq!(tree.count_nodes(), 3);
        for k in [30, 35, 40] {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        assert_eq!(tree.count_nodes(), 3);
        assert_eq!(tree.iter().collect::<Vec<_>>(), vec![10, 20, 25, 45, 50]);

        let keys: Vec<_> = tree.iter().collect();
        for k in keys {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.count_nodes(), 0);
    }

    #[test]
    fn round_trip_orders() {
        // Insert ascending, delete descending; insert descending, delete
        // ascending; both leave nothing behind.
        let mut tree = tree_with(1..=30);
        for k in (1..=30).rev() {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        assert!(tree.is_empty());

        let mut tree = tree_with((1..=30).rev());
        for k in 1..=30 {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.count_nodes(), 0);
    }

    #[test]
    fn remove_missing_is_a_noop() {
        let mut tree = tree_with([1, 2, 3]);
        assert_eq!(tree.remove(&9), None);
        assert_eq!(tree.len(), 3);
        tree.check();
    }

    #[test]
    fn narrow_nodes_work() {
        // K = 2 is the minimum the tree supports; the internal minimum is a
        // single entry, so the underflow path runs constantly.
        let mut tree: TTreeRaw<i32, OrdComparator, 2> = TTreeRaw::new();
        for k in 0..40 {
            tree.insert(k).unwrap();
            tree.check();
        }
        assert_eq!(tree.iter().collect::<Vec<_>>(), (0..40).collect::<Vec<_>>());
        for k in (0..40).step_by(2) {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        for k in (1..40).step_by(2).rev() {
            assert_eq!(tree.remove(&k), Some(k));
            tree.check();
        }
        assert!(tree.is_empty());
    }
}
