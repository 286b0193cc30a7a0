use std::ptr::NonNull;

use super::*;

impl<E: TreeEntry, const K: usize> Node<E, K> {
    /// Heap-allocate a node holding a single entry.
    pub(crate) fn alloc(entry: E, parent: Option<NonNull<Self>>, side: Option<Side>) -> NonNull<Self> {
        let mut data = [E::default(); K];
        data[0] = entry;
        let node = Box::new(Self {
            parent,
            children: [None, None],
            successor: None,
            side,
            bf: 0,
            min_idx: 0,
            max_idx: 0,
            data,
        });
        // Box never hands out null.
        unsafe { NonNull::new_unchecked(Box::into_raw(node)) }
    }

    /// Safety: `ptr` must come from `alloc` and must not be reachable from
    /// the tree (or any live cursor) afterwards.
    pub(crate) unsafe fn dealloc(ptr: NonNull<Self>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }

    pub fn len(&self) -> usize {
        self.max_idx as usize + 1 - self.min_idx as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == K
    }

    /// The occupied, sorted window of the entry array.
    pub fn entries(&self) -> &[E] {
        &self.data[self.min_idx as usize..self.max_idx as usize + 1]
    }

    pub(crate) fn min_entry(&self) -> &E {
        debug_assert!(!self.is_empty());
        &self.data[self.min_idx as usize]
    }

    pub(crate) fn max_entry(&self) -> &E {
        debug_assert!(!self.is_empty());
        &self.data[self.max_idx as usize]
    }

    pub(crate) fn child(&self, side: Side) -> Option<NonNull<Self>> {
        self.children[side as usize]
    }

    pub(crate) fn set_child(&mut self, side: Side, child: Option<NonNull<Self>>) {
        self.children[side as usize] = child;
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.children[0].is_some() && self.children[1].is_some()
    }

    /// Slide the window to make room and store `entry` so it ends up between
    /// the current occupants of `idx - 1` and `idx`. Entries below `idx` must
    /// compare below `entry`, entries at or above it must not compare below.
    /// Returns the array position the entry landed at.
    pub(crate) fn insert_at(&mut self, idx: usize, entry: E) -> usize {
        debug_assert!(!self.is_full());
        let min = self.min_idx as usize;
        let max = self.max_idx as usize;
        debug_assert!(idx >= min && idx <= max + 1);

        // Shift whichever run of entries is shorter, when both sides have
        // room.
        let shift_down = min > 0 && (idx - min <= max + 1 - idx || max + 1 == K);
        if shift_down {
            self.data.copy_within(min..idx, min - 1);
            self.min_idx -= 1;
            self.data[idx - 1] = entry;
            idx - 1
        } else {
            self.data.copy_within(idx..max + 1, idx + 1);
            self.max_idx += 1;
            self.data[idx] = entry;
            idx
        }
    }

    /// Remove and return the entry at `idx`, compacting the shorter run.
    /// The second value is the array position now holding the removed
    /// entry's in-order successor within this node; it is `max_idx + 1` when
    /// the removed entry was the node maximum.
    pub(crate) fn remove_at(&mut self, idx: usize) -> (E, usize) {
        let min = self.min_idx as usize;
        let max = self.max_idx as usize;
        debug_assert!(idx >= min && idx <= max);
        let entry = self.data[idx];
        if idx - min <= max - idx {
            self.data.copy_within(min..idx, min + 1);
            self.min_idx += 1;
            (entry, idx + 1)
        } else {
            self.data.copy_within(idx + 1..max + 1, idx);
            self.max_idx -= 1;
            (entry, idx)
        }
    }

    /// On a full node: evict the minimum, slide `[min_idx + 1, idx)` down a
    /// slot and store `entry` at `idx - 1`. The node stays full and sorted.
    /// Returns the evicted minimum and the entry's landing position.
    pub(crate) fn spill_min_insert(&mut self, idx: usize, entry: E) -> (E, usize) {
        debug_assert!(self.is_full());
        let min = self.min_idx as usize;
        debug_assert!(idx > min && idx <= self.max_idx as usize + 1);
        let evicted = self.data[min];
        self.data.copy_within(min + 1..idx, min);
        self.data[idx - 1] = entry;
        (evicted, idx - 1)
    }

    /// Prepend a new minimum. `entry` must not compare above the current
    /// minimum.
    pub(crate) fn push_min(&mut self, entry: E) {
        debug_assert!(!self.is_full());
        if self.min_idx == 0 {
            let max = self.max_idx as usize;
            self.data.copy_within(0..max + 1, 1);
            self.max_idx += 1;
            self.data[0] = entry;
        } else {
            self.min_idx -= 1;
            self.data[self.min_idx as usize] = entry;
        }
    }

    /// Append a new maximum. `entry` must not compare below the current
    /// maximum.
    pub(crate) fn push_max(&mut self, entry: E) {
        debug_assert!(!self.is_full());
        if self.max_idx as usize == K - 1 {
            let min = self.min_idx as usize;
            self.data.copy_within(min..K, min - 1);
            self.min_idx -= 1;
            self.data[K - 1] = entry;
        } else {
            self.max_idx += 1;
            self.data[self.max_idx as usize] = entry;
        }
    }

    /// Take the minimum entry. May leave the node empty (window collapses to
    /// `min_idx == max_idx + 1`); the caller is on the hook for unlinking it.
    pub(crate) fn pop_min(&mut self) -> E {
        debug_assert!(!self.is_empty());
        let entry = self.data[self.min_idx as usize];
        self.min_idx += 1;
        entry
    }

    /// Take the maximum entry. Same emptiness caveat as `pop_min`.
    pub(crate) fn pop_max(&mut self) -> E {
        debug_assert!(!self.is_empty());
        let entry = self.data[self.max_idx as usize];
        if self.max_idx == self.min_idx {
            self.min_idx += 1;
        } else {
            self.max_idx -= 1;
        }
        entry
    }

    /// Deepest node in `side` direction, starting from (and including) `n`.
    pub(crate) unsafe fn extremum(mut n: NonNull<Self>, side: Side) -> NonNull<Self> {
        while let Some(c) = n.as_ref().child(side) {
            n = c;
        }
        n
    }

    /// Nearest ancestor entered from its right subtree: the in-order
    /// predecessor node of `n` when `n` has no left child.
    pub(crate) unsafe fn pred_above(n: NonNull<Self>) -> Option<NonNull<Self>> {
        let mut cur = n;
        loop {
            match cur.as_ref().side {
                None => return None,
                Some(Side::Right) => return cur.as_ref().parent,
                Some(Side::Left) => cur = cur.as_ref().parent.expect("non-root node without parent"),
            }
        }
    }

    /// The node holding the entry just below `n`'s minimum, if any.
    pub(crate) unsafe fn pred_node(n: NonNull<Self>) -> Option<NonNull<Self>> {
        match n.as_ref().child(Side::Left) {
            Some(left) => Some(Self::extremum(left, Side::Right)),
            None => Self::pred_above(n),
        }
    }
}
