use std::marker::PhantomData;
use std::ops::Deref;

use super::*;

/// This file provides the lifetime-checked wrappers over UnsafeCursor, and
/// the tree methods that hand them out.

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Cursor<'a, E, C, K> {
    pub(crate) unsafe fn unchecked_from_raw(
        _tree: &'a TTreeRaw<E, C, K>,
        inner: UnsafeCursor<E, K>,
    ) -> Self {
        Cursor {
            inner,
            marker: PhantomData,
        }
    }

    pub fn get_entry(&self) -> Option<&E> {
        unsafe { self.inner.get_entry() }
    }

    pub fn next_entry(&mut self) -> bool {
        unsafe { self.inner.next_entry() }
    }

    pub fn prev_entry(&mut self) -> bool {
        unsafe { self.inner.prev_entry() }
    }

    pub fn check(&self) {
        unsafe { self.inner.check() }
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Deref for Cursor<'a, E, C, K> {
    type Target = UnsafeCursor<E, K>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Clone for Cursor<'a, E, C, K> {
    fn clone(&self) -> Self {
        Cursor {
            inner: self.inner,
            marker: PhantomData,
        }
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Iterator for Cursor<'a, E, C, K> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        unsafe {
            if self.inner.state == CursorState::Pending {
                self.inner.roll_forward_to_tied();
            }
            let entry = *self.inner.get_entry()?;
            // Move on preemptively for the next call; walking off the end
            // unties the cursor, which reads as None above.
            self.inner.next_entry();
            Some(entry)
        }
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> MutCursor<'a, E, C, K> {
    pub(crate) unsafe fn unchecked_from_raw(
        tree: &'a mut TTreeRaw<E, C, K>,
        inner: UnsafeCursor<E, K>,
    ) -> Self {
        MutCursor {
            tree: NonNull::from(tree),
            inner,
            marker: PhantomData,
        }
    }

    pub fn get_entry(&self) -> Option<&E> {
        unsafe { self.inner.get_entry() }
    }

    pub fn next_entry(&mut self) -> bool {
        unsafe { self.inner.next_entry() }
    }

    pub fn prev_entry(&mut self) -> bool {
        unsafe { self.inner.prev_entry() }
    }

    pub fn check(&self) {
        unsafe { self.inner.check() }
    }

    /// The placeful insert: place `entry` at this cursor's position without
    /// another descent. See [`TTreeRaw::unsafe_insert`] for the cases.
    pub fn insert(&mut self, entry: E) {
        unsafe {
            (*self.tree.as_ptr()).unsafe_insert(&mut self.inner, entry);
        }
    }

    /// The placeful delete: take the entry under a tied cursor, leaving the
    /// cursor on its in-order successor. Returns None unless the cursor is
    /// tied, so draining a tree is `while let Some(e) = cursor.remove()`.
    pub fn remove(&mut self) -> Option<E> {
        if self.inner.state != CursorState::Tied {
            return None;
        }
        Some(unsafe { (*self.tree.as_ptr()).unsafe_remove(&mut self.inner) })
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Deref for MutCursor<'a, E, C, K> {
    type Target = UnsafeCursor<E, K>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<E: TreeEntry, C: Comparator<E>, const K: usize> TTreeRaw<E, C, K> {
    /// A cursor at the entry matching `query` (tied), or at the position the
    /// key would occupy (pending).
    pub fn cursor_at<Q: ?Sized>(&self, query: &Q) -> Cursor<'_, E, C, K>
    where
        C: Comparator<E, Q>,
    {
        unsafe { Cursor::unchecked_from_raw(self, self.search_raw(query)) }
    }

    pub fn cursor_at_first(&self) -> Cursor<'_, E, C, K> {
        unsafe { Cursor::unchecked_from_raw(self, self.raw_cursor_at_first()) }
    }

    pub fn cursor_at_last(&self) -> Cursor<'_, E, C, K> {
        unsafe { Cursor::unchecked_from_raw(self, self.raw_cursor_at_last()) }
    }

    pub fn mut_cursor_at<Q: ?Sized>(&mut self, query: &Q) -> MutCursor<'_, E, C, K>
    where
        C: Comparator<E, Q>,
    {
        let inner = self.search_raw(query);
        unsafe { MutCursor::unchecked_from_raw(self, inner) }
    }

    pub fn mut_cursor_at_first(&mut self) -> MutCursor<'_, E, C, K> {
        let inner = self.raw_cursor_at_first();
        unsafe { MutCursor::unchecked_from_raw(self, inner) }
    }

    pub fn mut_cursor_at_last(&mut self) -> MutCursor<'_, E, C, K> {
        let inner = self.raw_cursor_at_last();
        unsafe { MutCursor::unchecked_from_raw(self, inner) }
    }

    fn raw_cursor_at_first(&self) -> UnsafeCursor<E, K> {
        match self.root {
            None => UnsafeCursor::untied(),
            Some(root) => unsafe {
                let n = Node::extremum(root, Side::Left);
                UnsafeCursor::tied(n, (*n.as_ptr()).min_idx as usize)
            },
        }
    }

    fn raw_cursor_at_last(&self) -> UnsafeCursor<E, K> {
        match self.root {
            None => UnsafeCursor::untied(),
            Some(root) => unsafe {
                let n = Node::extremum(root, Side::Right);
                UnsafeCursor::tied(n, (*n.as_ptr()).max_idx as usize)
            },
        }
    }

    /// Iterate every entry in comparator order.
    pub fn iter(&self) -> Cursor<'_, E, C, K> {
        self.cursor_at_first()
    }
}
