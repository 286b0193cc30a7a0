use std::fmt::*;

use crate::*;

struct DebugEntries<'a, E: TreeEntry, C: Comparator<E>, const K: usize>(&'a TTreeRaw<E, C, K>);

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Debug for DebugEntries<'a, E, C, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<E: TreeEntry, C: Comparator<E>, const K: usize> Debug for TTreeRaw<E, C, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("TTree")
            .field("count", &self.count)
            .field("(entries)", &DebugEntries(self))
            .finish()
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Debug for Cursor<'a, E, C, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.inner.fmt(f)
    }
}

impl<'a, E: TreeEntry, C: Comparator<E>, const K: usize> Debug for MutCursor<'a, E, C, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.inner.fmt(f)
    }
}
