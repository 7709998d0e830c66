//! A doubly-linked list of dense integer ids.
//!
//! The links live in a side table indexed by id, so an element is just its index (a region
//! index, a slot number) and the list never touches the memory of the things it orders.
//! An id can be in at most one position of a list at a time.

const NONE: usize = usize::MAX;

#[derive(Copy, Clone, Debug)]
struct Link {
    prev: usize,
    next: usize,
    linked: bool,
}

impl Link {
    const UNLINKED: Link = Link {
        prev: NONE,
        next: NONE,
        linked: false,
    };
}

/// A doubly-linked list over ids in `0..capacity`. The link table grows on demand.
#[derive(Clone, Debug)]
pub struct IndexList {
    links: Vec<Link>,
    head: usize,
    tail: usize,
    len: usize,
}

impl Default for IndexList {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexList {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IndexList {
            links: vec![Link::UNLINKED; capacity],
            head: NONE,
            tail: NONE,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: usize) -> bool {
        self.links.get(id).is_some_and(|l| l.linked)
    }

    pub fn first(&self) -> Option<usize> {
        Self::wrap(self.head)
    }

    pub fn last(&self) -> Option<usize> {
        Self::wrap(self.tail)
    }

    pub fn next(&self, id: usize) -> Option<usize> {
        debug_assert!(self.contains(id), "{} is not in the list", id);
        Self::wrap(self.links[id].next)
    }

    pub fn prev(&self, id: usize) -> Option<usize> {
        debug_assert!(self.contains(id), "{} is not in the list", id);
        Self::wrap(self.links[id].prev)
    }

    fn wrap(id: usize) -> Option<usize> {
        if id == NONE {
            None
        } else {
            Some(id)
        }
    }

    fn ensure_slot(&mut self, id: usize) {
        debug_assert_ne!(id, NONE);
        if id >= self.links.len() {
            self.links.resize(id + 1, Link::UNLINKED);
        }
        assert!(!self.links[id].linked, "{} is already in the list", id);
    }

    /// Link `id` between `prev` and `next`, either of which may be `NONE`.
    fn link(&mut self, id: usize, prev: usize, next: usize) {
        self.links[id] = Link {
            prev,
            next,
            linked: true,
        };
        if prev == NONE {
            self.head = id;
        } else {
            self.links[prev].next = id;
        }
        if next == NONE {
            self.tail = id;
        } else {
            self.links[next].prev = id;
        }
        self.len += 1;
    }

    pub fn insert_first(&mut self, id: usize) {
        self.ensure_slot(id);
        let head = self.head;
        self.link(id, NONE, head);
    }

    pub fn insert_last(&mut self, id: usize) {
        self.ensure_slot(id);
        let tail = self.tail;
        self.link(id, tail, NONE);
    }

    /// Insert `id` right before `before`, which must be in the list.
    pub fn insert_before(&mut self, before: usize, id: usize) {
        assert!(self.contains(before), "{} is not in the list", before);
        self.ensure_slot(id);
        let prev = self.links[before].prev;
        self.link(id, prev, before);
    }

    /// Insert `id` right after `after`, which must be in the list.
    pub fn insert_after(&mut self, after: usize, id: usize) {
        assert!(self.contains(after), "{} is not in the list", after);
        self.ensure_slot(id);
        let next = self.links[after].next;
        self.link(id, after, next);
    }

    /// Unlink `id`. Returns false if it was not in the list.
    pub fn remove(&mut self, id: usize) -> bool {
        if !self.contains(id) {
            return false;
        }
        let Link { prev, next, .. } = self.links[id];
        if prev == NONE {
            self.head = next;
        } else {
            self.links[prev].next = next;
        }
        if next == NONE {
            self.tail = prev;
        } else {
            self.links[next].prev = prev;
        }
        self.links[id] = Link::UNLINKED;
        self.len -= 1;
        true
    }

    pub fn remove_first(&mut self) -> Option<usize> {
        let id = self.first()?;
        self.remove(id);
        Some(id)
    }

    pub fn remove_last(&mut self) -> Option<usize> {
        let id = self.last()?;
        self.remove(id);
        Some(id)
    }

    pub fn clear(&mut self) {
        while self.remove_first().is_some() {}
    }

    /// Move every id of `other` to the end of this list, in order. `other` becomes empty.
    pub fn append(&mut self, other: &mut IndexList) {
        while let Some(id) = other.remove_first() {
            self.insert_last(id);
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            front: self.head,
            back: self.tail,
            remaining: self.len,
        }
    }

    pub fn iter_rev(&self) -> std::iter::Rev<Iter<'_>> {
        self.iter().rev()
    }

    /// Remove the ids from the front one at a time.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { list: self }
    }
}

pub struct Iter<'a> {
    list: &'a IndexList,
    front: usize,
    back: usize,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.front;
        self.front = self.list.links[id].next;
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.back;
        self.back = self.list.links[id].prev;
        self.remaining -= 1;
        Some(id)
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a IndexList {
    type Item = usize;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

pub struct Drain<'a> {
    list: &'a mut IndexList,
}

impl Iterator for Drain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.list.remove_first()
    }
}
