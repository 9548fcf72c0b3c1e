//! Doubly linked queue over externally stored links.

/// The two links of one node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Link<K> {
    pub prev: Option<K>,
    pub next: Option<K>,
}

impl<K> Link<K> {
    pub const UNLINKED: Self = Self {
        prev: None,
        next: None,
    };
}

impl<K> Default for Link<K> {
    fn default() -> Self {
        Self::UNLINKED
    }
}

/// Where the links of the nodes live.
///
/// A record type that can sit on several lists at once (a thread on the
/// ready queue *and* the all-threads queue) provides one store per list.
pub trait LinkStore<K> {
    fn link(&self, node: K) -> Link<K>;
    fn set_link(&mut self, node: K, link: Link<K>);
}

/// Dense link tables indexed by handle.
impl<K: Copy + Into<usize>> LinkStore<K> for [Link<K>] {
    #[inline]
    fn link(&self, node: K) -> Link<K> {
        self[node.into()]
    }

    #[inline]
    fn set_link(&mut self, node: K, link: Link<K>) {
        self[node.into()] = link;
    }
}

/// A FIFO queue of node handles.
///
/// The list only knows head, tail and length; every operation takes the
/// [`LinkStore`] holding the links of its nodes. A node must be on at most
/// one list per store.
#[derive(Debug, Clone)]
pub struct List<K> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K> Default for List<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> List<K> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K: Copy + Eq> List<K> {
    #[must_use]
    pub const fn front(&self) -> Option<K> {
        self.head
    }

    #[must_use]
    pub const fn back(&self) -> Option<K> {
        self.tail
    }

    /// Insert `node` before the current head.
    pub fn push_front<S: LinkStore<K> + ?Sized>(&mut self, store: &mut S, node: K) {
        debug_assert!(!self.contains(store, node), "node already queued");
        store.set_link(
            node,
            Link {
                prev: None,
                next: self.head,
            },
        );
        match self.head {
            Some(head) => {
                let mut link = store.link(head);
                link.prev = Some(node);
                store.set_link(head, link);
            }
            None => self.tail = Some(node),
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Append `node` after the current tail.
    pub fn push_back<S: LinkStore<K> + ?Sized>(&mut self, store: &mut S, node: K) {
        debug_assert!(!self.contains(store, node), "node already queued");
        store.set_link(
            node,
            Link {
                prev: self.tail,
                next: None,
            },
        );
        match self.tail {
            Some(tail) => {
                let mut link = store.link(tail);
                link.next = Some(node);
                store.set_link(tail, link);
            }
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        self.len += 1;
    }

    /// Unlink and return the head.
    pub fn pop_front<S: LinkStore<K> + ?Sized>(&mut self, store: &mut S) -> Option<K> {
        let head = self.head?;
        self.remove(store, head);
        Some(head)
    }

    /// Unlink `node`, which must be on this list.
    pub fn remove<S: LinkStore<K> + ?Sized>(&mut self, store: &mut S, node: K) {
        debug_assert!(self.contains(store, node), "node not on this list");
        let link = store.link(node);

        match link.prev {
            Some(prev) => {
                let mut p = store.link(prev);
                p.next = link.next;
                store.set_link(prev, p);
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => {
                let mut n = store.link(next);
                n.prev = link.prev;
                store.set_link(next, n);
            }
            None => self.tail = link.prev,
        }

        store.set_link(node, Link::UNLINKED);
        self.len -= 1;
    }

    /// Whether `node` is on this list. Walks the list.
    #[must_use]
    pub fn contains<S: LinkStore<K> + ?Sized>(&self, store: &S, node: K) -> bool {
        self.iter(store).any(|k| k == node)
    }

    /// First node, from the head, for which `pred` holds.
    pub fn find<S, F>(&self, store: &S, pred: F) -> Option<K>
    where
        S: LinkStore<K> + ?Sized,
        F: FnMut(&K) -> bool,
    {
        self.iter(store).find(pred)
    }

    /// Walk the nodes from head to tail.
    pub fn iter<'s, S: LinkStore<K> + ?Sized>(&self, store: &'s S) -> Iter<'s, K, S> {
        Iter {
            store,
            next: self.head,
        }
    }
}

/// Iterator returned by [`List::iter`].
pub struct Iter<'s, K, S: ?Sized> {
    store: &'s S,
    next: Option<K>,
}

impl<K: Copy, S: LinkStore<K> + ?Sized> Iterator for Iter<'_, K, S> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let node = self.next?;
        self.next = self.store.link(node).next;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links<const N: usize>() -> [Link<usize>; N] {
        [Link::UNLINKED; N]
    }

    fn collect(list: &List<usize>, store: &[Link<usize>]) -> Vec<usize> {
        list.iter(store).collect()
    }

    #[test]
    fn fifo_order() {
        let mut store = links::<4>();
        let mut list = List::new();
        list.push_back(&mut store[..], 1);
        list.push_back(&mut store[..], 2);
        list.push_back(&mut store[..], 3);

        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_front(&mut store[..]), Some(1));
        assert_eq!(list.pop_front(&mut store[..]), Some(2));
        assert_eq!(list.pop_front(&mut store[..]), Some(3));
        assert_eq!(list.pop_front(&mut store[..]), None);
        assert!(list.is_empty());
    }

    #[test]
    fn push_front_jumps_the_queue() {
        let mut store = links::<4>();
        let mut list = List::new();
        list.push_back(&mut store[..], 0);
        list.push_back(&mut store[..], 1);
        list.push_front(&mut store[..], 3);
        assert_eq!(collect(&list, &store), [3, 0, 1]);
        assert_eq!(list.front(), Some(3));
        assert_eq!(list.back(), Some(1));
    }

    #[test]
    fn remove_from_middle_head_and_tail() {
        let mut store = links::<5>();
        let mut list = List::new();
        for i in 0..5 {
            list.push_back(&mut store[..], i);
        }
        list.remove(&mut store[..], 2);
        assert_eq!(collect(&list, &store), [0, 1, 3, 4]);
        list.remove(&mut store[..], 0);
        list.remove(&mut store[..], 4);
        assert_eq!(collect(&list, &store), [1, 3]);
        assert_eq!(store[2], Link::UNLINKED);

        list.push_back(&mut store[..], 2);
        assert_eq!(collect(&list, &store), [1, 3, 2]);
    }

    #[test]
    fn two_lists_share_one_store() {
        let mut store = links::<4>();
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut store[..], 0);
        b.push_back(&mut store[..], 1);
        a.push_back(&mut store[..], 2);
        b.push_back(&mut store[..], 3);

        assert!(a.contains(&store[..], 2));
        assert!(!a.contains(&store[..], 3));
        assert_eq!(b.find(&store[..], |&k| k > 1), Some(3));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already queued")]
    fn double_insert_is_caught() {
        let mut store = links::<2>();
        let mut list = List::new();
        list.push_back(&mut store[..], 1);
        list.push_front(&mut store[..], 1);
    }
}
