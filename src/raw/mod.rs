//! The core implementation of the concurrent sorted list.
//!
//! This module contains the [`Raw`][crate::raw::Raw] type, which is the engine of the set in this
//! crate. This is exposed to allow wrapping it into further APIs, but is probably not the best
//! thing for general use.

use std::alloc::{self, Layout};
use std::borrow::Borrow;
use std::cmp::Ordering as CmpOrdering;
use std::ptr;
use std::sync::atomic::Ordering;

use bitflags::bitflags;
use crossbeam_epoch::{self, Atomic, Guard, Owned, Shared};

pub mod config;
pub mod debug;
pub mod iterator;
#[cfg(test)]
pub(crate) mod test_hooks;

use self::config::Config;
use crate::error::AllocError;

bitflags! {
    /// Flags that can be put onto a link pointing to the next node.
    ///
    /// Note that this lives inside the unused bits of a pointer. All nodes align at least to a
    /// machine word, so we have at least 2 bits and we need only one. The link and its flags are
    /// always read and swapped together, as a single word.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    struct NodeFlags: usize {
        /// The node *owning* this link is logically deleted.
        ///
        /// Such link is frozen. Nobody is allowed to change it any more and the only thing left to
        /// do with the node is to unlink it from its predecessor.
        const DELETED = 0b01;
    }
}

/// Extracts [`NodeFlags`] from a link.
fn nf<T>(link: Shared<T>) -> NodeFlags {
    NodeFlags::from_bits(link.tag()).expect("Invalid node flags")
}

/// What a node holds.
///
/// The sentinels don't hold any value and compare below and above everything. That way we don't
/// need the payload to have any minimal or maximal value.
enum Slot<P> {
    Head,
    Value(P),
    Tail,
}

struct Node<C: Config> {
    slot: Slot<C::Payload>,
    next: Atomic<Node<C>>,
}

impl<C: Config> Node<C> {
    fn sentinel(slot: Slot<C::Payload>, next: Atomic<Node<C>>) -> Self {
        Node { slot, next }
    }

    /// Allocates a fresh, not yet linked, node.
    ///
    /// Unlike [`Owned::new`], this reports the allocation failure instead of aborting.
    fn try_owned(payload: C::Payload) -> Result<Owned<Self>, AllocError> {
        let layout = Layout::new::<Self>();
        // The node always contains at least the link, so it is never zero-sized.
        let raw = unsafe { alloc::alloc(layout) } as *mut Self;
        if raw.is_null() {
            debug_log!(size = layout.size(), "node allocation failed");
            return Err(AllocError::new(layout));
        }
        unsafe {
            ptr::write(
                raw,
                Node {
                    slot: Slot::Value(payload),
                    next: Atomic::null(),
                },
            );
            // The memory comes from the global allocator with the layout of the node, which is
            // what a Box would have done.
            Ok(Owned::from_raw(raw))
        }
    }

    fn payload(&self) -> &C::Payload {
        match &self.slot {
            Slot::Value(payload) => payload,
            _ => unreachable!("Sentinels don't carry any payload"),
        }
    }

    fn key(&self) -> &C::Key {
        <C::Payload as Borrow<C::Key>>::borrow(self.payload())
    }

    fn cmp_key<Q>(&self, key: &Q) -> CmpOrdering
    where
        Q: ?Sized + Ord,
        C::Key: Borrow<Q>,
    {
        match &self.slot {
            Slot::Head => CmpOrdering::Less,
            Slot::Value(payload) => {
                let own = <C::Payload as Borrow<C::Key>>::borrow(payload);
                <C::Key as Borrow<Q>>::borrow(own).cmp(key)
            }
            Slot::Tail => CmpOrdering::Greater,
        }
    }
}

/// The raw lock-free sorted list.
///
/// This provides the low level data structure. It does provide the lock-free operations on some
/// values. On the other hand, it does not provide user friendly interface. It is designed to
/// separate the single implementation of the core algorithm and provide a way to wrap it into
/// different interfaces for different use cases.
///
/// The types stored inside are described by the [`Config`] type parameter.
///
/// As a general rule, this data structure takes the [`crossbeam_epoch`] [`Guard`] and returns
/// borrowed data whenever appropriate. Even the payload returned from [`remove`][Raw::remove] is
/// borrowed, because in concurrent situation some other thread might still be accessing it. It is
/// scheduled for destruction once the epoch ends.
///
/// # Algorithm
///
/// The list is bracketed by two sentinel nodes and kept sorted by the key. Removal is split into
/// two steps:
///
/// * Logical deletion sets the [`NodeFlags::DELETED`] flag on the link going *out* of the node.
///   From that moment the node is not part of the set, and its link is never changed again.
/// * Physical deletion swings the link of the predecessor past the node. Whoever walks by a
///   marked node tries to do this, not only the thread that marked it.
///
/// Every CAS on a link expects an unmarked value. Therefore nothing can be inserted after a
/// deleted node and a deleted node can't be unlinked through a deleted predecessor.
///
/// Unlinked nodes are handed to the epoch garbage collector. Any thread that could have seen the
/// node is pinned and keeps it alive until it unpins.
pub struct Raw<C: Config> {
    head: Node<C>,
}

impl<C: Config> Raw<C> {
    /// Constructs an empty list.
    pub fn new() -> Self {
        let tail = Node::sentinel(Slot::Tail, Atomic::null());
        Self {
            head: Node::sentinel(Slot::Head, Atomic::from(Owned::new(tail))),
        }
    }

    /// Looks up the position of a key.
    ///
    /// Returns the link of the last node smaller than the key and the first node not smaller
    /// (possibly the tail). The node returned was not marked at the time it was visited.
    ///
    /// Any marked node on the way gets unlinked. If that fails, the predecessor changed under our
    /// hands and we start over from the head.
    fn find<'a, Q>(
        &'a self,
        key: &Q,
        pin: &'a Guard,
    ) -> (&'a Atomic<Node<C>>, Shared<'a, Node<C>>)
    where
        Q: ?Sized + Ord,
        C::Key: Borrow<Q>,
    {
        'retry: loop {
            let mut pred = &self.head.next;
            let mut curr = pred.load(Ordering::Acquire, pin);

            loop {
                // There's always the tail before the end of the list, so this is not NULL. And
                // anything reachable while we are pinned is not destroyed until we unpin.
                let node = unsafe { curr.deref() };
                let next = node.next.load(Ordering::Acquire, pin);

                if nf(next).contains(NodeFlags::DELETED) {
                    let next = next.with_tag(0);
                    #[cfg(test)]
                    test_hooks::call_before_unlink_hook();
                    match pred.compare_exchange(
                        curr.with_tag(0),
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        pin,
                    ) {
                        Ok(_) => {
                            trace_log!("unlinked a deleted node during search");
                            // We just made it unreachable and only one such unlink can succeed.
                            unsafe { pin.defer_destroy(curr) };
                            curr = next;
                        }
                        Err(_) => {
                            trace_log!("lost an unlink race, restarting search");
                            #[cfg(test)]
                            test_hooks::record_restart();
                            continue 'retry;
                        }
                    }
                } else if node.cmp_key(key) == CmpOrdering::Less {
                    pred = &node.next;
                    curr = next;
                } else {
                    return (pred, curr.with_tag(0));
                }
            }
        }
    }

    /// Inserts a new payload, unless there's one with the same key already.
    ///
    /// Returns the already present payload if there was one (and drops the provided one), `None`
    /// if it got inserted.
    ///
    /// # Errors
    ///
    /// If the node for the payload can't be allocated.
    pub fn insert<'s, 'p, 'r>(
        &'s self,
        payload: C::Payload,
        pin: &'p Guard,
    ) -> Result<Option<&'r C::Payload>, AllocError>
    where
        's: 'r,
        'p: 'r,
    {
        let mut node = Node::<C>::try_owned(payload)?;

        loop {
            let (pred, curr) = self.find(node.key(), pin);
            let current = unsafe { curr.deref() };

            if current.cmp_key(node.key()) == CmpOrdering::Equal {
                return Ok(Some(current.payload()));
            }

            node.next.store(curr, Ordering::Relaxed);
            match pred.compare_exchange(curr, node, Ordering::AcqRel, Ordering::Acquire, pin) {
                Ok(_) => return Ok(None),
                Err(e) => {
                    trace_log!("lost an insert race, retrying");
                    node = e.new;
                }
            }
        }
    }

    /// Looks up a payload by its key.
    ///
    /// This never modifies the list, not even to help with cleaning up deleted nodes.
    pub fn get<'r, 's, 'p, Q>(&'s self, key: &Q, pin: &'p Guard) -> Option<&'r C::Payload>
    where
        's: 'r,
        'p: 'r,
        Q: ?Sized + Ord,
        C::Key: Borrow<Q>,
    {
        let mut curr = self.head.next.load(Ordering::Acquire, pin);
        loop {
            // The flags on the way are ignored, deleted nodes still point forward.
            let node = unsafe { curr.deref() };
            match node.cmp_key(key) {
                CmpOrdering::Less => curr = node.next.load(Ordering::Acquire, pin),
                CmpOrdering::Equal => {
                    let next = node.next.load(Ordering::Acquire, pin);
                    if nf(next).contains(NodeFlags::DELETED) {
                        return None;
                    }
                    return Some(node.payload());
                }
                CmpOrdering::Greater => return None,
            }
        }
    }

    /// Removes a payload identified by the given key, returning it.
    ///
    /// `Some` is returned only by the one thread whose marking succeeded, even if more of them
    /// race to remove the same key.
    pub fn remove<'r, 's, 'p, Q>(&'s self, key: &Q, pin: &'p Guard) -> Option<&'r C::Payload>
    where
        's: 'r,
        'p: 'r,
        Q: ?Sized + Ord,
        C::Key: Borrow<Q>,
    {
        loop {
            let (pred, curr) = self.find(key, pin);
            let current = unsafe { curr.deref() };

            if current.cmp_key(key) != CmpOrdering::Equal {
                return None;
            }

            let next = current.next.load(Ordering::Acquire, pin);
            if nf(next).contains(NodeFlags::DELETED) {
                // Someone else got to it first. The search will clean it up and tell us if
                // there's another one with the same key by now.
                continue;
            }

            let marked = next.with_tag(NodeFlags::DELETED.bits());
            if current
                .next
                .compare_exchange(next, marked, Ordering::AcqRel, Ordering::Acquire, pin)
                .is_err()
            {
                continue;
            }

            // Logically gone by now. The unlink is only a courtesy, the next search over this
            // place does it if we fail.
            match pred.compare_exchange(curr, next, Ordering::AcqRel, Ordering::Acquire, pin) {
                Ok(_) => unsafe { pin.defer_destroy(curr) },
                Err(_) => trace_log!("unlink of a removed node left to a later search"),
            }

            return Some(current.payload());
        }
    }

    /// Checks for emptiness.
    ///
    /// Deleted but not yet unlinked nodes don't count.
    pub fn is_empty(&self) -> bool {
        iterator::Iter::new(self).next().is_none()
    }
}

impl<C: Config> Default for Raw<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> Drop for Raw<C> {
    fn drop(&mut self) {
        /*
         * Notes about unsafety here:
         * * We are in a destructor and that one is &mut self. There are no concurrent accesses to
         *   this data structure any more, therefore we can safely assume we are the only ones
         *   looking at the pointers inside.
         * * Therefore, using unprotected is also fine.
         * * Similarly, the Relaxed ordering here is fine too, as the whole data structure must
         *   have been synchronized into our thread already by this time.
         * * Everything still linked is owned by us, marked or not. Whatever was unlinked is
         *   already owned by the garbage collector and we must not touch it.
         */
        unsafe {
            let pin = crossbeam_epoch::unprotected();
            let mut curr = self.head.next.load(Ordering::Relaxed, pin);
            while !curr.is_null() {
                let owned = curr.with_tag(0).into_owned();
                curr = owned.next.load(Ordering::Relaxed, pin);
                drop(owned);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::config::Trivial as TrivialConfig;
    use super::*;

    /// A payload counting how many of its instances were dropped.
    ///
    /// Ordered by the value only.
    #[derive(Debug)]
    pub(crate) struct Counted {
        value: u32,
        drops: Arc<AtomicUsize>,
    }

    impl Counted {
        pub(crate) fn new(value: u32, drops: &Arc<AtomicUsize>) -> Self {
            Self {
                value,
                drops: Arc::clone(drops),
            }
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl PartialEq for Counted {
        fn eq(&self, other: &Self) -> bool {
            self.value == other.value
        }
    }

    impl Eq for Counted {}

    impl PartialOrd for Counted {
        fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for Counted {
        fn cmp(&self, other: &Self) -> CmpOrdering {
            self.value.cmp(&other.value)
        }
    }

    fn with_values(values: &[u8]) -> Raw<TrivialConfig<u8>> {
        let raw = Raw::new();
        let pin = crossbeam_epoch::pin();
        for v in values {
            assert!(raw.insert(*v, &pin).unwrap().is_none());
        }
        raw
    }

    fn contents(raw: &Raw<TrivialConfig<u8>>) -> Vec<u8> {
        let mut iter = iterator::Iter::new(raw);
        let mut result = Vec::new();
        while let Some(v) = iter.next() {
            result.push(*v);
        }
        result
    }

    /// Marks the node with the given key as deleted, but leaves it linked.
    ///
    /// This is the state a remover leaves behind when it gets pre-empted between the two CASes
    /// (or when its unlink fails).
    pub(crate) fn mark<C: Config>(raw: &Raw<C>, key: &C::Key) {
        let pin = crossbeam_epoch::pin();
        let (_, curr) = raw.find(key, &pin);
        let node = unsafe { curr.deref() };
        assert_eq!(CmpOrdering::Equal, node.cmp_key(key), "Nothing to mark");
        node.next
            .fetch_or(NodeFlags::DELETED.bits(), Ordering::Relaxed, &pin);
    }

    #[test]
    fn empty_has_only_sentinels() {
        let mut raw = Raw::<TrivialConfig<u8>>::new();
        let pin = crossbeam_epoch::pin();

        let first = raw.head.next.load(Ordering::Relaxed, &pin);
        assert_eq!(NodeFlags::empty(), nf(first));
        let tail = unsafe { first.deref() };
        assert!(matches!(tail.slot, Slot::Tail));
        assert!(tail.next.load(Ordering::Relaxed, &pin).is_null());

        assert!(raw.is_empty());
        assert!(raw.get(&0, &pin).is_none());
        assert!(raw.remove(&0, &pin).is_none());
        drop(pin);
        raw.assert_sorted();
    }

    #[test]
    fn insert_keeps_order() {
        let mut raw = with_values(&[5, 1, 3, 4, 2]);
        eprintln!("{}", debug::PrintShape(&raw));
        assert_eq!(vec![1, 2, 3, 4, 5], contents(&raw));
        assert!(!raw.is_empty());
        raw.assert_sorted();
    }

    #[test]
    fn insert_duplicate_returns_existing() {
        let raw = with_values(&[1, 2]);
        let pin = crossbeam_epoch::pin();
        assert_eq!(Some(&2), raw.insert(2, &pin).unwrap());
        assert_eq!(vec![1, 2], contents(&raw));
    }

    #[test]
    fn rejected_duplicate_dropped_at_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let raw = Raw::<TrivialConfig<Counted>>::new();
        let pin = crossbeam_epoch::pin();
        assert!(raw.insert(Counted::new(1, &drops), &pin).unwrap().is_none());
        assert!(raw.insert(Counted::new(1, &drops), &pin).unwrap().is_some());
        assert_eq!(1, drops.load(Ordering::Relaxed));
        drop(pin);
        drop(raw);
        assert_eq!(2, drops.load(Ordering::Relaxed));
    }

    /// Linked nodes are owned by the list, even the deleted ones that were not unlinked yet.
    #[test]
    fn drop_releases_linked() {
        let drops = Arc::new(AtomicUsize::new(0));
        let raw = Raw::<TrivialConfig<Counted>>::new();
        {
            let pin = crossbeam_epoch::pin();
            for i in 0..10 {
                assert!(raw.insert(Counted::new(i, &drops), &pin).unwrap().is_none());
            }
        }
        mark(&raw, &Counted::new(3, &drops));
        // The lookup key handed to `mark`.
        assert_eq!(1, drops.load(Ordering::Relaxed));
        drop(raw);
        assert_eq!(11, drops.load(Ordering::Relaxed));
    }

    #[test]
    fn get_ignores_marked() {
        let mut raw = with_values(&[1, 2, 3]);
        mark(&raw, &2);
        {
            let pin = crossbeam_epoch::pin();
            assert!(raw.get(&2, &pin).is_none());
            // Walking through the marked node to the ones behind it is fine.
            assert_eq!(Some(&3), raw.get(&3, &pin));
        }
        // Lookups don't help with the cleanup.
        assert_eq!(1, raw.marked());
        assert_eq!(vec![1, 3], contents(&raw));
    }

    /// Pretend a remover got interrupted and left a marked node behind. An insert walking past it
    /// cleans it up.
    #[test]
    fn unlink_on_insert() {
        let mut raw = with_values(&[1, 2, 3]);
        mark(&raw, &2);
        assert_eq!(1, raw.marked());
        eprintln!("{}", debug::PrintShape(&raw));

        {
            let pin = crossbeam_epoch::pin();
            assert!(raw.insert(4, &pin).unwrap().is_none());
        }

        assert_eq!(0, raw.marked());
        raw.assert_sorted();
        assert_eq!(vec![1, 3, 4], contents(&raw));
    }

    /// The marked node is already gone from the set, so removing it again fails. But the attempt
    /// still unlinks it.
    #[test]
    fn unlink_on_remove() {
        let mut raw = with_values(&[1, 2, 3]);
        mark(&raw, &2);

        {
            let pin = crossbeam_epoch::pin();
            assert!(raw.remove(&2, &pin).is_none());
        }

        assert_eq!(0, raw.marked());
        assert_eq!(vec![1, 3], contents(&raw));
    }

    /// A new node with the same key as a marked one can be inserted, the marked one is not a
    /// duplicate.
    #[test]
    fn reinsert_over_marked() {
        let mut raw = with_values(&[1, 2, 3]);
        mark(&raw, &2);

        {
            let pin = crossbeam_epoch::pin();
            assert!(raw.insert(2, &pin).unwrap().is_none());
            assert_eq!(Some(&2), raw.get(&2, &pin));
        }

        assert_eq!(0, raw.marked());
        raw.assert_sorted();
        assert_eq!(vec![1, 2, 3], contents(&raw));
    }

    /// Another thread slips a new node in front of the marked one right before we unlink it. The
    /// unlink fails on the changed predecessor and the search starts over from the head.
    #[test]
    fn restart_after_lost_unlink() {
        let raw = Arc::new(with_values(&[1, 4, 5]));
        mark(&*raw, &4);

        let other = Arc::clone(&raw);
        test_hooks::set_before_unlink_hook(Box::new(move || {
            let pin = crossbeam_epoch::pin();
            // This one unlinks the marked node itself, on the way to its place.
            assert!(other.insert(2, &pin).unwrap().is_none());
        }));

        let restarts = test_hooks::restarts();
        {
            let pin = crossbeam_epoch::pin();
            assert!(raw.insert(6, &pin).unwrap().is_none());
        }
        assert_eq!(restarts + 1, test_hooks::restarts());

        let mut raw = Arc::try_unwrap(raw)
            .ok()
            .expect("The hook didn't run");
        assert_eq!(0, raw.marked());
        raw.assert_sorted();
        assert_eq!(vec![1, 2, 5, 6], contents(&raw));
    }

    #[test]
    fn remove_returns_payload() {
        let mut raw = with_values(&[1, 2, 3]);
        {
            let pin = crossbeam_epoch::pin();
            assert_eq!(Some(&2), raw.remove(&2, &pin));
            assert!(raw.remove(&2, &pin).is_none());
            assert!(raw.get(&2, &pin).is_none());
        }
        // The remover unlinked it itself, nobody was in the way.
        assert_eq!(0, raw.marked());
        raw.assert_sorted();
    }

    #[test]
    fn remove_everything() {
        let raw = with_values(&[3, 1, 2]);
        let pin = crossbeam_epoch::pin();
        for i in 1..=3 {
            assert_eq!(Some(&i), raw.remove(&i, &pin));
        }
        assert!(raw.is_empty());
    }
}
