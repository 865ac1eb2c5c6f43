//! A module containing few debug utilities.
//!
//! In general, they are meant for debugging the *list itself*, but it is exposed as potentially
//! useful.

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self, Guard};

use super::config::Config;
use super::{nf, Node, NodeFlags, Raw, Slot};

impl<C> Raw<C>
where
    C: Config,
{
    // Hack: &mut to make sure it is not shared between threads and nobody is modifying the thing
    // right now.
    /// Panics if the list is not sorted and bracketed by the sentinels.
    ///
    /// Deleted nodes that were not unlinked yet are allowed anywhere, but the live ones must be
    /// strictly ascending. The sentinels are never marked.
    #[cfg(test)]
    pub(crate) fn assert_sorted(&mut self) {
        // Unprotected is fine, we are &mut so nobody else is allowed to do stuff to us at the
        // moment. Relaxed is fine for the same reason.
        let pin = unsafe { crossbeam_epoch::unprotected() };
        let mut last: Option<&C::Key> = None;
        let mut link = self.head.next.load(Ordering::Relaxed, pin);
        assert!(!nf(link).contains(NodeFlags::DELETED), "Marked head");

        loop {
            assert!(!link.is_null(), "The list ends without a tail");
            let node = unsafe { link.deref() };
            let next = node.next.load(Ordering::Relaxed, pin);
            match &node.slot {
                Slot::Head => panic!("Head linked inside the list"),
                Slot::Tail => {
                    assert!(next.is_null(), "Something after the tail");
                    assert_eq!(NodeFlags::empty(), nf(next), "Marked tail");
                    break;
                }
                Slot::Value(_) => {
                    if !nf(next).contains(NodeFlags::DELETED) {
                        let key = node.key();
                        if let Some(last) = last {
                            assert!(last < key, "Live nodes not strictly ascending");
                        }
                        last = Some(key);
                    }
                }
            }
            link = next;
        }
    }

    /// Counts the nodes that are deleted but still linked.
    #[cfg(test)]
    pub(crate) fn marked(&mut self) -> usize {
        let pin = unsafe { crossbeam_epoch::unprotected() };
        let mut cnt = 0;
        let mut link = self.head.next.load(Ordering::Relaxed, pin);
        while !link.is_null() {
            let node = unsafe { link.deref() };
            link = node.next.load(Ordering::Relaxed, pin);
            if nf(link).contains(NodeFlags::DELETED) {
                cnt += 1;
            }
        }
        cnt
    }

    fn print_node(node: &Node<C>, fmt: &mut Formatter, pin: &Guard) -> FmtResult
    where
        C::Payload: Debug,
    {
        let next = node.next.load(Ordering::Acquire, pin);
        match &node.slot {
            Slot::Head => write!(fmt, "HEAD")?,
            Slot::Value(payload) => write!(fmt, "{:?}", payload)?,
            Slot::Tail => write!(fmt, "TAIL")?,
        }
        if nf(next).contains(NodeFlags::DELETED) {
            write!(fmt, "(deleted)")?;
        }
        Ok(())
    }

    fn print_shape(&self, fmt: &mut Formatter) -> FmtResult
    where
        C::Payload: Debug,
    {
        let pin = crossbeam_epoch::pin();
        Self::print_node(&self.head, fmt, &pin)?;
        let mut link = self.head.next.load(Ordering::Acquire, &pin);
        while !link.is_null() {
            let node = unsafe { link.deref() };
            write!(fmt, " -> {:?}/", link.as_raw())?;
            Self::print_node(node, fmt, &pin)?;
            link = node.next.load(Ordering::Acquire, &pin);
        }
        Ok(())
    }
}

/// A pretty-printing wrapper around the raw list.
///
/// The whole chain, including the sentinels, the node addresses and the deleted nodes not yet
/// unlinked, is printed if this is used to wrap the raw list.
pub struct PrintShape<'a, C>(pub &'a Raw<C>)
where
    C: Config;

impl<C> Display for PrintShape<'_, C>
where
    C: Config,
    C::Payload: Debug,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        self.0.print_shape(fmt)
    }
}
