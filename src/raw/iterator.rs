use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{Guard, Shared};

use super::config::Config;
use super::{nf, Node, NodeFlags, Raw, Slot};

unsafe fn extend_lifetime<'a, 'b, T: 'a + 'b>(s: Shared<'a, T>) -> Shared<'b, T> {
    mem::transmute(s)
}

// Notes about the lifetimes:
// The 'a here is actually a lie. We need two things from lifetimes:
// * We must not outlive the list we are iterating through (because the drop just outright
//   destroys the nodes).
// * The pointers must not outlive the pin we hold.
//
// The lifetime of the pin is the same as of the pointer we store inside of us. We check the
// lifetime relation of the list and us on the constructor, so we won't outlive the list. But
// technically, the lifetime should be something like `'self`, but it's not possible to describe.
//
// Therefore we have to make very sure to never return a reference with the 'a lifetime.

/// Walks the list in ascending order, skipping the deleted nodes.
///
/// The whole walk happens under a single pin. Nodes added or removed concurrently may or may not
/// show up, but the ones that do come in ascending order and each at most once.
pub struct Iter<'a, C>
where
    C: Config,
{
    pin: Guard,
    current: Shared<'a, Node<C>>,
    _list: PhantomData<&'a Raw<C>>,
}

impl<'a, C> Iter<'a, C>
where
    C: Config,
{
    /// Starts iterating from the smallest value.
    pub fn new<'m: 'a>(list: &'m Raw<C>) -> Self {
        let pin = crossbeam_epoch::pin();
        let current = list.head.next.load(Ordering::Acquire, &pin);
        let current = unsafe { extend_lifetime(current) };
        Iter {
            pin,
            current,
            _list: PhantomData,
        }
    }

    /// Moves to the next live payload.
    // Not an iterator because this borrows out of the iterator itself (and effectively its pin).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&C::Payload> {
        loop {
            let node = unsafe { self.current.deref() };
            match &node.slot {
                Slot::Value(payload) => {
                    let next = node.next.load(Ordering::Acquire, &self.pin);
                    self.current = unsafe { extend_lifetime(next.with_tag(0)) };
                    if !nf(next).contains(NodeFlags::DELETED) {
                        return Some(payload);
                    }
                }
                Slot::Tail => return None,
                Slot::Head => unreachable!("Head is never linked after itself"),
            }
        }
    }
}
