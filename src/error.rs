//! The error returned when the set can't get memory for a new node.

use std::alloc::Layout;
use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Allocation of a list node failed.
///
/// Returned by [`try_add`][crate::LockFreeSortedSet::try_add]. The value that was supposed to be
/// inserted is dropped and the set is left untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout of the node the allocator refused to provide.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl Display for AllocError {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "failed to allocate a list node of {} bytes",
            self.layout.size()
        )
    }
}

impl Error for AllocError {}
