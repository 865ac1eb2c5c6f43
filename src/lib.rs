//! A concurrent lock-free sorted set.
//!
//! The [`LockFreeSortedSet`] keeps its values in ascending order in a singly linked list. Any
//! number of threads can [`add`][LockFreeSortedSet::add],
//! [`remove`][LockFreeSortedSet::remove] and check [`contains`][LockFreeSortedSet::contains]
//! concurrently, without locks. Every change to the list is a single compare-and-swap; a thread
//! that loses a race simply looks up its position again and retries. Some thread always makes
//! progress.
//!
//! # Removal and cleanup
//!
//! Removing a value takes two steps. First, the node is *marked* as deleted; from that instant
//! on, it's not part of the set. Then it is *unlinked* from the list. The unlinking is a courtesy
//! of the remover: if it fails because something changed around the node, whoever walks past the
//! marked node next finishes the job.
//!
//! # Memory reclamation
//!
//! Unlinking a node does not free it right away, as other threads may still be reading it. The
//! nodes are handed over to [`crossbeam_epoch`] and destroyed once no thread that could have seen
//! them is still around. This also means that the memory of removed values is not released
//! immediately and the values may be dropped in a different thread.
//!
//! # Features
//!
//! * `rayon`: Implements the parallel extension and collection traits of [rayon].
//! * `tracing`: Emits diagnostic events about retries and cleanup through [tracing]. Without the
//!   feature, the events compile to nothing.
//!
//! [rayon]: https://docs.rs/rayon
//! [tracing]: https://docs.rs/tracing
//!
//! # Examples
//!
//! ```rust
//! use conlist::LockFreeSortedSet;
//! use crossbeam_utils::thread;
//!
//! let set = LockFreeSortedSet::new();
//!
//! thread::scope(|s| {
//!     for t in 0..4 {
//!         let set = &set;
//!         s.spawn(move |_| {
//!             for i in 0..10 {
//!                 assert!(set.add(i * 4 + t));
//!             }
//!         });
//!     }
//! }).unwrap();
//!
//! assert_eq!((0..40).collect::<Vec<_>>(), set.iter().collect::<Vec<_>>());
//! ```

#[macro_use]
mod tracing_helpers;

mod error;
pub mod raw;
pub mod set;

pub use self::error::AllocError;
pub use self::set::LockFreeSortedSet;

#[cfg(any(test, doctest))]
mod tests {
    #[cfg(test)]
    mod acts_like_set;
    #[cfg(doctest)]
    mod compile_fail;

    #[test]
    fn readme_deps() {
        version_sync::assert_markdown_deps_updated!("README.md");
    }
}
