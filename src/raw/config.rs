use std::borrow::Borrow;
use std::marker::PhantomData;

/// Customization of the [`Raw`][crate::raw::Raw].
///
/// This specifies what the list stores and what it is ordered by. The payload is what lives in
/// each node; the key is the part of it that takes part in comparisons.
pub trait Config {
    /// The payload (eg. values) stored inside the list.
    ///
    /// The payload may be destroyed by whatever thread happens to collect the garbage, at some
    /// later time, which is why it needs to be `'static`.
    type Payload: Borrow<Self::Key> + 'static;

    /// Each payload must contain a key as its part. The list is kept in ascending order of the
    /// keys and no two live nodes share one.
    type Key: Ord;
}

/// A trivial config, where the payload and the key are the same thing.
pub struct Trivial<T>(PhantomData<T>);

impl<T> Config for Trivial<T>
where
    T: Ord + 'static,
{
    type Payload = T;
    type Key = T;
}
