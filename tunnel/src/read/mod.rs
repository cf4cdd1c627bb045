//! Batch read protocol.
//!
//! A [`SplitAssigner`] turns a read session into splits. Splits are listed page by page through
//! a [`SplitListing`], or shared among concurrent workers through a [`SplitDispenser`].

mod assigner;
mod dispenser;
mod listing;

pub use assigner::SplitAssigner;
pub use dispenser::SplitDispenser;
pub use listing::SplitListing;
