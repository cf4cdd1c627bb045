//! Session lifecycle.
//!
//! The [`SessionCoordinator`] creates and attaches table sessions and interactive sessions.
//! [`ReadSession`] and [`WriteSession`] hold an immutable snapshot of their table session that is
//! only replaced by an explicit `refresh`.

mod coordinator;
mod read;
mod write;

pub use coordinator::SessionCoordinator;
pub use read::ReadSession;
pub use write::WriteSession;
