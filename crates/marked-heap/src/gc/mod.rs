//! Marking machinery shared by the heap and the handle tables.

mod conservative;
mod mark_stack;

pub use conservative::{ConservativeRoots, RootScanner};
pub use mark_stack::{MarkStack, DEFAULT_BATCH_THRESHOLD};
