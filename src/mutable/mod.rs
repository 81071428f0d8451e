//! JSON-encoded text columns whose decoded value tracks in-place mutation.

mod changes;
pub mod codec;
mod column;
mod tracked;

pub use changes::ChangeSet;
pub use codec::CodecError;
pub use column::JsonColumn;
pub use tracked::{Tracked, TrackedDict, TrackedError, TrackedList};
