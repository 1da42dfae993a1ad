//! Upload queue over [`upqueue_transfer::TransferItem`]s.
//!
//! The [`QueueController`] owns an ordered list of items, re-emits their
//! events on queue-wide streams, keeps aggregate progress, and schedules
//! uploads either all at once (parallel) or one after another, advancing
//! on each success (sequential).

mod controller;
mod options;

pub use controller::QueueController;
pub use options::QueueOptions;
