//! Fan-out side of the pipeline: the message router, viewer registry,
//! consumer playback buffer, bounded ephemeral state, webhook relay and
//! the record-store contract.

pub mod ephemeral;
pub mod playback;
pub mod router;
pub mod store;
pub mod viewer;
pub mod webhook;

pub use router::Router;
pub use viewer::ViewerRegistry;
