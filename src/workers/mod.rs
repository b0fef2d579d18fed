//! Review pipeline workers.
//!
//! Each worker is a stateless handler driven by a dispatcher; workers never
//! call each other, and all coordination happens through the delivery
//! primitives and the record store.

pub mod intake;
pub mod metadata;
pub mod notify;
pub mod reaper;
pub mod status;

pub use intake::IntakeValidator;
pub use metadata::MetadataApplier;
pub use notify::NotificationWorker;
pub use reaper::InvalidObjectReaper;
pub use status::StatusTransitionWorker;
