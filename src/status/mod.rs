//! Action status reporting

mod publisher;

pub use publisher::StatusPublisher;
