//! Retry helpers shared by the REST client and gateway sessions

mod backoff;

pub use backoff::Backoff;
