//! Gateway dispatch event types

mod event_type;

pub use event_type::EventType;
