//! Event dispatch
//!
//! Sessions push decoded events into a per-session queue; a delivery task hands them to the
//! [`EventDispatcher`], which runs the registered handlers.

mod dispatcher;
mod event;

pub use dispatcher::{EventDispatcher, WILDCARD};
pub use event::DispatchEvent;
