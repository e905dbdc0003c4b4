//! Shared types for the Recordroom capture core.

mod event;
mod record;
mod state;

pub use event::*;
pub use record::*;
pub use state::*;
