//! Serializable types handed to whoever embeds the engine.
//!
//! All types use camelCase field names and lowercase enum values so they can
//! be written as JSON lines or forwarded over any event bus unchanged.

pub mod events;

pub use crate::engine::diagnostics::DiagnosticsSnapshot;
