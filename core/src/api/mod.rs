//! Command surface invoked by the front ends.
//!
//! Versioned modules (currently `v1`) group related commands so the desktop
//! shell and the CLI can share one set of handlers.

pub mod v1;
