//! Core library for PartsDesk, a car-parts inventory.
//!
//! Each module keeps one responsibility so the boundaries stay obvious:
//! - [`inventory`] owns the part catalog and its SQLite store.
//! - [`api`] exposes the command surface the front ends invoke.
//! - [`db`] opens SQLite files and applies the bundled schema.
//! - [`errors`] keeps the error catalogue with stable codes.
//! - [`logging`] writes catalog activity to the event log table.
//! - [`settings`] persists user preferences.
//! - [`workers`] runs slow catalog work on the blocking pool.
//! - [`seed`] and [`export`] move part lists in and out of the catalog.

pub mod api;
pub mod db;
pub mod errors;
pub mod export;
pub mod inventory;
pub mod logging;
pub mod seed;
pub mod settings;
pub mod workers;
