//! Core library for the `throng` load engine.
//!
//! Virtual users walk a test plan tree of controllers, samplers, timers,
//! processors and listeners. Pacing comes from the timer subsystem, named
//! critical sections and rendezvous barriers live in [`sync`], and
//! [`distributed`] fans a plan out over remote agents. Protocol samplers and
//! result listeners plug in through [`engine::Capabilities`].
pub mod args;
pub mod config;
pub mod distributed;
pub mod engine;
mod entry;
pub mod error;
mod logger;
pub mod pacing;
pub mod plan;
pub mod shutdown;
mod shutdown_handlers;
mod summary_output;
pub mod sync;
pub mod timers;

pub use entry::run;
