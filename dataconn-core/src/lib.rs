//! Dataconn Core
//!
//! Runtime-agnostic building blocks shared by the dataconn stream protocol:
//! - Deadline-bounded read/write helpers over any `compio` duplex stream (`timeout`)
//! - An in-process byte pipe with close-with-error semantics (`pipe`)
//! - The cleanliness-guard primitive used to implement per-direction poisoning (`poison`)
//! - Shared error types (`error`)

#![deny(unsafe_code)]

pub mod error;
pub mod pipe;
pub mod poison;
pub mod timeout;

pub use error::PipeError;
pub use poison::CleanGuard;
