//! Domain Layer - Core dispatch types and decoding rules.
//!
//! This layer contains the protocol data shapes, result tables and
//! correlation bookkeeping with no I/O. Everything here is plain Rust with
//! serialization support; the engines in the application layer drive it.

/// Correlation tokens and the token registry.
pub mod correlation;

/// Tagged protocol data elements and typed accessors.
pub mod element;

/// Protocol events and messages.
pub mod event;

/// Observer notification records.
pub mod notification;

/// One-shot request descriptions.
pub mod request;

/// Completed reference and historical results.
pub mod result;

/// Live subscription entries and the live field table.
pub mod subscription;

/// Decoded field values and the sentinel.
pub mod value;
