//! Policy decision logic: clamps, recipient allowlisting, and the
//! auth-sensitivity classifier.
//!
//! Kept as pure functions over `chrono` timestamps and `AppConfig` fields so
//! every rule can be unit-tested without a running server, separated from
//! the handlers that call it.

pub mod clamps;
pub mod recipients;
pub mod redaction;
