//! CLI command implementations for marksync.
//!
//! `serve` runs the background process; the rest are short-lived foreground
//! clients talking to it over the profile socket.

pub mod call;
pub mod serve;
pub mod status;
pub mod stop;
pub mod sync;
