//! Shared driver utilities.

mod tls;

pub use tls::TlsBuilder;
