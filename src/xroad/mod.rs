//! X-Road operational monitoring protocol
//!
//! This module provides:
//! - The `BatchFetcher` trait used by the collection engine
//! - The SOAP implementation querying `getSecurityServerOperationalData`
//! - Decoding of the gzip-compressed JSON attachment
//!
//! The engine only ever talks to the `BatchFetcher` trait.

pub mod adapter;
pub mod attachment;
pub mod soap;

pub use adapter::BatchFetcher;
pub use soap::SoapFetcher;
