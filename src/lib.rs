//! bdtransfer - chunked file transfer over a full-duplex message stream.
//!
//! The client streams a file in 4KB chunks while the peer streams progress
//! percentages back on the same connection; the client renders them as a
//! single progress line.

pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod streaming;
pub mod transport;

pub use error::{TransferError, TransferResult};
