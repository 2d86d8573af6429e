//! Remote coordination with the datadb server.

pub mod client;

pub use client::{DatadbClient, TransferHandle, UploadResponse};
