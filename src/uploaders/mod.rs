pub mod http;

pub use http::{CountingStream, HttpUploadClient, classify_status};
