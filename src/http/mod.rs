mod client;
mod transport;

pub use client::HttpTransport;
pub use transport::{BatchUploadInfo, Transport};
