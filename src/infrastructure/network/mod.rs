pub mod client;
pub mod http;

pub use client::PostgrestBackend;
pub use http::ReqwestTransport;
