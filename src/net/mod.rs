//! Network side of the gateway: request/response types and the HTTP fetcher

pub mod client;
pub mod errors;
pub mod types;

pub use client::{Fetcher, HttpFetcher};
pub use errors::FetchError;
pub use types::{Request, RequestKey, Response};
