//! parley-api: typed client for the remote chat service
//!
//! Wire types, the [`Gateway`] trait and its reqwest-backed implementation.

pub mod error;
pub mod gateway;
pub mod http;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use gateway::Gateway;
pub use http::HttpGateway;
pub use types::*;
