//! Remote service backends for genchain.
//!
//! Provides the concrete collaborators the scheduler drives:
//! - [`HttpSubmitter`]: posts jobs to the remote generation services
//! - [`HttpFetcher`]: downloads finished artifacts to local storage

pub mod fetch;
pub mod http;

pub use fetch::HttpFetcher;
pub use http::{HttpSubmitter, classify};
