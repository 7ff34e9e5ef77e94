//! HTTP implementation of the template and merge collaborators.
//!
//! Provides `RemoteConfig` (file/env configuration) and `HttpBackend`, which
//! implements `TemplateSource` and `MergeSource` against the input-set API.

mod config;
mod http;

pub use config::RemoteConfig;
pub use http::HttpBackend;
