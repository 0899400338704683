// Application layer - use cases and orchestration
// The engine owns balance mutations; the service gates every call through
// the access policy before delegating.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod registry;
pub mod reporting;
pub mod service;

pub use auth::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use locks::*;
pub use registry::*;
pub use reporting::*;
pub use service::*;
