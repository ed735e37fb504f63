//! service-core: Shared infrastructure for the org-portal web tier.
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tracing;
pub use validator;
