pub mod advice;
pub mod api;
pub mod auth;
pub mod error;
pub mod relay;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{Claims, TokenIssuer, hash_password};
pub use error::ApiError;
pub use relay::{ConduitReader, ConduitWriter, conduit, into_body_stream};
pub use router::build_router;
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
