//! REST surface for huddle: session middleware, handlers, and the seams
//! to external services (blob storage, link unfurling, email).

pub mod blobs;
pub mod channels;
pub mod conversations;
pub mod email;
pub mod error;
pub mod files;
pub mod invites;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod reads;
pub mod routes;
pub mod state;
pub mod unfurl;
pub mod users;
pub mod workspaces;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};
