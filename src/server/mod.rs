mod admin;
pub mod dto;
pub mod response;
mod router;
mod runtime;

pub use admin::admin_router;
pub use router::{AppState, create_router};
pub use runtime::runtime_router;
