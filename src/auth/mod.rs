mod helpers;
mod middleware;
mod token;

pub use helpers::{APP_TOKEN_HEADER, extract_app_token, extract_bearer_token};
pub use middleware::{AppToken, AuthError, RequireAdmin};
pub use token::{digest_token, digests_match, generate_session_token, parse_session_token};
