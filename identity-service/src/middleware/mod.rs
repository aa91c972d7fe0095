pub mod auth;

pub use auth::{auth_middleware, enforce_access, CurrentUser, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
