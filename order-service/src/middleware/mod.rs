pub mod auth;

pub use auth::{AuthClaims, AuthUser, JwtVerifier};
