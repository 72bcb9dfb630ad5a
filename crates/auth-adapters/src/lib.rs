//! # auth-adapters
//!
//! Identity Store collaborators: Argon2 password hashing and bearer
//! credentials. Session tokens are always available; signed JWTs sit behind
//! the `auth-jwt` feature.

pub mod password;
pub mod session;

#[cfg(feature = "auth-jwt")]
pub mod jwt;

pub use password::Argon2PasswordHasher;
pub use session::SessionTokenIssuer;

#[cfg(feature = "auth-jwt")]
pub use jwt::JwtTokenIssuer;
