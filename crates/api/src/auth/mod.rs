//! Authentication module for CallAlly

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
pub use middleware::{require_auth, AuthError, AuthState, AuthUser};
pub use password::{hash_password, validate_password, verify_password, PasswordError};
