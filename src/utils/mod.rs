// Utility modules shared across the service.

pub mod auth_errors;
pub mod password;
pub mod secrets;
pub mod validation;

pub use auth_errors::{AuthError, ErrorBody, ErrorCode};
pub use password::{hash_password, verify_password, PasswordError, DEFAULT_BCRYPT_COST};
pub use secrets::{generate_token_secret, hash_token_secret};
pub use validation::{
    flatten_validation_errors, sanitize_email, sanitize_password, sanitize_username,
    validate_password, validate_username_charset,
};
