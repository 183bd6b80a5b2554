pub mod auth;
pub mod user;

pub use auth::{AccessTokenClaims, OneTimeTokenRecord, RefreshTokenRecord};
pub use user::{MemoryUserStore, NewUser, User, UserStore, UserStoreError, DEFAULT_ROLE_ID};
