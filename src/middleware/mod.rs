pub mod auth_middleware;
pub mod request_context;

pub use auth_middleware::{auth_middleware, AuthenticatedUser};
pub use request_context::{request_context_middleware, REQUEST_ID_HEADER, TRACE_ID_HEADER};
