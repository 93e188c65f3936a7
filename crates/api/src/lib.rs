pub mod dto;
pub mod error;
pub mod lock;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{build_router, ApiState};
