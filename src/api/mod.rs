// HTTP operations API for the broker session

pub mod session;

pub use session::{create_session_router, AppError, SessionAppState};
