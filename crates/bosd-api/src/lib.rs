pub mod app;
pub mod error;
pub mod handlers;
pub mod state;
pub mod tenant;
pub mod validate;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
