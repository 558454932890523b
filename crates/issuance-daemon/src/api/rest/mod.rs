//! REST API

pub mod handlers;
pub mod router;
pub mod state;

pub use router::{create_router, RouterOptions};
pub use state::AppState;
