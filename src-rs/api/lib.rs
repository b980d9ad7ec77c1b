pub mod handlers;
pub mod server;

pub use handlers::{AppState, PredictionRequest, SubmitResponse};
pub use server::{build_router, PredictionServer};
