// Export route modules
pub mod ask;
pub mod status;
pub mod ws;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(status::routes())
        .merge(ask::routes(state.clone()))
        .merge(ws::routes(state))
}
