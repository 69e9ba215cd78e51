// API module - HTTP endpoints

pub mod bookings;
pub mod health;
pub mod payments;
pub mod reminders;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Full HTTP surface. Admin authentication sits in front of this, not in it.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(bookings::router())
        .merge(payments::router())
        .merge(reminders::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
