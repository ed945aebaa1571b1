use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let company = Router::new()
        // Queries
        .route("/availability", get(handlers::list_availability))
        .route("/hours", get(handlers::display_hours))
        // Bookings
        .route("/bookings", post(handlers::create_booking))
        .route(
            "/bookings/{id}",
            get(handlers::get_booking).delete(handlers::cancel_booking),
        )
        .route("/bookings/{id}/status", put(handlers::set_booking_status))
        .route("/bookings/{id}/reschedule", post(handlers::reschedule_booking))
        // Waitlist
        .route("/waitlist", post(handlers::join_waitlist))
        .route("/waitlist/{id}/promote", post(handlers::promote_waitlist))
        // Settings
        .route("/settings", put(handlers::update_settings))
        .route(
            "/services/{id}",
            put(handlers::upsert_service).delete(handlers::remove_service),
        )
        .route("/resources/{id}", put(handlers::upsert_resource))
        .route("/schedules/company", put(handlers::replace_company_schedule))
        .route("/schedules/professionals/{id}", put(handlers::replace_professional_schedule))
        .route("/exceptions", post(handlers::add_exception))
        .route("/exceptions/{id}", delete(handlers::remove_exception));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1/{company}", company)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
