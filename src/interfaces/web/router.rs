use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{agents, events, queue, system};

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/agents/spawn", post(agents::spawn_agent))
        .route("/agents", get(agents::list_agents))
        .route("/agents/active", get(agents::active_agents))
        .route("/agents/analytics", get(agents::agent_analytics))
        .route("/agents/{id}", get(agents::get_agent))
        .route("/agents/{id}/logs", get(agents::agent_logs))
        .route("/agents/{id}/kill", post(agents::kill_agent))
        .route("/agents/{id}/retry", post(agents::retry_agent))
        .route(
            "/events",
            get(events::list_events).post(events::create_event),
        )
        .route("/events/pending", get(events::pending_events))
        .route("/events/processed", get(events::processed_events))
        .route("/events/{id}", get(events::get_event))
        .route("/events/{id}/processed", post(events::mark_event_processed))
        .route("/queue", get(queue::get_queue))
        .route(
            "/queue/settings",
            get(queue::get_queue_settings).post(queue::set_queue_settings),
        )
        .route("/queue/add/{task_id}", post(queue::add_to_queue))
        .route(
            "/queue/{task_id}",
            axum::routing::delete(queue::remove_from_queue),
        )
        .route("/queue/clear", post(queue::clear_queue))
        .route("/health", get(system::health))
        .route("/logs", get(system::service_logs))
        .route("/logs/stream", get(super::logs_stream))
        .route("/scm/repos", get(system::scm_repos))
        .route("/scm/clone", post(system::scm_clone))
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
