use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, memos::MAX_ATTACHMENT_BYTES, state::AppState};

pub mod auth;
pub mod health;
pub mod memos;
pub mod seals;

/// Multipart framing on top of the largest accepted attachment.
const BODY_LIMIT_BYTES: usize = MAX_ATTACHMENT_BYTES as usize + 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(%origin, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let memo_routes = Router::new()
        .route("/", get(memos::list_memos).post(memos::create_memo))
        .route(
            "/:id",
            get(memos::get_memo)
                .patch(memos::update_memo)
                .delete(memos::delete_memo),
        )
        .route("/:id/submit", post(memos::submit_memo))
        .route("/:id/approve", post(memos::approve_memo))
        .route("/:id/reject", post(memos::reject_memo))
        .route(
            "/:id/request-modification",
            post(memos::request_modification),
        )
        .route("/:id/reply", post(memos::reply_to_memo))
        .route(
            "/:id/attachments",
            get(memos::list_attachments).post(memos::upload_attachment),
        )
        .route(
            "/:id/attachments/:attachment_id/download",
            get(memos::download_attachment),
        )
        .route("/:id/artifact", get(memos::download_signed_artifact))
        .route("/:id/distribution", get(memos::list_distribution))
        .route(
            "/:id/distribution/acknowledge",
            post(memos::acknowledge_distribution),
        );

    let auth_routes = Router::new().route("/me", get(auth::me));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/memos", memo_routes)
        .nest("/api/auth", auth_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/seals/:code", get(seals::verify_seal))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}
