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

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod commissions;
pub mod documents;
pub mod health;
pub mod leads;
pub mod users;

/// Upload limit plus room for the other multipart fields.
const BODY_LIMIT_BYTES: usize = documents::MAX_UPLOAD_BYTES + 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
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

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/referrers/list", get(users::list_referrers))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let leads_routes = Router::new()
        .route("/", get(leads::list_leads).post(leads::create_lead))
        .route(
            "/:id",
            get(leads::get_lead)
                .put(leads::update_lead)
                .delete(leads::delete_lead),
        )
        .route("/:id/notes", post(leads::add_note))
        .route("/:id/documents", post(leads::attach_document));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/send", post(documents::send_for_signature))
        .route("/:id/sign", post(documents::sign_document))
        .route("/:id/decline", post(documents::decline_document));

    let commissions_routes = Router::new()
        .route(
            "/",
            get(commissions::list_commissions).post(commissions::create_commission),
        )
        .route(
            "/:id",
            get(commissions::get_commission)
                .put(commissions::update_commission)
                .delete(commissions::delete_commission),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/leads", leads_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/commissions", commissions_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
