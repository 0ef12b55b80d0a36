use std::time::Duration;

use axum::routing::{get, post};
use axum::{middleware, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

mod analytics;
mod auth;
mod categories;
mod comments;
mod error;
mod ip;
mod movies;
mod pages;
mod site;
mod state;
mod views;

pub use auth::{AuthUser, MaybeUser, UserView, SESSION_COOKIE};
pub use error::*;
pub use pages::templates;
pub use site::site_name;
pub use state::*;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

pub fn create_router(app: App) -> Router {
    let api = Router::new()
        .route("/api/movies", get(movies::list).post(movies::create))
        .route(
            "/api/movies/:slug",
            get(movies::show).put(movies::update).delete(movies::remove),
        )
        .route("/api/categories", get(categories::list).post(categories::create))
        .route(
            "/api/categories/:slug",
            get(categories::show)
                .put(categories::update)
                .delete(categories::remove),
        )
        .route("/api/comments", get(comments::list).post(comments::create))
        .route(
            "/api/comments/:id",
            get(comments::show).put(comments::update).delete(comments::remove),
        )
        .route("/api/client-ip", get(ip::client_ip))
        .route("/api/analytics/views", get(analytics::views))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session));

    Router::new()
        .merge(api)
        .merge(views::routes())
        .merge(pages::routes())
        .fallback(pages::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(app.clone(), auth::resolve_caller)),
        )
        .with_state(app)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

impl Pagination {
    pub const MAX_LIMIT: usize = 100;

    /// The requested 1-based page with its limit clamped to `1..=MAX_LIMIT`. The total is filled
    /// in by [Pagination::with_total] once the datastore has counted the matches.
    pub fn request(page: Option<usize>, limit: Option<usize>, default_limit: usize) -> Self {
        Pagination {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, Self::MAX_LIMIT),
            total: 0,
            pages: 0,
        }
    }

    /// Offset of the first row on this page.
    pub fn start(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn with_total(self, total: usize) -> Self {
        Pagination {
            total,
            pages: total.div_ceil(self.limit),
            ..self
        }
    }
}

/// Body of a successful deletion.
#[derive(Debug, Serialize, Deserialize)]
pub struct Deleted {
    pub success: bool,
}

impl Deleted {
    pub fn ok() -> axum::Json<Deleted> {
        axum::Json(Deleted { success: true })
    }
}

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
