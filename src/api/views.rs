use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _};
use tower_http::cors::{Any, CorsLayer};
use tracing::instrument;

use crate::api::movies::path_slug;
use crate::api::{App, DatabaseSnafu, NotFoundSnafu, Result};
use crate::model::Movie;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCount {
    pub success: bool,
    pub view_count: u64,
}

/// The view counter routes, callable from any origin.
pub fn routes() -> Router<App> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/content/:slug/views", post(increment).options(preflight))
        .route("/api/movies/:slug/views", post(increment).options(preflight))
        .layer(cors)
}

/// Add one view to a published movie. Every accepted call counts.
#[instrument(skip(app))]
pub async fn increment(State(app): State<App>, Path(slug): Path<String>) -> Result<Json<ViewCount>> {
    let slug = path_slug(&slug, "Movie")?;
    let movie = Movie::increment_views(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Movie" })?;

    tracing::debug!(count = movie.view_count, "counted a view of `{}`", slug);
    Ok(Json(ViewCount {
        success: true,
        view_count: movie.view_count,
    }))
}

pub async fn preflight() -> StatusCode {
    StatusCode::OK
}
