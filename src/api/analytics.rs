use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tracing::instrument;

use crate::api::{App, AuthUser, DatabaseSnafu, Result};
use crate::database::Database;
use crate::model::{Movie, MovieFilter, Slug};

const TOP_MOVIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopMovie {
    pub id: String,
    pub title: String,
    pub slug: Slug,
    pub view_count: u64,
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStats {
    pub total_views: u64,
    pub published_movies: usize,
    /// Views per published movie.
    pub average_views: f64,
    pub top_movies: Vec<TopMovie>,
}

impl ViewStats {
    #[instrument(skip(db))]
    pub async fn compute(db: &Database) -> crate::database::Result<Self> {
        let all = Movie::totals(&MovieFilter::default(), db).await?;
        let published = Movie::totals(&MovieFilter::published(), db).await?;
        let average_views = match published.movies {
            0 => 0.0,
            n => published.views as f64 / n as f64,
        };

        let top_movies = Movie::most_viewed(TOP_MOVIES, db)
            .await?
            .into_iter()
            .map(|movie| TopMovie {
                id: movie.uid,
                title: movie.title,
                slug: movie.slug,
                view_count: movie.view_count,
                is_published: movie.is_published,
            })
            .collect();

        Ok(Self {
            total_views: all.views,
            published_movies: published.movies,
            average_views,
            top_movies,
        })
    }
}

#[instrument(skip_all)]
pub async fn views(State(app): State<App>, _user: AuthUser) -> Result<Json<ViewStats>> {
    let stats = ViewStats::compute(&app.database)
        .await
        .context(DatabaseSnafu)?;
    Ok(Json(stats))
}
