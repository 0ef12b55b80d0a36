use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;
use validator::Validate;

use crate::api::{
    App, AuthUser, DatabaseSnafu, Deleted, MaybeUser, NotFoundSnafu, OrConflict, Pagination,
    Result, ValidationSnafu,
};
use crate::model::{Category, Movie, MovieDetails, MovieFilter, Slug};
use crate::time::Timestamp;

const DEFAULT_LIMIT: usize = 12;
const SLUG_TAKEN: &str = "A movie with this slug already exists";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub slug: Slug,
}

impl From<&Category> for CategorySummary {
    fn from(category: &Category) -> Self {
        Self {
            id: category.uid.clone(),
            name: category.name.clone(),
            slug: category.slug.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieView {
    pub id: String,
    pub title: String,
    pub slug: Slug,
    pub synopsis: Option<String>,
    pub release_year: Option<i32>,
    pub duration: Option<u32>,
    pub language: Option<String>,
    pub poster_url: Option<String>,
    pub video_url: String,
    pub is_published: bool,
    pub featured: bool,
    pub view_count: u64,
    pub categories: Vec<CategorySummary>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MovieView {
    /// `categories` resolves the movie's category uids, dangling uids are skipped.
    pub fn new(movie: Movie, categories: &HashMap<String, CategorySummary>) -> Self {
        let summaries = movie
            .category_uids
            .iter()
            .filter_map(|uid| categories.get(uid).cloned())
            .collect();

        Self {
            id: movie.uid,
            title: movie.title,
            slug: movie.slug,
            synopsis: movie.synopsis,
            release_year: movie.release_year,
            duration: movie.duration,
            language: movie.language,
            poster_url: movie.poster_url,
            video_url: movie.video_url,
            is_published: movie.is_published,
            featured: movie.featured,
            view_count: movie.view_count,
            categories: summaries,
            created_at: movie.created_at,
            updated_at: movie.updated_at,
        }
    }
}

pub(crate) async fn category_index(app: &App) -> Result<HashMap<String, CategorySummary>> {
    let categories = Category::all(&app.database).await.context(DatabaseSnafu)?;
    Ok(categories
        .iter()
        .map(|category| (category.uid.clone(), CategorySummary::from(category)))
        .collect())
}

/// Resolve a slug taken from the path, treating malformed slugs as missing.
pub(crate) fn path_slug(slug: &str, what: &'static str) -> Result<Slug> {
    slug.parse().ok().context(NotFoundSnafu { what })
}

/// Check that every referenced category exists.
fn known_categories(ids: &[String], categories: &HashMap<String, CategorySummary>) -> Result<()> {
    match ids.iter().find(|id| !categories.contains_key(*id)) {
        Some(id) => ValidationSnafu {
            message: format!("unknown category `{id}`"),
        }
        .fail(),
        None => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MovieQuery {
    pub search: Option<String>,
    /// Category slug.
    pub category: Option<String>,
    pub published: Option<bool>,
    pub featured: Option<bool>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieList {
    pub movies: Vec<MovieView>,
    pub pagination: Pagination,
}

/// Movies newest first. Anonymous callers only ever see published movies.
#[instrument(skip(app))]
pub async fn list(
    State(app): State<App>, caller: MaybeUser, Query(query): Query<MovieQuery>,
) -> Result<Json<MovieList>> {
    let pagination = Pagination::request(query.page, query.limit, DEFAULT_LIMIT);

    let category_uid = match &query.category {
        None => None,
        Some(slug) => {
            let category = match slug.parse::<Slug>() {
                Ok(slug) => Category::by_slug(&slug, &app.database)
                    .await
                    .context(DatabaseSnafu)?,
                Err(_) => None,
            };

            match category {
                Some(category) => Some(category.uid),
                None => {
                    return Ok(Json(MovieList {
                        movies: Vec::new(),
                        pagination,
                    }))
                }
            }
        }
    };

    let filter = MovieFilter {
        search: query.search,
        category_uid,
        published: if caller.is_anonymous() {
            Some(true)
        } else {
            query.published
        },
        featured: query.featured,
    };

    let (movies, total) = Movie::page(&filter, pagination.start(), pagination.limit, &app.database)
        .await
        .context(DatabaseSnafu)?;

    let index = category_index(&app).await?;
    let movies = movies
        .into_iter()
        .map(|movie| MovieView::new(movie, &index))
        .collect();

    Ok(Json(MovieList {
        movies,
        pagination: pagination.with_total(total),
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewMovie {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "title is required"))]
    pub title: String,
    pub slug: Option<String>,
    pub synopsis: Option<String>,
    #[validate(range(min = 1888, max = 2100))]
    pub release_year: Option<i32>,
    #[validate(range(min = 1))]
    pub duration: Option<u32>,
    pub language: Option<String>,
    #[validate(url)]
    pub poster_url: Option<String>,
    #[serde(default)]
    #[validate(url(message = "a valid video URL is required"))]
    pub video_url: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn create(
    State(app): State<App>, AuthUser(user): AuthUser, Json(payload): Json<NewMovie>,
) -> Result<(StatusCode, Json<MovieView>)> {
    payload.validate()?;

    let slug = match payload.slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => slug.parse()?,
        _ => Slug::derive(&payload.title)?,
    };

    let categories = category_index(&app).await?;
    known_categories(&payload.category_ids, &categories)?;

    let mut details = MovieDetails::new(payload.title, slug, payload.video_url);
    details.synopsis = payload.synopsis;
    details.release_year = payload.release_year;
    details.duration = payload.duration;
    details.language = payload.language;
    details.poster_url = payload.poster_url;
    details.is_published = payload.is_published;
    details.featured = payload.featured;
    details.category_uids = payload.category_ids;

    let movie = Movie::create(details, &app.database)
        .await
        .or_conflict(SLUG_TAKEN)?;
    tracing::info!(movie = %movie.uid, "created movie `{}`", movie.slug);

    Ok((StatusCode::CREATED, Json(MovieView::new(movie, &categories))))
}

#[instrument(skip(app))]
pub async fn show(
    State(app): State<App>, caller: MaybeUser, Path(slug): Path<String>,
) -> Result<Json<MovieView>> {
    let slug = path_slug(&slug, "Movie")?;
    let movie = Movie::by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
        .filter(|movie| movie.is_published || !caller.is_anonymous())
        .context(NotFoundSnafu { what: "Movie" })?;

    let categories = category_index(&app).await?;
    Ok(Json(MovieView::new(movie, &categories)))
}

/// Fields to change. Absent fields are kept; the view counter cannot be written.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MovieUpdate {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub new_slug: Option<String>,
    pub synopsis: Option<String>,
    #[validate(range(min = 1888, max = 2100))]
    pub release_year: Option<i32>,
    #[validate(range(min = 1))]
    pub duration: Option<u32>,
    pub language: Option<String>,
    #[validate(url)]
    pub poster_url: Option<String>,
    #[validate(url)]
    pub video_url: Option<String>,
    pub is_published: Option<bool>,
    pub featured: Option<bool>,
    pub category_ids: Option<Vec<String>>,
}

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn update(
    State(app): State<App>, AuthUser(user): AuthUser, Path(slug): Path<String>,
    Json(payload): Json<MovieUpdate>,
) -> Result<Json<MovieView>> {
    payload.validate()?;

    let slug = path_slug(&slug, "Movie")?;
    let movie = Movie::by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Movie" })?;

    let mut details = movie.details();

    if let Some(new_slug) = payload.new_slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        details.slug = new_slug.parse()?;
    }

    let categories = category_index(&app).await?;
    if let Some(ids) = payload.category_ids {
        known_categories(&ids, &categories)?;
        details.category_uids = ids;
    }

    if let Some(title) = payload.title {
        details.title = title;
    }
    if let Some(video_url) = payload.video_url {
        details.video_url = video_url;
    }
    if let Some(is_published) = payload.is_published {
        details.is_published = is_published;
    }
    if let Some(featured) = payload.featured {
        details.featured = featured;
    }
    details.synopsis = payload.synopsis.or(details.synopsis);
    details.release_year = payload.release_year.or(details.release_year);
    details.duration = payload.duration.or(details.duration);
    details.language = payload.language.or(details.language);
    details.poster_url = payload.poster_url.or(details.poster_url);

    let movie = Movie::update(&movie.uid, &details, &app.database)
        .await
        .or_conflict(SLUG_TAKEN)?
        .context(NotFoundSnafu { what: "Movie" })?;

    Ok(Json(MovieView::new(movie, &categories)))
}

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn remove(
    State(app): State<App>, AuthUser(user): AuthUser, Path(slug): Path<String>,
) -> Result<Json<Deleted>> {
    let slug = path_slug(&slug, "Movie")?;
    let movie = Movie::by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Movie" })?;

    Movie::delete(&movie.uid, &app.database)
        .await
        .context(DatabaseSnafu)?;
    tracing::info!(movie = %movie.uid, "deleted movie `{}`", movie.slug);

    Ok(Deleted::ok())
}
