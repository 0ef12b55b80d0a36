use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;
use validator::Validate;

use crate::api::movies::{category_index, path_slug, MovieView};
use crate::api::{
    App, AuthUser, ConflictSnafu, DatabaseSnafu, Deleted, MaybeUser, NotFoundSnafu, OrConflict,
    Result,
};
use crate::model::{Category, CategoryDetails, Movie, MovieFilter, Slug};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub id: String,
    pub name: String,
    pub slug: Slug,
    pub description: Option<String>,
    pub movie_count: usize,
    pub created_at: Timestamp,
}

impl CategoryView {
    pub fn new(category: Category, movie_count: usize) -> Self {
        Self {
            id: category.uid,
            name: category.name,
            slug: category.slug,
            description: category.description,
            movie_count,
            created_at: category.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWithMovies {
    #[serde(flatten)]
    pub category: CategoryView,
    pub movies: Vec<MovieView>,
}

/// Filter for the movies of `category` visible to the caller.
fn visible_in(category: &Category, caller: &MaybeUser) -> MovieFilter {
    MovieFilter {
        category_uid: Some(category.uid.clone()),
        published: caller.is_anonymous().then_some(true),
        ..Default::default()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub search: Option<String>,
}

#[instrument(skip(app))]
pub async fn list(
    State(app): State<App>, caller: MaybeUser, Query(query): Query<CategoryQuery>,
) -> Result<Json<Vec<CategoryView>>> {
    let categories = Category::search(query.search.as_deref(), &app.database)
        .await
        .context(DatabaseSnafu)?;

    let mut views = Vec::with_capacity(categories.len());
    for category in categories {
        let count = Movie::count(&visible_in(&category, &caller), &app.database)
            .await
            .context(DatabaseSnafu)?;
        views.push(CategoryView::new(category, count));
    }

    Ok(Json(views))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    pub slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

const SLUG_TAKEN: &str = "A category with this slug already exists";

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn create(
    State(app): State<App>, AuthUser(user): AuthUser, Json(payload): Json<NewCategory>,
) -> Result<(StatusCode, Json<CategoryView>)> {
    payload.validate()?;

    let slug = match payload.slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => slug.parse()?,
        _ => Slug::derive(&payload.name)?,
    };

    let mut details = CategoryDetails::new(payload.name, slug);
    details.description = payload.description;

    let category = Category::create(details, &app.database)
        .await
        .or_conflict(SLUG_TAKEN)?;
    tracing::info!(category = %category.uid, "created category `{}`", category.slug);

    Ok((StatusCode::CREATED, Json(CategoryView::new(category, 0))))
}

async fn find(slug: &str, app: &App) -> Result<Category> {
    let slug = path_slug(slug, "Category")?;
    Category::by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Category" })
}

/// A category with its movies, newest first.
#[instrument(skip(app))]
pub async fn show(
    State(app): State<App>, caller: MaybeUser, Path(slug): Path<String>,
) -> Result<Json<CategoryWithMovies>> {
    let category = find(&slug, &app).await?;
    let movies = Movie::matching(&visible_in(&category, &caller), &app.database)
        .await
        .context(DatabaseSnafu)?;
    let index = category_index(&app).await?;

    let movies: Vec<MovieView> = movies
        .into_iter()
        .map(|movie| MovieView::new(movie, &index))
        .collect();

    Ok(Json(CategoryWithMovies {
        category: CategoryView::new(category, movies.len()),
        movies,
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub new_slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn update(
    State(app): State<App>, AuthUser(user): AuthUser, Path(slug): Path<String>,
    Json(payload): Json<CategoryUpdate>,
) -> Result<Json<CategoryView>> {
    payload.validate()?;
    let category = find(&slug, &app).await?;

    let mut details = CategoryDetails {
        name: category.name.clone(),
        slug: category.slug.clone(),
        description: category.description.clone(),
    };

    if let Some(new_slug) = payload.new_slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        details.slug = new_slug.parse()?;
    }
    if let Some(name) = payload.name {
        details.name = name;
    }
    details.description = payload.description.or(details.description);

    let updated = Category::update(&category.uid, &details, &app.database)
        .await
        .or_conflict(SLUG_TAKEN)?
        .context(NotFoundSnafu { what: "Category" })?;

    let count = Movie::count(&visible_in(&updated, &MaybeUser(Some(user))), &app.database)
        .await
        .context(DatabaseSnafu)?;

    Ok(Json(CategoryView::new(updated, count)))
}

/// Categories still holding movies cannot be deleted.
#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn remove(
    State(app): State<App>, AuthUser(user): AuthUser, Path(slug): Path<String>,
) -> Result<Json<Deleted>> {
    let category = find(&slug, &app).await?;

    let filter = MovieFilter {
        category_uid: Some(category.uid.clone()),
        ..Default::default()
    };
    let movies = Movie::count(&filter, &app.database)
        .await
        .context(DatabaseSnafu)?;
    if movies > 0 {
        return ConflictSnafu {
            message: "Cannot delete category with associated movies",
        }
        .fail();
    }

    Category::delete(&category.uid, &app.database)
        .await
        .context(DatabaseSnafu)?;
    tracing::info!(category = %category.uid, "deleted category `{}`", category.slug);

    Ok(Deleted::ok())
}
