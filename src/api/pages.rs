use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_template::RenderHtml;
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tera::{Tera, Value};
use tracing::instrument;

use crate::api::categories::CategoryView;
use crate::api::comments::{CommentView, Related};
use crate::api::movies::{category_index, CategorySummary, MovieView};
use crate::api::{site_name, ApiError, App, DatabaseSnafu, MaybeUser, Pagination, Result, Templates};
use crate::model::{Category, Comment, CommentFilter, Movie, MovieFilter, Slug};
use crate::tracking::format_count;

const PAGE_SIZE: usize = 12;
const FEATURED: usize = 6;
const LATEST: usize = 8;

/// Compile the page templates embedded in the binary.
pub fn templates() -> Result<Templates, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../../templates/base.html")),
        ("home.html", include_str!("../../templates/home.html")),
        ("movies.html", include_str!("../../templates/movies.html")),
        ("movie.html", include_str!("../../templates/movie.html")),
        ("categories.html", include_str!("../../templates/categories.html")),
        ("category.html", include_str!("../../templates/category.html")),
        ("not_found.html", include_str!("../../templates/not_found.html")),
    ])?;
    tera.register_filter("thousands", thousands);

    Ok(Templates::from(tera))
}

fn thousands(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    match value.as_u64() {
        Some(count) => Ok(Value::String(format_count(count))),
        None => Err(tera::Error::msg(format!("`thousands` expects a count, got {value}"))),
    }
}

pub fn routes() -> Router<App> {
    Router::new()
        .route("/", get(home))
        .route("/movies", get(movies))
        .route("/movies/:slug", get(movie))
        .route("/movie/:slug", get(movie))
        .route("/categories", get(categories))
        .route("/categories/:slug", get(category))
}

#[derive(Debug, Serialize)]
struct Page<T> {
    site_name: String,
    #[serde(flatten)]
    body: T,
}

fn render<T: Serialize>(app: &App, headers: &HeaderMap, key: &'static str, body: T) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok());
    let page = Page {
        site_name: site_name(app.site_name.as_deref(), host),
        body,
    };

    RenderHtml(key, app.templates.clone(), page).into_response()
}

#[derive(Debug, Serialize)]
struct Missing {}

fn missing(app: &App, headers: &HeaderMap) -> Response {
    let page = render(app, headers, "not_found.html", Missing {});
    (StatusCode::NOT_FOUND, page).into_response()
}

/// Unknown API paths answer in JSON, everything else gets the 404 page.
pub async fn not_found(State(app): State<App>, uri: Uri, headers: HeaderMap) -> Response {
    if uri.path().starts_with("/api/") {
        return ApiError::NotFound { what: "Resource" }.into_response();
    }

    missing(&app, &headers)
}

/// One page of published movies matching `filter`, with the number of matches.
async fn published(app: &App, filter: MovieFilter, start: usize, limit: usize) -> Result<(Vec<Movie>, usize)> {
    let filter = MovieFilter {
        published: Some(true),
        ..filter
    };

    Movie::page(&filter, start, limit, &app.database)
        .await
        .context(DatabaseSnafu)
}

/// Every category with its number of published movies.
async fn category_views(app: &App) -> Result<Vec<CategoryView>> {
    let categories = Category::all(&app.database).await.context(DatabaseSnafu)?;

    let mut views = Vec::with_capacity(categories.len());
    for category in categories {
        let filter = MovieFilter {
            category_uid: Some(category.uid.clone()),
            ..MovieFilter::published()
        };
        let count = Movie::count(&filter, &app.database)
            .await
            .context(DatabaseSnafu)?;
        views.push(CategoryView::new(category, count));
    }

    Ok(views)
}

fn views(movies: Vec<Movie>, index: &HashMap<String, CategorySummary>) -> Vec<MovieView> {
    movies
        .into_iter()
        .map(|movie| MovieView::new(movie, index))
        .collect()
}

#[derive(Debug, Serialize)]
struct Home {
    featured: Vec<MovieView>,
    latest: Vec<MovieView>,
    categories: Vec<CategoryView>,
}

#[instrument(skip_all)]
async fn home(State(app): State<App>, headers: HeaderMap) -> Result<Response> {
    let index = category_index(&app).await?;
    let featured = MovieFilter {
        featured: Some(true),
        ..Default::default()
    };
    let (featured, _) = published(&app, featured, 0, FEATURED).await?;
    let (latest, _) = published(&app, MovieFilter::default(), 0, LATEST).await?;

    let body = Home {
        featured: views(featured, &index),
        latest: views(latest, &index),
        categories: category_views(&app).await?,
    };
    Ok(render(&app, &headers, "home.html", body))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Catalog {
    movies: Vec<MovieView>,
    pagination: Pagination,
    search: Option<String>,
}

#[instrument(skip(app, headers))]
async fn movies(
    State(app): State<App>, headers: HeaderMap, Query(query): Query<CatalogQuery>,
) -> Result<Response> {
    let index = category_index(&app).await?;
    let filter = MovieFilter {
        search: query.search.clone(),
        ..Default::default()
    };
    let pagination = Pagination::request(query.page, None, PAGE_SIZE);
    let (movies, total) = published(&app, filter, pagination.start(), pagination.limit).await?;

    let body = Catalog {
        movies: views(movies, &index),
        pagination: pagination.with_total(total),
        search: query.search.filter(|search| !search.trim().is_empty()),
    };
    Ok(render(&app, &headers, "movies.html", body))
}

#[derive(Debug, Serialize)]
struct Detail {
    movie: MovieView,
    comments: Vec<CommentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_ms: Option<u64>,
}

/// A published movie with its approved comments. The page carries the markup the view tracker
/// and the live counters attach to.
#[instrument(skip(app, headers))]
async fn movie(
    State(app): State<App>, headers: HeaderMap, Path(slug): Path<String>,
) -> Result<Response> {
    let Ok(slug) = slug.parse::<Slug>() else {
        return Ok(missing(&app, &headers));
    };
    let Some(movie) = Movie::published_by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
    else {
        return Ok(missing(&app, &headers));
    };

    let thread = CommentFilter {
        movie_uid: Some(movie.uid.clone()),
        approved: Some(true),
    };
    let comments = Comment::matching(&thread, &app.database)
        .await
        .context(DatabaseSnafu)?;
    let related = Related::load(&comments, &app).await?;
    let guest = MaybeUser(None);
    let comments = comments
        .into_iter()
        .map(|comment| related.view(comment, &guest))
        .collect();

    let index = category_index(&app).await?;
    let body = Detail {
        movie: MovieView::new(movie, &index),
        comments,
        cooldown_ms: app
            .view_cooldown
            .map(|window| u64::try_from(window.as_millis()).unwrap_or(u64::MAX)),
    };
    Ok(render(&app, &headers, "movie.html", body))
}

#[derive(Debug, Serialize)]
struct Categories {
    categories: Vec<CategoryView>,
    total_movies: usize,
    total_views: u64,
}

#[instrument(skip_all)]
async fn categories(State(app): State<App>, headers: HeaderMap) -> Result<Response> {
    let totals = Movie::totals(&MovieFilter::published(), &app.database)
        .await
        .context(DatabaseSnafu)?;

    let body = Categories {
        categories: category_views(&app).await?,
        total_movies: totals.movies,
        total_views: totals.views,
    };
    Ok(render(&app, &headers, "categories.html", body))
}

#[derive(Debug, Serialize)]
struct CategoryPage {
    category: CategoryView,
    movies: Vec<MovieView>,
}

#[instrument(skip(app, headers))]
async fn category(
    State(app): State<App>, headers: HeaderMap, Path(slug): Path<String>,
) -> Result<Response> {
    let Ok(slug) = slug.parse::<Slug>() else {
        return Ok(missing(&app, &headers));
    };
    let Some(category) = Category::by_slug(&slug, &app.database)
        .await
        .context(DatabaseSnafu)?
    else {
        return Ok(missing(&app, &headers));
    };

    let index = category_index(&app).await?;
    let filter = MovieFilter {
        category_uid: Some(category.uid.clone()),
        ..MovieFilter::published()
    };
    let movies = Movie::matching(&filter, &app.database)
        .await
        .context(DatabaseSnafu)?;
    let movies = views(movies, &index);

    let body = CategoryPage {
        category: CategoryView::new(category, movies.len()),
        movies,
    };
    Ok(render(&app, &headers, "category.html", body))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;

    use super::*;
    use crate::api::{create_router, testing};
    use crate::model::{Author, CategoryDetails, MovieDetails};

    async fn server() -> (TestServer, App) {
        let app = testing::app().await;
        let app = App {
            site_name: Some("Reel House".to_string()),
            ..app
        };
        let server = TestServer::new(create_router(app.clone())).unwrap();
        (server, app)
    }

    async fn movie(app: &App, title: &str, published: bool, categories: Vec<String>) -> Movie {
        let mut details = MovieDetails::new(
            title.to_string(),
            Slug::derive(title).unwrap(),
            "https://videos.example/v.mp4".to_string(),
        );
        details.is_published = published;
        details.featured = true;
        details.category_uids = categories;
        Movie::create(details, &app.database).await.unwrap()
    }

    #[test]
    fn all_templates_compile() {
        templates().unwrap();
    }

    #[test]
    fn thousands_filter_formats_counts() {
        let formatted = thousands(&Value::from(15_421u64), &HashMap::new()).unwrap();
        assert_eq!(formatted, Value::String("15,421".to_string()));
        assert!(thousands(&Value::from("many"), &HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn movie_page_carries_the_live_counter() {
        let (server, app) = server().await;
        let movie = movie(&app, "Quantum Paradox", true, Vec::new()).await;
        app.database
            .sql("UPDATE movie SET view_count = 15421 WHERE uid = $uid")
            .bind(("uid", &movie.uid))
            .run()
            .await
            .unwrap();

        Comment::create(
            &movie.uid,
            Author::Guest {
                name: "Lurker".to_string(),
                email: None,
            },
            "Pending moderation".to_string(),
            None,
            &app.database,
        )
        .await
        .unwrap();

        let response = server.get("/movies/quantum-paradox").await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("Reel House"));
        assert!(html.contains("15,421 views"));
        assert!(html.contains(r#"data-live-views="quantum-paradox""#));
        assert!(!html.contains("Pending moderation"));
    }

    #[tokio::test]
    async fn singular_movie_path_serves_the_same_page() {
        let (server, app) = server().await;
        movie(&app, "Quantum Paradox", true, Vec::new()).await;

        let response = server.get("/movie/quantum-paradox").await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains(r#"data-slug="quantum-paradox""#));
        assert!(!html.contains("data-cooldown-ms"));

        server.get("/movie/ghost-movie").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configured_cooldown_reaches_the_page_tracker() {
        let app = App {
            view_cooldown: Some(std::time::Duration::from_secs(30 * 60)),
            ..testing::app().await
        };
        let server = TestServer::new(create_router(app.clone())).unwrap();
        movie(&app, "Quantum Paradox", true, Vec::new()).await;

        let html = server.get("/movies/quantum-paradox").await.text();
        assert!(html.contains(r#"data-cooldown-ms="1800000""#));
        assert!(html.contains("lastView_"));
    }

    #[tokio::test]
    async fn hidden_and_unknown_pages_are_not_found() {
        let (server, app) = server().await;
        movie(&app, "Draft Cut", false, Vec::new()).await;

        for path in ["/movies/draft-cut", "/movies/ghost-movie", "/categories/nothing", "/nowhere"] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::NOT_FOUND);
            assert!(response.text().contains("Page not found"));
        }

        let response = server.get("/api/nowhere").await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&serde_json::json!({ "error": "Resource not found" }));
    }

    #[tokio::test]
    async fn listings_show_published_movies_only() {
        let (server, app) = server().await;
        let details = CategoryDetails::new("Drama".to_string(), "drama".parse().unwrap());
        let drama = Category::create(details, &app.database).await.unwrap();
        movie(&app, "Seen Cut", true, vec![drama.uid.clone()]).await;
        movie(&app, "Hidden Cut", false, vec![drama.uid.clone()]).await;

        for path in ["/", "/movies", "/categories/drama"] {
            let html = server.get(path).await.text();
            assert!(html.contains("Seen Cut"), "{path}");
            assert!(!html.contains("Hidden Cut"), "{path}");
        }

        let html = server.get("/movies").add_query_param("search", "hidden").await.text();
        assert!(!html.contains("Seen Cut"));

        let html = server.get("/categories").await.text();
        assert!(html.contains("Drama"));
        assert!(html.contains("1 movie"));
    }
}
