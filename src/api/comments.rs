use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;
use validator::Validate;

use crate::api::ip::forwarded_ip;
use crate::api::{
    App, AuthUser, DatabaseSnafu, Deleted, MaybeUser, NotFoundSnafu, Pagination, Result,
    ValidationSnafu,
};
use crate::model::{Author, Comment, CommentChanges, CommentFilter, Movie, Slug, User};
use crate::time::Timestamp;

const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: String,
    pub title: String,
    pub slug: Slug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub movie_id: String,
    pub text: String,
    pub author_name: Option<String>,
    /// Only shown to signed-in callers, like the IP address.
    pub author_email: Option<String>,
    pub ip_address: Option<String>,
    pub is_approved: bool,
    pub created_at: Timestamp,
    pub user: Option<UserSummary>,
    pub movie: Option<MovieSummary>,
}

/// Users and movies referenced by a batch of comments.
#[derive(Debug, Default)]
pub(crate) struct Related {
    users: HashMap<String, UserSummary>,
    movies: HashMap<String, MovieSummary>,
}

impl Related {
    pub(crate) async fn load(comments: &[Comment], app: &App) -> Result<Related> {
        let mut movie_uids: Vec<String> = comments.iter().map(|comment| comment.movie_uid.clone()).collect();
        movie_uids.sort_unstable();
        movie_uids.dedup();

        let mut user_uids: Vec<String> = comments
            .iter()
            .filter_map(|comment| comment.user_uid.clone())
            .collect();
        user_uids.sort_unstable();
        user_uids.dedup();

        let movies = Movie::by_uids(&movie_uids, &app.database)
            .await
            .context(DatabaseSnafu)?
            .into_iter()
            .map(|movie| {
                let summary = MovieSummary {
                    id: movie.uid.clone(),
                    title: movie.title,
                    slug: movie.slug,
                };
                (movie.uid, summary)
            })
            .collect();

        let users = User::by_uids(&user_uids, &app.database)
            .await
            .context(DatabaseSnafu)?
            .into_iter()
            .map(|user| {
                let summary = UserSummary {
                    id: user.uid.clone(),
                    name: user.name,
                };
                (user.uid, summary)
            })
            .collect();

        Ok(Related { users, movies })
    }

    pub(crate) fn view(&self, comment: Comment, caller: &MaybeUser) -> CommentView {
        let private = !caller.is_anonymous();
        let user = comment
            .user_uid
            .as_deref()
            .and_then(|uid| self.users.get(uid))
            .cloned();

        CommentView {
            id: comment.uid,
            movie: self.movies.get(&comment.movie_uid).cloned(),
            movie_id: comment.movie_uid,
            text: comment.text,
            author_name: comment
                .author_name
                .or_else(|| user.as_ref().map(|user| user.name.clone())),
            author_email: comment.author_email.filter(|_| private),
            ip_address: comment.ip_address.filter(|_| private),
            is_approved: comment.is_approved,
            created_at: comment.created_at,
            user,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentQuery {
    pub movie_id: Option<String>,
    pub approved: Option<bool>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentList {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

/// Comments newest first. Anonymous callers only see approved comments.
#[instrument(skip(app))]
pub async fn list(
    State(app): State<App>, caller: MaybeUser, Query(query): Query<CommentQuery>,
) -> Result<Json<CommentList>> {
    let approved = if caller.is_anonymous() {
        Some(true)
    } else {
        query.approved
    };

    let filter = CommentFilter {
        movie_uid: query.movie_id,
        approved,
    };
    let pagination = Pagination::request(query.page, query.limit, DEFAULT_LIMIT);
    let (comments, total) = Comment::page(&filter, pagination.start(), pagination.limit, &app.database)
        .await
        .context(DatabaseSnafu)?;

    let related = Related::load(&comments, &app).await?;
    let comments = comments
        .into_iter()
        .map(|comment| related.view(comment, &caller))
        .collect();

    Ok(Json(CommentList {
        comments,
        pagination: pagination.with_total(total),
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(default)]
    #[validate(length(min = 1, message = "movie id is required"))]
    pub movie_id: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 2000, message = "comment text is required"))]
    pub text: String,
    #[validate(length(max = 100))]
    pub author_name: Option<String>,
    #[validate(email)]
    pub author_email: Option<String>,
    pub ip_address: Option<String>,
}

/// Post a comment. The author is whoever holds the session; signed-in authors are published
/// right away while guest comments wait for moderation.
#[instrument(skip(app, headers))]
pub async fn create(
    State(app): State<App>, caller: MaybeUser, headers: HeaderMap,
    Json(payload): Json<NewComment>,
) -> Result<(StatusCode, Json<CommentView>)> {
    payload.validate()?;

    let author = match &caller.0 {
        Some(user) => Author::User {
            uid: user.uid.clone(),
        },
        None => {
            let name = payload
                .author_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .context(ValidationSnafu {
                    message: "Author name is required for guest comments",
                })?;

            Author::Guest {
                name: name.to_string(),
                email: payload.author_email.clone(),
            }
        }
    };

    Movie::by_uid(&payload.movie_id, &app.database)
        .await
        .context(DatabaseSnafu)?
        .filter(|movie| movie.is_published || !caller.is_anonymous())
        .context(NotFoundSnafu { what: "Movie" })?;

    let ip_address = forwarded_ip(&headers).or(payload.ip_address);
    let comment = Comment::create(&payload.movie_id, author, payload.text, ip_address, &app.database)
        .await
        .context(DatabaseSnafu)?;
    tracing::info!(comment = %comment.uid, approved = comment.is_approved, "new comment on `{}`", comment.movie_uid);

    let related = Related::load(std::slice::from_ref(&comment), &app).await?;
    Ok((StatusCode::CREATED, Json(related.view(comment, &caller))))
}

async fn find(id: &str, app: &App) -> Result<Comment> {
    Comment::by_uid(id, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Comment" })
}

#[instrument(skip(app))]
pub async fn show(
    State(app): State<App>, caller: MaybeUser, Path(id): Path<String>,
) -> Result<Json<CommentView>> {
    let comment = Some(find(&id, &app).await?)
        .filter(|comment| comment.is_approved || !caller.is_anonymous())
        .context(NotFoundSnafu { what: "Comment" })?;

    let related = Related::load(std::slice::from_ref(&comment), &app).await?;
    Ok(Json(related.view(comment, &caller)))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommentUpdate {
    pub is_approved: Option<bool>,
    #[validate(length(min = 1, max = 2000))]
    pub text: Option<String>,
}

/// Moderate a comment.
#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn update(
    State(app): State<App>, AuthUser(user): AuthUser, Path(id): Path<String>,
    Json(payload): Json<CommentUpdate>,
) -> Result<Json<CommentView>> {
    payload.validate()?;
    let comment = find(&id, &app).await?;

    let changes = CommentChanges {
        text: payload.text,
        is_approved: payload.is_approved,
    };
    let comment = Comment::update(&comment.uid, &changes, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(NotFoundSnafu { what: "Comment" })?;

    let related = Related::load(std::slice::from_ref(&comment), &app).await?;
    Ok(Json(related.view(comment, &MaybeUser(Some(user)))))
}

#[instrument(skip(app, user), fields(user = %user.uid))]
pub async fn remove(
    State(app): State<App>, AuthUser(user): AuthUser, Path(id): Path<String>,
) -> Result<Json<Deleted>> {
    let comment = find(&id, &app).await?;
    Comment::delete(&comment.uid, &app.database)
        .await
        .context(DatabaseSnafu)?;

    Ok(Deleted::ok())
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::api::movies::MovieView;
    use crate::api::testing;

    async fn published_movie(server: &axum_test::TestServer, cookie: &axum_extra::extract::cookie::Cookie<'static>) -> MovieView {
        server
            .post("/api/movies")
            .add_cookie(cookie.clone())
            .json(&json!({
                "title": "Quantum Paradox",
                "videoUrl": "https://videos.example/qp.mp4",
                "isPublished": true,
            }))
            .await
            .json()
    }

    #[tokio::test]
    async fn guest_comments_wait_for_approval() {
        let (server, app) = testing::server().await;
        let cookie = testing::sign_in(&server, &app).await;
        let movie = published_movie(&server, &cookie).await;

        let response = server
            .post("/api/comments")
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("203.0.113.7"),
            )
            .json(&json!({
                "movieId": movie.id,
                "text": "Loved the ending",
                "authorName": "Guest",
                "authorEmail": "guest@example.com",
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let comment: CommentView = response.json();
        assert!(!comment.is_approved);
        assert_eq!(comment.ip_address, None);

        let public: CommentList = server.get("/api/comments").await.json();
        assert!(public.comments.is_empty());

        let pending: CommentList = server
            .get("/api/comments")
            .add_cookie(cookie.clone())
            .add_query_param("approved", "false")
            .await
            .json();
        assert_eq!(pending.comments.len(), 1);
        assert_eq!(pending.comments[0].ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(pending.comments[0].movie.as_ref().map(|m| m.slug.as_str()), Some("quantum-paradox"));

        server
            .put(&format!("/api/comments/{}", comment.id))
            .add_cookie(cookie)
            .json(&json!({ "isApproved": true }))
            .await
            .assert_status_ok();

        let public: CommentList = server
            .get("/api/comments")
            .add_query_param("movieId", &movie.id)
            .await
            .json();
        assert_eq!(public.comments.len(), 1);
        assert_eq!(public.comments[0].author_email, None);
        assert_eq!(public.pagination.total, 1);
    }

    #[tokio::test]
    async fn lists_page_through_a_thread() {
        let (server, app) = testing::server().await;
        let cookie = testing::sign_in(&server, &app).await;
        let movie = published_movie(&server, &cookie).await;
        for n in 0..3 {
            server
                .post("/api/comments")
                .add_cookie(cookie.clone())
                .json(&json!({ "movieId": movie.id, "text": format!("Comment {n}") }))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let page: CommentList = server
            .get("/api/comments")
            .add_query_param("movieId", &movie.id)
            .add_query_param("limit", "2")
            .add_query_param("page", "2")
            .await
            .json();
        assert_eq!(page.comments.len(), 1);
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.pages, 2);
        assert_eq!(page.comments[0].user.as_ref().map(|user| user.name.as_str()), Some("Admin"));
        assert_eq!(page.comments[0].movie.as_ref().map(|movie| movie.title.as_str()), Some("Quantum Paradox"));
    }

    #[tokio::test]
    async fn signed_in_comments_are_approved_and_attributed() {
        let (server, app) = testing::server().await;
        let cookie = testing::sign_in(&server, &app).await;
        let movie = published_movie(&server, &cookie).await;

        let comment: CommentView = server
            .post("/api/comments")
            .add_cookie(cookie)
            .json(&json!({ "movieId": movie.id, "text": "Staff pick", "authorName": "Someone Else" }))
            .await
            .json();

        assert!(comment.is_approved);
        assert_eq!(comment.user.map(|user| user.name).as_deref(), Some("Admin"));
    }

    #[tokio::test]
    async fn guests_must_name_themselves_and_comment_on_real_movies() {
        let (server, app) = testing::server().await;
        let cookie = testing::sign_in(&server, &app).await;
        let movie = published_movie(&server, &cookie).await;

        server
            .post("/api/comments")
            .json(&json!({ "movieId": movie.id, "text": "Who am I" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/api/comments")
            .json(&json!({ "movieId": "missing", "text": "Hello", "authorName": "Guest" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unapproved_comments_are_hidden_from_anonymous_callers() {
        let (server, app) = testing::server().await;
        let cookie = testing::sign_in(&server, &app).await;
        let movie = published_movie(&server, &cookie).await;

        let comment: CommentView = server
            .post("/api/comments")
            .json(&json!({ "movieId": movie.id, "text": "Spam", "authorName": "Bot" }))
            .await
            .json();
        let path = format!("/api/comments/{}", comment.id);

        server.get(&path).await.assert_status(StatusCode::NOT_FOUND);
        server.get(&path).add_cookie(cookie.clone()).await.assert_status_ok();

        server.delete(&path).add_cookie(cookie.clone()).await.assert_status_ok();
        server.get(&path).add_cookie(cookie).await.assert_status(StatusCode::NOT_FOUND);
    }
}
