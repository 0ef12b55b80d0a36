use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;
use validator::Validate;

use crate::api::{App, DatabaseSnafu, InvalidCredentialsSnafu, Result, UnauthorizedSnafu};
use crate::model::{Session, User};
use crate::time::Timestamp;

pub const SESSION_COOKIE: &str = "session";

/// Resolve the caller behind the session cookie and stash it in the request extensions.
pub async fn resolve_caller(
    State(app): State<App>, jar: CookieJar, mut req: Request, next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match Session::caller(cookie.value(), &app.database).await {
            Ok(Some(user)) => {
                req.extensions_mut().insert(user);
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "could not resolve the session cookie"),
        }
    }

    next.run(req).await
}

/// A signed-in caller, rejecting the request with 401 otherwise.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = crate::api::ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(AuthUser)
            .context(UnauthorizedSnafu)
    }
}

/// The caller if signed in.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<User>().cloned()))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: Timestamp,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.uid,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct Credentials {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[instrument(skip(app, jar))]
pub async fn login(
    State(app): State<App>, jar: CookieJar, Json(credentials): Json<Credentials>,
) -> Result<(CookieJar, Json<UserView>)> {
    credentials.validate()?;

    let user = User::verify(&credentials.email, &credentials.password, &app.database)
        .await
        .context(DatabaseSnafu)?
        .context(InvalidCredentialsSnafu)?;

    let session = Session::open(&user, app.session_ttl, &app.database)
        .await
        .context(DatabaseSnafu)?;

    let max_age = time::Duration::try_from(app.session_ttl).unwrap_or(time::Duration::days(7));
    let cookie = Cookie::build((SESSION_COOKIE, session.token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age);

    tracing::info!(user = %user.uid, "signed in");
    Ok((jar.add(cookie), Json(user.into())))
}

#[instrument(skip_all)]
pub async fn logout(State(app): State<App>, jar: CookieJar) -> Result<CookieJar> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        Session::close(cookie.value(), &app.database)
            .await
            .context(DatabaseSnafu)?;
    }

    Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
}

pub async fn session(AuthUser(user): AuthUser) -> Json<UserView> {
    Json(user.into())
}
