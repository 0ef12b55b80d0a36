use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;
use tracing::instrument;

use crate::database::{new_key, Database, EmptyQuerySnafu, Result};
use crate::define_relation;
use crate::time::{now, Timestamp};

/// A back-office account. The password hash lives next to it in the datastore and is never read
/// back into this type.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub created_at: Timestamp,
}

define_relation! {
    User > by_uid(uid: &str) > Option<User>
        where "SELECT uid, name, email, created_at FROM account WHERE uid = $uid LIMIT 1"
}

define_relation! {
    User > by_email(email: &str) > Option<User>
        where "SELECT uid, name, email, created_at FROM account WHERE email = $email LIMIT 1"
}

impl User {
    /// Accounts with the given uids. Unknown uids are skipped.
    #[instrument(skip(db))]
    pub async fn by_uids(uids: &[String], db: &Database) -> Result<Vec<User>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        db.sql("SELECT uid, name, email, created_at FROM account WHERE uid IN $uids")
            .bind(("uids", uids))
            .fetch()
            .await
    }

    #[instrument(skip(db, password))]
    pub async fn register(name: &str, email: &str, password: &str, db: &Database) -> Result<User> {
        let user: Option<User> = db
            .sql("CREATE account SET uid = $uid, name = $name, email = $email, password = crypto::argon2::generate($password), created_at = $created_at RETURN AFTER")
            .bind(("uid", new_key()))
            .bind(("name", name))
            .bind(("email", email))
            .bind(("password", password))
            .bind(("created_at", now()))
            .fetch()
            .await?;

        user.context(EmptyQuerySnafu)
    }

    /// Look up the account matching both the e-mail and the password.
    #[instrument(skip(db, password))]
    pub async fn verify(email: &str, password: &str, db: &Database) -> Result<Option<User>> {
        db.sql("SELECT uid, name, email, created_at FROM account WHERE email = $email AND crypto::argon2::compare(password, $password) LIMIT 1")
            .bind(("email", email))
            .bind(("password", password))
            .fetch()
            .await
    }
}

/// A signed-in browser session, addressed by the opaque token stored in the session cookie.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Session {
    pub token: String,
    pub user_uid: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Session {
    #[instrument(skip_all)]
    pub async fn find(token: &str, db: &Database) -> Result<Option<Session>> {
        db.sql("SELECT * FROM login_session WHERE token = $session_token LIMIT 1")
            .bind(("session_token", token))
            .fetch()
            .await
    }

    #[instrument(skip(db))]
    pub async fn open(user: &User, ttl: std::time::Duration, db: &Database) -> Result<Session> {
        let created_at = now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(7));
        let session = Session {
            token: format!("{}{}", new_key(), new_key()),
            user_uid: user.uid.clone(),
            created_at,
            expires_at: (*created_at + ttl).into(),
        };

        let created: Option<Session> = db
            .sql("CREATE login_session CONTENT $login RETURN AFTER")
            .bind(("login", &session))
            .fetch()
            .await?;

        created.context(EmptyQuerySnafu)
    }

    #[instrument(skip_all)]
    pub async fn close(token: &str, db: &Database) -> Result<()> {
        db.sql("DELETE login_session WHERE token = $session_token")
            .bind(("session_token", token))
            .run()
            .await
    }

    pub fn is_expired(&self, at: Timestamp) -> bool {
        self.expires_at <= at
    }

    /// Resolve the user behind a session token, ignoring expired sessions.
    #[instrument(skip_all)]
    pub async fn caller(token: &str, db: &Database) -> Result<Option<User>> {
        let Some(session) = Session::find(token, db).await? else {
            return Ok(None);
        };

        if session.is_expired(now()) {
            return Ok(None);
        }

        User::by_uid(&session.user_uid, db).await
    }
}
