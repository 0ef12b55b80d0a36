use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;

use crate::database::{new_key, Database, EmptyQuerySnafu, Query, Result};
use crate::define_relation;
use crate::time::{now, Timestamp};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Comment {
    pub uid: String,
    pub movie_uid: String,
    pub user_uid: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub text: String,
    pub ip_address: Option<String>,
    pub is_approved: bool,
    pub created_at: Timestamp,
}

/// Who wrote a comment. Comments from signed-in users are published immediately, guest comments
/// wait for a moderator.
#[derive(Debug, Clone, PartialEq)]
pub enum Author {
    User { uid: String },
    Guest { name: String, email: Option<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommentChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentFilter {
    pub movie_uid: Option<String>,
    pub approved: Option<bool>,
}

impl CommentFilter {
    fn condition(&self) -> String {
        let mut conditions = Vec::new();
        if self.movie_uid.is_some() {
            conditions.push("movie_uid = $movie");
        }
        if self.approved.is_some() {
            conditions.push("is_approved = $approved");
        }

        match conditions.is_empty() {
            true => "true".to_string(),
            false => conditions.join(" AND "),
        }
    }

    fn bind<'a>(&self, mut query: Query<'a>) -> Query<'a> {
        if let Some(movie) = &self.movie_uid {
            query = query.bind(("movie", movie));
        }
        if let Some(approved) = self.approved {
            query = query.bind(("approved", approved));
        }
        query
    }
}

define_relation! {
    Comment > by_uid(uid: &str) > Option<Comment>
        where "SELECT * FROM movie_comment WHERE uid = $uid LIMIT 1"
}

define_relation! {
    Comment > update(uid: &str, changes: &CommentChanges) > Option<Comment>
        where "UPDATE movie_comment MERGE $changes WHERE uid = $uid RETURN AFTER"
}

impl Comment {
    /// One page of matching comments, newest first, with the number of matches.
    #[tracing::instrument(skip(db))]
    pub async fn page(
        filter: &CommentFilter, start: usize, limit: usize, db: &Database,
    ) -> Result<(Vec<Comment>, usize)> {
        let condition = filter.condition();
        let query = format!(
            "SELECT * FROM movie_comment WHERE {condition} ORDER BY created_at DESC LIMIT $limit START $start; \
             SELECT count() AS total FROM movie_comment WHERE {condition} GROUP ALL;"
        );

        filter
            .bind(db.sql(query))
            .bind(("limit", limit))
            .bind(("start", start))
            .fetch_page()
            .await
    }

    #[tracing::instrument(skip(db))]
    pub async fn matching(filter: &CommentFilter, db: &Database) -> Result<Vec<Comment>> {
        let query = format!(
            "SELECT * FROM movie_comment WHERE {} ORDER BY created_at DESC",
            filter.condition()
        );
        filter.bind(db.sql(query)).fetch().await
    }

    #[tracing::instrument(skip(db))]
    pub async fn create(
        movie_uid: &str,
        author: Author,
        text: String,
        ip_address: Option<String>,
        db: &Database,
    ) -> Result<Comment> {
        let (user_uid, author_name, author_email, is_approved) = match author {
            Author::User { uid } => (Some(uid), None, None, true),
            Author::Guest { name, email } => (None, Some(name), email, false),
        };

        let comment = Comment {
            uid: new_key(),
            movie_uid: movie_uid.to_string(),
            user_uid,
            author_name,
            author_email,
            text,
            ip_address,
            is_approved,
            created_at: now(),
        };

        let created: Option<Comment> = db
            .sql("CREATE movie_comment CONTENT $comment RETURN AFTER")
            .bind(("comment", &comment))
            .fetch()
            .await?;

        created.context(EmptyQuerySnafu)
    }

    #[tracing::instrument(skip(db))]
    pub async fn delete(uid: &str, db: &Database) -> Result<()> {
        db.sql("DELETE movie_comment WHERE uid = $uid")
            .bind(("uid", uid))
            .run()
            .await
    }
}
