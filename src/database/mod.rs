use serde::Deserialize;
use snafu::{Location, ResultExt as _, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth;
use surrealdb::opt::{IntoQuery, QueryResult};
use surrealdb::Surreal;

/// Macros for defining SurrealQL-backed model methods.
pub mod macros;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

const SCHEMA: &str = include_str!("../../schema.surrealql");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DatabaseError {
    #[snafu(display("failed to query the database at {location}: {source}"))]
    DatabaseQuery {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to deserialize the database response at {location}: {source}"))]
    DatabaseDeserialize {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to parse the database response at {location}: response is empty"))]
    EmptyQuery {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot connect to the database `{url}` at {location}: {source}"))]
    DatabaseConnection {
        url: String,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl DatabaseError {
    /// Whether a unique index rejected the write.
    pub fn is_unique_violation(&self) -> bool {
        let source = match self {
            DatabaseError::DatabaseQuery { source, .. }
            | DatabaseError::DatabaseDeserialize { source, .. } => source,
            _ => return false,
        };

        // Remote engines only hand back the message.
        matches!(source, surrealdb::Error::Db(surrealdb::error::Db::IndexExists { .. }))
            || source.to_string().contains("already contains")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "surreal_url", default = "DatabaseConfig::default_url")]
    pub url: String,
    #[serde(rename = "surreal_ns", default = "DatabaseConfig::default_name")]
    pub namespace: String,
    #[serde(rename = "surreal_db", default = "DatabaseConfig::default_name")]
    pub database: String,
    #[serde(flatten)]
    pub credentials: Option<DatabaseCredentials>,
}

impl DatabaseConfig {
    fn default_url() -> String {
        "mem://".to_string()
    }

    fn default_name() -> String {
        "reelhouse".to_string()
    }

    /// An in-memory datastore, used by tests and throwaway local runs.
    pub fn memory() -> Self {
        Self {
            url: Self::default_url(),
            namespace: Self::default_name(),
            database: Self::default_name(),
            credentials: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseCredentials {
    #[serde(rename = "surreal_username")]
    username: String,
    #[serde(rename = "surreal_password")]
    password: String,
}

impl DatabaseCredentials {
    fn auth(&self) -> auth::Root<'_> {
        auth::Root {
            username: &self.username,
            password: &self.password,
        }
    }
}

/// A thin wrapper around the SurrealDB client with the schema already applied.
#[derive(Debug, Clone)]
pub struct Database {
    database: Surreal<Any>,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = &config.url;
        let database = surrealdb::engine::any::connect(url.as_str())
            .await
            .context(DatabaseConnectionSnafu { url })?;

        if let Some(credentials) = &config.credentials {
            database
                .signin(credentials.auth())
                .await
                .context(DatabaseConnectionSnafu { url })?;
        }

        database
            .use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .context(DatabaseConnectionSnafu { url })?;

        let database = Database { database };
        database.sql(SCHEMA).run().await?;
        tracing::info!(%url, namespace = %config.namespace, database = %config.database, "connected to the database");

        Ok(database)
    }

    pub async fn memory() -> Result<Self> {
        Self::connect(&DatabaseConfig::memory()).await
    }

    /// Create a builder to execute arbitrary SurrealQL on the database.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let movies: Vec<Movie> = db.sql("SELECT * FROM movie WHERE featured = $featured")
    ///     .bind(("featured", true))
    ///     .fetch()
    ///     .await?;
    /// ```
    ///
    /// The `fetch` method deserializes the first statement into either a single value (`Option<T>`)
    /// or a collection of values (`Vec<T>`).
    pub fn sql(&self, query: impl IntoQuery) -> Query<'_> {
        let query = self.database.query(query);
        Query { query }
    }
}

#[derive(Debug)]
pub struct Query<'a> {
    query: surrealdb::method::Query<'a, Any>,
}

impl Query<'_> {
    pub fn bind(mut self, params: impl serde::Serialize) -> Self {
        let query = self.query;
        self.query = query.bind(params);
        self
    }

    pub async fn fetch<T: serde::de::DeserializeOwned>(self) -> Result<T>
    where
        usize: QueryResult<T>,
    {
        let mut statements = self.query.await.context(DatabaseQuerySnafu)?;
        let result = statements.take::<T>(0).context(DatabaseDeserializeSnafu)?;
        Ok(result)
    }

    /// Deserialize a page of rows from the first statement and the `total` field of a
    /// `SELECT count() AS total ... GROUP ALL` second statement. An empty count means zero.
    pub async fn fetch_page<T: serde::de::DeserializeOwned>(self) -> Result<(Vec<T>, usize)> {
        let mut statements = self.query.await.context(DatabaseQuerySnafu)?;
        let rows = statements.take::<Vec<T>>(0).context(DatabaseDeserializeSnafu)?;
        let total = statements
            .take::<Option<usize>>((1, "total"))
            .context(DatabaseDeserializeSnafu)?;
        Ok((rows, total.unwrap_or(0)))
    }

    /// Read the `total` field of a `SELECT count() AS total ... GROUP ALL` statement.
    pub async fn fetch_total(self) -> Result<usize> {
        let mut statements = self.query.await.context(DatabaseQuerySnafu)?;
        let total = statements
            .take::<Option<usize>>((0, "total"))
            .context(DatabaseDeserializeSnafu)?;
        Ok(total.unwrap_or(0))
    }

    /// Execute every statement and fail on the first statement error, discarding the results.
    pub async fn run(self) -> Result<()> {
        self.query
            .await
            .context(DatabaseQuerySnafu)?
            .check()
            .context(DatabaseQuerySnafu)?;
        Ok(())
    }
}

/// Generate a fresh record uid. Records are addressed by this field, never by SurrealDB's own ids.
pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
