use derive_new::new;
use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;

use crate::database::{new_key, Database, EmptyQuerySnafu, Query, Result};
use crate::define_relation;
use crate::model::Slug;
use crate::time::{now, Timestamp};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Movie {
    pub uid: String,
    pub title: String,
    pub slug: Slug,
    pub synopsis: Option<String>,
    pub release_year: Option<i32>,
    /// Running time in minutes.
    pub duration: Option<u32>,
    pub language: Option<String>,
    pub poster_url: Option<String>,
    pub video_url: String,
    pub is_published: bool,
    pub featured: bool,
    #[serde(default)]
    pub category_uids: Vec<String>,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// The fields of a movie an editor may write. The view counter is deliberately absent: it only
/// ever changes through [Movie::increment_views].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct MovieDetails {
    pub title: String,
    pub slug: Slug,
    pub video_url: String,
    #[new(default)]
    pub synopsis: Option<String>,
    #[new(default)]
    pub release_year: Option<i32>,
    #[new(default)]
    pub duration: Option<u32>,
    #[new(default)]
    pub language: Option<String>,
    #[new(default)]
    pub poster_url: Option<String>,
    #[new(default)]
    pub is_published: bool,
    #[new(default)]
    pub featured: bool,
    #[new(default)]
    pub category_uids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MovieEdit<'a> {
    #[serde(flatten)]
    details: &'a MovieDetails,
    updated_at: Timestamp,
}

define_relation! {
    Movie > by_slug(slug: &Slug) > Option<Movie>
        where "SELECT * FROM movie WHERE slug = $slug LIMIT 1"
}

define_relation! {
    Movie > published_by_slug(slug: &Slug) > Option<Movie>
        where "SELECT * FROM movie WHERE slug = $slug AND is_published = true LIMIT 1"
}

define_relation! {
    Movie > by_uid(uid: &str) > Option<Movie>
        where "SELECT * FROM movie WHERE uid = $uid LIMIT 1"
}

impl Movie {
    pub fn details(&self) -> MovieDetails {
        MovieDetails {
            title: self.title.clone(),
            slug: self.slug.clone(),
            video_url: self.video_url.clone(),
            synopsis: self.synopsis.clone(),
            release_year: self.release_year,
            duration: self.duration,
            language: self.language.clone(),
            poster_url: self.poster_url.clone(),
            is_published: self.is_published,
            featured: self.featured,
            category_uids: self.category_uids.clone(),
        }
    }

    #[tracing::instrument(skip(db))]
    pub async fn create(details: MovieDetails, db: &Database) -> Result<Movie> {
        let created_at = now();
        let movie = Movie {
            uid: new_key(),
            title: details.title,
            slug: details.slug,
            synopsis: details.synopsis,
            release_year: details.release_year,
            duration: details.duration,
            language: details.language,
            poster_url: details.poster_url,
            video_url: details.video_url,
            is_published: details.is_published,
            featured: details.featured,
            category_uids: details.category_uids,
            view_count: 0,
            created_at,
            updated_at: created_at,
        };

        let created: Option<Movie> = db
            .sql("CREATE movie CONTENT $movie RETURN AFTER")
            .bind(("movie", &movie))
            .fetch()
            .await?;

        created.context(EmptyQuerySnafu)
    }

    /// Overwrite the editable fields of the movie, leaving its view counter untouched.
    #[tracing::instrument(skip(db))]
    pub async fn update(uid: &str, details: &MovieDetails, db: &Database) -> Result<Option<Movie>> {
        let edit = MovieEdit {
            details,
            updated_at: now(),
        };

        db.sql("UPDATE movie MERGE $edit WHERE uid = $uid RETURN AFTER")
            .bind(("edit", edit))
            .bind(("uid", uid))
            .fetch()
            .await
    }

    /// Delete the movie together with its comment thread.
    #[tracing::instrument(skip(db))]
    pub async fn delete(uid: &str, db: &Database) -> Result<()> {
        db.sql("DELETE movie WHERE uid = $uid; DELETE movie_comment WHERE movie_uid = $uid;")
            .bind(("uid", uid))
            .run()
            .await
    }

    /// Add one view to a published movie as a single datastore-side read-modify-write, returning
    /// the movie after the increment. Unknown and unpublished slugs yield `None` without mutating
    /// anything.
    #[tracing::instrument(skip(db))]
    pub async fn increment_views(slug: &Slug, db: &Database) -> Result<Option<Movie>> {
        db.sql(
            "UPDATE movie SET view_count += 1 WHERE slug = $slug AND is_published = true RETURN AFTER",
        )
        .bind(("slug", slug))
        .fetch()
        .await
    }
}

/// Catalog filter, evaluated by the datastore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieFilter {
    /// Case-insensitive substring of the title or synopsis.
    pub search: Option<String>,
    pub category_uid: Option<String>,
    pub published: Option<bool>,
    pub featured: Option<bool>,
}

impl MovieFilter {
    pub fn published() -> Self {
        MovieFilter {
            published: Some(true),
            ..Default::default()
        }
    }

    fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty())
            .map(str::to_lowercase)
    }

    /// The `WHERE` condition. It only references the parameters `bind` sets.
    fn condition(&self) -> String {
        let mut conditions = Vec::new();
        if self.published.is_some() {
            conditions.push("is_published = $published");
        }
        if self.featured.is_some() {
            conditions.push("featured = $featured");
        }
        if self.category_uid.is_some() {
            conditions.push("category_uids CONTAINS $category");
        }
        if self.needle().is_some() {
            conditions.push(
                "(string::lowercase(title) CONTAINS $search OR string::lowercase(synopsis ?? '') CONTAINS $search)",
            );
        }

        match conditions.is_empty() {
            true => "true".to_string(),
            false => conditions.join(" AND "),
        }
    }

    fn bind<'a>(&self, mut query: Query<'a>) -> Query<'a> {
        if let Some(published) = self.published {
            query = query.bind(("published", published));
        }
        if let Some(featured) = self.featured {
            query = query.bind(("featured", featured));
        }
        if let Some(category) = &self.category_uid {
            query = query.bind(("category", category));
        }
        if let Some(search) = self.needle() {
            query = query.bind(("search", search));
        }
        query
    }
}

/// Movie and view sums over the movies matching a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ViewTotals {
    pub movies: usize,
    pub views: u64,
}

impl Movie {
    /// One page of matching movies, newest first, with the number of matches.
    #[tracing::instrument(skip(db))]
    pub async fn page(
        filter: &MovieFilter, start: usize, limit: usize, db: &Database,
    ) -> Result<(Vec<Movie>, usize)> {
        let condition = filter.condition();
        let query = format!(
            "SELECT * FROM movie WHERE {condition} ORDER BY created_at DESC LIMIT $limit START $start; \
             SELECT count() AS total FROM movie WHERE {condition} GROUP ALL;"
        );

        filter
            .bind(db.sql(query))
            .bind(("limit", limit))
            .bind(("start", start))
            .fetch_page()
            .await
    }

    /// Every matching movie, newest first.
    #[tracing::instrument(skip(db))]
    pub async fn matching(filter: &MovieFilter, db: &Database) -> Result<Vec<Movie>> {
        let query = format!(
            "SELECT * FROM movie WHERE {} ORDER BY created_at DESC",
            filter.condition()
        );
        filter.bind(db.sql(query)).fetch().await
    }

    #[tracing::instrument(skip(db))]
    pub async fn count(filter: &MovieFilter, db: &Database) -> Result<usize> {
        let query = format!(
            "SELECT count() AS total FROM movie WHERE {} GROUP ALL",
            filter.condition()
        );
        filter.bind(db.sql(query)).fetch_total().await
    }

    #[tracing::instrument(skip(db))]
    pub async fn totals(filter: &MovieFilter, db: &Database) -> Result<ViewTotals> {
        let query = format!(
            "SELECT count() AS movies, math::sum(view_count) AS views FROM movie WHERE {} GROUP ALL",
            filter.condition()
        );
        let totals: Option<ViewTotals> = filter.bind(db.sql(query)).fetch().await?;
        Ok(totals.unwrap_or_default())
    }

    /// Movies with the given uids, in no particular order. Unknown uids are skipped.
    #[tracing::instrument(skip(db))]
    pub async fn by_uids(uids: &[String], db: &Database) -> Result<Vec<Movie>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        db.sql("SELECT * FROM movie WHERE uid IN $uids")
            .bind(("uids", uids))
            .fetch()
            .await
    }
}

define_relation! {
    Movie > most_viewed(limit: usize) > Vec<Movie>
        where "SELECT * FROM movie ORDER BY view_count DESC LIMIT $limit"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(title: &str, published: bool) -> MovieDetails {
        let mut details = MovieDetails::new(
            title.to_string(),
            Slug::derive(title).unwrap(),
            "https://videos.example/stream.mp4".to_string(),
        );
        details.is_published = published;
        details
    }

    #[tokio::test]
    async fn created_movies_start_with_zero_views() {
        let db = Database::memory().await.unwrap();
        let movie = Movie::create(details("Quantum Paradox", true), &db).await.unwrap();

        assert_eq!(movie.view_count, 0);
        assert_eq!(movie.slug.as_str(), "quantum-paradox");

        let found = Movie::by_slug(&movie.slug, &db).await.unwrap().unwrap();
        assert_eq!(found, movie);
    }

    #[tokio::test]
    async fn increments_are_monotonic() {
        let db = Database::memory().await.unwrap();
        let movie = Movie::create(details("Quantum Paradox", true), &db).await.unwrap();

        let mut last = movie.view_count;
        for _ in 0..5 {
            let updated = Movie::increment_views(&movie.slug, &db).await.unwrap().unwrap();
            assert_eq!(updated.view_count, last + 1);
            last = updated.view_count;
        }
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let db = Database::memory().await.unwrap();
        let movie = Movie::create(details("Quantum Paradox", true), &db).await.unwrap();

        let calls = (0..25).map(|_| {
            let db = db.clone();
            let slug = movie.slug.clone();
            tokio::spawn(async move { Movie::increment_views(&slug, &db).await })
        });

        for call in calls.collect::<Vec<_>>() {
            call.await.unwrap().unwrap().unwrap();
        }

        let after = Movie::by_slug(&movie.slug, &db).await.unwrap().unwrap();
        assert_eq!(after.view_count, 25);
    }

    #[tokio::test]
    async fn unpublished_and_unknown_movies_are_not_incremented() {
        let db = Database::memory().await.unwrap();
        let draft = Movie::create(details("Draft Cut", false), &db).await.unwrap();

        assert!(Movie::increment_views(&draft.slug, &db).await.unwrap().is_none());
        let ghost: Slug = "ghost-movie".parse().unwrap();
        assert!(Movie::increment_views(&ghost, &db).await.unwrap().is_none());

        let draft = Movie::by_slug(&draft.slug, &db).await.unwrap().unwrap();
        assert_eq!(draft.view_count, 0);
    }

    #[tokio::test]
    async fn updates_keep_the_view_counter() {
        let db = Database::memory().await.unwrap();
        let movie = Movie::create(details("Quantum Paradox", true), &db).await.unwrap();
        Movie::increment_views(&movie.slug, &db).await.unwrap();

        let mut edited = movie.details();
        edited.title = "Quantum Paradox (Director's Cut)".to_string();
        let updated = Movie::update(&movie.uid, &edited, &db).await.unwrap().unwrap();

        assert_eq!(updated.title, "Quantum Paradox (Director's Cut)");
        assert_eq!(updated.view_count, 1);
        assert_eq!(updated.created_at, movie.created_at);
    }

    #[tokio::test]
    async fn filters_run_in_the_datastore() {
        let db = Database::memory().await.unwrap();
        let mut quantum = details("Quantum Paradox", true);
        quantum.synopsis = Some("A physicist loops through time.".to_string());
        quantum.category_uids = vec!["scifi".to_string()];
        Movie::create(quantum, &db).await.unwrap();
        let mut western = details("Dust Trail", true);
        western.featured = true;
        Movie::create(western, &db).await.unwrap();
        Movie::create(details("Draft Cut", false), &db).await.unwrap();

        let search = |text: &str| MovieFilter {
            search: Some(text.to_string()),
            ..Default::default()
        };
        let titles = |movies: Vec<Movie>| movies.into_iter().map(|movie| movie.title).collect::<Vec<_>>();

        assert_eq!(titles(Movie::matching(&search("quantum"), &db).await.unwrap()), ["Quantum Paradox"]);
        assert_eq!(titles(Movie::matching(&search(" PHYSICIST "), &db).await.unwrap()), ["Quantum Paradox"]);
        assert!(Movie::matching(&search("western"), &db).await.unwrap().is_empty());
        assert_eq!(Movie::count(&search("   "), &db).await.unwrap(), 3);

        let featured = MovieFilter {
            featured: Some(true),
            ..Default::default()
        };
        assert_eq!(titles(Movie::matching(&featured, &db).await.unwrap()), ["Dust Trail"]);

        let in_category = MovieFilter {
            category_uid: Some("scifi".to_string()),
            ..MovieFilter::published()
        };
        assert_eq!(Movie::count(&in_category, &db).await.unwrap(), 1);
        assert_eq!(Movie::count(&MovieFilter::published(), &db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pages_are_newest_first_and_counted() {
        let db = Database::memory().await.unwrap();
        for n in 0..5 {
            Movie::create(details(&format!("Space Saga {n}"), true), &db).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let (page, total) = Movie::page(&MovieFilter::published(), 2, 2, &db).await.unwrap();
        assert_eq!(total, 5);
        let titles: Vec<_> = page.iter().map(|movie| movie.title.as_str()).collect();
        assert_eq!(titles, ["Space Saga 2", "Space Saga 1"]);

        let (past_the_end, total) = Movie::page(&MovieFilter::published(), 10, 2, &db).await.unwrap();
        assert!(past_the_end.is_empty());
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn totals_and_rankings() {
        let db = Database::memory().await.unwrap();
        assert_eq!(Movie::totals(&MovieFilter::default(), &db).await.unwrap(), ViewTotals::default());

        let hit = Movie::create(details("Hit", true), &db).await.unwrap();
        let flop = Movie::create(details("Flop", true), &db).await.unwrap();
        Movie::create(details("Draft", false), &db).await.unwrap();
        for _ in 0..3 {
            Movie::increment_views(&hit.slug, &db).await.unwrap();
        }

        let totals = Movie::totals(&MovieFilter::default(), &db).await.unwrap();
        assert_eq!(totals, ViewTotals { movies: 3, views: 3 });

        let top = Movie::most_viewed(2, &db).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].uid, hit.uid);

        let found = Movie::by_uids(&[flop.uid.clone(), "missing".to_string()], &db).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uid, flop.uid);
        assert!(Movie::by_uids(&[], &db).await.unwrap().is_empty());
    }
}
