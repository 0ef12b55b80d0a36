use derive_new::new;
use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;

use crate::database::{new_key, Database, EmptyQuerySnafu, Result};
use crate::define_relation;
use crate::model::Slug;
use crate::time::{now, Timestamp};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Category {
    pub uid: String,
    pub name: String,
    pub slug: Slug,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct CategoryDetails {
    pub name: String,
    pub slug: Slug,
    #[new(default)]
    pub description: Option<String>,
}

define_relation! {
    Category > all() > Vec<Category>
        where "SELECT * FROM category ORDER BY name ASC"
}

define_relation! {
    Category > by_slug(slug: &Slug) > Option<Category>
        where "SELECT * FROM category WHERE slug = $slug LIMIT 1"
}

define_relation! {
    Category > update(uid: &str, details: &CategoryDetails) > Option<Category>
        where "UPDATE category MERGE $details WHERE uid = $uid RETURN AFTER"
}

impl Category {
    #[tracing::instrument(skip(db))]
    pub async fn create(details: CategoryDetails, db: &Database) -> Result<Category> {
        let category = Category {
            uid: new_key(),
            name: details.name,
            slug: details.slug,
            description: details.description,
            created_at: now(),
        };

        let created: Option<Category> = db
            .sql("CREATE category CONTENT $category RETURN AFTER")
            .bind(("category", &category))
            .fetch()
            .await?;

        created.context(EmptyQuerySnafu)
    }

    /// Delete the category and detach it from every movie that referenced it.
    #[tracing::instrument(skip(db))]
    pub async fn delete(uid: &str, db: &Database) -> Result<()> {
        db.sql("DELETE category WHERE uid = $uid; UPDATE movie SET category_uids -= $uid;")
            .bind(("uid", uid))
            .run()
            .await
    }

    /// Categories whose name or description contains `search`, ignoring case. A blank search
    /// lists every category.
    #[tracing::instrument(skip(db))]
    pub async fn search(search: Option<&str>, db: &Database) -> Result<Vec<Category>> {
        let Some(search) = search.map(str::trim).filter(|search| !search.is_empty()) else {
            return Category::all(db).await;
        };

        db.sql("SELECT * FROM category WHERE string::lowercase(name) CONTAINS $search OR string::lowercase(description ?? '') CONTAINS $search ORDER BY name ASC")
            .bind(("search", search.to_lowercase()))
            .fetch()
            .await
    }
}
