/// Defines a method to query the database using SurrealQL.
///
/// # Syntax
/// ```ignore
/// [Base Type] > method_name(...arguments) > [Output Type] where "sql query"
/// ```
/// Where the `Base Type` is the type that the method is being defined for and the `Output Type` is
/// the type that the method will return. Every argument is bound under its own name.
///
/// # Example
///
/// ```ignore
/// define_relation! {
///     Movie > by_slug(slug: &str) > Option<Movie>
///         where "SELECT * FROM movie WHERE slug = $slug LIMIT 1"
/// }
///
/// let movie = Movie::by_slug("quantum-paradox", &db).await?;
/// ```
#[macro_export]
macro_rules! define_relation {
    ($model:ty > $relation:ident ($($binding:ident : $binding_type:ty),*) > $export:ty where $query:literal) => {
        impl $model {
            #[tracing::instrument(skip(db))]
            pub async fn $relation($($binding : $binding_type ,)* db: &$crate::database::Database) -> $crate::database::Result<$export> {
                db.sql($query)
                    $(.bind((stringify!($binding), $binding)))*
                    .fetch()
                    .await
            }
        }
    };
}
