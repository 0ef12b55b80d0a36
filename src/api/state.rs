use std::fmt;
use std::time::Duration;

use axum_template::engine::Engine;
use derive_new::new;
use tera::Tera;

use crate::database::Database;

pub type Templates = Engine<Tera>;

#[derive(Clone, new)]
pub struct App {
    pub database: Database,
    pub templates: Templates,
    pub session_ttl: Duration,
    /// Overrides the name derived from the request host.
    pub site_name: Option<String>,
    /// Window of the cooldown tracking policy. Without one, a visit counts once per session.
    #[new(default)]
    pub view_cooldown: Option<Duration>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("database", &self.database)
            .field("session_ttl", &self.session_ttl)
            .field("site_name", &self.site_name)
            .field("view_cooldown", &self.view_cooldown)
            .finish_non_exhaustive()
    }
}

impl<'a> From<&'a App> for &'a Database {
    fn from(app: &'a App) -> Self {
        &app.database
    }
}
