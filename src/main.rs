use dotenvy::dotenv;
use snafu::ResultExt as _;
use tokio::net::TcpListener;

use reelhouse::api::{create_router, templates, App};
use reelhouse::config::{AdminConfig, Config};
use reelhouse::database::Database;
use reelhouse::error::{
    ApplicationError, BindAddressSnafu, BootstrapAdminSnafu, ConnectDatabaseSnafu, TemplatesSnafu,
    WebServerSnafu,
};
use reelhouse::logger;
use reelhouse::model::User;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = Config::from_env()?;

    let _guard = logger::init(&config)?;

    let database = Database::connect(&config.database)
        .await
        .context(ConnectDatabaseSnafu)?;

    if let Some(admin) = &config.admin {
        bootstrap_admin(admin, &database).await?;
    }

    let templates = templates().context(TemplatesSnafu)?;
    let app = App {
        view_cooldown: config.view_cooldown,
        ..App::new(database, templates, config.session_ttl, config.site_name.clone())
    };

    let address = config.host_address;
    let listener = TcpListener::bind(address)
        .await
        .context(BindAddressSnafu { address })?;
    tracing::info!("listening on http://{address}");

    axum::serve(listener, create_router(app))
        .with_graceful_shutdown(shutdown())
        .await
        .context(WebServerSnafu)
}

async fn bootstrap_admin(admin: &AdminConfig, database: &Database) -> Result<(), ApplicationError> {
    let existing = User::by_email(&admin.admin_email, database)
        .await
        .context(BootstrapAdminSnafu)?;

    if existing.is_none() {
        User::register(&admin.admin_name, &admin.admin_email, &admin.admin_password, database)
            .await
            .context(BootstrapAdminSnafu)?;
        tracing::info!(email = %admin.admin_email, "created the administrator account");
    }

    Ok(())
}

async fn shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not listen for the shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("shutting down");
}
