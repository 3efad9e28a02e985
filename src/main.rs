//! Webbly - a themed content management server

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webbly::{
    api::{self, AppState},
    cache::{create_cache, CacheLayer},
    config::Config,
    db::{self, DynDatabasePool},
    models::{CreateUserInput, SettingType},
    services::tasks::{self, register_default_tasks, TaskContext, TaskScheduler},
};

#[derive(Parser)]
#[command(name = "webbly")]
#[command(about = "Themed content management server")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Migrate the database, insert default settings and register themes
    Init,
    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Copy a theme directory into the themes path and register it
    InstallTheme { path: PathBuf },
    /// List registered themes
    ListThemes,
    /// Activate a registered theme by directory name
    ActivateTheme { name: String },
    /// Copy a plugin directory into the plugins path and register it
    InstallPlugin { path: PathBuf },
    /// List registered plugins
    ListPlugins,
    /// Write a setting
    SetSetting {
        key: String,
        value: String,
        /// string, int, bool or json
        #[arg(long = "type", default_value = "string")]
        setting_type: String,
    },
    /// Clear the configured cache
    ClearCache,
    /// Copy the database file and zip the upload directory
    Backup,
    /// Rebuild the search cache
    Reindex,
    /// Write sitemap.xml into the upload directory
    Sitemap,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webbly=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load_with_env(&cli.config)?;
    tracing::info!("Configuration loaded from {}", cli.config.display());

    let pool = db::create_pool(&config.database).await?;
    db::migrations::run_migrations(&pool).await?;
    tracing::debug!("Database ready: {:?}", config.database.driver);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::Init => {
            let state = build_state(config, pool).await?;
            let inserted = state.settings.init_defaults().await?;
            let themes = state.themes.scan().await?;
            println!("Inserted {} default settings", inserted);
            println!("Registered {} themes", themes.len());
            Ok(())
        }
        Command::CreateAdmin {
            username,
            email,
            password,
        } => {
            let state = build_state(config, pool).await?;
            let user = state
                .users
                .create_admin(CreateUserInput {
                    username,
                    email,
                    password,
                })
                .await?;
            println!("Created admin '{}' (id {})", user.username, user.id);
            Ok(())
        }
        Command::InstallTheme { path } => {
            let state = build_state(config, pool).await?;
            let theme = state.themes.install_from_path(&path).await?;
            println!("Installed theme '{}' ({})", theme.name, theme.directory);
            Ok(())
        }
        Command::ListThemes => {
            let state = build_state(config, pool).await?;
            for theme in state.themes.list().await? {
                let marker = if theme.active { "*" } else { " " };
                println!("{} {:<4} {:<20} {}", marker, theme.id, theme.directory, theme.name);
            }
            Ok(())
        }
        Command::ActivateTheme { name } => {
            let state = build_state(config, pool).await?;
            let theme = state.themes.activate(&name).await?;
            println!("Activated theme '{}'", theme.directory);
            Ok(())
        }
        Command::InstallPlugin { path } => {
            let state = build_state(config, pool).await?;
            let plugin = state.plugins.install_from_path(&path).await?;
            println!("Installed plugin '{}' ({})", plugin.name, plugin.directory);
            Ok(())
        }
        Command::ListPlugins => {
            let state = build_state(config, pool).await?;
            for plugin in state.plugins.list().await? {
                let marker = if plugin.active { "*" } else { " " };
                println!("{} {:<4} {:<20} {}", marker, plugin.id, plugin.directory, plugin.name);
            }
            Ok(())
        }
        Command::SetSetting {
            key,
            value,
            setting_type,
        } => {
            let state = build_state(config, pool).await?;
            let setting_type: SettingType = setting_type.parse()?;
            state.settings.set_setting(&key, &value, setting_type).await?;
            println!("{} = {}", key, value);
            Ok(())
        }
        Command::ClearCache => {
            let cache = create_cache(&config.cache).await?;
            cache.clear().await?;
            println!("Cache cleared");
            Ok(())
        }
        Command::Backup => {
            let report = tasks::create_backup(
                config.database.sqlite_file().as_deref(),
                &config.upload.path,
                &config.tasks.backup_dir,
                config.tasks.backup_keep,
                Utc::now(),
            )?;
            println!("Backup finished: {}", report);
            Ok(())
        }
        Command::Reindex => {
            let state = build_state(config, pool).await?;
            let indexed = state.search.reindex().await?;
            println!("Indexed {} posts", indexed);
            Ok(())
        }
        Command::Sitemap => {
            let upload_dir = config.upload.path.clone();
            let state = build_state(config, pool).await?;
            let path = state.sitemap.write_to(&upload_dir).await?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn build_state(config: Config, pool: DynDatabasePool) -> Result<AppState> {
    let cache = create_cache(&config.cache).await?;
    AppState::build(config, pool, cache).await
}

async fn serve(config: Config, pool: DynDatabasePool) -> Result<()> {
    tracing::info!("Starting Webbly...");
    let state = build_state(config, pool).await?;

    let inserted = state.settings.init_defaults().await?;
    if inserted > 0 {
        tracing::info!("Inserted {} default settings", inserted);
    }

    if state.config.tasks.enabled {
        spawn_scheduler(&state);
    }

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    let app = api::build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn spawn_scheduler(state: &AppState) {
    let config = &state.config;
    let scheduler = TaskScheduler::new(Duration::from_secs(config.tasks.tick_seconds));
    register_default_tasks(
        &scheduler,
        Arc::new(TaskContext {
            posts: state.posts.clone(),
            users: state.users.clone(),
            media: state.media.clone(),
            email: state.email.clone(),
            settings: state.settings.clone(),
            search: state.search.clone(),
            sitemap: state.sitemap.clone(),
            config: config.tasks.clone(),
            upload_dir: config.upload.path.clone(),
            database_file: config.database.sqlite_file(),
            base_url: state.base_url(),
        }),
    );

    let limiter = state.rate_limiter.clone();
    scheduler.register("rate_limiter_cleanup", ChronoDuration::minutes(5), move || {
        let limiter = limiter.clone();
        async move {
            limiter.cleanup().await;
            Ok("expired entries removed".to_string())
        }
    });

    Arc::new(scheduler).spawn();
}
