//! Applies the `photos` schema, separately from the request-serving process.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::Parser;
use photo_service::config::{Config, DatabaseConfig};
use photo_service::PhotoStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "photo-migrate", about = "Run photo-service database migrations")]
struct Cli {
    /// Database URL; defaults to the service configuration
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Timezone of the seeded timestamp when --database-url is given
    #[arg(long, default_value_t = 9, allow_hyphen_values = true)]
    utc_offset_hours: i32,

    /// Insert the sample photo pair after migrating
    #[arg(long)]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let (database, offset_hours) = match cli.database_url {
        Some(url) => (
            DatabaseConfig {
                url,
                max_connections: 1,
                min_connections: 1,
                connect_timeout_secs: 30,
                idle_timeout_secs: 60,
                run_migrations: true,
            },
            cli.utc_offset_hours,
        ),
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            (config.database, config.service.utc_offset_hours)
        }
    };

    let offset = FixedOffset::east_opt(offset_hours * 3600).context("Invalid UTC offset")?;
    let store = PhotoStore::new(&database, offset)
        .await
        .context("Failed to connect to the database")?;

    store.run_migrations().await?;

    if cli.seed {
        if store.seed_sample().await? {
            info!("Sample photo inserted");
        } else {
            info!("Sample photo already present");
        }
    }

    Ok(())
}
