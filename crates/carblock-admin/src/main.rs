use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;

use carblock_db::{Config, Database, Pool, SqliteFileFactory, migrations};

/// Maintenance tool for a carblock database. Never part of the request path.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// YAML config file; environment variables override it.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables, indexes and triggers if absent.
    Init,
    /// Report whether the schema is present and the pool's state.
    Status,
    /// List the tables in the database.
    Tables,
    /// Drop every carblock table and all data.
    Drop {
        /// Required; without it nothing is dropped.
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carblock=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let path = config.database.path.display().to_string();

    match cli.command {
        Command::Init => {
            // Opening the engine brings the schema up to date or fails.
            let db = Database::open(&config)?;
            println!("schema ready at {path}");
            println!("tables: {}", db.list_tables()?.join(", "));
        }
        Command::Status => {
            let pool = open_pool(&config)?;
            let conn = pool.acquire()?;
            let ready = migrations::tables_exist(&conn)?;
            drop(conn);

            let status = pool.status();
            println!("database:   {path}");
            println!("schema:     {}", if ready { "present" } else { "missing" });
            println!(
                "pool:       {} open, {} idle, {} in use, max {}",
                status.open, status.idle, status.in_use, status.max_size
            );
            println!(
                "rate limit: {} per {}s",
                config.rate_limiting.max_messages, config.rate_limiting.window_secs
            );
        }
        Command::Tables => {
            let pool = open_pool(&config)?;
            let conn = pool.acquire()?;
            for table in migrations::list_tables(&conn)? {
                println!("{table}");
            }
        }
        Command::Drop { yes } => {
            if !yes {
                bail!("refusing to drop {path} without --yes");
            }
            let pool = open_pool(&config)?;
            let conn = pool.acquire()?;
            migrations::drop_all(&conn)?;
            info!("Dropped all tables in {}", path);
            println!("dropped all carblock tables in {path}");
        }
    }

    Ok(())
}

/// A pool that does not touch the schema, for commands that only inspect or
/// destroy it.
fn open_pool(config: &Config) -> anyhow::Result<Pool> {
    let factory = SqliteFileFactory::new(&config.database.path, config.pool.busy_timeout());
    Ok(Pool::new(&config.pool, factory)?)
}
