mod codes_cmds;
mod config;
mod generate_cmd;
mod history_cmds;
mod plans_cmd;
mod serve_cmd;
mod session_file;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use qrstudio_core::PlanTier;
use qrstudio_core::codes::{CodeRepository, MemoryCodeRepository, PgCodeRepository};
use qrstudio_core::history::{FileBackend, HistoryStore};
use qrstudio_core::session::{LocalSessionProvider, SessionProvider, UserAccount};
use qrstudio_db::config::DbConfig;
use qrstudio_db::pool;

use config::StudioConfig;
use generate_cmd::{GenerateArgs, GenerateContext};

#[derive(Parser)]
#[command(name = "qrstudio", about = "Plan-gated QR code studio")]
struct Cli {
    /// Database URL (overrides QRSTUDIO_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory for the session file and history (overrides QRSTUDIO_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a qrstudio config file (no database required)
    Init {
        /// PostgreSQL connection URL for saved codes
        #[arg(long)]
        db_url: Option<String>,
        /// Public base URL for dynamic short links
        #[arg(long)]
        short_link_base: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the qrstudio database (requires config file or env vars)
    DbInit,
    /// Sign in with an email and plan
    Signin {
        #[arg(long)]
        email: String,
        /// free or paid
        #[arg(long, default_value = "free")]
        plan: PlanTier,
    },
    /// Sign out; later runs use the guest plan
    Signout,
    /// Show the current account, plan and usage
    Whoami,
    /// Show the plan catalog
    Plans,
    /// Generate a QR code
    Generate(GenerateArgs),
    /// Recently generated codes
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Saved dynamic codes (requires a database)
    Codes {
        #[command(subcommand)]
        command: CodesCommands,
    },
    /// Serve short-link redirects and the JSON API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List entries, most recent first
    List,
    /// Remove one entry
    Remove {
        /// Entry ID as shown by `history list`
        id: i64,
    },
    /// Remove every entry
    Clear,
}

#[derive(Subcommand)]
pub enum CodesCommands {
    /// List saved codes, newest first
    List,
    /// Delete a saved code
    Delete {
        /// Code ID
        id: String,
    },
    /// Point a dynamic code at a new destination
    Retarget {
        /// Code ID
        id: String,
        /// New destination URL
        url: String,
    },
    /// Resolve a short code as a scan would
    Scan {
        short_code: String,
    },
}

/// Execute the `qrstudio init` command: write config file.
fn cmd_init(db_url: Option<String>, short_link_base: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: db_url },
        studio: config::StudioSection {
            short_link_base,
            ..Default::default()
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    match &cfg.database.url {
        Some(url) => {
            println!("  database.url = {url}");
            println!();
            println!("Next: run `qrstudio db-init` to create and migrate the database.");
        }
        None => println!("  no database configured; saved codes are disabled"),
    }

    Ok(())
}

/// Execute the `qrstudio db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &StudioConfig) -> anyhow::Result<()> {
    let db_config = resolved.db_config.clone().unwrap_or_else(DbConfig::from_env);

    println!("Initializing qrstudio database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Report what the store already holds.
    let summary = pool::store_summary(&db_pool).await?;
    println!("Database ready.");
    println!("  profiles:    {}", summary.profiles);
    println!("  saved codes: {} ({} dynamic)", summary.saved_codes, summary.dynamic_codes);

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("qrstudio db-init complete.");
    Ok(())
}

/// Connect to the configured database, if any.
async fn open_repository(resolved: &StudioConfig) -> anyhow::Result<Option<PgCodeRepository>> {
    match &resolved.db_config {
        Some(db_config) => {
            let db_pool = pool::create_pool(db_config).await?;
            Ok(Some(PgCodeRepository::new(db_pool)))
        }
        None => Ok(None),
    }
}

async fn cmd_signin(
    resolved: &StudioConfig,
    provider: &LocalSessionProvider,
    email: &str,
    plan: PlanTier,
) -> anyhow::Result<()> {
    let email = email.trim();
    let account = match open_repository(resolved).await? {
        Some(repo) => {
            let account = repo.upsert_account(email, plan).await;
            repo.pool().close().await;
            account?
        }
        None => UserAccount::local(email, plan),
    };

    let mut events = provider.subscribe();
    let session = provider.sign_in(account)?;
    session_file::apply_events(&resolved.session_path(), &mut events)?;
    println!(
        "Signed in as {} on the {} plan.",
        session.account().email,
        session.plan()
    );
    Ok(())
}

async fn cmd_whoami(resolved: &StudioConfig, provider: &LocalSessionProvider) -> anyhow::Result<()> {
    let session = provider.session();
    let mut account = session.account().clone();
    if let Some(repo) = open_repository(resolved).await? {
        let result = qrstudio_core::codes::account_with_usage(&repo, &account).await;
        repo.pool().close().await;
        account = result?;
    }
    let limits = session.limits();

    if account.is_guest() {
        println!("Not signed in (guest plan).");
    } else {
        println!("{} ({})", account.email, account.id);
        println!("Plan: {}", account.plan);
    }
    println!(
        "Dynamic codes: {} of {}",
        account.dynamic_code_count, limits.max_dynamic_codes
    );
    println!("Storage limit: {} MB", limits.max_storage_mb);
    Ok(())
}

/// Seed the session provider from the session file.
fn load_provider(resolved: &StudioConfig) -> LocalSessionProvider {
    match session_file::load(&resolved.session_path()) {
        Some(account) => LocalSessionProvider::with_account(account),
        None => LocalSessionProvider::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolve = || StudioConfig::resolve(cli.database_url.as_deref(), cli.data_dir.as_deref());

    match cli.command {
        Commands::Init {
            db_url,
            short_link_base,
            force,
        } => {
            cmd_init(db_url, short_link_base, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(&resolve()?).await?;
        }
        Commands::Signin { email, plan } => {
            let resolved = resolve()?;
            let provider = load_provider(&resolved);
            cmd_signin(&resolved, &provider, &email, plan).await?;
        }
        Commands::Signout => {
            let resolved = resolve()?;
            let path = resolved.session_path();
            let provider = load_provider(&resolved);
            let mut events = provider.subscribe();
            provider.sign_out();
            if session_file::apply_events(&path, &mut events)? > 0 {
                println!("Signed out.");
            } else {
                // An unreadable file loads as signed out; clear it anyway.
                session_file::remove(&path)?;
                println!("Not signed in.");
            }
        }
        Commands::Whoami => {
            let resolved = resolve()?;
            let provider = load_provider(&resolved);
            cmd_whoami(&resolved, &provider).await?;
        }
        Commands::Plans => {
            let resolved = resolve()?;
            plans_cmd::run_plans(load_provider(&resolved).session().plan());
        }
        Commands::Generate(args) => {
            let resolved = resolve()?;
            let provider = load_provider(&resolved);
            let repo = open_repository(&resolved).await?;
            let db_pool = repo.as_ref().map(|r| r.pool().clone());
            let ctx = GenerateContext {
                session: provider.session(),
                history_dir: resolved.history_dir(),
                workflow: resolved.workflow.clone(),
                repo: repo.map(|r| Arc::new(r) as Arc<dyn CodeRepository>),
            };
            let result = generate_cmd::run_generate(ctx, &args).await;
            if let Some(db_pool) = db_pool {
                db_pool.close().await;
            }
            result?;
        }
        Commands::History { command } => {
            let resolved = resolve()?;
            let key = load_provider(&resolved).session().account().storage_key();
            let mut store =
                HistoryStore::open(Box::new(FileBackend::new(resolved.history_dir(), &key)));
            history_cmds::run_history_command(command, &mut store)?;
        }
        Commands::Codes { command } => {
            let resolved = resolve()?;
            let account = load_provider(&resolved).session().account().clone();
            let db_pool = pool::create_pool(resolved.require_db()?).await?;
            let repo = PgCodeRepository::new(db_pool.clone());
            let result = codes_cmds::run_codes_command(command, &repo, &account).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = resolve()?;
            let repo: Arc<dyn CodeRepository> = match open_repository(&resolved).await? {
                Some(repo) => Arc::new(repo),
                None => {
                    tracing::warn!("no database configured; serving an empty in-memory store");
                    Arc::new(MemoryCodeRepository::new())
                }
            };
            serve_cmd::run_serve(repo, &bind, port)
                .await
                .context("server failed")?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "qrstudio", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "qrstudio",
            "--data-dir",
            "/tmp/qr",
            "generate",
            "https://example.com",
            "--out",
            "code.png",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/qr")));
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.content, "https://example.com");
                assert_eq!(args.out, Some(PathBuf::from("code.png")));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn signin_rejects_unknown_plan() {
        assert!(Cli::try_parse_from(["qrstudio", "signin", "--email", "a@b.c", "--plan", "gold"]).is_err());
        let cli = Cli::try_parse_from(["qrstudio", "signin", "--email", "a@b.c", "--plan", "pro"]).unwrap();
        assert!(matches!(cli.command, Commands::Signin { plan: PlanTier::Paid, .. }));
    }
}
