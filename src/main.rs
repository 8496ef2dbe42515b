mod cli;

use mediagate::{
    config,
    conversion::spawn_deadline_sweeper,
    server::{self, auth, AppContext, Services},
};
use mediagate_db::pool::init_pool;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    config::apply_listen_overrides(&mut config, host, port)?;

    tracing::info!("Starting mediagate");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    // Data directory: explicit setting, else next to the config file, else cwd
    let data_dir = match config.server.data_dir.clone() {
        Some(dir) => dir,
        None => config_path
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default()),
    };
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&config.storage.root)?;

    // Initialize database
    let db_path = data_dir.join("mediagate.db");
    let db_path_str = db_path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path_str);
    let db_pool = init_pool(&db_path_str)?;

    let services = Services::from_config(&config)?;
    let sweep_every = Duration::from_secs(config.processing.sweep_interval_secs.max(1));
    let ctx = AppContext::new(config, db_pool, services);

    // Local jobs do not survive a restart
    match ctx.tracker.fail_interrupted() {
        Ok(count) if count > 0 => {
            tracing::info!("Failed {} local jobs interrupted by the previous shutdown", count);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to clean up interrupted jobs: {}", e);
        }
    }

    let sweeper = spawn_deadline_sweeper(ctx.tracker.clone(), sweep_every);

    let server_result = server::start_server(ctx).await;

    tracing::info!("Shutting down...");
    sweeper.abort();

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediagate=trace,mediagate_db=debug,mediagate_common=debug,tower_http=debug".to_string()
        } else {
            "mediagate=debug,mediagate_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::GenerateSecret => {
            println!("{}", auth::generate_secret());
            Ok(())
        }
        Commands::Version => {
            println!("mediagate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Auth enabled: {}", config.server.auth.enabled);
            println!("  Auth tokens: {}", config.server.auth.tokens.len());
            println!("  Local transcode: {}", config.processing.local_transcode);
            println!(
                "  Remote processing: {}",
                config.processing.remote.is_configured()
            );
            println!("  Storage root: {}", config.storage.root.display());
            println!("  Signed URL TTL: {}s", config.storage.url_ttl_secs);
            println!(
                "  Authorization: {:?}",
                config.delivery.authorization.mode
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
