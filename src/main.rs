use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kurento_fanout::cli::{
    format_probe_results, format_servers, format_session_report, probe, run_session, validate,
    Cli, Commands,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Validate(args) => {
            let settings = validate(&args.config)?;
            println!("{}", format_servers(&settings));
        }
        Commands::Probe(args) => {
            let settings = validate(&args.config)?;
            let results = probe(&settings).await;
            println!("{}", format_probe_results(&results));
            let failed = results.iter().filter(|r| r.outcome.is_err()).count();
            if failed > 0 {
                anyhow::bail!("{} of {} media servers unavailable", failed, results.len());
            }
        }
        Commands::Session(args) => {
            let settings = validate(&args.config)?;
            info!("Running session against {} media servers", settings.servers.len());
            let report = run_session(&settings, &args).await?;
            println!("{}", format_session_report(&report));
        }
    }
    Ok(())
}
