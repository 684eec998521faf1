//! tierroute HTTP server
//!
//! Starts the proxy, or runs one of the configuration subcommands.

use clap::Parser;
use tierroute::cli::{Cli, Command, generate_config_template};
use tierroute::{config::Config, server, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Wrote configuration template to {}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
        Some(Command::Check) => {
            let config = Config::from_file(&cli.config)?;
            println!(
                "{}: OK ({} backends, {} routing rules)",
                cli.config,
                config.backends.len(),
                config.routing.rules.len()
            );
            Ok(())
        }
        Some(Command::Serve) | None => {
            let config = Config::from_file(&cli.config)?;
            telemetry::init(&config.observability.log_level);

            tracing::info!(
                config = %cli.config,
                host = %config.server.host,
                port = config.server.port,
                "Starting tierroute"
            );

            server::run(config).await?;
            Ok(())
        }
    }
}
