mod assets;
mod cli;
mod config;
mod error;
mod handlers;
mod openssl;
mod plan;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use handlers::{generate, show};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let parsed_args = Cli::parse();
    init_tracing(parsed_args.shared.verbose);

    let config = parsed_args
        .shared
        .fixture_config()
        .context("failed to load fixture configuration")?;
    let mut stdout = std::io::stdout().lock();
    match parsed_args.command {
        Commands::Generate { .. } => {
            let layout = parsed_args.shared.layout()?;
            generate::handle(
                generate::GenerateParams {
                    layout: &layout,
                    program: &parsed_args.shared.openssl,
                    failure_policy: parsed_args.command.failure_policy(),
                },
                &config,
            )
            .context("fixture generation failed")?;
        }
        Commands::Plan => {
            let layout = parsed_args.shared.layout()?;
            show::print_plan(&mut stdout, &config, &layout, &parsed_args.shared.openssl)?;
        }
        Commands::Config => show::print_config(&mut stdout, &config)?,
        Commands::OpensslConfig => show::print_openssl_config(&mut stdout)?,
    }
    Ok(())
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
