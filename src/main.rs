use clap::Parser;
use tracing_subscriber::EnvFilter;

use fsbuild::build;
use fsbuild::cli::Cli;

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("fsbuild=info".parse().expect("valid log directive"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    build::run(&cli)?;
    Ok(())
}
