use clap::Parser;
use pipz_cli::{EXIT_INFRA_ERROR, GovernanceCli};

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays parseable with --json.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = GovernanceCli::parse();
    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_INFRA_ERROR
        }
    };
    std::process::exit(code);
}
