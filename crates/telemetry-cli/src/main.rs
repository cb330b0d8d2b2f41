use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "telemetry-cli", version, about = "Drive the telemetry scheduler by hand")]
struct Cli {
    /// Pretend the current time is this RFC 3339 instant
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,

    /// Log filter (RUST_LOG syntax)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the app-launch trigger (first-run referral lookup)
    Launch {
        /// Referral code the user entered, if any
        #[arg(long)]
        referral_code: Option<String>,
    },
    /// Run one periodic tick (usage ping and referral retry step)
    Tick,
    /// Print persisted scheduler state as JSON
    Status,
    /// Show the custom headers that would be added to a request
    Headers {
        /// Request URL
        url: String,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = match cli.command {
        Commands::Launch { referral_code } => commands::launch::run(cli.at, referral_code),
        Commands::Tick => commands::tick::run(cli.at),
        Commands::Status => commands::status::run(),
        Commands::Headers { url } => commands::headers::run(&url),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
