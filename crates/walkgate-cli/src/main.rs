use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod device;

#[derive(Parser)]
#[command(name = "walkgate", version, about = "Walkgate CLI (simulated device)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print shield state, progress and device state as JSON
    Status,
    /// Bring the app to the foreground (reconcile)
    Activate,
    /// Daily step goal
    Threshold {
        #[command(subcommand)]
        action: commands::threshold::ThresholdAction,
    },
    /// Simulated step source
    Steps {
        #[command(subcommand)]
        action: commands::steps::StepsAction,
    },
    /// Apps, categories and web domains to restrict
    Selection {
        #[command(subcommand)]
        action: commands::selection::SelectionAction,
    },
    /// Background tasks
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// First-run setup and sign-out
    Onboarding {
        #[command(subcommand)]
        action: commands::onboarding::OnboardingAction,
    },
    /// Capability grants on the simulated device
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Status => commands::status::status().await,
        Commands::Activate => commands::status::activate().await,
        Commands::Threshold { action } => commands::threshold::run(action).await,
        Commands::Steps { action } => commands::steps::run(action).await,
        Commands::Selection { action } => commands::selection::run(action).await,
        Commands::Task { action } => commands::task::run(action).await,
        Commands::Onboarding { action } => commands::onboarding::run(action).await,
        Commands::Auth { action } => commands::auth::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
