use crate::commands::{run_formula, run_sync, FormulaCommand, SyncArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use realty_sync::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Realty Sync Hub",
    about = "Reconcile REZEN, Zoho and QuickBooks records and manage formula fields",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one sync offline against a captured JSON fixture
    Sync(SyncArgs),
    /// Validate, evaluate and import formula fields
    Formula {
        #[command(subcommand)]
        command: FormulaCommand,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sync(args) => run_sync(args).await,
        Command::Formula { command } => run_formula(command),
    }
}
