mod cli;
mod commands;
mod infra;
mod routes;
mod server;

use realty_sync::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
