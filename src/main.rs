// Proof-of-work network simulator - CLI

use clap::Parser;
use powsim::{Cli, CliHandler};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = CliHandler::handle(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
