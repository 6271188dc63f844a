//! PCF Debugger - debug a locally built PCF control inside a live
//! Power Apps page

use clap::Parser;
use pcf_debugger::commands::Commands;
use pcf_debugger::{cli, common::logging};

#[derive(Parser)]
#[command(name = "pcf-debugger", about = "Debug local PCF control bundles in a live Power Apps page")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout belongs to the protocol in adapter mode
    let _guard = match cli.command {
        Commands::Adapter { .. } => logging::init_adapter().0,
        _ => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
