//! livecfg: command-line access to a livecfg configuration file
//!
//! Loads the configuration through the same facade an embedding process
//! uses, so reads see migrated and repaired values and writes are atomic.

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use livecfg_utils::{init_logging_with_config, LogConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging_with_config(LogConfig::cli(cli.verbose)) {
        eprintln!("livecfg: logging unavailable: {}", e);
    }

    let mut stdout = std::io::stdout();
    let exit_code = match commands::execute(cli, &mut stdout).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("livecfg: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}
