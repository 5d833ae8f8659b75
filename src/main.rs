//! Authful MCP Proxy
//!
#![doc = "Authful MCP Proxy"]
#![doc = "Main entry point for the stdio proxy binary."]

use std::process::ExitCode;

use authful_mcp_proxy::cli::Cli;
use authful_mcp_proxy::error::{classify, ErrorClass};
use authful_mcp_proxy::{logging, proxy};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing before anything can log
    logging::init(cli.log_level());

    let result = async {
        let config = cli.into_config()?;
        tokio::select! {
            result = proxy::run(config) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                Ok(())
            }
        }
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match classify(&e) {
                ErrorClass::Configuration => eprintln!("{e}"),
                ErrorClass::Runtime => eprintln!("Error: {e:#}"),
                ErrorClass::Internal => eprintln!("Internal error: {e:?}"),
            }
            ExitCode::FAILURE
        }
    }
}
