//! Send a file of requests through one batch connection.
//!
//! The items file is a JSON array of `{"method", "path", "body"}` objects.
//! Each reply is printed as one JSON line, in completion order.

use std::path::PathBuf;

use clap::Parser;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::json;

use batch_requests::{BatchConnection, BatchItem, ClientConfig};

#[derive(Parser)]
#[command(name = "batch-cli")]
#[command(about = "Send many HTTP requests over one batch connection", long_about = None)]
struct Cli {
    /// Batch endpoint URL.
    #[arg(short, long, default_value = "http://localhost:8080/batch")]
    url: String,

    /// Extra header for the batch request, as `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// JSON file holding the items to send.
    items: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = ClientConfig::new(&cli.url);
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header {:?} is not `Name: value`", header))?;
        config = config.header(name.trim(), value.trim());
    }

    let items: Vec<BatchItem> = serde_json::from_str(&std::fs::read_to_string(&cli.items)?)?;
    let connection = BatchConnection::new(&config)?;

    let mut pending = FuturesUnordered::new();
    for item in items {
        pending.push(connection.send(item)?);
    }
    connection.close();

    let mut failures = 0;
    while let Some(result) = pending.next().await {
        let line = match result {
            Ok(reply) => {
                if !reply.is_success() {
                    failures += 1;
                }
                serde_json::to_value(&reply)?
            }
            Err(e) => {
                failures += 1;
                json!({ "error": e.to_string() })
            }
        };
        println!("{}", line);
    }

    if failures > 0 {
        eprintln!("{} request(s) failed", failures);
        std::process::exit(1);
    }
    Ok(())
}
