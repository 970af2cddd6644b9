use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "tally-proxy-cli")]
#[command(about = "Probe a running tally-proxy and push XML through it", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:3001")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the proxy is up
    Health,
    /// POST an XML request file through the proxy and print the reply
    Send {
        /// File holding the request envelope
        file: PathBuf,

        #[arg(long, default_value = "text/xml")]
        content_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            let status = res.status();
            let json: Value = res.json().await?;
            println!("{status}");
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Send { file, content_type } => {
            let body = tokio::fs::read(&file).await?;
            let res = client
                .post(&cli.url)
                .header(CONTENT_TYPE, content_type)
                .body(body)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let is_json = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
    }
    if is_json {
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{text}"),
        }
    } else {
        println!("{text}");
    }
    Ok(())
}
