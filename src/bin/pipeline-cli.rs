use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "pipeline-cli")]
#[command(about = "Client for the exchange pipeline demo handlers", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send parameters and print the echoed JSON
    Params {
        /// `key=value` pairs
        pairs: Vec<String>,
        /// Send as an urlencoded form body instead of a query string
        #[arg(long)]
        form: bool,
    },
    /// Upload files as multipart/form-data
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Form field name used for every file
        #[arg(long, default_value = "file")]
        field: String,
        /// Extra `key=value` text fields
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Download a file served by the pipeline (`act=file`)
    Download {
        /// File name relative to the server's download root
        name: String,
        /// Where to write the body (defaults to `name` in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Ask for inline instead of attachment disposition
        #[arg(long)]
        inline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Params { pairs, form } => {
            let pairs = parse_pairs(&pairs)?;
            let request = if form {
                client.post(&cli.url).form(&pairs)
            } else {
                client.get(&cli.url).query(&pairs)
            };
            print_response(request.send().await?).await?;
        }
        Commands::Upload {
            files,
            field,
            params,
        } => {
            let mut form = Form::new();
            for (key, value) in parse_pairs(&params)? {
                form = form.text(key, value);
            }
            for path in files {
                let data = tokio::fs::read(&path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload.bin".to_string());
                eprintln!("Uploading {} ({} bytes)", path.display(), data.len());
                form = form.part(field.clone(), Part::bytes(data).file_name(file_name));
            }
            let res = client.post(&cli.url).multipart(form).send().await?;
            print_response(res).await?;
        }
        Commands::Download {
            name,
            output,
            inline,
        } => {
            let mut query = vec![("act", "file".to_string()), ("name", name.clone())];
            if inline {
                query.push(("inline", "1".to_string()));
            }
            let res = client.get(&cli.url).query(&query).send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }

            let target = output.unwrap_or_else(|| PathBuf::from(&name));
            let mut file = tokio::fs::File::create(&target).await?;
            let mut stream = res.bytes_stream();
            let mut total = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                total += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            println!("Saved {} bytes to {}", total, target.display());
        }
    }

    Ok(())
}

fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>, Box<dyn std::error::Error>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("expected key=value, got {pair:?}").into())
        })
        .collect()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: pipeline returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
