use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use url::Url;

use http_upload::config::Config;
use http_upload::http::HttpTransport;
use http_upload::telemetry::HttpStats;
use http_upload::uploader::{self, ProgressCallback};
use http_upload::wire::{self, Slot};
use http_upload::{download, logging, IncomingRequest};

#[derive(Parser, Debug)]
#[command(name = "http-upload", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file to an already issued slot
    Put {
        file: PathBuf,
        #[arg(long = "put-url")]
        put_url: Url,
        #[arg(long = "get-url")]
        get_url: Url,
        /// Extra request header required by the slot, as name=value
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Download a shared file
    Get {
        url: Url,
        /// Destination file; defaults to the URL's file name
        dest: Option<PathBuf>,
    },
    /// Decode a raw slot reply and print the slot
    Decode { reply: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    logging::init_log_file(&cfg.log_file_path())?;

    let work = async {
        match cli.command {
            Commands::Put {
                file,
                put_url,
                get_url,
                headers,
            } => put(&cfg, &file, put_url, get_url, headers).await,
            Commands::Get { url, dest } => get(&cfg, url, dest).await,
            Commands::Decode { reply } => decode(&reply),
        }
    };
    tokio::select! {
        res = work => res,
        _ = tokio::signal::ctrl_c() => {
            logging::info("interrupted");
            anyhow::bail!("interrupted")
        }
    }
}

async fn put(
    cfg: &Config,
    file: &Path,
    put_url: Url,
    get_url: Url,
    headers: Vec<(String, String)>,
) -> Result<()> {
    let http = HttpTransport::new(cfg, Arc::new(HttpStats::default()))?;
    let slot = headers
        .into_iter()
        .fold(Slot::new(put_url, get_url), |slot, (name, value)| {
            slot.with_header(name, value)
        });
    let progress: ProgressCallback = Arc::new(|sent, total| {
        eprint!("\r{sent}/{total} bytes");
    });
    let size = uploader::put_file(&http, &slot, file, Some(progress))
        .await
        .with_context(|| format!("upload {}", file.display()))?;
    eprintln!();
    logging::info_kv(
        "upload finished",
        &[("file", &file.display().to_string()), ("size", &size.to_string())],
    );
    println!("{}", slot.get_url());
    Ok(())
}

async fn get(cfg: &Config, url: Url, dest: Option<PathBuf>) -> Result<()> {
    let http = HttpTransport::new(cfg, Arc::new(HttpStats::default()))?;
    let dest = match dest {
        Some(dest) => dest,
        None => {
            let name = IncomingRequest::new("", url.clone()).file_name();
            if name.is_empty() {
                anyhow::bail!("cannot derive a file name from {url}; pass a destination");
            }
            cfg.download_dir.clone().unwrap_or_default().join(name)
        }
    };
    let written = download::get_to_file(&http, &url, &dest, |n| eprint!("\r{n} bytes"))
        .await
        .with_context(|| format!("download {url}"))?;
    eprintln!();
    logging::info_kv(
        "download finished",
        &[("url", url.as_str()), ("bytes", &written.to_string())],
    );
    println!("{}", dest.display());
    Ok(())
}

fn decode(reply: &Path) -> Result<()> {
    let xml = std::fs::read_to_string(reply)
        .with_context(|| format!("read {}", reply.display()))?;
    if let Some(too_large) = wire::decode_file_too_large(&xml)? {
        println!("file too large: max {} bytes", too_large.max_file_size);
        return Ok(());
    }
    let slot = wire::decode_slot(&xml)?;
    println!("put {}", slot.put_url());
    for (name, value) in slot.headers() {
        println!("header {name}: {value}");
    }
    println!("get {}", slot.get_url());
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}
