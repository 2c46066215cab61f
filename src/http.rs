use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client as HttpClient, ClientBuilder, Response, StatusCode};

use crate::config::Config;
use crate::error::UploadError;
use crate::telemetry::HttpStats;

const PEM_CERT_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// HTTP side of the transfer engine: one pooled client for transfers and a
/// non-redirecting one for metadata probes.
#[derive(Clone)]
pub struct HttpTransport {
    http: HttpClient,
    probe: HttpClient,
    block_size: usize,
    stats: Arc<HttpStats>,
}

impl HttpTransport {
    pub fn new(cfg: &Config, stats: Arc<HttpStats>) -> Result<Self> {
        let roots = load_ca_certs(&cfg.ca_certs)?;
        let http = builder(cfg, &roots).build()?;
        let probe = builder(cfg, &roots).redirect(Policy::none()).build()?;
        Ok(HttpTransport {
            http,
            probe,
            block_size: cfg.block_size,
            stats,
        })
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn probe(&self) -> &HttpClient {
        &self.probe
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stats(&self) -> Arc<HttpStats> {
        self.stats.clone()
    }
}

fn load_ca_certs(paths: &[PathBuf]) -> Result<Vec<Certificate>> {
    paths
        .iter()
        .map(|path| {
            let pem = std::fs::read(path)
                .with_context(|| format!("read ca cert {}", path.display()))?;
            if !pem.windows(PEM_CERT_MARKER.len()).any(|w| w == PEM_CERT_MARKER) {
                anyhow::bail!("no PEM certificate in {}", path.display());
            }
            Certificate::from_pem(&pem)
                .with_context(|| format!("parse ca cert {}", path.display()))
        })
        .collect()
}

fn builder(cfg: &Config, roots: &[Certificate]) -> ClientBuilder {
    let mut builder = ClientBuilder::new()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .user_agent(cfg.user_agent.clone());
    if let Some(secs) = cfg.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if !cfg.use_system_proxy {
        builder = builder.no_proxy();
    }
    for cert in roots {
        builder = builder.add_root_certificate(cert.clone());
    }
    builder
}

/// Maps the reply to a slot PUT. Only 200, 201 and 204 count as stored.
pub(crate) async fn map_put_status(resp: Response) -> Result<(), UploadError> {
    let status = resp.status();
    if matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT
    ) {
        return Ok(());
    }
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let text = resp.text().await.unwrap_or_default();
    let message = if text.trim().is_empty() {
        reason.to_string()
    } else {
        format!("{reason}: {}", text.trim())
    };
    Err(UploadError::UploadRejected {
        status: status.as_u16(),
        message,
    })
}

/// Maps the reply to a download GET.
pub(crate) async fn map_get_status(resp: Response) -> Result<Response, UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::UNAUTHORIZED => anyhow::anyhow!("download unauthorized: {text}"),
        StatusCode::FORBIDDEN => anyhow::anyhow!("download forbidden: {text}"),
        StatusCode::NOT_FOUND => anyhow::anyhow!("download not found: {text}"),
        _ => anyhow::anyhow!("download failed: {status} {text}"),
    };
    Err(UploadError::TransferIo(err))
}
