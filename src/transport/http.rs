//! HTTP(S) firmware source

use crate::config::DeviceConfig;
use crate::transport::traits::{ChunkStream, FirmwareSource};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches firmware images over HTTP(S) with the device's TLS material
pub struct HttpFirmwareSource {
    client: reqwest::Client,
}

impl HttpFirmwareSource {
    pub fn new(device: &DeviceConfig, connect_timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(connect_timeout);

        if let Some(path) = &device.ca_cert_pem {
            let pem = std::fs::read(path)
                .with_context(|| format!("reading CA certificate {}", path.display()))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        match (&device.client_cert_pem, &device.client_key_pem) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)
                    .with_context(|| format!("reading client certificate {}", cert.display()))?;
                pem.extend(
                    std::fs::read(key)
                        .with_context(|| format!("reading client key {}", key.display()))?,
                );
                builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
            }
            (None, None) => {}
            _ => bail!("client certificate and key must be configured together"),
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        Ok(response)
    }
}

#[async_trait]
impl FirmwareSource for HttpFirmwareSource {
    async fn probe(&self, url: &str) -> Result<u64> {
        let mut response = self.get(url).await?;

        if let Some(len) = response.content_length() {
            debug!("Content-Length for {}: {}", url, len);
            return Ok(len);
        }

        // No advertised length: count the body and throw it away
        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await? {
            total += chunk.len() as u64;
        }
        info!("Probed {} by reading {} bytes", url, total);
        Ok(total)
    }

    async fn open(&self, url: &str) -> Result<Box<dyn ChunkStream>> {
        let response = self.get(url).await?;
        Ok(Box::new(HttpChunkStream { response }))
    }
}

struct HttpChunkStream {
    response: reqwest::Response,
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }
}
