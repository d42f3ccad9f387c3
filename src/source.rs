use std::future::Future;
use std::time::Duration;

use image::DynamicImage;
use reqwest::Url;

use crate::error::{PipelineError, Result};

/// Downloads raw bytes for a remote image
pub trait ImageFetcher {
    fn fetch(&self, url: &Url) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// HTTP fetcher backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?;
        let response = response.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// The three mutually exclusive ways a request can supply an image
#[derive(Debug, Clone, Default)]
pub struct ImageInput {
    pub url: Option<String>,
    pub image: Option<DynamicImage>,
    pub webcam: Option<DynamicImage>,
}

impl ImageInput {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image: Some(image),
            ..Default::default()
        }
    }

    pub fn from_webcam(frame: DynamicImage) -> Self {
        Self {
            webcam: Some(frame),
            ..Default::default()
        }
    }
}

/// Parse `input` as an absolute http(s) URL with a host.
pub fn parse_url(input: &str) -> Option<Url> {
    let url = Url::parse(input.trim()).ok()?;
    let web = matches!(url.scheme(), "http" | "https");
    (web && url.host_str().is_some_and(|h| !h.is_empty())).then_some(url)
}

/// Picks the image for a run. A valid URL wins, then a direct image,
/// then a webcam frame.
pub struct SourceResolver<F> {
    fetcher: F,
    mirror_webcam: bool,
}

impl<F: ImageFetcher> SourceResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            mirror_webcam: false,
        }
    }

    pub fn with_mirror_webcam(mut self, mirror: bool) -> Self {
        self.mirror_webcam = mirror;
        self
    }

    pub async fn resolve(&self, input: ImageInput) -> Result<DynamicImage> {
        if let Some(url) = input.url.as_deref().and_then(parse_url) {
            tracing::debug!(%url, "resolving image from url");
            let bytes = self
                .fetcher
                .fetch(&url)
                .await
                .map_err(|e| PipelineError::source_fetch(url.as_str(), e))?;
            return image::load_from_memory(&bytes)
                .map_err(|e| PipelineError::source_fetch(url.as_str(), e));
        }

        if let Some(image) = input.image {
            tracing::debug!("using supplied image");
            return Ok(image);
        }

        if let Some(frame) = input.webcam {
            tracing::debug!(mirror = self.mirror_webcam, "using webcam frame");
            return Ok(if self.mirror_webcam { frame.fliph() } else { frame });
        }

        Err(PipelineError::NoSourceAvailable)
    }
}
