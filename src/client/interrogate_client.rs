use super::{classify_send_error, parse_url};
use crate::{
    config::ServerConfig,
    error::{Result, SdError},
    image_data::ImageSource,
    models::CaptionResponse,
};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Captioning model run by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interrogator {
    #[default]
    Clip,
    DeepDanbooru,
}

impl Interrogator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interrogator::Clip => "clip",
            Interrogator::DeepDanbooru => "deepdanbooru",
        }
    }
}

impl fmt::Display for Interrogator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interrogator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clip" => Ok(Interrogator::Clip),
            "deepdanbooru" => Ok(Interrogator::DeepDanbooru),
            other => Err(format!("unknown interrogator '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct InterrogateClient {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
}

impl InterrogateClient {
    pub fn new(http: reqwest::Client, config: Arc<ServerConfig>) -> Self {
        Self { http, config }
    }

    /// Asks the server to describe an image and returns the caption.
    pub async fn caption(&self, image: &ImageSource, interrogator: Interrogator) -> Result<String> {
        let url = parse_url(&format!("{}interrogate", self.config.sd_host()))?;
        let payload = json!({
            "image": image.to_base64()?,
            "model": interrogator.as_str(),
        });

        log::info!("🔍 Interrogating image with {}", interrogator);

        let response = self
            .http
            .post(url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_send_error(e, url.as_str()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, url.as_str()))?;

        if !status.is_success() {
            log::error!("Interrogation failed with HTTP {}: {}", status, body);
            return Err(SdError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CaptionResponse = serde_json::from_str(&body)
            .map_err(|e| SdError::Response(format!("unexpected interrogate body: {}", e)))?;
        log::debug!("Caption: {}", parsed.caption);
        Ok(parsed.caption)
    }
}
