use super::{classify_send_error, parse_url};
use crate::{
    config::ServerConfig,
    error::{Result, SdError},
    image_data::decode_base64,
    logger::{redact_images, timer},
    models::{ErrorDetail, GenerationMode, GenerationRequest, GenerationResult, ImagesResponse},
};
use reqwest::{StatusCode, Url};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Sends txt2img / img2img requests and stores the returned image.
#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
}

impl GenerationClient {
    pub fn new(http: reqwest::Client, config: Arc<ServerConfig>) -> Self {
        Self { http, config }
    }

    pub fn endpoint_url(&self, mode: GenerationMode) -> Result<Url> {
        parse_url(&format!("{}{}", self.config.sd_host(), mode.endpoint()))
    }

    /// Issues exactly one POST. Nothing is retried.
    pub async fn send(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let request_id = Uuid::new_v4();
        let prefix = output_prefix(chrono::Utc::now().timestamp());
        let url = self.endpoint_url(request.mode)?;
        let payload = request.to_json()?;

        log::info!(
            "🎨 [{}] Sending {} request to {} with {} conditioning unit(s)",
            request_id,
            request.endpoint(),
            url,
            request.active_units().count()
        );
        log::debug!(
            "📤 [{}] Payload: {}",
            request_id,
            serde_json::to_string_pretty(&redact_images(&payload)).unwrap_or_default()
        );

        let _timer = timer(&format!("{} {}", request.endpoint(), request_id));

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

        if status != StatusCode::OK {
            return Err(classify_error_response(status.as_u16(), &body, url.as_str()));
        }

        let temp_path = handle_success(&body, &prefix)?;
        log::info!("✅ [{}] Image received: {}", request_id, temp_path.display());

        Ok(self.archive(temp_path, &prefix))
    }

    /// Copies the temp file into the output folder. Failure leaves the
    /// temp file as the result.
    fn archive(&self, temp_path: PathBuf, prefix: &str) -> GenerationResult {
        let folder = &self.config.output_folder;

        match persist_output(&temp_path, folder, prefix) {
            Ok(destination) => {
                log::info!("💾 Saved image to {}", destination.display());
                GenerationResult {
                    image_path: destination,
                    temp_path,
                    archived: true,
                }
            }
            Err(e) => {
                log::warn!(
                    "Couldn't save 'after' image to {}: {}",
                    folder.display(),
                    e
                );
                GenerationResult {
                    image_path: temp_path.clone(),
                    temp_path,
                    archived: false,
                }
            }
        }
    }
}

fn output_prefix(timestamp: i64) -> String {
    format!("{}-2-after", timestamp)
}

/// Copies `source` to `{folder}/{prefix}.png`, or to `{prefix}-N.png` when
/// that name is already taken. Existing files are never overwritten.
fn persist_output(source: &Path, folder: &Path, prefix: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(folder)?;

    for attempt in 0u32..1000 {
        let name = match attempt {
            0 => format!("{}.png", prefix),
            n => format!("{}-{}.png", prefix, n),
        };
        let destination = folder.join(name);
        let mut target = match OpenOptions::new().write(true).create_new(true).open(&destination) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::warn!(
                    "⚠️  {} already exists, trying the next free name",
                    destination.display()
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        io::copy(&mut File::open(source)?, &mut target)?;
        return Ok(destination);
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {} in {}", prefix, folder.display()),
    ))
}

/// Decodes the first image of a 200 body into a kept temp file.
pub fn handle_success(body: &str, prefix: &str) -> Result<PathBuf> {
    let response: ImagesResponse = serde_json::from_str(body).map_err(|e| {
        log::error!("Error while parsing the server response: {}", e);
        log::debug!("{}", body);
        SdError::Response(format!("unexpected response body: {}", e))
    })?;

    let image = response.images.first().ok_or_else(|| {
        log::error!("The server response did not contain any images");
        SdError::Response("response contained no images".into())
    })?;

    let bytes = decode_base64(image).map_err(|e| {
        log::error!("Couldn't decode the image returned by the server: {}", e);
        e
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}-", prefix))
        .suffix(".png")
        .tempfile()?;
    file.write_all(&bytes)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| SdError::Io(e.error))?;

    Ok(path)
}

/// Turns a non-200 response from `url` into the matching error, logging the body.
pub fn classify_error_response(status: u16, body: &str, url: &str) -> SdError {
    if status != 404 {
        log::error!("{}", body);
        log::error!(
            "An error occurred in the Stable Diffusion server at {} (HTTP {})",
            url,
            status
        );
        return SdError::Server {
            status,
            body: body.to_string(),
        };
    }

    let detail = match serde_json::from_str::<ErrorDetail>(body) {
        Ok(detail) => detail,
        Err(_) => {
            log::error!(
                "It looks like the Stable Diffusion server at {} is running, but it's not in API mode",
                url
            );
            return SdError::NotInApiMode(body.to_string());
        }
    };

    match detail.detail_str() {
        Some("Not Found") => {
            log::error!(
                "It looks like the Stable Diffusion server at {} is running, but it's not in API mode. Full server response: {}",
                url,
                body
            );
            SdError::NotInApiMode(body.to_string())
        }
        Some("Sampler not found") => {
            log::error!(
                "The sampler you selected is not available on the server at {}. Full server response: {}",
                url,
                body
            );
            SdError::SamplerNotFound(body.to_string())
        }
        _ => {
            log::error!(
                "An error occurred in the Stable Diffusion server at {}. Full server response: {}",
                url,
                body
            );
            SdError::Server {
                status,
                body: body.to_string(),
            }
        }
    }
}
