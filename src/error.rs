use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Server timed out: {0}")]
    Timeout(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Server is running but not in API mode: {0}")]
    NotInApiMode(String),

    #[error("Sampler not available: {0}")]
    SamplerNotFound(String),

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Response error: {0}")]
    Response(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SdError {
    /// Short text suitable for a host notification popup.
    pub fn user_message(&self) -> &'static str {
        match self {
            SdError::Config(_) => "The add-on settings are invalid.",
            SdError::Validation(_) => "The generation settings are invalid.",
            SdError::InvalidAddress(_) => "The url for your Stable Diffusion server is invalid.",
            SdError::Unreachable(_) => "The Stable Diffusion server couldn't be found.",
            SdError::Timeout(_) => "The Stable Diffusion server timed out.",
            SdError::Request(_) => "The request to the Stable Diffusion server failed.",
            SdError::NotInApiMode(_) => {
                "The Stable Diffusion server is running, but it's not in API mode."
            }
            SdError::SamplerNotFound(_) => "The sampler you selected is not available.",
            SdError::Server { .. } => "An error occurred in the Stable Diffusion server.",
            SdError::Response(_) | SdError::Decode(_) => {
                "The server response did not contain a usable image."
            }
            SdError::Io(_) => "Couldn't write the generated image.",
            SdError::Serialization(_) => "Couldn't prepare the request.",
        }
    }

    /// Connectivity failures: nothing reached the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            SdError::InvalidAddress(_) | SdError::Unreachable(_) | SdError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for SdError {
    fn from(e: serde_json::Error) -> Self {
        SdError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_grouped() {
        assert!(SdError::Unreachable("x".into()).is_connectivity());
        assert!(SdError::Timeout("x".into()).is_connectivity());
        assert!(!SdError::NotInApiMode("x".into()).is_connectivity());
    }

    #[test]
    fn server_error_display_includes_status() {
        let err = SdError::Server {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "Server error (500): boom");
        assert_eq!(
            err.user_message(),
            "An error occurred in the Stable Diffusion server."
        );
    }
}
