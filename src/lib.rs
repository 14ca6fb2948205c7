pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod image_data;
pub mod logger;
pub mod models;

pub use builder::{
    build_request, ConditioningSlot, GenerationParams, RenderSettings, RequestBuilder,
    SceneState, UnitSettings,
};
pub use client::{CatalogClient, GenerationClient, InterrogateClient, Interrogator, SdClient};
pub use config::ServerConfig;
pub use error::{Result, SdError};
pub use image_data::ImageSource;
pub use models::*;
