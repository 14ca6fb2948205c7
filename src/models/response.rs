use super::catalog::SliderDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 200 body of txt2img / img2img.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<String>,
    #[serde(default)]
    pub info: Option<String>,
}

/// FastAPI error body. `detail` is usually a string but can be a list.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorDetail {
    pub fn detail_str(&self) -> Option<&str> {
        self.detail.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
}

/// Element of the sampler and upscaler lists.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleListResponse {
    #[serde(default)]
    pub module_list: Vec<String>,
    #[serde(default)]
    pub module_detail: BTreeMap<String, ModuleDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleDetail {
    #[serde(default)]
    pub sliders: Vec<Option<RawSlider>>,
}

/// Slider as the server reports it; entries without a name are placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSlider {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

impl ModuleDetail {
    pub fn descriptors(&self) -> Vec<SliderDescriptor> {
        self.sliders
            .iter()
            .flatten()
            .filter_map(|raw| {
                let name = raw.name.as_deref().filter(|n| !n.is_empty())?;
                Some(SliderDescriptor {
                    name: name.to_string(),
                    value: raw.value.unwrap_or_default(),
                    min: raw.min.unwrap_or_default(),
                    max: raw.max.unwrap_or_default(),
                    step: raw.step,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub model_list: Vec<String>,
}

/// Where a generated image ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    /// Archived copy when archival worked, otherwise the temp file.
    pub image_path: PathBuf,
    pub temp_path: PathBuf,
    pub archived: bool,
}
