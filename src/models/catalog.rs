use super::modules::{ConditioningMode, MODEL_LIST, SAMPLER_LIST, UPSCALER_LIST};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Range and default of one module slider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliderDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl SliderDescriptor {
    /// Field name used in the request: lowercase, spaces as underscores.
    pub fn key(&self) -> String {
        slider_key(&self.name)
    }

    pub fn is_fractional(&self) -> bool {
        matches!(self.step, Some(step) if step < 1.0)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if self.min <= self.max {
            value.clamp(self.min, self.max)
        } else {
            value
        }
    }
}

pub fn slider_key(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

/// Read-only snapshot of what the server advertises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCatalog {
    pub modules: Vec<String>,
    pub models: Vec<String>,
    pub samplers: Vec<String>,
    pub upscalers: Vec<String>,
    pub module_details: BTreeMap<String, Vec<SliderDescriptor>>,
}

impl ServerCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog assembled from the built-in module table, for offline use.
    pub fn builtin() -> Self {
        let module_details = ConditioningMode::ALL
            .iter()
            .filter(|mode| !mode.builtin_sliders().is_empty())
            .map(|mode| {
                (
                    mode.as_str().to_string(),
                    mode.builtin_sliders()
                        .iter()
                        .map(|slider| slider.to_descriptor())
                        .collect(),
                )
            })
            .collect();

        Self {
            modules: ConditioningMode::ALL
                .iter()
                .map(|mode| mode.as_str().to_string())
                .collect(),
            models: MODEL_LIST.iter().map(|s| s.to_string()).collect(),
            samplers: SAMPLER_LIST.iter().map(|s| s.to_string()).collect(),
            upscalers: UPSCALER_LIST.iter().map(|s| s.to_string()).collect(),
            module_details,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.models.is_empty()
            && self.samplers.is_empty()
            && self.upscalers.is_empty()
            && self.module_details.is_empty()
    }

    pub fn sliders_for(&self, mode: ConditioningMode) -> &[SliderDescriptor] {
        self.module_details
            .get(mode.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Advertised modules that map onto a known [`ConditioningMode`].
    pub fn conditioning_modes(&self) -> Vec<ConditioningMode> {
        self.modules
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    log::debug!("Skipping module: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn has_sampler(&self, name: &str) -> bool {
        self.samplers.iter().any(|s| s == name)
    }
}
