use super::modules::ConditioningMode;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMode {
    #[default]
    #[serde(rename = "txt2img")]
    TextToImage,
    #[serde(rename = "img2img")]
    ImageToImage,
}

impl GenerationMode {
    /// Final path segment of the generation endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            GenerationMode::TextToImage => "txt2img",
            GenerationMode::ImageToImage => "img2img",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "txt2img" | "text-to-image" => Ok(GenerationMode::TextToImage),
            "img2img" | "image-to-image" => Ok(GenerationMode::ImageToImage),
            other => Err(format!("unknown generation mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizePolicy {
    #[default]
    #[serde(rename = "Crop and Resize")]
    CropAndResize,
    #[serde(rename = "Just Resize")]
    ScaleToFit,
    #[serde(rename = "Resize and Fill")]
    ScaleAndFill,
}

/// A slider value, integral or fractional depending on its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SliderValue {
    Int(i64),
    Float(f64),
}

impl SliderValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            SliderValue::Int(v) => *v as f64,
            SliderValue::Float(v) => *v,
        }
    }
}

/// One ControlNet unit as sent in `alwayson_scripts.controlnet.args`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditioningUnit {
    #[serde(rename = "module")]
    pub mode: ConditioningMode,
    pub model: String,
    pub weight: f64,
    #[serde(rename = "resize_mode")]
    pub resize_policy: ResizePolicy,
    #[serde(rename = "lowvram")]
    pub low_memory_mode: bool,
    pub guidance_start: f64,
    pub guidance_end: f64,
    #[serde(flatten)]
    pub sliders: BTreeMap<String, SliderValue>,
    pub input_image: String,
}

/// Body of a txt2img / img2img call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    #[serde(skip)]
    pub mode: GenerationMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler_name: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub seed: i64,
    pub batch_size: u32,
    pub n_iter: u32,
    pub width: u32,
    pub height: u32,
    pub restore_faces: bool,
    pub enable_hr: bool,
    pub hr_scale: f64,
    pub hr_upscaler: String,
    pub denoising_strength: f64,
    /// Server options swapped in for this call only (`sd_model_checkpoint`, `CLIP_stop_at_last_layers`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub override_settings: BTreeMap<String, Value>,
    /// Sent only when false; the server restores by default.
    #[serde(skip_serializing_if = "is_true")]
    pub override_settings_restore_afterwards: bool,
    #[serde(
        rename = "init_images",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_init_images"
    )]
    pub source_image: Option<String>,
    #[serde(rename = "alwayson_scripts", serialize_with = "serialize_units")]
    pub auxiliary_units: Vec<ConditioningUnit>,
}

fn is_true(value: &bool) -> bool {
    *value
}

fn serialize_init_images<S: Serializer>(
    image: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match image {
        Some(image) => [image].serialize(serializer),
        None => Vec::<String>::new().serialize(serializer),
    }
}

fn serialize_units<S: Serializer>(
    units: &[ConditioningUnit],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct ControlNetArgs<'a> {
        args: Vec<&'a ConditioningUnit>,
    }

    #[derive(Serialize)]
    struct AlwaysOnScripts<'a> {
        controlnet: ControlNetArgs<'a>,
    }

    AlwaysOnScripts {
        controlnet: ControlNetArgs {
            args: units.iter().filter(|unit| !unit.mode.is_none()).collect(),
        },
    }
    .serialize(serializer)
}

impl GenerationRequest {
    pub fn endpoint(&self) -> &'static str {
        self.mode.endpoint()
    }

    /// Units that will actually be transmitted, in order.
    pub fn active_units(&self) -> impl Iterator<Item = &ConditioningUnit> {
        self.auxiliary_units.iter().filter(|unit| !unit.mode.is_none())
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(mode: ConditioningMode) -> ConditioningUnit {
        ConditioningUnit {
            mode,
            model: "control_v11p_sd15_canny [d14c016b]".into(),
            weight: 1.2,
            resize_policy: ResizePolicy::default(),
            low_memory_mode: false,
            guidance_start: 0.0,
            guidance_end: 1.0,
            sliders: BTreeMap::from([
                ("preprocessor_resolution".to_string(), SliderValue::Int(512)),
                ("mlsd_value_threshold".to_string(), SliderValue::Float(0.1)),
            ]),
            input_image: "aGVsbG8=".into(),
        }
    }

    fn request(mode: GenerationMode) -> GenerationRequest {
        GenerationRequest {
            mode,
            prompt: "a lighthouse".into(),
            negative_prompt: "blurry".into(),
            sampler_name: "Euler a".into(),
            steps: 20,
            cfg_scale: 7.0,
            seed: -1,
            batch_size: 1,
            n_iter: 1,
            width: 512,
            height: 512,
            restore_faces: false,
            enable_hr: false,
            hr_scale: 2.0,
            hr_upscaler: "Lanczos".into(),
            denoising_strength: 0.25,
            override_settings: BTreeMap::new(),
            override_settings_restore_afterwards: true,
            source_image: None,
            auxiliary_units: vec![
                unit(ConditioningMode::Canny),
                unit(ConditioningMode::None),
                unit(ConditioningMode::Depth),
            ],
        }
    }

    #[test]
    fn units_serialize_under_alwayson_scripts_without_none() {
        let value = request(GenerationMode::TextToImage).to_json().unwrap();
        let args = value["alwayson_scripts"]["controlnet"]["args"]
            .as_array()
            .unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0]["module"], "canny");
        assert_eq!(args[1]["module"], "depth");
        assert_eq!(args[0]["resize_mode"], "Crop and Resize");
        assert_eq!(args[0]["lowvram"], false);
        assert_eq!(args[0]["preprocessor_resolution"], json!(512));
        assert!(args[0]["mlsd_value_threshold"].is_f64());
    }

    #[test]
    fn mode_is_not_part_of_the_body() {
        let value = request(GenerationMode::TextToImage).to_json().unwrap();
        assert!(value.get("mode").is_none());
        assert!(value.get("init_images").is_none());
    }

    #[test]
    fn override_settings_are_sent_only_when_set() {
        let value = request(GenerationMode::TextToImage).to_json().unwrap();
        assert!(value.get("override_settings").is_none());
        assert!(value.get("override_settings_restore_afterwards").is_none());
        assert!(value.get("sampler_index").is_none());

        let mut req = request(GenerationMode::TextToImage);
        req.override_settings
            .insert("sd_model_checkpoint".into(), json!("v1-5-pruned-emaonly"));
        req.override_settings
            .insert("CLIP_stop_at_last_layers".into(), json!(2));
        req.override_settings_restore_afterwards = false;
        let value = req.to_json().unwrap();
        assert_eq!(
            value["override_settings"],
            json!({"CLIP_stop_at_last_layers": 2, "sd_model_checkpoint": "v1-5-pruned-emaonly"})
        );
        assert_eq!(value["override_settings_restore_afterwards"], json!(false));
    }

    #[test]
    fn units_do_not_carry_legacy_guidance() {
        let value = request(GenerationMode::TextToImage).to_json().unwrap();
        let unit = &value["alwayson_scripts"]["controlnet"]["args"][0];
        assert!(unit.get("guidance").is_none());
        assert_eq!(unit["guidance_start"], json!(0.0));
        assert_eq!(unit["guidance_end"], json!(1.0));
    }

    #[test]
    fn img2img_carries_init_images() {
        let mut req = request(GenerationMode::ImageToImage);
        req.source_image = Some("c291cmNl".into());
        let value = req.to_json().unwrap();
        assert_eq!(value["init_images"], json!(["c291cmNl"]));
        assert_eq!(req.endpoint(), "img2img");
    }

    #[test]
    fn generation_mode_parses_both_spellings() {
        assert_eq!("img2img".parse::<GenerationMode>(), Ok(GenerationMode::ImageToImage));
        assert_eq!("text-to-image".parse::<GenerationMode>(), Ok(GenerationMode::TextToImage));
        assert!("video".parse::<GenerationMode>().is_err());
    }

    #[test]
    fn resize_policies_use_server_labels() {
        assert_eq!(json!(ResizePolicy::ScaleToFit), json!("Just Resize"));
        assert_eq!(json!(ResizePolicy::ScaleAndFill), json!("Resize and Fill"));
    }
}
