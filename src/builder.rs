use crate::{
    error::{Result, SdError},
    image_data::ImageSource,
    models::{
        ConditioningMode, ConditioningUnit, GenerationMode, GenerationRequest, ResizePolicy,
        ServerCatalog, SliderDescriptor, SliderValue,
    },
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Number of ControlNet slots a scene exposes.
pub const MAX_CONDITIONING_SLOTS: usize = 5;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "lowres, bad anatomy, bad hands, text, error, missing fingers, extra digit, fewer digits, cropped, worst quality, low quality, normal quality, jpeg artifacts, signature, watermark, username, blurry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub resolution_percentage: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution_x: 1920,
            resolution_y: 1080,
            resolution_percentage: 100,
        }
    }
}

impl RenderSettings {
    pub fn new(resolution_x: u32, resolution_y: u32, resolution_percentage: u32) -> Self {
        Self {
            resolution_x,
            resolution_y,
            resolution_percentage,
        }
    }

    pub fn output_width(&self) -> u32 {
        scale(self.resolution_x, self.resolution_percentage)
    }

    pub fn output_height(&self) -> u32 {
        scale(self.resolution_y, self.resolution_percentage)
    }
}

fn scale(resolution: u32, percentage: u32) -> u32 {
    (resolution as f64 * percentage as f64 / 100.0).round() as u32
}

/// Sampling settings chosen in the host panel.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub mode: GenerationMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub seed: i64,
    pub batch_size: u32,
    pub n_iter: u32,
    pub restore_faces: bool,
    pub enable_high_res: bool,
    pub hr_scale: f64,
    pub upscaler: String,
    pub denoising_strength: f64,
    pub override_settings: BTreeMap<String, Value>,
    pub restore_settings_afterwards: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            mode: GenerationMode::TextToImage,
            prompt: String::new(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            sampler: "Euler a".to_string(),
            steps: 20,
            cfg_scale: 7.0,
            seed: -1,
            batch_size: 1,
            n_iter: 1,
            restore_faces: false,
            enable_high_res: true,
            hr_scale: 2.0,
            upscaler: "None".to_string(),
            denoising_strength: 0.25,
            override_settings: BTreeMap::new(),
            restore_settings_afterwards: true,
        }
    }
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_denoising_strength(mut self, strength: f64) -> Self {
        self.denoising_strength = strength;
        self
    }

    /// Overrides one server option for this generation only.
    pub fn with_override_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.override_settings.insert(key.into(), value.into());
        self
    }

    pub fn with_restore_settings_afterwards(mut self, restore: bool) -> Self {
        self.restore_settings_afterwards = restore;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(SdError::Validation("steps must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(SdError::Validation("batch size must be at least 1".into()));
        }
        if self.n_iter == 0 {
            return Err(SdError::Validation("n_iter must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.denoising_strength) {
            return Err(SdError::Validation(format!(
                "denoising strength {} is outside [0, 1]",
                self.denoising_strength
            )));
        }
        ensure_finite("cfg scale", self.cfg_scale)?;
        ensure_finite("hr scale", self.hr_scale)?;
        Ok(())
    }
}

/// Per-unit settings the artist picked for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSettings {
    pub model: String,
    pub weight: f64,
    pub resize_policy: ResizePolicy,
    pub low_memory_mode: bool,
    pub guidance_start: f64,
    pub guidance_end: f64,
    /// Slider overrides by field key (`canny_low_threshold`, ...).
    pub sliders: BTreeMap<String, f64>,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            model: "none".to_string(),
            weight: 1.2,
            resize_policy: ResizePolicy::CropAndResize,
            low_memory_mode: false,
            guidance_start: 0.0,
            guidance_end: 1.0,
            sliders: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningSlot {
    pub mode: ConditioningMode,
    pub settings: UnitSettings,
    /// Overrides the rendered frame for this slot.
    pub image: Option<ImageSource>,
}

impl ConditioningSlot {
    pub fn new(mode: ConditioningMode) -> Self {
        Self {
            mode,
            settings: UnitSettings::default(),
            image: None,
        }
    }

    pub fn none() -> Self {
        Self::new(ConditioningMode::None)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    pub fn with_settings(mut self, settings: UnitSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_slider(mut self, key: impl Into<String>, value: f64) -> Self {
        self.settings.sliders.insert(key.into(), value);
        self
    }

    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.image = Some(image);
        self
    }
}

/// Everything the builder reads from the host scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneState {
    pub render: RenderSettings,
    pub params: GenerationParams,
    /// The freshly rendered frame.
    pub frame: Option<ImageSource>,
    /// Explicit img2img source; the frame is used when absent.
    pub source_image: Option<ImageSource>,
}

impl SceneState {
    pub fn new(render: RenderSettings, params: GenerationParams) -> Self {
        Self {
            render,
            params,
            frame: None,
            source_image: None,
        }
    }

    pub fn with_frame(mut self, frame: ImageSource) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_source_image(mut self, image: ImageSource) -> Self {
        self.source_image = Some(image);
        self
    }
}

pub struct RequestBuilder<'a> {
    catalog: &'a ServerCatalog,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(catalog: &'a ServerCatalog) -> Self {
        Self { catalog }
    }

    pub fn build(&self, scene: &SceneState, slots: &[ConditioningSlot]) -> Result<GenerationRequest> {
        if slots.len() > MAX_CONDITIONING_SLOTS {
            return Err(SdError::Validation(format!(
                "{} conditioning slots given, at most {} are supported",
                slots.len(),
                MAX_CONDITIONING_SLOTS
            )));
        }

        let params = &scene.params;
        params.validate()?;

        let width = scene.render.output_width();
        let height = scene.render.output_height();
        if width == 0 || height == 0 {
            return Err(SdError::Validation(format!(
                "output resolution {}x{} is empty",
                width, height
            )));
        }

        // The frame is encoded at most once even when several slots use it.
        let mut frame_b64: Option<String> = None;
        let mut frame = || -> Result<Option<String>> {
            if frame_b64.is_none() {
                if let Some(frame) = &scene.frame {
                    frame_b64 = Some(frame.to_base64()?);
                }
            }
            Ok(frame_b64.clone())
        };

        let source_image = match params.mode {
            GenerationMode::ImageToImage => {
                let source = match &scene.source_image {
                    Some(source) => Some(source.to_base64()?),
                    None => frame()?,
                };
                Some(source.ok_or_else(|| {
                    SdError::Validation("image-to-image needs a source image".into())
                })?)
            }
            GenerationMode::TextToImage => None,
        };

        let mut auxiliary_units = Vec::new();
        for slot in slots.iter().filter(|slot| !slot.mode.is_none()) {
            log::debug!("Preparing {} unit", slot.mode);
            let input_image = match &slot.image {
                Some(image) => Some(image.to_base64()?),
                None => frame()?,
            }
            .ok_or_else(|| {
                SdError::Validation(format!(
                    "{} unit has no image and no rendered frame is available",
                    slot.mode
                ))
            })?;
            auxiliary_units.push(self.build_unit(slot, input_image)?);
        }

        Ok(GenerationRequest {
            mode: params.mode,
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            sampler_name: params.sampler.clone(),
            steps: params.steps,
            cfg_scale: params.cfg_scale,
            seed: params.seed,
            batch_size: params.batch_size,
            n_iter: params.n_iter,
            width,
            height,
            restore_faces: params.restore_faces,
            enable_hr: params.enable_high_res,
            hr_scale: params.hr_scale,
            hr_upscaler: params.upscaler.clone(),
            denoising_strength: params.denoising_strength,
            override_settings: params.override_settings.clone(),
            override_settings_restore_afterwards: params.restore_settings_afterwards,
            source_image,
            auxiliary_units,
        })
    }

    fn build_unit(&self, slot: &ConditioningSlot, input_image: String) -> Result<ConditioningUnit> {
        let settings = &slot.settings;
        ensure_finite("weight", settings.weight)?;
        if !(0.0..=1.0).contains(&settings.guidance_start)
            || !(0.0..=1.0).contains(&settings.guidance_end)
            || settings.guidance_start > settings.guidance_end
        {
            return Err(SdError::Validation(format!(
                "{} guidance range {}..{} must satisfy 0 <= start <= end <= 1",
                slot.mode, settings.guidance_start, settings.guidance_end
            )));
        }

        let descriptors = self.catalog.sliders_for(slot.mode);
        for key in settings.sliders.keys() {
            if !descriptors.iter().any(|d| &d.key() == key) {
                log::warn!("{} has no slider '{}', ignoring it", slot.mode, key);
            }
        }

        let mut sliders = BTreeMap::new();
        for descriptor in descriptors {
            let key = descriptor.key();
            let requested = settings.sliders.get(&key).copied().unwrap_or(descriptor.value);
            ensure_finite(&key, requested)?;
            sliders.insert(key, slider_value(descriptor, requested));
        }

        Ok(ConditioningUnit {
            mode: slot.mode,
            model: settings.model.clone(),
            weight: settings.weight,
            resize_policy: settings.resize_policy,
            low_memory_mode: settings.low_memory_mode,
            guidance_start: settings.guidance_start,
            guidance_end: settings.guidance_end,
            sliders,
            input_image,
        })
    }
}

/// Clamps to the descriptor range and picks the integer or fractional form.
pub fn slider_value(descriptor: &SliderDescriptor, requested: f64) -> SliderValue {
    let clamped = descriptor.clamp(requested);
    if clamped != requested {
        log::warn!(
            "{} = {} is outside [{}, {}], sending {}",
            descriptor.name,
            requested,
            descriptor.min,
            descriptor.max,
            clamped
        );
    }
    if descriptor.is_fractional() {
        SliderValue::Float(clamped)
    } else {
        SliderValue::Int(clamped.round() as i64)
    }
}

pub fn build_request(
    catalog: &ServerCatalog,
    scene: &SceneState,
    slots: &[ConditioningSlot],
) -> Result<GenerationRequest> {
    RequestBuilder::new(catalog).build(scene, slots)
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SdError::Validation(format!("{} must be a finite number", name)))
    }
}
