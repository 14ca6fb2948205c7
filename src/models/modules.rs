//! Built-in ControlNet vocabulary: the preprocessor modules, the stock
//! ControlNet 1.1 model names and the slider layout of each module.

use super::catalog::SliderDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! conditioning_modes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A ControlNet preprocessor. `None` marks an unused slot.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum ConditioningMode {
            $($variant),+
        }

        impl ConditioningMode {
            pub const ALL: &'static [ConditioningMode] = &[$(ConditioningMode::$variant),+];

            /// Module name as the server expects it in the `module` field.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ConditioningMode::$variant => $name),+
                }
            }
        }
    };
}

conditioning_modes! {
    None => "none",
    Canny => "canny",
    Depth => "depth",
    DepthLeres => "depth_leres",
    DepthLeresPlusPlus => "depth_leres++",
    Hed => "hed",
    HedSafe => "hed_safe",
    MediapipeFace => "mediapipe_face",
    Mlsd => "mlsd",
    NormalMap => "normal_map",
    Openpose => "openpose",
    OpenposeHand => "openpose_hand",
    OpenposeFace => "openpose_face",
    OpenposeFaceonly => "openpose_faceonly",
    OpenposeFull => "openpose_full",
    ClipVision => "clip_vision",
    Color => "color",
    Pidinet => "pidinet",
    PidinetSafe => "pidinet_safe",
    PidinetSketch => "pidinet_sketch",
    PidinetScribble => "pidinet_scribble",
    ScribbleXdog => "scribble_xdog",
    ScribbleHed => "scribble_hed",
    Segmentation => "segmentation",
    Threshold => "threshold",
    DepthZoe => "depth_zoe",
    NormalBae => "normal_bae",
    OneformerCoco => "oneformer_coco",
    OneformerAde20k => "oneformer_ade20k",
    Lineart => "lineart",
    LineartCoarse => "lineart_coarse",
    LineartAnime => "lineart_anime",
    LineartStandard => "lineart_standard",
    Shuffle => "shuffle",
    TileResample => "tile_resample",
    Invert => "invert",
    LineartAnimeDenoise => "lineart_anime_denoise",
    ReferenceOnly => "reference_only",
    Inpaint => "inpaint",
}

impl ConditioningMode {
    pub fn is_none(&self) -> bool {
        matches!(self, ConditioningMode::None)
    }

    /// Identifier-safe form (`depth_leres++` becomes `depth_leres_plusplus`).
    pub fn identifier(&self) -> String {
        self.as_str().replace("++", "_plusplus")
    }

    /// Title-cased label for selection lists.
    pub fn display_name(&self) -> String {
        if *self == ConditioningMode::DepthLeresPlusPlus {
            return "Depth Leres++".to_string();
        }
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn builtin_sliders(&self) -> &'static [StaticSlider] {
        builtin_sliders(*self)
    }
}

impl fmt::Display for ConditioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditioningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ConditioningMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == wanted || mode.identifier() == wanted)
            .ok_or_else(|| format!("unknown conditioning mode '{}'", s))
    }
}

impl TryFrom<String> for ConditioningMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConditioningMode> for String {
    fn from(mode: ConditioningMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Compile-time slider layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSlider {
    pub name: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: Option<f64>,
}

impl StaticSlider {
    const fn new(name: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            value,
            min,
            max,
            step: None,
        }
    }

    const fn stepped(name: &'static str, value: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            name,
            value,
            min,
            max,
            step: Some(step),
        }
    }

    pub fn to_descriptor(&self) -> SliderDescriptor {
        SliderDescriptor {
            name: self.name.to_string(),
            value: self.value,
            min: self.min,
            max: self.max,
            step: self.step,
        }
    }
}

const PREPROCESSOR_RES: StaticSlider =
    StaticSlider::new("Preprocessor Resolution", 512.0, 64.0, 2048.0);

const RES_ONLY: &[StaticSlider] = &[PREPROCESSOR_RES];

const CANNY: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::new("Canny Low Threshold", 100.0, 1.0, 255.0),
    StaticSlider::new("Canny High Threshold", 200.0, 1.0, 255.0),
];

const DEPTH_LERES: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::stepped("Remove Near %", 0.0, 0.0, 100.0, 0.1),
    StaticSlider::stepped("Remove Background %", 0.0, 0.0, 100.0, 0.1),
];

const MEDIAPIPE_FACE: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::stepped("Max Faces", 1.0, 1.0, 10.0, 1.0),
    StaticSlider::stepped("Min Face Confidence", 0.5, 0.01, 1.0, 0.01),
];

const MLSD: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::stepped("MLSD Value Threshold", 0.1, 0.01, 2.0, 0.01),
    StaticSlider::stepped("MLSD Distance Threshold", 0.1, 0.01, 20.0, 0.01),
];

const NORMAL_MAP: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::stepped("Normal Background Threshold", 0.4, 0.0, 1.0, 0.01),
];

const SCRIBBLE_XDOG: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::new("XDoG Threshold", 32.0, 1.0, 64.0),
];

const THRESHOLD: &[StaticSlider] = &[
    PREPROCESSOR_RES,
    StaticSlider::new("Binarization Threshold", 127.0, 0.0, 255.0),
];

const TILE_RESAMPLE: &[StaticSlider] =
    &[StaticSlider::stepped("Down Sampling Rate", 1.0, 1.0, 8.0, 0.01)];

fn builtin_sliders(mode: ConditioningMode) -> &'static [StaticSlider] {
    use ConditioningMode::*;
    match mode {
        Canny => CANNY,
        Depth | Hed | HedSafe | Openpose | OpenposeFull | Color | ScribbleHed | Segmentation => {
            RES_ONLY
        }
        DepthLeres | DepthLeresPlusPlus => DEPTH_LERES,
        MediapipeFace => MEDIAPIPE_FACE,
        Mlsd => MLSD,
        NormalMap => NORMAL_MAP,
        ScribbleXdog => SCRIBBLE_XDOG,
        Threshold => THRESHOLD,
        TileResample => TILE_RESAMPLE,
        _ => &[],
    }
}

/// Stock ControlNet 1.1 checkpoints, `none` first.
pub const MODEL_LIST: &[&str] = &[
    "none",
    "control_v11e_sd15_ip2p [c4bb465c]",
    "control_v11e_sd15_shuffle [526bfdae]",
    "control_v11f1e_sd15_tile [a371b31b]",
    "control_v11f1p_sd15_depth [cfd03158]",
    "control_v11p_sd15_canny [d14c016b]",
    "control_v11p_sd15_inpaint [ebff9138]",
    "control_v11p_sd15_lineart [43d4be0d]",
    "control_v11p_sd15_mlsd [aca30ff0]",
    "control_v11p_sd15_normalbae [316696f1]",
    "control_v11p_sd15_openpose [cab727d4]",
    "control_v11p_sd15_scribble [d4ba51ff]",
    "control_v11p_sd15_seg [e1f51eb9]",
    "control_v11p_sd15_softedge [a8575a2a]",
    "control_v11p_sd15s2_lineart_anime [3825e83e]",
];

pub const SAMPLER_LIST: &[&str] = &[
    "Euler a",
    "Euler",
    "LMS",
    "Heun",
    "DPM2",
    "DPM2 a",
    "DPM++ 2S a",
    "DPM++ 2M",
    "DPM++ SDE",
    "DPM fast",
    "DPM adaptive",
    "LMS Karras",
    "DPM2 Karras",
    "DPM2 a Karras",
    "DPM++ 2S a Karras",
    "DPM++ 2M Karras",
    "DPM++ SDE Karras",
];

pub const UPSCALER_LIST: &[&str] = &[
    "None",
    "Lanczos",
    "Nearest",
    "ESRGAN_4x",
    "LDSR",
    "R-ESRGAN 4x+",
    "R-ESRGAN 4x+ Anime6B",
    "ScuNET",
    "ScuNET PSNR",
    "SwinIR_4x",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_round_trips_through_its_name() {
        for mode in ConditioningMode::ALL {
            assert_eq!(mode.as_str().parse::<ConditioningMode>(), Ok(*mode));
        }
        assert_eq!(ConditioningMode::ALL.len(), 39);
    }

    #[test]
    fn leres_plusplus_accepts_identifier_alias() {
        assert_eq!(
            "depth_leres_plusplus".parse::<ConditioningMode>(),
            Ok(ConditioningMode::DepthLeresPlusPlus)
        );
        assert_eq!(
            ConditioningMode::DepthLeresPlusPlus.identifier(),
            "depth_leres_plusplus"
        );
        assert_eq!(
            ConditioningMode::DepthLeresPlusPlus.display_name(),
            "Depth Leres++"
        );
    }

    #[test]
    fn display_names_are_title_cased() {
        assert_eq!(ConditioningMode::OpenposeFaceonly.display_name(), "Openpose Faceonly");
        assert_eq!(ConditioningMode::Canny.display_name(), "Canny");
    }

    #[test]
    fn slider_table_covers_known_modules() {
        assert_eq!(ConditioningMode::Canny.builtin_sliders().len(), 3);
        assert_eq!(ConditioningMode::TileResample.builtin_sliders()[0].step, Some(0.01));
        assert!(ConditioningMode::Invert.builtin_sliders().is_empty());
        assert!(ConditioningMode::None.builtin_sliders().is_empty());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!("laser_eyes".parse::<ConditioningMode>().is_err());
    }
}
