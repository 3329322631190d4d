//! Per-model input adapters for the Replicate backend.
//!
//! Every hosted model names its reference-image fields differently and wants
//! its own sampling defaults. Each entry in [`ADAPTERS`] describes one model as
//! data: how to place `input_images`, and which defaults to merge under the
//! caller's arguments. Unknown models pass through unchanged.

use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

/// Generic field carrying an ordered list of reference image URLs.
pub const INPUT_IMAGES_FIELD: &str = "input_images";

/// Exclusive upper bound for generated seeds.
pub const SEED_RANGE_END: u32 = 1_000_000;

const SDXL_NEGATIVE_PROMPT: &str = "worst quality, low quality, frame, border, signature, watermark";

/// Where a model expects reference images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageInputPolicy {
    /// No image input; `input_images` is dropped.
    None,
    /// The whole list moves to one field.
    ArrayRename(&'static str),
    /// The list is split over named fields by position.
    PositionalNamed(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Str(&'static str),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Fresh uniform draw from `0..SEED_RANGE_END` on every call.
    RandomSeed,
}

impl ParamValue {
    fn resolve(self, rng: &mut impl Rng) -> Value {
        match self {
            Self::Str(value) => Value::from(value),
            Self::Int(value) => Value::from(value),
            Self::Float(value) => Value::from(value),
            Self::Bool(value) => Value::from(value),
            Self::RandomSeed => Value::from(rng.gen_range(0..SEED_RANGE_END)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelAdapter {
    pub model: &'static str,
    pub images: ImageInputPolicy,
    pub defaults: &'static [(&'static str, ParamValue)],
}

use ImageInputPolicy::{ArrayRename, PositionalNamed};
use ParamValue::{Bool, Float, Int, RandomSeed, Str};

pub static ADAPTERS: &[ModelAdapter] = &[
    ModelAdapter {
        model: "google/nano-banana",
        images: ArrayRename("image_input"),
        defaults: &[("aspect_ratio", Str("1:1")), ("output_format", Str("png"))],
    },
    ModelAdapter {
        model: "black-forest-labs/flux-2-pro",
        images: ImageInputPolicy::None,
        defaults: &[
            ("resolution", Str("1 MP")),
            ("aspect_ratio", Str("1:1")),
            ("output_format", Str("png")),
            ("safety_tolerance", Int(5)),
        ],
    },
    ModelAdapter {
        model: "bytedance/seedream-4",
        images: ArrayRename("image_input"),
        defaults: &[
            ("size", Str("1K")),
            ("aspect_ratio", Str("1:1")),
            ("width", Int(1024)),
            ("height", Int(1024)),
            ("max_images", Int(1)),
            ("enhance_prompt", Bool(false)),
            ("sequential_image_generation", Str("disabled")),
        ],
    },
    ModelAdapter {
        model: "prunaai/p-image-edit",
        images: ArrayRename("images"),
        defaults: &[
            ("aspect_ratio", Str("1:1")),
            ("turbo", Bool(true)),
            ("seed", RandomSeed),
            ("disable_safety_checker", Bool(true)),
        ],
    },
    ModelAdapter {
        model: "luma/photon",
        images: PositionalNamed(&["image_reference", "style_reference", "character_reference"]),
        defaults: &[
            ("aspect_ratio", Str("1:1")),
            ("image_reference_weight", Float(0.85)),
            ("style_reference_weight", Float(0.85)),
            ("seed", RandomSeed),
        ],
    },
    ModelAdapter {
        model: "stability-ai/sdxl",
        images: PositionalNamed(&["image", "mask"]),
        defaults: &[
            ("width", Int(1024)),
            ("height", Int(1024)),
            ("scheduler", Str("K_EULER")),
            ("num_outputs", Int(1)),
            ("guidance_scale", Float(7.5)),
            ("apply_watermark", Bool(false)),
            ("prompt_strength", Float(0.9)),
            ("num_inference_steps", Int(25)),
            ("negative_prompt", Str(SDXL_NEGATIVE_PROMPT)),
            ("seed", RandomSeed),
            ("disable_safety_checker", Bool(true)),
        ],
    },
    ModelAdapter {
        model: "qwen/qwen-image-edit",
        images: PositionalNamed(&["image"]),
        defaults: &[
            ("go_fast", Bool(true)),
            ("aspect_ratio", Str("1:1")),
            ("seed", RandomSeed),
            ("output_format", Str("png")),
            ("disable_safety_checker", Bool(true)),
        ],
    },
    ModelAdapter {
        model: "xai/grok-imagine-image",
        images: PositionalNamed(&["image"]),
        defaults: &[("aspect_ratio", Str("1:1")), ("seed", RandomSeed)],
    },
    ModelAdapter {
        model: "minimax/image-01",
        images: PositionalNamed(&["subject_reference"]),
        defaults: &[
            ("aspect_ratio", Str("1:1")),
            ("number_of_images", Int(1)),
            ("prompt_optimizer", Bool(false)),
        ],
    },
    ModelAdapter {
        model: "qwen/qwen-image",
        images: ImageInputPolicy::None,
        defaults: &[
            ("aspect_ratio", Str("1:1")),
            ("go_fast", Bool(true)),
            ("guidance", Int(4)),
            ("strength", Float(0.9)),
            ("image_size", Str("optimize_for_quality")),
            ("lora_scale", Int(1)),
            ("output_format", Str("png")),
            ("enhance_prompt", Bool(false)),
            ("output_quality", Int(80)),
            ("negative_prompt", Str(SDXL_NEGATIVE_PROMPT)),
            ("num_inference_steps", Int(50)),
            ("seed", RandomSeed),
            ("disable_safety_checker", Bool(true)),
        ],
    },
    ModelAdapter {
        model: "prunaai/p-image",
        images: ImageInputPolicy::None,
        defaults: &[
            ("aspect_ratio", Str("1:1")),
            ("prompt_upsampling", Bool(false)),
            ("seed", RandomSeed),
            ("disable_safety_checker", Bool(true)),
        ],
    },
    ModelAdapter {
        model: "prunaai/z-image-turbo",
        images: ImageInputPolicy::None,
        defaults: &[
            ("width", Int(1024)),
            ("height", Int(1024)),
            ("go_fast", Bool(false)),
            ("output_format", Str("png")),
            ("guidance_scale", Int(0)),
            ("num_inference_steps", Int(8)),
            ("seed", RandomSeed),
        ],
    },
    ModelAdapter {
        model: "leonardoai/lucid-origin",
        images: ImageInputPolicy::None,
        defaults: &[
            ("style", Str("none")),
            ("contrast", Str("medium")),
            ("num_images", Int(1)),
            ("aspect_ratio", Str("1:1")),
            ("prompt_enhance", Bool(false)),
            ("generation_mode", Str("standard")),
        ],
    },
    ModelAdapter {
        model: "recraft-ai/recraft-v4",
        images: ImageInputPolicy::None,
        defaults: &[("aspect_ratio", Str("1:1")), ("size", Str("1024x1024"))],
    },
    ModelAdapter {
        model: "bytedance/sdxl-lightning-4step",
        images: ImageInputPolicy::None,
        defaults: &[
            ("width", Int(1024)),
            ("height", Int(1024)),
            ("negative_prompt", Str(SDXL_NEGATIVE_PROMPT)),
            ("seed", RandomSeed),
            ("disable_safety_checker", Bool(true)),
        ],
    },
];

/// Strips a `:version` pin from `owner/name:version`.
pub fn base_model(model: &str) -> &str {
    model.split(':').next().unwrap_or(model).trim()
}

pub fn find_adapter(model: &str) -> Option<&'static ModelAdapter> {
    let base = base_model(model);
    ADAPTERS.iter().find(|adapter| adapter.model == base)
}

/// Reshapes generic arguments for `model`. Identity when no adapter matches.
pub fn adapt(model: &str, args: Map<String, Value>) -> Map<String, Value> {
    match find_adapter(model) {
        Some(adapter) => adapter.apply(args, &mut rand::thread_rng()),
        None => args,
    }
}

impl ModelAdapter {
    pub fn apply(&self, mut args: Map<String, Value>, rng: &mut impl Rng) -> Map<String, Value> {
        for (key, value) in self.defaults {
            if matches!(args.get(*key), None | Some(Value::Null)) {
                args.insert((*key).to_string(), value.resolve(rng));
            }
        }

        let images = match args.remove(INPUT_IMAGES_FIELD) {
            None => return args,
            Some(Value::Array(items)) if !items.is_empty() => items,
            Some(other) => {
                debug!(
                    model = self.model,
                    value = %other,
                    "input_images is not a non-empty array; dropped"
                );
                return args;
            }
        };
        match self.images {
            ImageInputPolicy::None => {
                debug!(
                    model = self.model,
                    count = images.len(),
                    "model takes no reference images; input_images dropped"
                );
            }
            ArrayRename(field) => {
                debug!(model = self.model, field, count = images.len(), "input_images renamed");
                args.insert(field.to_string(), Value::Array(images));
            }
            PositionalNamed(fields) => {
                if images.len() > fields.len() {
                    debug!(
                        model = self.model,
                        kept = fields.len(),
                        dropped = images.len() - fields.len(),
                        "extra reference images dropped"
                    );
                }
                for (field, image) in fields.iter().zip(images) {
                    if !image.is_null() {
                        args.insert((*field).to_string(), image);
                    }
                }
            }
        }
        args
    }
}
