use serde_json::json;

use super::{
    ArgsNormalizer, CapabilityRegistry, FieldSpec, Intent, MethodDescriptor, SelectOption,
};

pub const FLUX_RESOLUTION_DEFAULT: &str = "ai_latest";

pub fn flux_resolution_options() -> Vec<SelectOption> {
    vec![
        SelectOption::new("NES 8-bit", "nes_8bit"),
        SelectOption::new("SNES 16-bit", "snes_16bit"),
        SelectOption::new("AI Legacy", "ai_legacy"),
        SelectOption::new("AI Classic", "ai_classic"),
        SelectOption::new("AI Latest", FLUX_RESOLUTION_DEFAULT),
    ]
}

fn replicate_model_options() -> Vec<SelectOption> {
    vec![
        SelectOption::new("Luma Photon", "luma/photon"),
        SelectOption::new("PrunaAI p-image", "prunaai/p-image"),
        SelectOption::new("PrunaAI p-image-edit", "prunaai/p-image-edit"),
        SelectOption::new("PrunaAI z-image-turbo", "prunaai/z-image-turbo"),
        SelectOption::new("Google Nano Banana", "google/nano-banana"),
        SelectOption::new("Flux 2 Pro", "black-forest-labs/flux-2-pro"),
        SelectOption::new("Seedream 4", "bytedance/seedream-4"),
        SelectOption::new("SDXL Lightning", "bytedance/sdxl-lightning-4step"),
        SelectOption::new("SDXL", "stability-ai/sdxl"),
        SelectOption::new("Qwen Image", "qwen/qwen-image"),
        SelectOption::new("Qwen Image Edit", "qwen/qwen-image-edit"),
        SelectOption::new("Grok Imagine", "xai/grok-imagine-image"),
        SelectOption::new("MiniMax Image 01", "minimax/image-01"),
        SelectOption::new("Lucid Origin", "leonardoai/lucid-origin"),
        SelectOption::new("Recraft V4", "recraft-ai/recraft-v4"),
    ]
}

fn replicate_input_default() -> String {
    serde_json::to_string_pretty(&json!({
        "aspect_ratio": "1:1",
        "disable_safety_checker": true,
    }))
    .unwrap_or_else(|_| String::from("{}"))
}

fn prompt() -> FieldSpec {
    FieldSpec::text("Prompt").required()
}

/// Descriptors in manifest order.
pub fn default_method_descriptors() -> Vec<(String, MethodDescriptor)> {
    vec![
        (
            String::from("fluxImage"),
            MethodDescriptor::new(
                "Flux 2 Pro",
                "Black Forest Labs Flux 2 Pro. Higher quality, higher credits.",
                Intent::ImageGenerate,
                3.0,
            )
            .field("prompt", prompt()),
        ),
        (
            String::from("fluxImageFlex"),
            MethodDescriptor::new(
                "Flux 2 Flex",
                "Black Forest Labs Flux 2 Flex. More control, highest cost.",
                Intent::ImageGenerate,
                6.0,
            )
            .field("prompt", prompt()),
        ),
        (
            String::from("fluxImageKlein"),
            MethodDescriptor::new(
                "Flux Klein",
                "Black Forest Labs Flux Klein + resolution options. Lower quality, lower credits.",
                Intent::ImageGenerate,
                1.5,
            )
            .field("prompt", prompt())
            .field(
                "resolution",
                FieldSpec::select("Resolution", flux_resolution_options())
                    .with_default(FLUX_RESOLUTION_DEFAULT),
            ),
        ),
        (
            String::from("fluxImageEdit"),
            MethodDescriptor::new(
                "Flux 2 Pro - Image Edit",
                "Downloads the image at Image URL and edits it with Flux 2 Pro using your prompt.",
                Intent::ImageMutate,
                5.0,
            )
            .field("image_url", FieldSpec::image_url("Image URL").required())
            .field("prompt", prompt()),
        ),
        (
            String::from("pixelLabImage"),
            MethodDescriptor::new(
                "PixelLab",
                "Generate pixel art with PixelLab's Pixflux and Bitforge",
                Intent::ImageGenerate,
                0.2,
            )
            .field("prompt", prompt())
            .field(
                "model",
                FieldSpec::select(
                    "Model",
                    vec![
                        SelectOption::new("Pixflux", "pixflux"),
                        SelectOption::new("Bitforge", "bitforge"),
                    ],
                )
                .with_default("pixflux"),
            )
            .field(
                "no_background",
                FieldSpec::boolean("No Background").with_default(false),
            ),
        ),
        (
            String::from("uploadImage"),
            MethodDescriptor::new(
                "Upload Image From URL",
                "Resizes an image from a URL to 1024x1024 (cover + center crop).",
                Intent::ImageGenerate,
                0.0,
            )
            .field("image_url", FieldSpec::image_url("Image URL").required()),
        ),
        (
            String::from("replicate"),
            MethodDescriptor::new(
                "Replicate",
                "Run a Replicate image generation model.",
                Intent::ImageGenerate,
                3.0,
            )
            .field(
                "model",
                FieldSpec::select("Model", replicate_model_options()).required(),
            )
            .field("prompt", prompt())
            .field(
                "input",
                FieldSpec::text("Input (JSON)").with_default(replicate_input_default()),
            )
            .normalizer(ArgsNormalizer::JsonExtras {
                backend_field: "model",
                prompt_field: "prompt",
                extras_field: "input",
            }),
        ),
        (
            String::from("gradientCircle"),
            MethodDescriptor::new(
                "Gradient Circle",
                "Generates a 1024x1024 image with a gradient background using random colors at each corner and a random colored circle",
                Intent::ImageGenerate,
                0.25,
            ),
        ),
        (
            String::from("centeredTextOnWhite"),
            MethodDescriptor::new(
                "Centered Text on White",
                "Generates a 1024x1024 image with centered text rendered on a white background",
                Intent::ImageGenerate,
                0.25,
            )
            .field("text", FieldSpec::text("Text").required())
            .field("color", FieldSpec::color("Text Color")),
        ),
    ]
}

/// Builds the shipped catalog. The table is static, so a definition error is
/// a programming mistake and aborts startup.
pub fn default_registry() -> CapabilityRegistry {
    match CapabilityRegistry::new(default_method_descriptors()) {
        Ok(registry) => registry,
        Err(error) => panic!("built-in method catalog is invalid: {error}"),
    }
}
