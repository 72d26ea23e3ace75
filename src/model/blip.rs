use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{blip, blip_text, quantized_blip};
use candle_transformers::quantized_var_builder;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::RgbImage;
use tokenizers::Tokenizer;

use crate::preprocess::image_to_tensor;
use crate::{CaptionError, Captioner, Result};

/// `[DEC]`, the BLIP text decoder's start token.
const DECODER_START_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 50;

const QUANTIZED_REPO: &str = "lmz/candle-blip";
const QUANTIZED_LARGE_FILE: &str = "blip-image-captioning-large-q4k.gguf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelKind {
    #[default]
    Base,
    Large,
}

impl ModelKind {
    pub fn repo_id(&self) -> &'static str {
        match self {
            ModelKind::Base => "Salesforce/blip-image-captioning-base",
            ModelKind::Large => "Salesforce/blip-image-captioning-large",
        }
    }

    // The large checkpoint only ships safetensors on this PR branch.
    fn revision(&self) -> &'static str {
        match self {
            ModelKind::Base => "main",
            ModelKind::Large => "refs/pr/18",
        }
    }

    pub fn config(&self) -> blip::Config {
        match self {
            ModelKind::Base => base_config(),
            ModelKind::Large => blip::Config::image_captioning_large(),
        }
    }
}

fn base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = blip::VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub kind: ModelKind,
    /// Use the q4k gguf checkpoint instead of full precision weights.
    pub quantized: bool,
    /// Local weights, `.safetensors` or `.gguf`. Skips the hub download.
    pub weights: Option<PathBuf>,
    /// Local `tokenizer.json`. Skips the hub download.
    pub tokenizer: Option<PathBuf>,
    pub max_new_tokens: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            kind: ModelKind::default(),
            quantized: false,
            weights: None,
            tokenizer: None,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

impl LoadOptions {
    fn wants_gguf(&self) -> bool {
        match &self.weights {
            Some(path) => is_gguf(path),
            None => self.quantized,
        }
    }
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gguf"))
        .unwrap_or(false)
}

enum Weights {
    Full(blip::BlipForConditionalGeneration),
    Quantized(quantized_blip::BlipForConditionalGeneration),
}

impl Weights {
    fn embed_image(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Weights::Full(m) => pixels.apply(m.vision_model()),
            Weights::Quantized(m) => pixels.apply(m.vision_model()),
        }
    }

    fn decode_step(
        &mut self,
        input_ids: &Tensor,
        image_embeds: &Tensor,
    ) -> candle_core::Result<Tensor> {
        match self {
            Weights::Full(m) => m.text_decoder().forward(input_ids, image_embeds),
            Weights::Quantized(m) => m.text_decoder().forward(input_ids, image_embeds),
        }
    }

    fn reset_kv_cache(&mut self) {
        match self {
            Weights::Full(m) => m.reset_kv_cache(),
            Weights::Quantized(m) => m.reset_kv_cache(),
        }
    }
}

/// BLIP image captioning, loaded once and reused for every image of a run.
pub struct BlipCaptioner {
    model: Weights,
    tokenizer: Tokenizer,
    logits_processor: LogitsProcessor,
    device: Device,
    max_new_tokens: usize,
}

impl BlipCaptioner {
    pub fn load(options: &LoadOptions, device: &Device) -> Result<Self> {
        let kind = options.kind;
        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            kind.repo_id().to_string(),
            RepoType::Model,
            kind.revision().to_string(),
        ));

        let tokenizer_path = match &options.tokenizer {
            Some(path) => path.clone(),
            None => repo.get("tokenizer.json")?,
        };
        tracing::debug!("tokenizer: {}", tokenizer_path.display());
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| CaptionError::Tokenizer(e.to_string()))?;

        let gguf = options.wants_gguf();
        let weights_path = match &options.weights {
            Some(path) => path.clone(),
            None if gguf => match kind {
                ModelKind::Large => api
                    .model(QUANTIZED_REPO.to_string())
                    .get(QUANTIZED_LARGE_FILE)?,
                ModelKind::Base => {
                    return Err(CaptionError::Msg(
                        "there is no published quantized base checkpoint".to_string(),
                    ))
                }
            },
            None => repo.get("model.safetensors")?,
        };
        tracing::debug!("weights: {}", weights_path.display());

        let config = kind.config();
        let model = if gguf {
            let vb = quantized_var_builder::VarBuilder::from_gguf(&weights_path, device)?;
            Weights::Quantized(quantized_blip::BlipForConditionalGeneration::new(&config, vb)?)
        } else {
            let vb = unsafe {
                candle_nn::VarBuilder::from_mmaped_safetensors(
                    &[&weights_path],
                    DType::F32,
                    device,
                )?
            };
            Weights::Full(blip::BlipForConditionalGeneration::new(&config, vb)?)
        };

        // No temperature: argmax at every step.
        let logits_processor = LogitsProcessor::new(1337, None, None);

        Ok(Self {
            model,
            tokenizer,
            logits_processor,
            device: device.clone(),
            max_new_tokens: options.max_new_tokens,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn generate(&mut self, image_embeds: &Tensor) -> Result<Vec<u32>> {
        self.model.reset_kv_cache();

        let Self {
            model,
            logits_processor,
            device,
            max_new_tokens,
            ..
        } = self;
        greedy_decode(*max_new_tokens, |context| {
            let input_ids = Tensor::new(context, device)?.unsqueeze(0)?;
            let logits = model.decode_step(&input_ids, image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            Ok(logits_processor.sample(&logits)?)
        })
    }
}

/// Runs the decoder loop from `[DEC]` until `[SEP]` or `max_new_tokens`
/// steps. `step` gets the ids not yet in the KV cache: the whole prefix on
/// the first call, then only the last token. Neither `[DEC]` nor `[SEP]` is
/// returned.
fn greedy_decode<F>(max_new_tokens: usize, mut step: F) -> Result<Vec<u32>>
where
    F: FnMut(&[u32]) -> Result<u32>,
{
    let mut token_ids = vec![DECODER_START_TOKEN_ID];
    for index in 0..max_new_tokens {
        let context_size = if index > 0 { 1 } else { token_ids.len() };
        let start_pos = token_ids.len().saturating_sub(context_size);
        let token = step(&token_ids[start_pos..])?;
        if token == SEP_TOKEN_ID {
            break;
        }
        token_ids.push(token);
    }

    Ok(token_ids.split_off(1))
}

impl Captioner for BlipCaptioner {
    fn caption(&mut self, image: &RgbImage) -> Result<String> {
        let pixels = image_to_tensor(image, &self.device)?;
        let image_embeds = self.model.embed_image(&pixels.unsqueeze(0)?)?;
        let token_ids = self.generate(&image_embeds)?;
        tracing::debug!("generated {} tokens", token_ids.len());

        self.tokenizer
            .decode(&token_ids, true)
            .map_err(|e| CaptionError::Tokenizer(e.to_string()))
    }
}
