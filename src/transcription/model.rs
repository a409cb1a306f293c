//! # Whisper Model Loading and Decoding
//!
//! Loads a Whisper checkpoint from HuggingFace with Candle and decodes
//! Pashto speech with greedy argmax decoding.
//!
//! ## Loading Process:
//! 1. Download config, tokenizer and weights from HuggingFace (cached locally)
//! 2. Build the mel filter bank for the checkpoint's mel-bin count
//! 3. Initialize model weights on the configured device
//!
//! ## Decoding:
//! Special tokens (start, end, language, task, no-timestamps) are resolved
//! through the tokenizer at load time rather than hardcoded, so any Whisper
//! checkpoint with a compatible tokenizer works unmodified.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

/// Special token IDs resolved from the checkpoint's tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    language: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer, language: &str) -> Result<Self> {
        let required = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("tokenizer is missing required token {}", token))
        };

        let language_token = format!("<|{}|>", language);
        let language = tokenizer.token_to_id(&language_token);
        if language.is_none() {
            tracing::warn!(
                "tokenizer has no language token {}, decoding without a language hint",
                language_token
            );
        }

        Ok(Self {
            sot: required("<|startoftranscript|>")?,
            eot: required("<|endoftext|>")?,
            transcribe: required("<|transcribe|>")?,
            no_timestamps: required("<|notimestamps|>")?,
            language,
        })
    }
}

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// Decoding mutates the model's KV cache, so the engine keeps this behind
/// a write lock. One transcription runs at a time, which matches the
/// single-slot pipeline above it.
pub struct PashtoAsrModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    special: SpecialTokens,
}

impl PashtoAsrModel {
    /// Load a Whisper checkpoint from HuggingFace.
    ///
    /// ## Parameters:
    /// - **repo**: HuggingFace model repository, e.g. "openai/whisper-small"
    /// - **language**: ISO code used for the decoder language token ("ps")
    pub async fn load(repo: &str, language: &str) -> Result<Self> {
        tracing::info!("Loading Whisper model from {}...", repo);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| anyhow!("failed to create HuggingFace API client: {}", e))?
        };

        let api_repo = api.model(repo.to_string());

        let config_filename = api_repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("failed to download config.json from {}: {}", repo, e))?;
        let tokenizer_filename = api_repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("failed to download tokenizer.json from {}: {}", repo, e))?;
        let model_filename = api_repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("failed to download model weights from {}: {}", repo, e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;
        let special = SpecialTokens::resolve(&tokenizer, language)?;

        let mel_filters = mel_filter_bank(config.num_mel_bins as usize);

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper model {} loaded in {:.2}s",
            repo,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            special,
        })
    }

    /// Transcribe mono 16kHz samples to text.
    ///
    /// ## Audio Requirements:
    /// - Sample rate: 16kHz
    /// - Format: 32-bit float, range [-1.0, 1.0]
    /// - Channels: mono
    ///
    /// Decoding is greedy argmax with a repetition cutoff. Returns the raw
    /// transcript; outcome classification happens in the engine.
    pub fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("audio data is empty"));
        }

        let start_time = std::time::Instant::now();

        let mel = self.pcm_to_mel(samples)?;
        let mel = mel.unsqueeze(0)?;

        let encoder_output = self.model.encoder.forward(&mel, true)?;

        let mut tokens = vec![self.special.sot];
        if let Some(language) = self.special.language {
            tokens.push(language);
        }
        tokens.push(self.special.transcribe);
        tokens.push(self.special.no_timestamps);
        let prompt_len = tokens.len();

        const MAX_TOKENS: usize = 224;

        for i in 0..MAX_TOKENS {
            let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            // The decoder forward returns layer-normed hidden states, not
            // logits; final_linear projects them onto the vocabulary.
            let hidden = self
                .model
                .decoder
                .forward(&token_tensor, &encoder_output, i == 0)?;

            let (_, seq_len, _) = hidden.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&hidden.i((..1, seq_len - 1..))?)?;
            let next_token = logits.i((0, 0))?.argmax(0)?.to_scalar::<u32>()?;

            if next_token == self.special.eot {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next_token) {
                tracing::debug!("stopping decode on repetition after {} tokens", i);
                break;
            }

            tokens.push(next_token);
        }

        let text = self.decode_tokens(&tokens[prompt_len..])?;

        tracing::debug!(
            "transcribed {:.2}s of audio in {:.2}s: '{}'",
            samples.len() as f64 / 16_000.0,
            start_time.elapsed().as_secs_f64(),
            text
        );

        Ok(text)
    }

    /// Convert PCM samples to the model's log-mel spectrogram input.
    fn pcm_to_mel(&self, samples: &[f32]) -> Result<Tensor> {
        // Whisper operates on fixed 30-second windows.
        let target_len = m::CHUNK_LENGTH * m::SAMPLE_RATE;
        let mut padded = vec![0.0f32; target_len];
        let copy_len = samples.len().min(target_len);
        padded[..copy_len].copy_from_slice(&samples[..copy_len]);

        let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let n_mels = self.config.num_mel_bins as usize;
        let n_frames = mel.len() / n_mels;
        Ok(Tensor::from_vec(mel, (n_mels, n_frames), &self.device)?)
    }

    /// Decode output tokens to text, dropping any special-token artifacts.
    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

/// Triangular mel filter bank over the FFT bins Whisper uses (n_fft = 400).
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    const SAMPLE_RATE: f32 = 16_000.0;
    const N_FREQS: usize = m::N_FFT / 2 + 1;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10.0f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(SAMPLE_RATE / 2.0);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_of = |hz: f32| hz * m::N_FFT as f32 / SAMPLE_RATE;

    let mut filters = vec![0.0f32; n_mels * N_FREQS];
    for mel_bin in 0..n_mels {
        let left = bin_of(mel_points[mel_bin]);
        let center = bin_of(mel_points[mel_bin + 1]);
        let right = bin_of(mel_points[mel_bin + 2]);

        for freq in 0..N_FREQS {
            let f = freq as f32;
            let weight = if f >= left && f <= center && center > left {
                (f - left) / (center - left)
            } else if f > center && f <= right && right > center {
                (right - f) / (right - center)
            } else {
                0.0
            };
            filters[mel_bin * N_FREQS + freq] = weight;
        }
    }

    filters
}

/// Cut off decoding when the model loops on itself.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 3 && tokens[tokens.len() - 3..].iter().all(|&t| t == new_token) {
        return true;
    }

    if tokens.len() >= 6 {
        let last_3 = &tokens[tokens.len() - 3..];
        let prev_3 = &tokens[tokens.len() - 6..tokens.len() - 3];
        if last_3 == prev_3 {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use candle_core::{DType, Shape};
    use candle_nn::var_builder::SimpleBackend;
    use tokenizers::models::wordlevel::WordLevel;

    /// Zero weights except for a few named overrides, so decode outcomes
    /// are fully determined by the overridden tensors.
    struct ZeroedWeights {
        overrides: HashMap<String, Tensor>,
    }

    impl SimpleBackend for ZeroedWeights {
        fn get(
            &self,
            s: Shape,
            name: &str,
            _: candle_nn::Init,
            dtype: DType,
            dev: &Device,
        ) -> candle_core::Result<Tensor> {
            match self.overrides.get(name) {
                Some(t) => Ok(t.clone()),
                None => Tensor::zeros(s, dtype, dev),
            }
        }

        fn contains_tensor(&self, _name: &str) -> bool {
            true
        }
    }

    const D_MODEL: usize = 4;
    const VOCAB_SIZE: usize = 8;

    /// A miniature model whose decoder always prefers token 6 ("salaam").
    ///
    /// Token embeddings are zero apart from the last prompt token (id 4)
    /// and token 6; with the final layer norm set to ones, projecting the
    /// hidden state onto the vocabulary makes token 6 the greedy pick at
    /// every step. Token 6 lies outside the hidden-state dimension range,
    /// so an argmax over unprojected hidden states can never produce it.
    fn tiny_model() -> PashtoAsrModel {
        let device = Device::Cpu;
        let config = Config {
            num_mel_bins: 80,
            max_source_positions: 1500,
            d_model: D_MODEL,
            encoder_attention_heads: 2,
            encoder_layers: 1,
            vocab_size: VOCAB_SIZE,
            max_target_positions: 24,
            decoder_attention_heads: 2,
            decoder_layers: 1,
            suppress_tokens: vec![],
        };

        let mut embed = vec![0.0f32; VOCAB_SIZE * D_MODEL];
        embed[4 * D_MODEL] = 1.0;
        embed[6 * D_MODEL] = 2.0;

        let mut overrides = HashMap::new();
        overrides.insert(
            "model.decoder.embed_tokens.weight".to_string(),
            Tensor::from_vec(embed, (VOCAB_SIZE, D_MODEL), &device).unwrap(),
        );
        overrides.insert(
            "model.decoder.layer_norm.weight".to_string(),
            Tensor::ones((D_MODEL,), m::DTYPE, &device).unwrap(),
        );

        let vb = VarBuilder::from_backend(
            Box::new(ZeroedWeights { overrides }),
            m::DTYPE,
            device.clone(),
        );
        let model = m::model::Whisper::load(&vb, config.clone()).unwrap();

        let vocab: HashMap<String, u32> = [
            "<unk>",
            "<|startoftranscript|>",
            "<|endoftext|>",
            "<|transcribe|>",
            "<|notimestamps|>",
            "hello",
            "salaam",
            "world",
        ]
        .iter()
        .enumerate()
        .map(|(i, token)| (token.to_string(), i as u32))
        .collect();
        let word_level = WordLevel::builder()
            .vocab(vocab)
            .unk_token("<unk>".to_string())
            .build()
            .unwrap();
        let tokenizer = Tokenizer::new(word_level);
        let special = SpecialTokens::resolve(&tokenizer, "ps").unwrap();
        let mel_filters = mel_filter_bank(config.num_mel_bins);

        PashtoAsrModel {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            special,
        }
    }

    #[test]
    fn test_decoder_hidden_states_project_to_vocab_logits() {
        let mut model = tiny_model();
        let mel = Tensor::zeros((1, 80, 20), m::DTYPE, &model.device).unwrap();
        let encoded = model.model.encoder.forward(&mel, true).unwrap();
        let prompt = Tensor::new(&[1u32, 3, 4][..], &model.device)
            .unwrap()
            .unsqueeze(0)
            .unwrap();

        let hidden = model.model.decoder.forward(&prompt, &encoded, true).unwrap();
        assert_eq!(hidden.dims3().unwrap().2, D_MODEL);

        let logits = model.model.decoder.final_linear(&hidden).unwrap();
        assert_eq!(logits.dims3().unwrap().2, VOCAB_SIZE);
    }

    #[test]
    fn test_transcribe_greedy_picks_vocabulary_tokens() {
        let mut model = tiny_model();
        let samples = vec![0.05f32; 1600];

        let text = model.transcribe(&samples).unwrap();

        // The repetition cutoff ends decoding after three identical picks.
        assert!(text.contains("salaam"), "unexpected transcript: {}", text);
        assert!(!text.contains("<unk>"), "unexpected transcript: {}", text);
    }

    #[test]
    fn test_repetition_detection() {
        assert!(is_repetitive(&[1, 2, 7, 7, 7], 7));
        assert!(is_repetitive(&[9, 1, 2, 3, 1, 2, 3], 4));
        assert!(!is_repetitive(&[1, 2, 3], 3));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5, 6], 7));
    }

    #[test]
    fn test_mel_filter_bank_shape_and_weights() {
        let n_mels = 80;
        let filters = mel_filter_bank(n_mels);
        assert_eq!(filters.len(), n_mels * (m::N_FFT / 2 + 1));
        assert!(filters.iter().all(|&w| (0.0..=1.0).contains(&w)));
        // Every filter has at least one non-zero weight.
        let n_freqs = m::N_FFT / 2 + 1;
        for mel_bin in 0..n_mels {
            let row = &filters[mel_bin * n_freqs..(mel_bin + 1) * n_freqs];
            assert!(row.iter().any(|&w| w > 0.0), "empty filter {}", mel_bin);
        }
    }
}
