//! Local Llama model running on the GPU through wgml.

use crate::config::ModelSettings;
use crate::core::assistant::{FinishReason, GenerationEvent, InferenceTask, LocalModel, PromptTemplate};
use crate::core::services::ModelSlot;
use anyhow::{Context, anyhow, bail};
use di::Ref;
use log::{debug, error, info, warn};
use nalgebra::DVector;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::time::Instant;
use wgcore::gpu::GpuInstance;
use wgcore::kernel::CommandEncoderExt;
use wgcore::shapes::ViewShapeBuffers;
use wgml::gguf::Gguf;
use wgml::models::gpt2::Gpt2Tokenizer;
use wgml::models::llama2::cpu::Llama2Config;
use wgml::models::llama2::{Llama2, Llama2State, Llama2Weights, LlamaModelType};
use wgml::models::sampler::Sampler;

const TOP_P: f32 = 0.95;

pub struct LoadedModel {
    name: String,
    gpu: GpuInstance,
    transformer: Llama2,
    config: Llama2Config,
    weights: Llama2Weights,
    tokenizer: Gpt2Tokenizer,
    state: Llama2State,
    template: PromptTemplate,
    view_shapes: ViewShapeBuffers,
}

impl LoadedModel {
    pub async fn load(settings: &ModelSettings) -> anyhow::Result<LoadedModel> {
        info!("Loading model: {}", settings.model_file.display());

        let gguf_file = File::open(&settings.model_file)
            .await
            .with_context(|| format!("failed to open {}", settings.model_file.display()))?;
        let gguf_start_time = Instant::now();
        let gguf_mmap =
            unsafe { memmap2::Mmap::map(&gguf_file) }.context("failed to map model file")?;
        let gguf = Gguf::from_bytes(&gguf_mmap[..])
            .map_err(|e| anyhow!("failed to parse GGUF file: {e:?}"))?;
        info!(
            "GGUF model loaded in {:.2} seconds.",
            gguf_start_time.elapsed().as_secs_f32()
        );

        let chat_template = gguf
            .metadata
            .get("tokenizer.chat_template")
            .map(|v| v.as_string().to_owned())
            .ok_or_else(|| anyhow!("model file has no tokenizer.chat_template"))?;
        let name = gguf
            .metadata
            .get("general.name")
            .map(|v| v.as_string().to_owned())
            .unwrap_or_else(|| model_name_from_path(&settings.model_file));

        let gpu = GpuInstance::new()
            .await
            .map_err(|e| anyhow!("failed to create GPU: {e:?}"))?;
        let device = gpu.device();
        info!("GPU device created.");
        debug!("GPU device features: {:?}", device.features());

        let transformer = Llama2::new(device, LlamaModelType::Llama)
            .map_err(|e| anyhow!("failed to create transformer: {e:?}"))?;

        let mut config = Llama2Config::from_gguf(&gguf);
        config.seq_len = config.seq_len.min(settings.context_size);
        let weights = Llama2Weights::from_gguf(device, &config, &gguf);
        let tokenizer = Gpt2Tokenizer::from_gguf(&gguf);
        let state = Llama2State::new(device, &config);
        let template = PromptTemplate::new(chat_template, tokenizer.bos_str(), tokenizer.eos_str());

        Ok(LoadedModel {
            name,
            gpu,
            transformer,
            config,
            weights,
            tokenizer,
            state,
            template,
            view_shapes: ViewShapeBuffers::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_size(&self) -> usize {
        self.config.seq_len
    }

    /// Runs one task to completion, reporting progress on its event channel.
    pub async fn run(&mut self, task: InferenceTask) {
        let event = match self.generate(&task).await {
            Ok(reason) => GenerationEvent::Finished(reason),
            Err(e) => {
                error!("inference failed: {e:#}");
                GenerationEvent::Failed(e.to_string())
            }
        };

        // The requester may have gone away already.
        let _ = task.events.send(event).await;
    }

    async fn generate(&mut self, task: &InferenceTask) -> anyhow::Result<FinishReason> {
        let request = &task.request;
        let prompt = self
            .template
            .render(&request.messages)
            .context("failed to render chat template")?;

        let prompt_tokens = self.tokenizer.encode(&prompt);
        if prompt_tokens.is_empty() {
            bail!("prompt produced no tokens");
        }
        if prompt_tokens.len() >= self.config.seq_len {
            bail!(
                "prompt has {} tokens, context size is {}",
                prompt_tokens.len(),
                self.config.seq_len
            );
        }

        if task
            .events
            .send(GenerationEvent::Prompt {
                tokens: prompt_tokens.len(),
            })
            .await
            .is_err()
        {
            return Ok(FinishReason::Stop);
        }

        let mut token = prompt_tokens[0];
        let mut logits = DVector::zeros(self.config.vocab_size);
        self.view_shapes.clear_tmp();

        let inference_start = Instant::now();
        let mut prefill_time = Instant::now();
        let mut total_generated = 0;
        let mut finish_reason = FinishReason::Length;

        for pos in 0..self.config.seq_len {
            let is_prefill = pos < prompt_tokens.len() - 1;

            let (rope_config, rms_norm_config, attn_params) =
                self.config.derived_configs(pos as u32);

            let mut encoder = self
                .gpu
                .device()
                .create_command_encoder(&Default::default());
            self.gpu.queue().write_buffer(
                self.state.rope_config().buffer(),
                0,
                bytemuck::cast_slice(&[rope_config]),
            );
            self.gpu.queue().write_buffer(
                self.state.rms_norm_config().buffer(),
                0,
                bytemuck::cast_slice(&[rms_norm_config]),
            );
            self.gpu.queue().write_buffer(
                self.state.attn_params().buffer(),
                0,
                bytemuck::cast_slice(&[attn_params]),
            );

            self.state.x.copy_from_view(
                &mut encoder,
                self.weights
                    .token_embd
                    .column(embedding_column(token, self.config.vocab_size)),
            );

            let mut compute_pass = encoder.compute_pass("transformer", None);
            self.transformer.dispatch(
                self.gpu.device(),
                &self.view_shapes,
                self.gpu.queue(),
                &mut compute_pass,
                &self.state,
                &self.weights,
                &self.config,
                &attn_params,
                pos as u32,
            );
            drop(compute_pass);

            if is_prefill {
                self.gpu.queue().submit(Some(encoder.finish()));
                token = prompt_tokens[pos + 1];
                prefill_time = Instant::now();
                continue;
            }

            self.state
                .logits_readback()
                .copy_from(&mut encoder, self.state.logits());
            self.gpu.queue().submit(Some(encoder.finish()));
            self.state
                .logits_readback()
                .read_to(self.gpu.device(), logits.as_mut_slice())
                .await
                .map_err(|e| anyhow!("failed to read logits: {e:?}"))?;

            let mut sampler = Sampler::new(logits.len(), request.temperature, TOP_P);
            let next_token = sampler.sample(&mut logits);

            if next_token == self.tokenizer.eos() {
                finish_reason = FinishReason::Stop;
                break;
            }

            let token_str = self.tokenizer.decode(&[next_token as u32]);
            if task
                .events
                .send(GenerationEvent::Token(token_str))
                .await
                .is_err()
            {
                debug!("requester dropped, stopping generation at position {pos}");
                finish_reason = FinishReason::Stop;
                break;
            }

            token = next_token;
            total_generated += 1;
            if total_generated >= request.max_tokens {
                break;
            }
        }

        let total_duration = inference_start.elapsed();
        let prefill_duration = prefill_time - inference_start;
        let generation_duration = total_duration.saturating_sub(prefill_duration);

        info!(
            "Inference done, total time: {total_duration:?} for {total_generated} tokens. \
             Prefill {:.2} tokens/s, generation {:.2} tokens/s",
            (prompt_tokens.len() as f32) / prefill_duration.as_secs_f32(),
            (total_generated as f32) / generation_duration.as_secs_f32()
        );

        Ok(finish_reason)
    }
}

/// Column of the embedding matrix holding `token`.
///
/// The token embedding buffer is split in two halves of `vocab_size / 2` columns.
fn embedding_column(token: usize, vocab_size: usize) -> u32 {
    let half = vocab_size / 2;
    if token < half {
        token as u32
    } else {
        (token - half) as u32
    }
}

fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local-model".to_owned())
}

/// Loads the model and, once it is ready, publishes it to `slot` and serves inference
/// tasks until every sender is gone.
///
/// A model that fails to load leaves the slot empty; requests needing the model are
/// then rejected by the gate while the rest of the server keeps running.
pub async fn serve_model(settings: ModelSettings, slot: Ref<ModelSlot>) {
    let mut model = match LoadedModel::load(&settings).await {
        Ok(model) => model,
        Err(e) => {
            error!(
                "failed to load model from {}: {e:#}",
                settings.model_file.display()
            );
            return;
        }
    };

    let (task_sender, mut task_receiver) = mpsc::channel(10);
    let handle = LocalModel::new(model.name().to_owned(), model.context_size(), task_sender);

    if slot.set(Arc::new(handle)).is_err() {
        warn!("model slot was already populated, discarding {}", model.name());
        return;
    }
    info!(
        "Model {} ready, context size {}",
        model.name(),
        model.context_size()
    );

    while let Some(task) = task_receiver.recv().await {
        model.run(task).await;
    }

    info!("Inference worker shutting down");
}
