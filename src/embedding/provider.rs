// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Each [`EmbeddingBackend`] maps to one provider. Providers are constructed
//! through [`create_provider`] only when there is text to embed.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::io::Write;
use std::process::{Command, Stdio};

use super::backend::EmbeddingBackend;
use crate::config::Config;
use crate::errors::StarsError;
use crate::remote::retry::{RemoteFailure, RetryPolicy};

const DEFAULT_MAX_CHARS: usize = 2000;
const VOYAGE_API_URL: &str = "https://api.voyageai.com/v1/embeddings";
const DEFAULT_VOYAGE_MODEL: &str = "voyage-3.5";
const VOYAGE_MAX_BATCH: usize = 128;

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates one embedding per text, in input order.
    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

/// Builds the provider for `backend`.
///
/// Missing credentials surface as [`StarsError::Configuration`].
pub fn create_provider(
    backend: EmbeddingBackend,
    config: &Config,
) -> Result<Box<dyn EmbeddingProvider>> {
    let embeddings = config.embeddings();
    match backend {
        EmbeddingBackend::SentenceTransformers => {
            Ok(Box::new(FastEmbedder::new(embeddings.batch_size())?))
        }
        EmbeddingBackend::VoyageAi => {
            let api_key = embeddings.api_key().ok_or_else(|| {
                StarsError::config("embedding implementation 'voyageai' requires VOYAGE_API_KEY")
            })?;
            let provider = VoyageProvider::new(
                api_key,
                embeddings.model().unwrap_or(DEFAULT_VOYAGE_MODEL),
                embeddings.batch_size(),
                config.remote().timeout(),
                config.remote().retry_policy(),
            )?;
            Ok(Box::new(provider))
        }
        EmbeddingBackend::Command => Ok(Box::new(CommandProvider::new(
            embeddings.command().to_string(),
            embeddings.model().unwrap_or("local-model-id").to_string(),
            embeddings.batch_size(),
        ))),
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use fast::FastEmbedder;

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
mod fast {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    /// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2 (384 dimensions).
    pub struct FastEmbedder {
        embedder: TextEmbedding,
        batch_size: usize,
        model_id: String,
    }

    impl FastEmbedder {
        pub fn new(batch_size: usize) -> Result<Self> {
            let model = EmbeddingModel::AllMiniLML6V2;
            let model_id = model.to_string();
            let embedder = TextEmbedding::try_new(InitOptions::new(model))
                .context("Failed to initialize fastembed model")?;

            Ok(Self {
                embedder,
                batch_size,
                model_id,
            })
        }
    }

    impl EmbeddingProvider for FastEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let prepared = truncate_texts(texts, DEFAULT_MAX_CHARS);
            let embeddings = self.embedder.embed(&prepared, Some(self.batch_size))?;
            check_batch(texts.len(), embeddings)
        }
    }
}

/// Stand-in on targets without an ONNX runtime build of fastembed.
#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
pub struct FastEmbedder;

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
impl FastEmbedder {
    pub fn new(_batch_size: usize) -> Result<Self> {
        Err(StarsError::config(
            "sentence-transformers is not available on this platform; use voyageai or command",
        )
        .into())
    }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        "unavailable"
    }

    fn batch_size(&self) -> usize {
        0
    }

    fn embed_texts(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("sentence-transformers is not available on this platform")
    }
}

#[derive(Debug, Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageEmbedding>,
}

#[derive(Debug, Deserialize)]
struct VoyageEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

/// Voyage AI embeddings over blocking HTTP.
pub struct VoyageProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl VoyageProvider {
    pub fn new(
        api_key: &str,
        model: &str,
        batch_size: usize,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Voyage HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            batch_size: batch_size.clamp(1, VOYAGE_MAX_BATCH),
            retry,
        })
    }

    fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RemoteFailure> {
        let response = self
            .client
            .post(VOYAGE_API_URL)
            .bearer_auth(&self.api_key)
            .json(&VoyageRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .map_err(|e| RemoteFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RemoteFailure::from_status(status, &body));
        }

        let mut parsed: VoyageResponse = response
            .json()
            .map_err(|e| RemoteFailure::permanent(format!("parse Voyage response: {}", e)))?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

impl EmbeddingProvider for VoyageProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self
                .retry
                .run_blocking("voyage_embed", || self.request_batch(chunk))
                .map_err(|f| StarsError::RemoteTransient(f.message))?;
            vectors.extend(batch);
        }
        check_batch(texts.len(), vectors)
    }
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and prints
/// the vectors as a JSON array, or an object with an `embeddings`, `vectors`,
/// or `data` array.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: String, model: String, batch_size: usize) -> Self {
        Self {
            command,
            model,
            batch_size,
        }
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.to_string().as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        parse_command_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.run_command(chunk)?);
        }
        check_batch(texts.len(), vectors)
    }
}

fn parse_command_output(stdout: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(stdout.trim())
        .context("Failed to parse embeddings command output as JSON")?;

    let rows = match parsed {
        Value::Array(arr) => arr,
        Value::Object(mut obj) => match ["embeddings", "vectors", "data"]
            .iter()
            .find_map(|key| obj.remove(*key))
        {
            Some(Value::Array(arr)) => arr,
            Some(_) => bail!("Embeddings field must be a JSON array"),
            None => bail!("Embeddings command output missing 'embeddings' field"),
        },
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    rows.iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .map(|v| v as f32)
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

/// Checks that a provider returned one equally-sized vector per input.
fn check_batch(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "Embedding provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        );
    }
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            bail!("Embedding provider returned vectors of inconsistent width");
        }
    }
    Ok(vectors)
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

/// Scales `vector` to unit length so inner product equals cosine similarity.
/// Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
