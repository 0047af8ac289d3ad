//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of PaddleOCR models.

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::ocr::OcrLanguage;
use crate::config::VisionSettings;

/// Disables model downloads when set
pub const OFFLINE_ENV: &str = "FRAME_TEXT_DETECTOR_OFFLINE";

const MODEL_REPO: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet), shared by all languages
    Detection,
    /// Text recognition model (CRNN)
    Recognition(OcrLanguage),
    /// Character dictionary for recognition
    Dictionary(OcrLanguage),
}

impl ModelType {
    /// Get the filename for this model type
    pub fn filename(&self) -> String {
        match self {
            ModelType::Detection => "det.onnx".to_string(),
            ModelType::Recognition(lang) => format!("rec_{}.onnx", lang.code()),
            ModelType::Dictionary(lang) => format!("dict_{}.txt", lang.code()),
        }
    }

    /// Get the download URL for this model
    pub fn download_url(&self) -> String {
        match self {
            ModelType::Detection => format!("{MODEL_REPO}/detection/v3/det.onnx"),
            ModelType::Recognition(lang) => {
                format!("{MODEL_REPO}/languages/{}/rec.onnx", lang.model_family())
            }
            ModelType::Dictionary(lang) => {
                format!("{MODEL_REPO}/languages/{}/dict.txt", lang.model_family())
            }
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),        // ~2.43 MB
            ModelType::Recognition(_) => (7_000_000, 10_000_000),  // ~7.83 MB
            ModelType::Dictionary(_) => (500, 10_000),             // ~1.42 KB
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> String {
        match self {
            ModelType::Detection => "Text Detection".to_string(),
            ModelType::Recognition(lang) => format!("Text Recognition ({})", lang.code()),
            ModelType::Dictionary(lang) => format!("Character Dictionary ({})", lang.code()),
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager in the platform data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Model manager for the directory configured in `vision`, if any
    pub fn for_settings(vision: &VisionSettings) -> Result<Self> {
        match &vision.models_dir {
            Some(dir) => Self::with_dir(dir.clone()),
            None => Self::new(),
        }
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        let path = self.model_path(model_type);
        match std::fs::metadata(&path) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                let size = metadata.len();
                size >= min && size <= max
            }
            Err(_) => false,
        }
    }

    /// Models a language needs, detection first
    pub fn required_models(language: OcrLanguage) -> [ModelType; 3] {
        [
            ModelType::Detection,
            ModelType::Recognition(language),
            ModelType::Dictionary(language),
        ]
    }

    /// Check if all models for a language are available
    pub fn are_models_ready(&self, language: OcrLanguage) -> bool {
        Self::required_models(language)
            .into_iter()
            .all(|model_type| self.is_model_available(model_type))
    }

    /// Get status of all models for a language
    pub fn get_model_status(&self, language: OcrLanguage) -> Vec<(ModelType, bool, Option<u64>)> {
        Self::required_models(language)
            .into_iter()
            .map(|model_type| {
                let path = self.model_path(model_type);
                let available = self.is_model_available(model_type);
                let size = std::fs::metadata(&path).ok().map(|m| m.len());
                (model_type, available, size)
            })
            .collect()
    }

    /// Download a model if not already available.
    /// Returns the path to the model file
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", model_type);
        self.download_model(model_type)?;

        Ok(path)
    }

    /// Download every model a language needs
    pub fn ensure_all_models(&self, language: OcrLanguage) -> Result<()> {
        for model_type in Self::required_models(language) {
            self.ensure_model(model_type)?;
        }
        Ok(())
    }

    /// Download a specific model (blocking)
    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let (size_bytes, sha256) =
            rt.block_on(async { self.download_file_async(&url, &path, model_type).await })?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(model_type, size_bytes, sha256)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    /// Async download implementation.
    ///
    /// Returns the byte count and SHA-256 of the file written to `path`.
    async fn download_file_async(
        &self,
        url: &str,
        path: &Path,
        model_type: ModelType,
    ) -> Result<(u64, String)> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // 5 minute timeout
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let (downloaded, hash) = write_stream(response.bytes_stream(), &temp_path).await?;
        debug!(
            "{:?}: {} / {:?} bytes, sha256 {}",
            model_type, downloaded, total_size, hash
        );

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok((downloaded, hash))
    }

    /// Record a downloaded model in the manifest
    fn update_manifest_for_model(
        &self,
        model_type: ModelType,
        size_bytes: u64,
        sha256: String,
    ) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Ignoring unreadable model manifest: {}", e);
            ModelManifest::default()
        });

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename(),
            size_bytes,
            sha256: Some(sha256),
            downloaded_at: chrono_lite_now(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// ONNX Runtime session wrapper.
///
/// Running a session needs exclusive access, so calls are serialized
/// behind a mutex and the wrapper can be shared by reference.
pub struct OnnxSession {
    session: Mutex<Session>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, use_gpu: bool) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session_builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        // DirectML on Windows; every other platform runs on CPU
        #[cfg(target_os = "windows")]
        let session_builder = if use_gpu {
            use ort::execution_providers::DirectMLExecutionProvider;
            match session_builder
                .with_execution_providers([DirectMLExecutionProvider::default().build()])
            {
                Ok(builder) => {
                    info!("DirectML GPU acceleration enabled");
                    builder
                }
                Err(e) => {
                    warn!("DirectML not available, using CPU: {}", e);
                    Session::builder()?
                        .with_optimization_level(GraphOptimizationLevel::Level3)?
                        .with_intra_threads(4)?
                }
            }
        } else {
            session_builder
        };

        #[cfg(not(target_os = "windows"))]
        if use_gpu {
            warn!("GPU acceleration is only wired for Windows, using CPU");
        }

        let session = session_builder
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_names: Vec<&str> = session
            .inputs
            .iter()
            .map(|input| input.name.as_str())
            .collect();

        let output_names: Vec<&str> = session
            .outputs
            .iter()
            .map(|output| output.name.as_str())
            .collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Run the model on a single NCHW input.
    ///
    /// Returns the first output as (shape, row-major data).
    pub fn run(&self, input: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = Tensor::from_array(input).context("Failed to build input tensor")?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .context("ONNX inference failed")?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to read model output")?;
        let shape = shape.iter().map(|&d| d.max(0) as usize).collect();

        Ok((shape, data.to_vec()))
    }
}

/// Write every chunk of `stream` to `path`, hashing as it goes.
///
/// Returns (bytes written, hex SHA-256). A partially written file is
/// removed when the stream or the write fails.
async fn write_stream<S, B, E>(stream: S, path: &Path) -> Result<(u64, String)>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let result = copy_stream(stream, path).await;
    if result.is_err() {
        std::fs::remove_file(path).ok();
    }
    result
}

async fn copy_stream<S, B, E>(mut stream: S, path: &Path) -> Result<(u64, String)>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut file = std::fs::File::create(path).context("Failed to create temp file")?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        let bytes = chunk.as_ref();

        file.write_all(bytes).context("Failed to write to temp file")?;
        hasher.update(bytes);
        written += bytes.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    Ok((written, format!("{:x}", hasher.finalize())))
}

/// Current Unix timestamp in seconds, as a string
fn chrono_lite_now() -> String {
    use std::time::SystemTime;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format!("{}", now)
}
