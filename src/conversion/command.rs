//! Local processing through an external command-line transcoder.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use mediagate_common::{MediaType, ProcessingMetrics, TargetFormat};
use tokio::process::Command;
use tracing::debug;

use super::capability::{
    CapabilityError, JobDescription, ProcessingCapability, ProcessingOutcome, Submission,
    SuccessReport,
};

/// Directory, relative to the storage root, that local outputs are written under.
const OUTPUT_PREFIX: &str = "processed";

/// Transcoder output that means the input could not be decoded at all.
const FORMAT_ERROR_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "could not find codec parameters",
    "Unknown input format",
];

/// Runs jobs with an ffmpeg-compatible tool on this host.
pub struct CommandProcessor {
    tool: PathBuf,
    storage_root: PathBuf,
}

impl CommandProcessor {
    pub fn new(tool: PathBuf, storage_root: PathBuf) -> Self {
        Self { tool, storage_root }
    }

    /// Resolve `tool` on `PATH`.
    pub fn locate(tool: &str, storage_root: PathBuf) -> Option<Self> {
        match which::which(tool) {
            Ok(path) => Some(Self::new(path, storage_root)),
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "Local transcoder not found");
                None
            }
        }
    }

    /// Storage path the output of `job` is written to.
    pub fn output_path(job: &JobDescription) -> Result<String, CapabilityError> {
        let extension = match job.target_format {
            TargetFormat::Webp => "webp",
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Webm => "webm",
            other => {
                return Err(CapabilityError::UnsupportedFormat(format!(
                    "cannot produce {} locally",
                    other
                )))
            }
        };

        let stem = Path::new(&job.source_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");

        Ok(format!("{}/{}/{}.{}", OUTPUT_PREFIX, job.item_id, stem, extension))
    }

    fn build_args(job: &JobDescription, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        match job.target_format {
            TargetFormat::Webp => args.extend([
                "-c:v".to_string(),
                "libwebp".to_string(),
                "-quality".to_string(),
                "80".to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
            ]),
            TargetFormat::Jpeg => args.extend([
                "-q:v".to_string(),
                "3".to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
            ]),
            _ => args.extend([
                "-vn".to_string(),
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                "128k".to_string(),
            ]),
        }

        args.extend(["-y".to_string(), output.to_string_lossy().to_string()]);
        args
    }
}

#[async_trait]
impl ProcessingCapability for CommandProcessor {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, job: &JobDescription) -> Result<Submission, CapabilityError> {
        if job.media_type == MediaType::Video {
            return Err(CapabilityError::UnsupportedFormat(
                "video is not transcoded locally".to_string(),
            ));
        }

        let output_rel = Self::output_path(job)?;
        let input = self.storage_root.join(&job.source_path);
        let output = self.storage_root.join(&output_rel);

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CapabilityError::Failed(format!("create output dir: {}", e)))?;
        }

        let args = Self::build_args(job, &input, &output);
        debug!(item_id = %job.item_id, tool = ?self.tool, ?args, "Running local transcode");

        let started = Instant::now();
        let result = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("{}: {}", self.tool.display(), e)))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            if FORMAT_ERROR_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(CapabilityError::UnsupportedFormat(tail.to_string()));
            }
            return Err(CapabilityError::Failed(format!(
                "transcoder exited with {}: {}",
                result.status, tail
            )));
        }

        let output_size = tokio::fs::metadata(&output)
            .await
            .map_err(|e| CapabilityError::Failed(format!("missing output: {}", e)))?
            .len();

        let thumbnail_path = match job.media_type {
            MediaType::Image => Some(output_rel.clone()),
            _ => None,
        };

        Ok(Submission::Completed(ProcessingOutcome::Success(SuccessReport {
            route: Some(job.route),
            processed_path: output_rel,
            thumbnail_path,
            quality_variants: Default::default(),
            metrics: Some(ProcessingMetrics::from_sizes(
                job.original_size_bytes,
                output_size,
                elapsed_ms,
            )),
        })))
    }
}
