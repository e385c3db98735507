use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::model::Artifact;
use super::strategy::Strategy;
use crate::common::error::{AcquisitionError, AcquisitionResult, Stage};

const TAIL_LINES: usize = 40;
const TAIL_LINE_CHARS: usize = 512;

/// One output of a strategy: file name, playlist label and encoder options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionSpec {
    pub file_name: &'static str,
    pub label: &'static str,
    pub output_args: &'static [&'static str],
}

const VIDEO_LADDER: &[RenditionSpec] = &[
    RenditionSpec {
        file_name: "1080p.mp4",
        label: "1080p",
        output_args: &[
            "-vf", "scale=-2:1080", "-c:v", "libx264", "-preset", "veryfast", "-b:v", "5000k",
            "-maxrate", "5350k", "-bufsize", "7500k", "-c:a", "aac", "-b:a", "192k",
            "-movflags", "+faststart",
        ],
    },
    RenditionSpec {
        file_name: "480p.mp4",
        label: "480p",
        output_args: &[
            "-vf", "scale=-2:480", "-c:v", "libx264", "-preset", "veryfast", "-b:v", "1200k",
            "-maxrate", "1280k", "-bufsize", "1800k", "-c:a", "aac", "-b:a", "128k",
            "-movflags", "+faststart",
        ],
    },
];

const DUAL_AUDIO: &[RenditionSpec] = &[
    RenditionSpec {
        file_name: "lossless.flac",
        label: "lossless",
        output_args: &["-vn", "-c:a", "flac"],
    },
    RenditionSpec {
        file_name: "compressed.mp3",
        label: "compressed",
        output_args: &["-vn", "-c:a", "libmp3lame", "-b:a", "320k"],
    },
];

pub fn renditions(strategy: Strategy) -> &'static [RenditionSpec] {
    match strategy {
        Strategy::DirectCopy => &[],
        Strategy::VideoLadder => VIDEO_LADDER,
        Strategy::DualAudio => DUAL_AUDIO,
    }
}

/// Full argument list for one rendition, input and output included.
pub fn tool_args(spec: &RenditionSpec, input: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y", "-hide_banner", "-nostdin", "-nostats", "-loglevel", "warning", "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(input.to_string_lossy().into_owned());
    args.extend(spec.output_args.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// External media tool. One call produces one rendition.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn run(
        &self,
        rendition: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> AcquisitionResult<()>;
}

pub struct FfmpegTool {
    program: String,
}

impl FfmpegTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn run(
        &self,
        rendition: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> AcquisitionResult<()> {
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AcquisitionError::transform(rendition, format!("could not start {}: {e}", self.program))
            })?;

        let tail = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        let Some(status) = waited else {
            let _ = child.kill().await;
            if let Some(handle) = tail {
                handle.abort();
            }
            return Err(AcquisitionError::Cancelled {
                stage: Stage::Transcode,
            });
        };

        let status = status
            .map_err(|e| AcquisitionError::transform(rendition, format!("wait failed: {e}")))?;
        let output_tail = match tail {
            Some(handle) => handle.await.ok().filter(|t| !t.is_empty()),
            None => None,
        };

        if status.success() {
            return Ok(());
        }
        Err(AcquisitionError::Transform {
            rendition: rendition.to_string(),
            message: format!("{} exited with {status}", self.program),
            output_tail,
        })
    }
}

/// Keeps only the last `TAIL_LINES` lines of tool output. Drains the pipe to
/// EOF whatever the bytes are, so the tool never writes into a closed pipe.
async fn read_tail(stderr: ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "stopped reading tool output");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.chars().take(TAIL_LINE_CHARS).collect());
    }

    Vec::from(tail).join("\n")
}

/// Runs the renditions of a strategy one after another. The first failure
/// aborts the whole job; there is no partial success.
#[derive(Clone)]
pub struct Transformer {
    tool: Arc<dyn MediaTool>,
}

impl Transformer {
    pub fn new(tool: Arc<dyn MediaTool>) -> Self {
        Self { tool }
    }

    pub async fn transform(
        &self,
        strategy: Strategy,
        source: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> AcquisitionResult<Vec<Artifact>> {
        if strategy == Strategy::DirectCopy {
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source.bin".to_string());
            return Ok(vec![Artifact {
                path: source.to_path_buf(),
                file_name,
                label: "source".to_string(),
            }]);
        }

        let mut artifacts = Vec::new();
        for spec in renditions(strategy) {
            if cancel.is_cancelled() {
                return Err(AcquisitionError::Cancelled {
                    stage: Stage::Transcode,
                });
            }

            let output = out_dir.join(spec.file_name);
            let args = tool_args(spec, source, &output);
            self.tool.run(spec.file_name, &args, cancel).await?;

            if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
                return Err(AcquisitionError::transform(
                    spec.file_name,
                    "tool reported success but produced no output",
                ));
            }

            info!(rendition = spec.file_name, "🎥 Rendition ready");
            artifacts.push(Artifact {
                path: output,
                file_name: spec.file_name.to_string(),
                label: spec.label.to_string(),
            });
        }

        Ok(artifacts)
    }
}
