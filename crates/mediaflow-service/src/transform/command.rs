//! Runs a configured external program as the transform of one kind.
//!
//! The input artifact is copied into a scratch directory, the program runs
//! with placeholder-substituted arguments, and the produced file is stored
//! back into the artifact store. Lines of the form `PROGRESS <n>`,
//! `progress=<n>` or `<n>%` on stdout are forwarded as progress reports.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};

use mediaflow_core::config::transform::TransformCommandConfig;
use mediaflow_core::error::ErrorKind;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::traits::transform::{ProgressReporter, Transform, TransformError};
use mediaflow_core::types::{ArtifactRef, OperationKind, TransformOutput, TransformParams};

/// Most stderr characters kept in a failure message.
const STDERR_TAIL: usize = 2000;

/// A transform that shells out to a program.
#[derive(Debug)]
pub struct CommandTransform {
    kind: OperationKind,
    config: TransformCommandConfig,
    store: Arc<dyn ArtifactStore>,
}

impl CommandTransform {
    /// Create a transform for `kind`.
    pub fn new(kind: OperationKind, config: TransformCommandConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self { kind, config, store }
    }

    /// One transform per configured kind.
    pub fn from_config(
        commands: &BTreeMap<String, TransformCommandConfig>,
        store: &Arc<dyn ArtifactStore>,
    ) -> Vec<Arc<dyn Transform>> {
        commands
            .iter()
            .map(|(kind, config)| {
                Arc::new(Self::new(
                    OperationKind::new(kind.clone()),
                    config.clone(),
                    Arc::clone(store),
                )) as Arc<dyn Transform>
            })
            .collect()
    }

    /// Substitute `{input}`, `{output}`, `{format}` and `{param.<name>}`.
    pub fn substitute_args(&self, input: &Path, output: &Path, params: &TransformParams) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                let mut arg = arg
                    .replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{format}", &self.config.output_format);
                for (name, value) in params {
                    let placeholder = format!("{{param.{name}}}");
                    if arg.contains(&placeholder) {
                        let value = match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        arg = arg.replace(&placeholder, &value);
                    }
                }
                arg
            })
            .collect()
    }

    async fn run_program(
        &self,
        args: &[String],
        reporter: &ProgressReporter,
    ) -> Result<(), TransformError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransformError::permanent(format!("Program '{}' not found", self.config.program))
            } else {
                TransformError::transient(format!("Failed to start '{}': {e}", self.config.program))
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let timeout = Duration::from_secs(self.config.timeout_seconds.max(1));

        let run = async {
            let (_, stderr) = tokio::join!(forward_progress(stdout, reporter), read_all(stderr));
            (child.wait().await, stderr)
        };
        let finished = tokio::time::timeout(timeout, run).await;
        let (status, stderr) = match finished {
            Ok(finished) => finished,
            Err(_) => {
                let _ = child.kill().await;
                tracing::error!(
                    program = %self.config.program,
                    timeout_s = self.config.timeout_seconds,
                    "Transform program timed out"
                );
                return Err(TransformError::transient(format!(
                    "'{}' timed out after {}s",
                    self.config.program, self.config.timeout_seconds
                )));
            }
        };

        let status = status.map_err(|e| {
            TransformError::transient(format!("Failed to wait for '{}': {e}", self.config.program))
        })?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let skip = stderr.chars().count().saturating_sub(STDERR_TAIL);
            let tail: String = stderr.chars().skip(skip).collect();
            tracing::error!(
                program = %self.config.program,
                exit_code = code,
                stderr = %tail.chars().take(500).collect::<String>(),
                "Transform program failed"
            );
            return Err(TransformError::permanent(format!(
                "'{}' exited with code {code}: {}",
                self.config.program,
                tail.trim()
            )));
        }
        Ok(())
    }
}

async fn forward_progress<R: AsyncRead + Unpin>(stdout: Option<R>, reporter: &ProgressReporter) {
    let Some(stdout) = stdout else {
        return;
    };
    let mut lines = FramedRead::new(stdout, LinesCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if let Some(percent) = parse_progress(&line) {
                    reporter.report(percent);
                }
            }
            // Overlong or non-UTF-8 lines are skipped.
            Err(_) => continue,
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse a progress line.
pub fn parse_progress(line: &str) -> Option<u32> {
    let line = line.trim();
    let number = if let Some(rest) = line.strip_prefix("PROGRESS") {
        rest.trim()
    } else if let Some(rest) = line.strip_prefix("progress=") {
        rest.trim()
    } else if let Some(rest) = line.strip_suffix('%') {
        rest.trim()
    } else {
        return None;
    };
    number.parse::<f64>().ok().filter(|n| *n >= 0.0).map(|n| n.round() as u32)
}

#[async_trait]
impl Transform for CommandTransform {
    fn kind(&self) -> OperationKind {
        self.kind.clone()
    }

    async fn transform(
        &self,
        input: &ArtifactRef,
        params: &TransformParams,
        reporter: ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        let started = Instant::now();
        let data = self.store.get(input).await.map_err(|e| match e.kind {
            ErrorKind::NotFound => TransformError::permanent(format!("Input {input} not found")),
            _ => TransformError::transient(format!("Failed to read input {input}: {e}")),
        })?;

        let scratch = tempfile::tempdir()
            .map_err(|e| TransformError::transient(format!("Failed to create scratch dir: {e}")))?;
        let extension = Path::new(input.as_str())
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let input_path = scratch.path().join(format!("input{extension}"));
        let output_path = scratch
            .path()
            .join(format!("output.{}", self.config.output_format));
        tokio::fs::write(&input_path, &data)
            .await
            .map_err(|e| TransformError::transient(format!("Failed to stage input: {e}")))?;

        let args = self.substitute_args(&input_path, &output_path, params);
        tracing::info!(
            kind = %self.kind,
            program = %self.config.program,
            args = ?args,
            input = %input,
            "Running transform program"
        );
        self.run_program(&args, &reporter).await?;

        let produced = tokio::fs::read(&output_path).await.map_err(|_| {
            TransformError::permanent(format!(
                "'{}' produced no output file",
                self.config.program
            ))
        })?;
        let size_bytes = produced.len() as u64;
        let location = self
            .store
            .put(&format!("outputs/{}", self.kind), Bytes::from(produced))
            .await
            .map_err(|e| TransformError::transient(format!("Failed to store output: {e}")))?;

        tracing::info!(
            kind = %self.kind,
            output = %location,
            size_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Transform program completed"
        );
        Ok(TransformOutput {
            location,
            size_bytes,
            format: self.config.output_format.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::traits::transform::TransformErrorKind;
    use mediaflow_storage::MemoryArtifactStore;

    fn command(program: &str, args: &[&str], timeout_seconds: u64) -> TransformCommandConfig {
        TransformCommandConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output_format: "txt".to_string(),
            timeout_seconds,
        }
    }

    fn transform(config: TransformCommandConfig) -> (CommandTransform, Arc<dyn ArtifactStore>) {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        (
            CommandTransform::new(OperationKind::new("text-copy"), config, Arc::clone(&store)),
            store,
        )
    }

    #[test]
    fn test_parse_progress_formats() {
        assert_eq!(parse_progress("PROGRESS 42"), Some(42));
        assert_eq!(parse_progress("progress=17.6"), Some(18));
        assert_eq!(parse_progress("  80% "), Some(80));
        assert_eq!(parse_progress("frame=120 fps=30"), None);
        assert_eq!(parse_progress("PROGRESS -3"), None);
    }

    #[test]
    fn test_substitute_args() {
        let (t, _) = transform(command(
            "convert",
            &["{input}", "-resize", "{param.width}x{param.height}", "{output}"],
            10,
        ));
        let mut params = TransformParams::new();
        params.insert("width".into(), serde_json::json!(640));
        params.insert("height".into(), serde_json::json!("480"));
        let args = t.substitute_args(Path::new("/tmp/in.png"), Path::new("/tmp/out.txt"), &params);
        assert_eq!(args, vec!["/tmp/in.png", "-resize", "640x480", "/tmp/out.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_program_and_stores_output() {
        let (t, store) = transform(command(
            "sh",
            &["-c", "echo PROGRESS 50; cp {input} {output}; echo 100%"],
            10,
        ));
        let input = store.put("inputs", Bytes::from_static(b"hello")).await.unwrap();
        let (reporter, mut progress) = ProgressReporter::channel();

        let output = t.transform(&input, &TransformParams::new(), reporter).await.unwrap();
        assert_eq!(output.size_bytes, 5);
        assert_eq!(output.format, "txt");
        assert_eq!(store.get(&output.location).await.unwrap(), Bytes::from_static(b"hello"));

        let mut seen = Vec::new();
        while let Ok(p) = progress.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen, vec![50, 100]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_permanent() {
        let (t, store) = transform(command("sh", &["-c", "echo bad input >&2; exit 3"], 10));
        let input = store.put("inputs", Bytes::from_static(b"x")).await.unwrap();
        let (reporter, _rx) = ProgressReporter::channel();
        let err = t.transform(&input, &TransformParams::new(), reporter).await.unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::Permanent);
        assert!(err.message.contains("code 3"));
        assert!(err.message.contains("bad input"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_transient() {
        let (t, store) = transform(command("sh", &["-c", "sleep 5"], 1));
        let input = store.put("inputs", Bytes::from_static(b"x")).await.unwrap();
        let (reporter, _rx) = ProgressReporter::channel();
        let err = t.transform(&input, &TransformParams::new(), reporter).await.unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_missing_program_and_input_are_permanent() {
        let (t, store) = transform(command("mediaflow-no-such-program", &[], 10));
        let input = store.put("inputs", Bytes::from_static(b"x")).await.unwrap();
        let (reporter, _rx) = ProgressReporter::channel();
        let err = t
            .transform(&input, &TransformParams::new(), reporter.clone())
            .await
            .unwrap_err();
        assert!(err.is_permanent());

        let err = t
            .transform(&ArtifactRef::new("inputs/missing"), &TransformParams::new(), reporter)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
