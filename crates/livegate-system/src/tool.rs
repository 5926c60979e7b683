//! Admin backend that drives the external admin tool.
//!
//! Secrets travel on stdin and format parameters through a temporary JSON
//! file; nothing sensitive ever appears in the argument vector.

use livegate_core::config::{LivegateConfig, ManagedPaths};
use livegate_core::error::{LivegateError, LivegateResult};
use livegate_provider::{AdminBackend, AdminOperation};
use log::{debug, info};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

#[derive(Debug)]
struct Output {
    stdout: String,
    stderr: String,
    status: i32,
}

#[derive(Debug, Clone)]
pub struct ToolBackend {
    binary: PathBuf,
    timeout: Duration,
    exports: Vec<(&'static str, String)>,
}

impl ToolBackend {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            exports: Vec::new(),
        }
    }

    pub fn from_config(config: &LivegateConfig) -> Self {
        let backend = Self::new(&config.admin.tool_path, config.tool_timeout());
        match config.managed_paths() {
            Some(paths) => backend.with_managed_paths(&paths),
            None => backend,
        }
    }

    /// Hand the managed-partition locations to the tool's environment.
    pub fn with_managed_paths(mut self, paths: &ManagedPaths) -> Self {
        self.exports = paths.exports();
        self
    }

    fn run_tool(&self, args: &[String], input: Option<&[u8]>) -> LivegateResult<Output> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.envs(self.exports.iter().map(|(key, value)| (*key, value.as_str())));
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        debug!("running {} {}", self.binary.display(), args.join(" "));
        let start = Instant::now();
        let mut child = command.spawn()?;
        let stdout_handle = spawn_output_reader(child.stdout.take());
        let stderr_handle = spawn_output_reader(child.stderr.take());

        if let (Some(payload), Some(mut stdin)) = (input, child.stdin.take()) {
            match stdin.write_all(payload).and_then(|()| stdin.flush()) {
                Ok(()) => {}
                // The tool closed stdin early; its exit status tells the rest.
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", self.binary.display());
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(LivegateError::Admin(format!(
                        "cannot write to {}: {err}",
                        self.binary.display()
                    )));
                }
            }
        }

        self.wait_with_timeout(child, start, stdout_handle, stderr_handle)
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        start: Instant,
        stdout_handle: JoinHandle<LivegateResult<String>>,
        stderr_handle: JoinHandle<LivegateResult<String>>,
    ) -> LivegateResult<Output> {
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LivegateError::Admin(format!(
                    "{} timed out after {:?}",
                    self.binary.display(),
                    self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(25));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| LivegateError::Admin("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| LivegateError::Admin("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: status.code().unwrap_or(-1),
        })
    }
}

impl AdminBackend for ToolBackend {
    type Error = LivegateError;

    fn run(&self, operation: &AdminOperation) -> LivegateResult<String> {
        let label = operation.label();
        let verbose = "--verbose".to_string();

        let (args, input, params_file) = match operation {
            AdminOperation::Initialize { password } => (
                vec![verbose, "internal-init".into()],
                Some(secret_lines(&[password])),
                None,
            ),
            AdminOperation::Authenticate { password } => (
                vec![verbose, "internal-unlock".into()],
                Some(secret_lines(&[password])),
                None,
            ),
            AdminOperation::ChangePassword { current, new } => (
                vec![verbose, "internal-password".into()],
                Some(secret_lines(&[current, new])),
                None,
            ),
            AdminOperation::Format {
                config_id,
                params,
                device,
            } => {
                let file = write_params_file(params)?;
                let args = vec![
                    verbose,
                    "dev-format".into(),
                    config_id.clone(),
                    file.path().display().to_string(),
                    device.display().to_string(),
                ];
                (args, None, Some(file))
            }
        };

        let out = self.run_tool(&args, input.as_ref().map(|secret| secret.as_bytes()))?;
        drop(params_file);
        if out.status == 0 {
            info!("{label}: tool finished");
            return Ok(out.stdout);
        }

        Err(LivegateError::Admin(format!(
            "{} (exit code {})",
            classify_failure(label, &output_diagnostic(&out)),
            out.status
        )))
    }
}

/// One secret per line, as the tool reads them from stdin.
fn secret_lines(secrets: &[&Zeroizing<String>]) -> Zeroizing<String> {
    let mut buf = Zeroizing::new(String::new());
    for secret in secrets {
        buf.push_str(secret.as_str());
        buf.push('\n');
    }
    buf
}

/// Parameters file removed once the returned handle is dropped.
fn write_params_file(params: &BTreeMap<String, String>) -> LivegateResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("livegate-format-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, params)
        .map_err(|err| LivegateError::Admin(format!("cannot write format parameters: {err}")))?;
    file.flush()?;
    Ok(file)
}

fn output_diagnostic(output: &Output) -> String {
    if output.stderr.trim().is_empty() {
        output.stdout.clone()
    } else {
        output.stderr.clone()
    }
}

fn classify_failure(label: &str, diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    let lower = trimmed.to_ascii_lowercase();
    let diagnostic = if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed.lines().last().unwrap_or(trimmed).to_string()
    };

    if lower.contains("permission denied") || lower.contains("operation not permitted") {
        return format!("{label} requires elevated privileges: {diagnostic}");
    }
    if lower.contains("invalid password") || lower.contains("wrong password") {
        return format!("{label} failed: the password was rejected");
    }
    if lower.contains("no such file") || lower.contains("not found") {
        return format!("{label} could not find a required device or file: {diagnostic}");
    }
    format!("{label} failed: {diagnostic}")
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<LivegateResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> LivegateResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}
