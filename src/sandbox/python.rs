//! Persistent `python3` interpreter speaking JSON lines
//!
//! The child process runs an embedded driver script that:
//! 1. Replies `{"type":"ready"}` once it is up
//! 2. Reads one `{"code": ...}` request per line
//! 3. Redirects stdout and stderr into a single fresh buffer per request
//! 4. Replies `{"type":"success","result":...}` or `{"type":"error","error":...}`
//!
//! The driver also registers a `micropip` module whose async `install`
//! helper pip-installs packages, so generated code can pull dependencies.
//!
//! Each process runs in its own temporary workspace: the working directory,
//! `HOME` and `TMPDIR` point there, the host environment is dropped apart
//! from `PATH`, and packages land in `<workspace>/site-packages`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::{ExecutionOutcome, Interpreter, InterpreterError, InterpreterLauncher};

const DRIVER: &str = include_str!("driver.py");

/// How long the driver may take to report ready
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Environment variable naming the package directory inside the workspace
const PACKAGES_ENV: &str = "PYSCRIBE_PACKAGES";

#[derive(Serialize)]
struct DriverRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverReply {
    Ready,
    Success { result: String },
    Error { error: String },
}

/// A running driver process
pub struct PythonInterpreter {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    // Removed when the interpreter is dropped, after `kill_on_drop` fires.
    workspace: TempDir,
}

impl PythonInterpreter {
    /// Start the driver under `program` and wait for it to report ready
    pub async fn start(program: impl Into<PathBuf>) -> Result<Self, InterpreterError> {
        let program = program.into();
        let workspace = tempfile::Builder::new()
            .prefix("pyscribe-")
            .tempdir()
            .map_err(InterpreterError::Spawn)?;

        let mut child = confined(&program, workspace.path())
            .spawn()
            .map_err(InterpreterError::Spawn)?;

        let stdin = child.stdin.take().ok_or(InterpreterError::Exited)?;
        let stdout = child.stdout.take().ok_or(InterpreterError::Exited)?;

        let mut interpreter = Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
            workspace,
        };

        match tokio::time::timeout(STARTUP_TIMEOUT, interpreter.next_reply()).await {
            Ok(Ok(DriverReply::Ready)) => {
                debug!(
                    program = %program.display(),
                    pid = ?interpreter.child.id(),
                    workspace = %interpreter.workspace.path().display(),
                    "Python driver ready"
                );
                Ok(interpreter)
            }
            Ok(Ok(other)) => Err(InterpreterError::UnexpectedReply(format!("{:?}", other))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(InterpreterError::StartupTimeout(STARTUP_TIMEOUT)),
        }
    }

    async fn next_reply(&mut self) -> Result<DriverReply, InterpreterError> {
        let line = self
            .replies
            .next_line()
            .await?
            .ok_or(InterpreterError::Exited)?;
        Ok(serde_json::from_str(&line)?)
    }
}

/// Driver command confined to `workspace`
///
/// `-I` keeps the user site directory and `PYTHON*` variables out.
fn confined(program: &Path, workspace: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-I")
        .arg("-u")
        .arg("-c")
        .arg(DRIVER)
        .current_dir(workspace)
        .env_clear()
        .env("HOME", workspace)
        .env("TMPDIR", workspace)
        .env("LANG", "C.UTF-8")
        .env(PACKAGES_ENV, workspace.join("site-packages"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    command
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, InterpreterError> {
        let mut request = serde_json::to_string(&DriverRequest { code })?;
        request.push('\n');
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.flush().await?;

        match self.next_reply().await? {
            DriverReply::Success { result } => Ok(ExecutionOutcome::success(result)),
            DriverReply::Error { error } => Ok(ExecutionOutcome::failure(error)),
            DriverReply::Ready => Err(InterpreterError::UnexpectedReply("ready".to_string())),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Python driver already gone");
        }
    }
}

/// Launches [`PythonInterpreter`]s from a configured executable
#[derive(Debug, Clone)]
pub struct PythonLauncher {
    program: PathBuf,
}

impl PythonLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PythonLauncher {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl InterpreterLauncher for PythonLauncher {
    async fn launch(&self) -> Result<Box<dyn Interpreter>, InterpreterError> {
        let interpreter = PythonInterpreter::start(self.program.clone()).await?;
        Ok(Box::new(interpreter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        let ready: DriverReply = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(matches!(ready, DriverReply::Ready));

        let ok: DriverReply = serde_json::from_str(r#"{"type":"success","result":"2\n"}"#).unwrap();
        assert!(matches!(ok, DriverReply::Success { result } if result == "2\n"));

        let err: DriverReply = serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert!(matches!(err, DriverReply::Error { error } if error == "boom"));
    }

    #[test]
    fn test_request_is_single_line() {
        let json = serde_json::to_string(&DriverRequest { code: "a = 1\nprint(a)" }).unwrap();
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_driver_installs_micropip_shim() {
        assert!(DRIVER.contains("sys.modules[\"micropip\"]"));
        assert!(DRIVER.contains("PyCF_ALLOW_TOP_LEVEL_AWAIT"));
        assert!(DRIVER.contains(PACKAGES_ENV));
    }

    #[test]
    fn test_command_is_confined_to_workspace() {
        let workspace = tempfile::tempdir().unwrap();
        let command = confined(Path::new("python3"), workspace.path());
        let command = command.as_std();

        assert_eq!(command.get_current_dir(), Some(workspace.path()));

        let envs: Vec<_> = command
            .get_envs()
            .map(|(key, value)| (key.to_string_lossy().into_owned(), value.map(|v| v.to_owned())))
            .collect();
        let names: Vec<&str> = envs.iter().map(|(key, _)| key.as_str()).collect();
        for name in &names {
            assert!(
                ["HOME", "TMPDIR", "LANG", "PATH", PACKAGES_ENV].contains(name),
                "unexpected variable {name}"
            );
        }

        let home = envs.iter().find(|(key, _)| key == "HOME").and_then(|(_, v)| v.clone());
        assert_eq!(home.as_deref(), Some(workspace.path().as_os_str()));
        let packages = envs.iter().find(|(key, _)| key == PACKAGES_ENV).and_then(|(_, v)| v.clone());
        assert_eq!(packages, Some(workspace.path().join("site-packages").into_os_string()));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_spawn() {
        let result = PythonInterpreter::start("/nonexistent/python-for-tests").await;
        assert!(matches!(result, Err(InterpreterError::Spawn(_))));
    }
}
