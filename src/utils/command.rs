/// External command execution for the express/ansible tooling
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Result from command execution with captured output
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Builder for executing external commands
pub struct CommandBuilder {
    command: Command,
    context_msg: Option<String>,
}

impl CommandBuilder {
    /// Create a new command builder with captured output
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self {
            command,
            context_msg: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// Send stdout and stderr to a freshly created log file
    pub fn log_to(mut self, log_path: &Path) -> Result<Self> {
        let stdout = File::create(log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
        let stderr = stdout
            .try_clone()
            .context("Failed to duplicate log file handle")?;
        self.command
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        Ok(self)
    }

    /// Start the command without waiting for it
    pub fn spawn(mut self) -> Result<Child> {
        let ctx = self
            .context_msg
            .take()
            .unwrap_or_else(|| "Failed to start command".to_string());
        self.command.spawn().context(ctx)
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        let output = if let Some(ctx) = &self.context_msg {
            self.command.output().await.context(ctx.clone())?
        } else {
            self.command.output().await?
        };
        Ok(CommandOutput::from_output(output))
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_hint: &str,
) -> Result<()> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success => {
            debug!(
                "{} found: {}",
                tool_name,
                out.stdout.lines().next().unwrap_or_default()
            );
            Ok(())
        }
        Ok(out) => anyhow::bail!(
            "{} is installed but not usable: {}",
            tool_name,
            out.stderr.trim()
        ),
        Err(_) => anyhow::bail!(
            "{} is not installed or not in PATH. {}",
            tool_name,
            install_hint
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_builder_basic() {
        let result = CommandBuilder::new("echo")
            .arg("test")
            .context("Testing echo command")
            .output()
            .await;

        let output = tokio_test::assert_ok!(result);
        assert!(output.success);
        assert!(output.stdout.contains("test"));
    }

    #[tokio::test]
    async fn test_command_builder_env() {
        let result = CommandBuilder::new("sh")
            .arg("-c")
            .arg("echo $TEST_VAR")
            .env("TEST_VAR", "test_value")
            .output()
            .await;

        let output = tokio_test::assert_ok!(result);
        assert!(output.success);
        assert!(output.stdout.contains("test_value"));
    }

    #[tokio::test]
    async fn test_log_to_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");

        let mut child = CommandBuilder::new("sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .log_to(&log)
            .unwrap()
            .spawn()
            .unwrap();
        let status = child.wait().await.unwrap();

        assert_eq!(status.code(), Some(3));
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let result =
            check_tool_installed("pf9ctl-definitely-missing-tool", &["--version"], "Install it").await;
        let err = tokio_test::assert_err!(result);
        assert!(err.to_string().contains("not installed"));
    }
}
