//! Executor that runs a local process.
//!
//! Task parameters:
//! - `command`: program name, or an array of program plus arguments
//! - `args`: extra arguments appended to `command`
//! - `working_directory`, `environment`: process cwd and extra env vars
//! - `timeout`: seconds, capped at the module's `max_timeout_secs`
//!
//! A string `command` is split with POSIX shell quoting rules (`shlex`) and
//! run directly. With the module's `shell` option set, the command line is
//! handed to `sh -c` instead, with `args` quoted onto its end.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::modules::{ExecutionError, Executor, ModuleContext, ModuleInstance, ModuleLifecycle};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    default_timeout: Duration,
    max_timeout: Duration,
    working_directory: Option<PathBuf>,
    shell: bool,
}

impl CommandExecutor {
    pub fn from_config(config: &Map<String, Value>) -> Self {
        let secs = |key: &str, default: u64| config.get(key).and_then(Value::as_u64).unwrap_or(default);
        Self {
            default_timeout: Duration::from_secs(secs("default_timeout_secs", 300)),
            max_timeout: Duration::from_secs(secs("max_timeout_secs", 3600)),
            working_directory: config
                .get("working_directory")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            shell: config.get("shell").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    fn argv(&self, task: &Task) -> Result<Vec<String>, ExecutionError> {
        let args = match task.parameters.get("args") {
            None => Vec::new(),
            Some(Value::Array(parts)) => string_list(parts, "args")?,
            Some(_) => return Err(ExecutionError::failed("`args` must be an array of strings")),
        };

        if self.shell {
            let mut script = match task.parameters.get("command") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => quote_all(&string_list(parts, "command")?)?,
                _ => return Err(ExecutionError::failed("no command provided")),
            };
            if script.trim().is_empty() {
                return Err(ExecutionError::failed("no command provided"));
            }
            if !args.is_empty() {
                script.push(' ');
                script.push_str(&quote_all(&args)?);
            }
            return Ok(vec!["sh".to_string(), "-c".to_string(), script]);
        }

        let mut argv = match task.parameters.get("command") {
            Some(Value::String(s)) => shlex::split(s).ok_or_else(|| {
                ExecutionError::failed("`command` has unbalanced quotes or a trailing escape")
            })?,
            Some(Value::Array(parts)) => string_list(parts, "command")?,
            _ => return Err(ExecutionError::failed("no command provided")),
        };
        argv.extend(args);
        if argv.is_empty() {
            return Err(ExecutionError::failed("no command provided"));
        }
        Ok(argv)
    }

    fn build(&self, task: &Task) -> Result<(Command, Duration), ExecutionError> {
        let argv = self.argv(task)?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cwd = task
            .param_str("working_directory")
            .map(PathBuf::from)
            .or_else(|| self.working_directory.clone());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        if let Some(Value::Object(env)) = task.parameters.get("environment") {
            for (key, value) in env {
                match value {
                    Value::String(s) => command.env(key, s),
                    other => command.env(key, other.to_string()),
                };
            }
        }

        let timeout = task
            .parameters
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        Ok((command, timeout))
    }
}

fn quote_all(parts: &[String]) -> Result<String, ExecutionError> {
    shlex::try_join(parts.iter().map(String::as_str))
        .map_err(|e| ExecutionError::failed(format!("cannot quote command: {}", e)))
}

fn string_list(parts: &[Value], field: &str) -> Result<Vec<String>, ExecutionError> {
    parts
        .iter()
        .map(|p| {
            p.as_str()
                .map(str::to_string)
                .ok_or_else(|| ExecutionError::failed(format!("`{}` must contain only strings", field)))
        })
        .collect()
}

#[async_trait]
impl ModuleLifecycle for CommandExecutor {
    async fn setup(&self) -> anyhow::Result<()> {
        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                anyhow::bail!("working directory {} does not exist", dir.display());
            }
        }
        info!(
            "Command executor ready (default timeout {:?}, max {:?}, shell={})",
            self.default_timeout, self.max_timeout, self.shell
        );
        Ok(())
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn can_handle(&self, task: &Task) -> bool {
        task.parameters.contains_key("command")
    }

    async fn execute(&self, task: Task, cancel: CancellationToken) -> Result<Value, ExecutionError> {
        let (mut command, timeout) = self.build(&task)?;
        debug!("Task {} spawning {:?}", task.id, command.as_std());

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| ExecutionError::failed(format!("failed to spawn command: {}", e)))?;

        // Dropping the output future kills the child (`kill_on_drop`).
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| ExecutionError::failed(format!("command failed: {}", e)))?,
                Err(_) => {
                    return Err(ExecutionError::failed(format!(
                        "command timed out after {} seconds",
                        timeout.as_secs()
                    )));
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !output.status.success() {
            let detail = stderr.trim();
            return Err(ExecutionError::failed(match exit_code {
                Some(code) if detail.is_empty() => format!("process exited with code {}", code),
                Some(code) => format!("process exited with code {}: {}", code, detail),
                None => "process terminated by signal".to_string(),
            }));
        }

        Ok(json!({
            "status": "success",
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "execution_time": started.elapsed().as_secs_f64(),
        }))
    }
}

pub(crate) fn create(ctx: &ModuleContext) -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::executor(CommandExecutor::from_config(&ctx.config)))
}
