//! Shell stage runner — runs each stage as a configured shell command
//! and captures its stdout as the stage output (artifact bytes for
//! source/build stages, report body for scans).

use std::collections::HashMap;

use async_trait::async_trait;
use secpipe_engine::error::FailureReason;
use secpipe_engine::executor::StageRunner;
use secpipe_engine::model::artifact::Artifact;
use secpipe_engine::model::stage::StageSpec;
use tokio::process::Command;

const MAX_CAPTURE: usize = 65536;

pub struct ShellRunner {
    /// Stage name → shell command.
    commands: HashMap<String, String>,
}

impl ShellRunner {
    pub fn new(commands: HashMap<String, String>) -> Self {
        Self { commands }
    }

    /// Collect `command` entries from the same JSON document the
    /// pipeline definition is parsed from.
    pub fn from_json(config: &serde_json::Value) -> Self {
        let mut commands = HashMap::new();
        if let Some(stages) = config.get("stages").and_then(|s| s.as_array()) {
            for stage in stages {
                if let (Some(name), Some(command)) = (
                    stage.get("name").and_then(|v| v.as_str()),
                    stage.get("command").and_then(|v| v.as_str()),
                ) {
                    commands.insert(name.to_string(), command.to_string());
                }
            }
        }
        Self { commands }
    }
}

#[async_trait]
impl StageRunner for ShellRunner {
    async fn run(
        &self,
        spec: &StageSpec,
        input: Option<&Artifact>,
    ) -> Result<Vec<u8>, FailureReason> {
        let command = self
            .commands
            .get(&spec.name)
            .ok_or_else(|| FailureReason::ExecutionFailure {
                detail: format!("no command configured for stage `{}`", spec.name),
            })?;

        let mut cmd = Command::new("bash");
        cmd.args(["-c", command])
            .env("SECPIPE_STAGE", &spec.name)
            .env("CI", "true");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(artifact) = input {
            cmd.env("SECPIPE_INPUT_ARTIFACT", artifact.id.to_string());
            cmd.env("SECPIPE_INPUT_NAME", &artifact.name);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| FailureReason::ExecutionFailure {
                detail: format!("failed to execute command: {e}"),
            })?;

        if !output.status.success() {
            // Truncate the raw bytes first; a byte cut inside a
            // multibyte character must not panic the run driver.
            let mut stderr = output.stderr;
            if stderr.len() > MAX_CAPTURE {
                stderr.drain(..stderr.len() - MAX_CAPTURE);
            }
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(FailureReason::ExecutionFailure {
                detail: format!(
                    "command exited with {}: {stderr}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }

        let mut stdout = output.stdout;
        if stdout.len() > MAX_CAPTURE {
            stdout.drain(..stdout.len() - MAX_CAPTURE);
        }
        Ok(stdout)
    }
}
