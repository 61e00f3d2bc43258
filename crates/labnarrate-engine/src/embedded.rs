//! Local text-only language model that runs without any network round trip.

use std::env;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use labnarrate_contracts::narration::BackendKind;
use tracing::debug;

use crate::error::NarrationError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedAvailability {
    Readily,
    AfterDownload,
    No,
}

pub trait EmbeddedModel: Send + Sync {
    fn name(&self) -> &str;
    /// Must be local and near-instant; the probe calls it before any network check.
    fn availability(&self) -> EmbeddedAvailability;
    fn prompt(&self, system: &str, user: &str) -> Result<String, NarrationError>;
}

/// A model binary driven over stdio: the system prompt, a blank line and the user prompt go to
/// stdin, the completion is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandModel {
    pub fn new(command_line: &str, timeout: Duration) -> Result<Self, NarrationError> {
        let mut words = shell_words::split(command_line).map_err(|err| {
            NarrationError::InvalidInput(format!("invalid embedded command '{command_line}': {err}"))
        })?;
        if words.is_empty() {
            return Err(NarrationError::InvalidInput(
                "embedded command is empty".to_string(),
            ));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            timeout,
        })
    }

    fn spawn(&self) -> Result<Child, NarrationError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                NarrationError::unavailable(
                    BackendKind::BrowserEmbedded,
                    format!("failed to start {}: {err}", self.program),
                )
            })
    }
}

impl EmbeddedModel for CommandModel {
    fn name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.program)
    }

    fn availability(&self) -> EmbeddedAvailability {
        if resolve_program(&self.program) {
            EmbeddedAvailability::Readily
        } else {
            EmbeddedAvailability::No
        }
    }

    fn prompt(&self, system: &str, user: &str) -> Result<String, NarrationError> {
        let started = Instant::now();
        let mut child = self.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        // Detached; the writer ends once the process exits or closes stdin.
        feed(
            child.stdin.take(),
            format!("{system}\n\n{user}\n"),
            self.program.clone(),
        );

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NarrationError::BackendTimeout {
                        backend: BackendKind::BrowserEmbedded,
                        seconds: self.timeout.as_secs_f64(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    return Err(NarrationError::response(
                        BackendKind::BrowserEmbedded,
                        format!("failed waiting for {}: {err}", self.program),
                    ))
                }
            }
        };

        let output = join_output(stdout);
        if !status.success() {
            let detail = join_output(stderr);
            return Err(NarrationError::response(
                BackendKind::BrowserEmbedded,
                format!("{} exited with {status}: {}", self.program, detail.trim()),
            ));
        }
        let output = output.trim().to_string();
        if output.is_empty() {
            return Err(NarrationError::response(
                BackendKind::BrowserEmbedded,
                "empty completion",
            ));
        }
        Ok(output)
    }
}

fn feed<W: Write + Send + 'static>(pipe: Option<W>, input: String, program: String) {
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            // The process may legitimately exit before consuming the whole prompt.
            if let Err(err) = pipe.write_all(input.as_bytes()) {
                debug!(program = %program, error = %err, "embedded model closed stdin early");
            }
        });
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn resolve_program(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return Path::new(program).is_file();
    }
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{CommandModel, EmbeddedAvailability, EmbeddedModel};
    use crate::error::NarrationError;

    #[test]
    fn cat_echoes_both_prompts() -> anyhow::Result<()> {
        let model = CommandModel::new("cat", Duration::from_secs(5))?;
        assert_eq!(model.name(), "cat");
        assert_eq!(model.availability(), EmbeddedAvailability::Readily);
        let output = model.prompt("You narrate labs.", "Lab: vSAN build")?;
        assert_eq!(output, "You narrate labs.\n\nLab: vSAN build");
        Ok(())
    }

    #[test]
    fn arguments_are_split_like_a_shell() -> anyhow::Result<()> {
        let model = CommandModel::new("sh -c 'echo \"[HIGH] done\"'", Duration::from_secs(5))?;
        assert_eq!(model.name(), "sh");
        assert_eq!(model.prompt("system", "user")?, "[HIGH] done");
        Ok(())
    }

    #[test]
    fn slow_models_are_killed_at_the_deadline() -> anyhow::Result<()> {
        let model = CommandModel::new("sleep 5", Duration::from_millis(150))?;
        let err = model.prompt("system", "user").err();
        assert!(matches!(err, Some(NarrationError::BackendTimeout { .. })));
        Ok(())
    }

    #[test]
    fn deadline_holds_when_the_model_ignores_a_large_prompt() -> anyhow::Result<()> {
        let model = CommandModel::new("sleep 4", Duration::from_millis(200))?;
        let started = Instant::now();
        let err = model.prompt("system", &"x".repeat(300_000)).err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, Some(NarrationError::BackendTimeout { .. })));
        Ok(())
    }

    #[test]
    fn large_prompts_reach_models_that_read_them() -> anyhow::Result<()> {
        let model = CommandModel::new("wc -c", Duration::from_secs(5))?;
        let output = model.prompt("s", &"x".repeat(300_000))?;
        assert_eq!(output.trim().parse::<usize>()?, 300_004);
        Ok(())
    }

    #[test]
    fn failures_and_silence_are_response_errors() -> anyhow::Result<()> {
        let failing = CommandModel::new("sh -c 'echo boom >&2; exit 3'", Duration::from_secs(5))?;
        let err = failing.prompt("system", "user").err();
        match err {
            Some(NarrationError::BackendResponse { message, .. }) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {other:?}"),
        }

        let silent = CommandModel::new("true", Duration::from_secs(5))?;
        assert!(matches!(
            silent.prompt("system", "user").err(),
            Some(NarrationError::BackendResponse { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_programs_are_not_available() -> anyhow::Result<()> {
        let model = CommandModel::new("/nonexistent/labnarrate-model --fast", Duration::from_secs(1))?;
        assert_eq!(model.availability(), EmbeddedAvailability::No);
        assert!(matches!(
            model.prompt("system", "user").err(),
            Some(NarrationError::BackendUnavailable { .. })
        ));
        assert!(CommandModel::new("   ", Duration::from_secs(1)).is_err());
        assert!(CommandModel::new("model 'unterminated", Duration::from_secs(1)).is_err());
        Ok(())
    }
}
