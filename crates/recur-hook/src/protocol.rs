//! Host hook protocol
//!
//! | mode      | stdin                    | stdout                          | exit |
//! |-----------|--------------------------|---------------------------------|------|
//! | on-add    | proposed record          | record, then feedback lines     | 0/1  |
//! | on-modify | original, proposed       | record, then feedback lines     | 0/1  |
//! | on-exit   | every touched record     | feedback lines                  | 0    |
//!
//! A non-zero exit from on-add or on-modify makes the host keep the
//! original record; stdout then carries that record and the error lines.

use recur_engine::{HookOutcome, PropagationChannel, RecurrenceEngine, TaskStore};
use recur_model::Record;
use std::path::PathBuf;

/// Which hook the process was started as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    OnAdd,
    OnModify,
    OnExit,
}

impl HookMode {
    /// Detect the mode from the executable name, e.g. `on-add.recurrence`
    #[must_use]
    pub fn from_program_name(program: &str) -> Option<Self> {
        let name = std::path::Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        [Self::OnAdd, Self::OnModify, Self::OnExit]
            .into_iter()
            .find(|mode| name.starts_with(mode.as_str()))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnAdd => "on-add",
            Self::OnModify => "on-modify",
            Self::OnExit => "on-exit",
        }
    }
}

/// `key:value` arguments the host passes to every hook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostArgs {
    pub api: Option<String>,
    pub args: Option<String>,
    pub command: Option<String>,
    pub rc: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub version: Option<String>,
}

impl HostArgs {
    /// Parse host arguments; unknown keys and bare words are ignored
    pub fn parse<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut parsed = Self::default();
        for arg in args {
            let Some((key, value)) = arg.as_ref().split_once(':') else {
                continue;
            };
            let value = value.to_string();
            match key {
                "api" => parsed.api = Some(value),
                "args" => parsed.args = Some(value),
                "command" => parsed.command = Some(value),
                "rc" => parsed.rc = Some(PathBuf::from(value)),
                "data" => parsed.data = Some(PathBuf::from(value)),
                "version" => parsed.version = Some(value),
                _ => {}
            }
        }
        parsed
    }
}

/// What the process should print and how it should exit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookResponse {
    pub stdout: Vec<String>,
    pub exit_code: i32,
}

impl HookResponse {
    fn reject(message: String) -> Self {
        Self {
            stdout: vec![message],
            exit_code: 1,
        }
    }
}

/// Run one hook invocation over already-read stdin
pub fn run_hook<S, C>(engine: &RecurrenceEngine<S, C>, mode: HookMode, input: &str) -> HookResponse
where
    S: TaskStore,
    C: PropagationChannel,
{
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    tracing::debug!(mode = mode.as_str(), lines = lines.len(), "Hook invoked");

    match mode {
        HookMode::OnAdd => {
            let Some(line) = lines.first() else {
                return HookResponse::default();
            };
            match Record::from_json_str(line) {
                Ok(proposed) => respond(engine.on_create(proposed)),
                Err(e) => HookResponse::reject(format!("Error: could not parse task: {e}")),
            }
        }
        HookMode::OnModify => match lines.as_slice() {
            [] => HookResponse::default(),
            [only] => HookResponse {
                stdout: vec![(*only).to_string()],
                exit_code: 0,
            },
            [original, proposed, ..] => {
                match (Record::from_json_str(original), Record::from_json_str(proposed)) {
                    (Ok(original), Ok(proposed)) => respond(engine.on_modify(original, proposed)),
                    (Err(e), _) | (_, Err(e)) => {
                        HookResponse::reject(format!("Error: could not parse task: {e}"))
                    }
                }
            }
        },
        HookMode::OnExit => {
            let mut touched = Vec::with_capacity(lines.len());
            for line in &lines {
                match Record::from_json_str(line) {
                    Ok(record) => touched.push(record),
                    Err(e) => tracing::warn!("Skipping unreadable task: {}", e),
                }
            }
            HookResponse {
                stdout: engine.on_settle(&touched).lines(),
                exit_code: 0,
            }
        }
    }
}

fn respond(outcome: HookOutcome) -> HookResponse {
    match outcome {
        HookOutcome::Accepted { record, feedback } => {
            let mut stdout = vec![record.to_json_string()];
            stdout.extend(feedback.lines());
            HookResponse {
                stdout,
                exit_code: 0,
            }
        }
        HookOutcome::Rejected {
            original, feedback, ..
        } => {
            let mut stdout = vec![original.to_json_string()];
            stdout.extend(feedback.lines());
            HookResponse {
                stdout,
                exit_code: 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mode_from_hook_file_names() {
        assert_eq!(
            HookMode::from_program_name("/home/me/.task/hooks/on-add.recurrence"),
            Some(HookMode::OnAdd)
        );
        assert_eq!(
            HookMode::from_program_name("on-modify-recurrence"),
            Some(HookMode::OnModify)
        );
        assert_eq!(HookMode::from_program_name("on-exit"), Some(HookMode::OnExit));
        assert_eq!(HookMode::from_program_name("/usr/bin/recur-hook"), None);
    }

    #[test]
    fn host_args() {
        let args = HostArgs::parse([
            "api:2",
            "args:task 3 done",
            "command:done",
            "rc:/home/me/.taskrc",
            "data:/home/me/.task",
            "version:2.6.2",
            "stray",
        ]);
        assert_eq!(args.api.as_deref(), Some("2"));
        assert_eq!(args.args.as_deref(), Some("task 3 done"));
        assert_eq!(args.command.as_deref(), Some("done"));
        assert_eq!(args.data, Some(PathBuf::from("/home/me/.task")));
        assert_eq!(args.rc, Some(PathBuf::from("/home/me/.taskrc")));
    }
}
