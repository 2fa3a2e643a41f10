//! Taskwarrior-backed task store
//!
//! Every read runs `task ... export` with hooks disabled. Mutations either
//! disable hooks too or carry the origin tag in the `rorigin` field, so the
//! engine recognises and skips its own writes when the host's hooks fire.

use recur_engine::{Filter, Origin, RecurrenceConfig, StoreError, TaskStore};
use recur_model::fields;
use recur_model::{Record, TaskId};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Captured result of one host command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl TaskOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs the host binary
pub trait TaskRunner {
    /// Run `binary` with `args`, feeding `stdin` when given
    ///
    /// # Errors
    /// Returns [`StoreError::Spawn`] if the process cannot be started.
    fn run(&self, binary: &str, args: &[String], stdin: Option<&str>) -> Result<TaskOutput, StoreError>;
}

/// [`TaskRunner`] using real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl TaskRunner for ProcessRunner {
    fn run(&self, binary: &str, args: &[String], stdin: Option<&str>) -> Result<TaskOutput, StoreError> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StoreError::Spawn(format!("failed to execute {binary}: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .map_err(|e| StoreError::Spawn(format!("failed to write to {binary}: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| StoreError::Spawn(format!("failed to wait for {binary}: {e}")))?;

        Ok(TaskOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Store adapter issuing `task` commands
#[derive(Debug, Clone)]
pub struct TaskwarriorStore<R = ProcessRunner> {
    runner: R,
    binary: String,
    data_dir: Option<PathBuf>,
    rc_file: Option<PathBuf>,
    suppress_hooks: bool,
    origin_tag: String,
}

impl TaskwarriorStore<ProcessRunner> {
    /// Store for the configured binary
    #[must_use]
    pub fn from_config(config: &RecurrenceConfig) -> Self {
        Self::with_runner(ProcessRunner, config)
    }
}

impl<R: TaskRunner> TaskwarriorStore<R> {
    #[must_use]
    pub fn with_runner(runner: R, config: &RecurrenceConfig) -> Self {
        Self {
            runner,
            binary: config.task_binary.clone(),
            data_dir: None,
            rc_file: None,
            suppress_hooks: config.suppress_host_hooks,
            origin_tag: config.origin_tag.clone(),
        }
    }

    /// Point every command at a data directory
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Point every command at an rc file
    #[must_use]
    pub fn with_rc_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rc_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn base_args(&self, hooks_off: bool) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(rc) = &self.rc_file {
            args.push(format!("rc:{}", rc.display()));
        }
        if hooks_off {
            args.push("rc.hooks=off".to_string());
        }
        args.push("rc.confirmation=off".to_string());
        args.push("rc.verbose=nothing".to_string());
        args.push("rc.json.array=on".to_string());
        if let Some(dir) = &self.data_dir {
            args.push(format!("rc.data.location={}", dir.display()));
        }
        args
    }

    /// Origin modification appended to mutations that keep hooks on
    fn origin_mod(&self, origin: &Origin) -> Option<String> {
        (!self.suppress_hooks).then(|| format!("{}:{}", fields::ORIGIN, origin.tag))
    }

    fn execute(&self, args: Vec<String>, stdin: Option<&str>) -> Result<String, StoreError> {
        tracing::debug!(binary = %self.binary, ?args, "Running host command");
        let output = self.runner.run(&self.binary, &args, stdin)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(StoreError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                code: output
                    .code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn export(&self, filter: String) -> Result<Vec<Record>, StoreError> {
        let mut args = self.base_args(true);
        args.push(filter);
        args.push("export".to_string());
        parse_export(&self.execute(args, None)?)
    }

    fn mutate(&self, id: TaskId, command: &str, mut extra: Vec<String>, origin: &Origin) -> Result<(), StoreError> {
        let mut args = self.base_args(self.suppress_hooks);
        args.push(id.to_string());
        args.push(command.to_string());
        args.append(&mut extra);
        args.extend(self.origin_mod(origin));
        self.execute(args, None)?;
        self.clear_origin(id);
        Ok(())
    }

    /// Drop the origin mark once a tagged mutation has been committed
    ///
    /// The mark has to survive the host's hooks for that mutation, so it is
    /// removed afterwards with hooks off. A failure leaves a stale mark,
    /// which the entry points tolerate.
    fn clear_origin(&self, id: TaskId) {
        if self.suppress_hooks {
            return;
        }
        let mut args = self.base_args(true);
        args.push(id.to_string());
        args.push("modify".to_string());
        args.push(format!("{}:", fields::ORIGIN));
        if let Err(e) = self.execute(args, None) {
            tracing::warn!(task = %id, "Could not clear origin mark: {}", e);
        }
    }
}

/// Decode `task export` output
///
/// # Errors
/// Returns [`StoreError::Decode`] for anything but a JSON array of objects.
pub fn parse_export(stdout: &str) -> Result<Vec<Record>, StoreError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let values: Vec<serde_json::Value> =
        serde_json::from_str(trimmed).map_err(|e| StoreError::Decode(e.to_string()))?;
    values
        .iter()
        .map(|v| Record::from_json_value(v).map_err(|e| StoreError::Decode(e.to_string())))
        .collect()
}

/// `field:value` modifications for `updates`; removed values render empty
#[must_use]
pub fn modifications(updates: &Record) -> Vec<String> {
    updates
        .iter()
        .map(|(name, value)| format!("{name}:{}", value.to_wire_string()))
        .collect()
}

impl<R: TaskRunner> TaskStore for TaskwarriorStore<R> {
    fn get(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
        Ok(self.export(format!("uuid:{id}"))?.into_iter().next())
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let records = self.export(format!("{}:{}", fields::TEMPLATE_REF, filter.template()))?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    fn update(&self, id: TaskId, updates: &Record, origin: &Origin) -> Result<(), StoreError> {
        self.mutate(id, "modify", modifications(updates), origin)
    }

    fn create(&self, record: &Record, origin: &Origin) -> Result<TaskId, StoreError> {
        let id = record.uuid().unwrap_or_else(TaskId::new);
        let mut record = record.clone();
        record.set(fields::UUID, id.to_string());
        if !self.suppress_hooks {
            record.set(fields::ORIGIN, origin.tag.as_str());
        }

        let mut args = self.base_args(self.suppress_hooks);
        args.push("import".to_string());
        self.execute(args, Some(&record.to_json_string()))?;
        self.clear_origin(id);
        Ok(id)
    }

    fn delete(&self, id: TaskId, origin: &Origin) -> Result<(), StoreError> {
        self.mutate(id, "delete", Vec::new(), origin)
    }

    fn annotate(&self, id: TaskId, text: &str, _origin: &Origin) -> Result<(), StoreError> {
        // annotations carry no recurrence fields, so hooks stay off
        let mut args = self.base_args(true);
        args.push(id.to_string());
        args.push("annotate".to_string());
        args.push(text.to_string());
        self.execute(args, None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Records calls and replays canned output
    #[derive(Default)]
    struct Scripted {
        calls: RefCell<Vec<(Vec<String>, Option<String>)>>,
        replies: RefCell<Vec<TaskOutput>>,
    }

    impl Scripted {
        fn reply(self, code: i32, stdout: &str) -> Self {
            self.replies.borrow_mut().push(TaskOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: if code == 0 { String::new() } else { "boom".into() },
            });
            self
        }
    }

    impl TaskRunner for Scripted {
        fn run(&self, _: &str, args: &[String], stdin: Option<&str>) -> Result<TaskOutput, StoreError> {
            self.calls
                .borrow_mut()
                .push((args.to_vec(), stdin.map(str::to_string)));
            let mut replies = self.replies.borrow_mut();
            Ok(if replies.is_empty() {
                TaskOutput {
                    code: Some(0),
                    ..TaskOutput::default()
                }
            } else {
                replies.remove(0)
            })
        }
    }

    fn store(runner: Scripted, suppress: bool) -> TaskwarriorStore<Scripted> {
        let config = RecurrenceConfig::default().with_suppress_host_hooks(suppress);
        TaskwarriorStore::with_runner(runner, &config).with_data_dir("/data")
    }

    #[test]
    fn queries_always_disable_hooks() {
        let template = TaskId::new();
        let export = format!(
            r#"[{{"uuid":"{}","status":"pending","rtemplate":"{template}","rindex":2}},
                {{"uuid":"{}","status":"completed","rtemplate":"{template}","rindex":1}}]"#,
            TaskId::new(),
            TaskId::new()
        );
        let store = store(Scripted::default().reply(0, &export), false);

        let active = store.find(&Filter::ActiveInstancesOf(template)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].index(), Some(2));

        let calls = store.runner().calls.borrow();
        let args = &calls[0].0;
        assert!(args.contains(&"rc.hooks=off".to_string()));
        assert!(args.contains(&"rc.data.location=/data".to_string()));
        assert_eq!(args[args.len() - 2], format!("rtemplate:{template}"));
        assert_eq!(args[args.len() - 1], "export");
    }

    #[test]
    fn mutations_are_marked_one_way_or_the_other() {
        let id = TaskId::new();
        let origin = Origin::new("recurrence");
        let updates = Record::new().with("rlast", 4_u32);

        let quiet = store(Scripted::default(), true);
        quiet.update(id, &updates, &origin).unwrap();
        let args = quiet.runner().calls.borrow()[0].0.clone();
        assert!(args.contains(&"rc.hooks=off".to_string()));
        assert!(args.contains(&"rlast:4".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("rorigin:")));

        assert_eq!(quiet.runner().calls.borrow().len(), 1);

        let tagged = store(Scripted::default(), false);
        tagged.delete(id, &origin).unwrap();
        let calls = tagged.runner().calls.borrow();
        let args = &calls[0].0;
        assert!(!args.contains(&"rc.hooks=off".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("rorigin:recurrence"));
    }

    #[test]
    fn origin_mark_is_cleared_after_a_tagged_mutation() {
        let id = TaskId::new();
        let tagged = store(Scripted::default(), false);
        tagged.delete(id, &Origin::new("recurrence")).unwrap();

        let calls = tagged.runner().calls.borrow();
        assert_eq!(calls.len(), 2);
        let clear = &calls[1].0;
        assert!(clear.contains(&"rc.hooks=off".to_string()));
        assert_eq!(
            clear[clear.len() - 3..].to_vec(),
            vec![id.to_string(), "modify".to_string(), "rorigin:".to_string()]
        );
    }

    #[test]
    fn failed_clear_does_not_fail_the_mutation() {
        let tagged = store(Scripted::default().reply(0, "").reply(1, ""), false);
        let id = tagged
            .create(&Record::new().with("description", "Rent"), &Origin::new("recurrence"))
            .unwrap();
        assert_eq!(tagged.runner().calls.borrow()[1].0.last(), Some(&"rorigin:".to_string()));
        assert!(tagged.runner().calls.borrow()[1].0.contains(&id.to_string()));
    }

    #[test]
    fn create_imports_json_on_stdin() {
        let store = store(Scripted::default(), false);
        let record = Record::new().with("description", "Water plants");
        let id = store
            .create(&record, &Origin::new("recurrence"))
            .unwrap();

        let calls = store.runner().calls.borrow();
        let (args, stdin) = &calls[0];
        assert_eq!(args.last().map(String::as_str), Some("import"));
        let sent = Record::from_json_str(stdin.as_deref().unwrap()).unwrap();
        assert_eq!(sent.uuid(), Some(id));
        assert_eq!(sent.get("rorigin").and_then(|v| v.as_text()), Some("recurrence"));
    }

    #[test]
    fn failures_and_bad_output_surface_as_errors() {
        let store = store(Scripted::default().reply(2, "").reply(0, "not json"), true);
        let err = store.get(TaskId::new()).unwrap_err();
        assert!(matches!(err, StoreError::CommandFailed { ref code, ref stderr, .. } if code == "2" && stderr == "boom"));
        assert!(matches!(store.get(TaskId::new()), Err(StoreError::Decode(_))));
        assert_eq!(parse_export("  \n").unwrap(), Vec::<Record>::new());
    }
}
