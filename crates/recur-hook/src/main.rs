use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use recur_engine::config::CONFIG_ENV;
use recur_engine::{FileChannel, RecurrenceConfig, RecurrenceEngine};
use recur_hook::{logging, run_hook, HookMode, HostArgs, TaskwarriorStore};
use std::io::Read;
use std::path::PathBuf;

fn cli() -> Command {
    let host_args = || {
        Arg::new("host-args")
            .num_args(0..)
            .trailing_var_arg(true)
            .allow_hyphen_values(true)
            .action(ArgAction::Append)
            .help("Arguments passed by the host (api:, args:, command:, rc:, data:, version:)")
    };

    Command::new("recur-hook")
        .version(recur_hook::VERSION)
        .about("Template/instance recurrence for Taskwarrior")
        .subcommand_required(true)
        .subcommand(
            Command::new("on-add")
                .about("Pre-commit hook for added tasks")
                .arg(host_args()),
        )
        .subcommand(
            Command::new("on-modify")
                .about("Pre-commit hook for modified tasks")
                .arg(host_args()),
        )
        .subcommand(
            Command::new("on-exit")
                .about("Post-commit hook; spawns and respawns instances")
                .arg(host_args()),
        )
}

/// Mode and host arguments, from the link name or from a subcommand
fn invocation() -> anyhow::Result<(HookMode, Vec<String>)> {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_default();
    if let Some(mode) = HookMode::from_program_name(&program) {
        return Ok((mode, args.collect()));
    }

    let matches = cli().get_matches();
    let (mode, sub) = matches
        .subcommand()
        .and_then(|(name, sub)| Some((HookMode::from_program_name(name)?, sub)))
        .context("unknown hook subcommand")?;
    let host_args = sub
        .get_many::<String>("host-args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    Ok((mode, host_args))
}

fn data_dir(host: &HostArgs) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &host.data {
        return Ok(dir.clone());
    }
    if let Some(dir) = std::env::var_os("TASKDATA") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".task"))
        .context("cannot locate the task data directory (no data: argument, TASKDATA or home)")
}

fn main() -> anyhow::Result<()> {
    let (mode, raw_args) = invocation()?;
    let host = HostArgs::parse(&raw_args);
    let data_dir = data_dir(&host)?;

    let config = RecurrenceConfig::discover(std::env::var_os(CONFIG_ENV).map(PathBuf::from), &data_dir)
        .context("loading recurrence config")?;

    if let Err(e) = logging::init(&config, &data_dir) {
        eprintln!("Warning: recurrence debug log disabled: {e}");
    }
    tracing::debug!(
        mode = mode.as_str(),
        command = host.command.as_deref().unwrap_or(""),
        version = host.version.as_deref().unwrap_or(""),
        "Recurrence hook starting"
    );

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading hook input")?;

    let mut store = TaskwarriorStore::from_config(&config).with_data_dir(&data_dir);
    if let Some(rc) = &host.rc {
        store = store.with_rc_file(rc);
    }
    let channel = FileChannel::new(config.channel_path(&data_dir));
    let engine = RecurrenceEngine::new(store, channel, config);

    let response = run_hook(&engine, mode, &input);
    for line in &response.stdout {
        println!("{line}");
    }
    tracing::debug!(exit_code = response.exit_code, "Recurrence hook finished");
    std::process::exit(response.exit_code)
}
