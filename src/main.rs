//! Binary entry point for the respawn CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use respawn::{
    ConfigError, Instance, InstanceError, InstanceOverrides, LifecycleConfig, ProcessCommandRunner,
    Provider, RemoteShell, RunOptions, ScalewayConfig, ScalewayProvider, SshConfig,
    TracingObserver,
};

mod cli;

use cli::{Cli, RunCommand};

/// Job name the user's command is registered under.
const COMMAND_JOB: &str = "command";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("interrupted; instance torn down")]
    Interrupted,
    #[error(transparent)]
    Instance(#[from] InstanceError),
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl CliError {
    /// Exit status reported for this failure.
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Instance(InstanceError::CommandFailed {
                return_code: Some(code),
                ..
            }) if *code != 0 => *code,
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let remote_command = render_remote_command(&args.command);

    let lifecycle = LifecycleConfig::load_without_cli_args()?;
    let scaleway = ScalewayConfig::load_without_cli_args()?;
    let ssh =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;

    let spec = scaleway.instance_spec(&overrides_from(&args))?;
    let options = run_options(&args, &lifecycle);
    let shell = RemoteShell::new(ssh, ProcessCommandRunner)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provider =
        ScalewayProvider::new(scaleway, shell).map_err(|err| CliError::Provider(err.to_string()))?;

    let shutdown = CancellationToken::new();
    let mut instance = Instance::new(spec, lifecycle, Arc::new(provider))
        .with_observer(Arc::new(TracingObserver))
        .with_shutdown(shutdown.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });
    let result = supervise(&mut instance, &remote_command, options).await;
    interrupt.abort();

    result?;
    Ok(0)
}

/// Runs the command and always tears the instance down afterwards, including
/// after an interrupted create.
async fn supervise<P: Provider + 'static>(
    instance: &mut Instance<P>,
    remote_command: &str,
    options: RunOptions,
) -> Result<(), CliError> {
    let outcome = execute(instance, remote_command, options).await;
    let teardown = instance.teardown().await;
    report_usage(instance);

    outcome.map_err(interrupted)?;
    teardown?;
    Ok(())
}

fn interrupted(err: CliError) -> CliError {
    match err {
        CliError::Instance(InstanceError::Cancelled { .. }) => CliError::Interrupted,
        other => other,
    }
}

async fn execute<P: Provider + 'static>(
    instance: &mut Instance<P>,
    remote_command: &str,
    options: RunOptions,
) -> Result<(), CliError> {
    instance.create().await?;
    instance.run(COMMAND_JOB, remote_command, options)?;
    instance.wait_process(COMMAND_JOB).await?;
    if let Some(process) = instance.process(COMMAND_JOB) {
        write!(io::stdout(), "{}", process.stdout_text()).ok();
    }
    Ok(())
}

fn overrides_from(args: &RunCommand) -> InstanceOverrides {
    InstanceOverrides {
        name: args
            .name
            .clone()
            .unwrap_or_else(|| format!("respawn-{}", Uuid::new_v4().simple())),
        nr_cpus: args.cpus,
        mem_gb: args.mem,
        disk_space_gb: args.disk,
        preemptible: args.preemptible,
        hourly_price: args.price,
    }
}

fn run_options(args: &RunCommand, lifecycle: &LifecycleConfig) -> RunOptions {
    RunOptions {
        retries: args.retries.unwrap_or(lifecycle.default_num_cmd_retries),
        sandbox_image: args.sandbox.clone(),
        quiet: args.quiet,
    }
}

fn render_remote_command(args: &[String]) -> String {
    let mut result = String::new();
    let mut first = true;

    for arg in args {
        if first {
            first = false;
        } else {
            result.push(' ');
        }

        let escaped = escape(arg.as_str().into());
        result.push_str(escaped.as_ref());
    }

    result
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\n' | '\r' | '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn report_usage<P: Provider>(instance: &Instance<P>) {
    let runtime = instance.runtime();
    writeln!(
        io::stderr(),
        "instance {}: {} reset(s), runtime {}m{:02}s, cost {:.4}",
        instance.name(),
        instance.reset_count(),
        runtime.num_minutes(),
        runtime.num_seconds().rem_euclid(60),
        instance.compute_cost()
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use respawn::test_support::{EnvGuard, ScriptedProvider};
    use respawn::{InstanceSpec, ProcessorStatus};
    use rstest::rstest;
    use std::time::Duration;

    fn scripted_instance(
        provider: &ScriptedProvider,
        shutdown: &CancellationToken,
    ) -> Instance<ScriptedProvider> {
        let spec = InstanceSpec::builder()
            .name("respawn-test")
            .resources(2, 4, 20)
            .zone("fr-par-1")
            .instance_type("DEV1-S")
            .image_label("ubuntu_jammy")
            .project_id("project")
            .architecture("x86_64")
            .build()
            .unwrap_or_else(|err| panic!("spec should build: {err}"));
        Instance::new(spec, LifecycleConfig::default(), Arc::new(provider.clone()))
            .with_shutdown(shutdown.clone())
    }

    fn parse(args: &[&str]) -> RunCommand {
        let cli = Cli::try_parse_from(args).unwrap_or_else(|err| panic!("args should parse: {err}"));
        match cli {
            Cli::Run(command) => command,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_command_args_rejects_control_characters() {
        let err = validate_command_args(&[String::from("echo\tbad")])
            .expect_err("tab should be rejected");

        assert!(
            matches!(err, CliError::InvalidCommand(ref message) if message.contains("control characters")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn validate_command_args_accepts_safe_arguments() {
        assert!(validate_command_args(&[String::from("echo"), String::from("ok")]).is_ok());
    }

    #[test]
    fn render_remote_command_escapes_arguments() {
        let args = vec![
            String::from("echo"),
            String::from("a b"),
            String::from("c'd"),
        ];
        let rendered = render_remote_command(&args);

        assert_eq!(rendered, "echo 'a b' 'c'\\''d'");
    }

    #[test]
    fn run_flags_build_overrides_and_options() {
        let args = parse(&[
            "respawn",
            "run",
            "--name",
            "aligner",
            "--cpus",
            "8",
            "--preemptible",
            "--price",
            "0.25",
            "--sandbox",
            "biocontainers/bwa",
            "--quiet",
            "--",
            "bwa",
            "index",
            "ref.fa",
        ]);
        let overrides = overrides_from(&args);
        assert_eq!(overrides.name, "aligner");
        assert_eq!(overrides.nr_cpus, 8);
        assert!(overrides.preemptible);

        let options = run_options(&args, &LifecycleConfig::default());
        assert_eq!(options.retries, 3);
        assert_eq!(options.sandbox_image.as_deref(), Some("biocontainers/bwa"));
        assert!(options.quiet);
        assert_eq!(args.command, vec!["bwa", "index", "ref.fa"]);
    }

    #[test]
    fn unnamed_instances_get_generated_names() {
        let args = parse(&["respawn", "run", "true"]);
        let first = overrides_from(&args);
        let second = overrides_from(&args);
        assert!(first.name.starts_with("respawn-"));
        assert_ne!(first.name, second.name);
    }

    #[rstest]
    #[case::fatal_command(
        CliError::Instance(InstanceError::CommandFailed {
            instance: String::from("vm"),
            job: String::from(COMMAND_JOB),
            return_code: Some(7),
            stderr: String::new(),
        }),
        7
    )]
    #[case::fatal_without_code(
        CliError::Instance(InstanceError::CommandFailed {
            instance: String::from("vm"),
            job: String::from(COMMAND_JOB),
            return_code: None,
            stderr: String::new(),
        }),
        1
    )]
    #[case::interrupted(CliError::Interrupted, 130)]
    #[case::config(CliError::Config(String::from("missing")), 1)]
    fn exit_codes_follow_the_failure(#[case] err: CliError, #[case] expected: i32) {
        assert_eq!(err.exit_code(), expected);
    }

    #[tokio::test]
    async fn run_command_reports_missing_credentials() {
        let _guard = EnvGuard::set_vars(&[
            ("SCW_SECRET_KEY", ""),
            ("SCW_DEFAULT_PROJECT_ID", "project"),
        ])
        .await;
        let args = parse(&["respawn", "run", "true"]);

        let err = run_command(args)
            .await
            .expect_err("blank secret key should be rejected");

        assert!(
            matches!(&err, CliError::Config(message) if message.contains("SCW_SECRET_KEY")),
            "unexpected error: {err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_create_is_torn_down() {
        let provider = ScriptedProvider::new();
        provider.delay_create(Duration::from_secs(30));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut instance = scripted_instance(&provider, &shutdown);

        let err = supervise(&mut instance, "true", RunOptions::with_retries(0))
            .await
            .expect_err("interrupt should surface");

        assert!(matches!(err, CliError::Interrupted), "unexpected error: {err}");
        assert_eq!(err.exit_code(), 130);
        assert_eq!(provider.create_count(), 1);
        assert_eq!(provider.destroy_count(), 1);
        assert_eq!(provider.current_status(), ProcessorStatus::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_runs_are_torn_down() {
        let provider = ScriptedProvider::new();
        let shutdown = CancellationToken::new();
        let mut instance = scripted_instance(&provider, &shutdown);

        supervise(&mut instance, "true", RunOptions::with_retries(0))
            .await
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        assert_eq!(provider.executed_commands(), vec!["true"]);
        assert_eq!(provider.destroy_count(), 1);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Interrupted);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(rendered.contains("interrupted"), "rendered: {rendered}");
    }
}
