//! The `run` subcommand: wire configuration, expansion, registry, the
//! scheduler, and the result sink together.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use parx_core::paths::SessionPaths;
use parx_core::{ResolvedConfig, ShutdownReason};
use parx_expand::ExpandRequest;
use parx_registry::{Registry, RegistryEntry, RegistryGuard};
use parx_scheduler::run_session;
use parx_sink::output_log::OutputLog;
use parx_sink::summary::SummaryBuilder;
use parx_sink::{ResultSink, SessionInfo, backup};

use crate::cli::RunArgs;
use crate::logging;

pub(crate) async fn handle_run(args: RunArgs) -> Result<i32> {
    let config = config_from_args(&args);
    config.validate()?;

    let pid = std::process::id();
    let started_at = Utc::now();
    let paths = SessionPaths::new(pid, started_at)?;
    let _log_guard = logging::init_session(&paths.log_file())
        .context("Failed to initialize session logging")?;

    info!(base = paths.base(), pid, "session starting");

    let request = ExpandRequest {
        command_template: args.command.clone(),
        task_sources: args.tasks.clone(),
        arguments_file: args.args_file.clone(),
        separator: args.separator,
        env_names: args.env.clone(),
        extension_filter: args.ext.clone(),
        working_directory: paths.workspace_dir(),
    };

    // Input validation happens before any result file exists; a bad spec
    // leaves nothing behind but the session log.
    let specs = parx_expand::expand(&request, &config)?;
    info!(tasks = specs.len(), "expanded task specs");

    let session = SessionInfo::new(args.command.clone());

    let registry = Registry::new(paths.registry_file());
    let entry = RegistryEntry::new(
        pid,
        started_at,
        file_name(&paths.log_file()),
        file_name(&paths.results_file()),
    );
    // Registry problems are never fatal; the run continues unregistered.
    let _registry_guard = match RegistryGuard::acquire(registry, entry) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!(error = %e, "could not register in the PID registry");
            None
        }
    };

    if config.backups_enabled {
        let mut task_files: Vec<PathBuf> = specs
            .iter()
            .filter_map(|spec| spec.task_file_path.clone())
            .collect();
        task_files.sort();
        task_files.dedup();
        backup::write_backups(
            &paths.backup_dir(),
            &task_files,
            args.args_file.as_deref(),
            &session,
        );
    }

    let mut sink = ResultSink::create(&paths.results_file(), &session, &config);
    let mut output_log = config
        .task_output_log_enabled
        .then(|| OutputLog::create(&paths.output_log_file()));
    let mut summary = SummaryBuilder::new();

    let monitor_enabled = !args.no_monitor && parx_monitor::monitoring_available();
    let wall = std::time::Instant::now();

    let report = run_session(specs, &config, &paths, monitor_enabled, |result| {
        sink.record_task(result);
        if let Some(log) = output_log.as_mut() {
            log.record(result);
        }
        summary.add(result);
    })
    .await?;

    sink.flush();
    if sink.write_failures() > 0 {
        warn!(
            failures = sink.write_failures(),
            "some result records could not be written"
        );
    }

    print!("{}", summary.render(wall.elapsed().as_secs_f64()));
    println!("Results:      {}", paths.results_file().display());

    Ok(match report.shutdown_reason {
        None => 0,
        Some(ShutdownReason::StopLimit) => 1,
        Some(ShutdownReason::Signal) => 130,
    })
}

fn config_from_args(args: &RunArgs) -> ResolvedConfig {
    ResolvedConfig {
        max_workers: args.workers,
        timeout_seconds: args.timeout,
        poll_wait_seconds: args.poll_wait,
        start_delay_seconds: args.start_delay,
        max_output_capture: args.capture,
        stop_limits_enabled: args.stop_limits,
        max_consecutive_failures: args.max_consecutive_failures,
        max_failure_rate: args.max_failure_rate,
        min_tasks_for_rate_check: args.min_tasks_for_rate_check,
        workspace_isolation: args.isolate_workspaces,
        use_process_groups: !args.no_process_groups,
        max_file_size_bytes: args.max_file_size,
        max_argument_length: args.max_argument_length,
        task_output_log_enabled: !args.no_output_log,
        backups_enabled: !args.no_backup,
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
