//! Registry subcommands: list, kill, kill-all.

use anyhow::{Result, bail};
use chrono::SecondsFormat;

use parx_core::paths::registry_path;
use parx_registry::Registry;

fn open_registry() -> Result<Registry> {
    Ok(Registry::new(registry_path()?))
}

pub(crate) fn handle_list() -> Result<i32> {
    let registry = open_registry()?;
    let entries = registry.list()?;

    if entries.is_empty() {
        println!("No running instances");
        return Ok(0);
    }

    println!("{:<10} {:<25} {}", "PID", "STARTED", "RESULTS");
    for entry in entries {
        println!(
            "{:<10} {:<25} {}",
            entry.pid,
            entry
                .started_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.result_file
        );
    }
    Ok(0)
}

pub(crate) fn handle_kill(pid: u32) -> Result<i32> {
    let registry = open_registry()?;
    registry.kill(pid)?;
    println!("Terminated instance {pid}");
    Ok(0)
}

pub(crate) fn handle_kill_all(confirmed: bool) -> Result<i32> {
    if !confirmed {
        bail!("kill-all terminates every running instance; pass --yes to confirm");
    }

    let registry = open_registry()?;
    let killed = registry.kill_all(true)?;
    println!("Terminated {} instance(s)", killed.len());
    Ok(0)
}
