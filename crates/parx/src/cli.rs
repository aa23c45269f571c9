use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use parx_core::Separator;

#[derive(Parser)]
#[command(name = "parx", version)]
#[command(about = "Run a template command in parallel over files or argument lists")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Expand the inputs and execute the command under the worker pool
    Run(RunArgs),

    /// List running instances from the shared registry
    List,

    /// Terminate a registered instance (SIGTERM, then SIGKILL)
    Kill {
        /// PID of the instance to terminate
        pid: u32,
    },

    /// Terminate every registered instance
    KillAll {
        /// Confirm the operation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command template; may contain @TASK@, @ARG@, @ARG_N@
    pub command: String,

    /// Task sources: directories, files, or glob patterns (repeatable)
    #[arg(short = 't', long = "task")]
    pub tasks: Vec<String>,

    /// Arguments file: one task per non-comment line
    #[arg(short = 'a', long = "args-file")]
    pub args_file: Option<PathBuf>,

    /// Field separator for the arguments file
    #[arg(short = 's', long)]
    pub separator: Option<Separator>,

    /// Env var names bound positionally to argument fields
    #[arg(short = 'e', long = "env", value_delimiter = ',')]
    pub env: Vec<String>,

    /// Only include task files with this extension
    #[arg(long)]
    pub ext: Option<String>,

    /// Maximum concurrently running tasks
    #[arg(short = 'w', long, default_value_t = 5)]
    pub workers: u32,

    /// Per-task timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Scheduler idle-wait bound in seconds
    #[arg(long, default_value_t = 0.1)]
    pub poll_wait: f64,

    /// Delay between consecutive task launches in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start_delay: f64,

    /// Characters of stdout/stderr retained per task
    #[arg(long, default_value_t = 1000)]
    pub capture: usize,

    /// Stop early after too many failures
    #[arg(long)]
    pub stop_limits: bool,

    /// Consecutive failures before stopping (with --stop-limits)
    #[arg(long, default_value_t = 5)]
    pub max_consecutive_failures: u32,

    /// Failure-rate threshold before stopping (with --stop-limits)
    #[arg(long, default_value_t = 0.5)]
    pub max_failure_rate: f64,

    /// Completions before the failure rate is checked
    #[arg(long, default_value_t = 10)]
    pub min_tasks_for_rate_check: u32,

    /// Give each worker its own workspace subdirectory
    #[arg(long)]
    pub isolate_workspaces: bool,

    /// Signal only the direct child instead of its process group
    #[arg(long)]
    pub no_process_groups: bool,

    /// Skip the per-task output log
    #[arg(long)]
    pub no_output_log: bool,

    /// Skip backing up input files
    #[arg(long)]
    pub no_backup: bool,

    /// Skip per-task resource monitoring
    #[arg(long)]
    pub no_monitor: bool,

    /// Maximum task file size in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_file_size: u64,

    /// Maximum length of a single command argument
    #[arg(long, default_value_t = 4096)]
    pub max_argument_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["parx", "run", "echo hi", "-a", "args.txt"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.command, "echo hi");
        assert_eq!(args.args_file, Some(PathBuf::from("args.txt")));
        assert_eq!(args.workers, 5);
        assert_eq!(args.timeout, 60);
    }

    #[test]
    fn test_env_names_split_on_comma() {
        let cli = Cli::try_parse_from([
            "parx", "run", "true", "-a", "f", "-e", "HOST,PORT,ENV",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.env, vec!["HOST", "PORT", "ENV"]);
    }

    #[test]
    fn test_separator_values() {
        for (text, expected) in [
            ("comma", Separator::Comma),
            ("whitespace", Separator::Whitespace),
            ("pipe", Separator::Pipe),
        ] {
            let cli =
                Cli::try_parse_from(["parx", "run", "true", "-a", "f", "-s", text]).unwrap();
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.separator, Some(expected));
        }
    }

    #[test]
    fn test_kill_requires_pid() {
        assert!(Cli::try_parse_from(["parx", "kill"]).is_err());
        let cli = Cli::try_parse_from(["parx", "kill", "1234"]).unwrap();
        let Commands::Kill { pid } = cli.command else {
            panic!("expected kill");
        };
        assert_eq!(pid, 1234);
    }

    #[test]
    fn test_repeatable_task_sources() {
        let cli = Cli::try_parse_from([
            "parx", "run", "cat @TASK@", "-t", "dir1", "-t", "dir2/*.txt",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.tasks, vec!["dir1", "dir2/*.txt"]);
    }
}
