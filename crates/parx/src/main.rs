mod cli;
mod logging;
mod pid_cmds;
mod run_cmd;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    // Usage errors exit 2 via clap before we get here.
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run(args) => run_cmd::handle_run(args).await,
        Commands::List => {
            logging::init_stderr();
            pid_cmds::handle_list()
        }
        Commands::Kill { pid } => {
            logging::init_stderr();
            pid_cmds::handle_kill(pid)
        }
        Commands::KillAll { yes } => {
            logging::init_stderr();
            pid_cmds::handle_kill_all(yes)
        }
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
