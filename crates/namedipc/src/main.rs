mod cmd;
mod config;
mod exit;
mod logging;
mod output;
mod signals;

use clap::Parser;
use namedipc_sync::CancelToken;

use crate::cmd::Command;
use crate::config::{AppContext, ConfigArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "namedipc",
    version,
    about = "Cooperating processes sharing POSIX named IPC objects"
)]
struct Cli {
    /// Debug output (same as --log-level debug).
    #[arg(short = 'd', long, visible_alias = "verbose", global = true)]
    debug: bool,

    /// Output format for `status`.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level; overrides --debug.
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, LogLevel::resolve(cli.log_level, cli.debug));

    let ctx = AppContext {
        config: cli.config.into(),
        cancel: CancelToken::new(),
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
    };

    let result = signals::install_ctrlc_handler(ctx.cancel.clone())
        .and_then(|()| cmd::run(cli.command, &ctx));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
