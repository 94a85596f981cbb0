use std::io::{stdin, BufReader, IsTerminal};

use anyhow::Result;
use clap::Parser;
use human_panic::setup_panic;
use log::info;

use graphcli::config::ConfigLoad;
use graphcli::session::Session;
use graphcli::trace;

#[derive(Debug, Parser, PartialEq)]
#[command(version)]
// disable default help flag since it collides with the -h short of --host in
// other tools of this family
#[command(author, about, disable_help_flag = true)]
pub struct Args {
    #[clap(short, long, help = "debug model")]
    debug: bool,

    #[clap(long, help = "Print help information")]
    help: bool,

    /// Configuration file path, default 'config/graphdb.toml'
    #[clap(
        short = 'c',
        long = "config",
        help = "Configuration file path",
        default_value = "config/graphdb.toml"
    )]
    config: String,

    /// quiet model, No output printed to stdout
    #[clap(long = "quiet", short = 'q', default_value = "false")]
    quiet: bool,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    #[clap(short = 'n', long, help = "Force non-interactive mode", default_value = "false")]
    non_interactive: bool,

    #[clap(long, require_equals = true, help = "Command to execute")]
    query: Option<String>,
}

/// CMD like:
///     graphcli         ==>  interactive shell
///     graphcli --query="STATS"
///     echo "VERTEX" | graphcli
///
#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic!();

    let args = Args::parse();
    if args.debug {
        println!("{:?}", args);
    }

    if !args.quiet {
        eprintln!();
        eprintln!("██████   ██████");
        eprintln!("██       ██  ██");
        eprintln!("██  ███  ██████");
        eprintln!("██   ██  ██ ██");
        eprintln!("██████   ██  ██  Graph Storage CLI");
        eprintln!();
    }

    let log_dir = format!(
        "{}/.graphcli",
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    );
    let _guards = trace::init_logging(&log_dir, &args.log_level).await?;
    info!("graphcli started");

    let mut settings: ConfigLoad = confy::load_path(&args.config)?;

    let is_repl = args.query.is_none() && !args.non_interactive && stdin().is_terminal();
    if !is_repl {
        settings.terminal_update();
    }
    if args.quiet {
        settings.show_stats = Some(false);
    }

    let mut session = Session::try_new(settings, is_repl).await?;

    if let Some(query) = args.query {
        for line in query.split(';') {
            if let Some(output) = session.handle_query(line).await? {
                if !output.is_empty() {
                    println!("{}", output);
                }
            }
        }
        return Ok(());
    }

    if is_repl {
        session.handle_repl().await;
    } else {
        session.handle_reader(BufReader::new(stdin().lock())).await?;
    }
    Ok(())
}
