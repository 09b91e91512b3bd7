//! # Gearman CLI Entry Point
//!
//! Submits jobs to Gearman job servers from a shell.
//!
//! ## Usage
//!
//! ```bash
//! # Run a job and print its result as JSON
//! gearman submit reverse --arg hello -s 127.0.0.1:4730
//!
//! # Structured arguments are sent as JSON
//! gearman submit resize --arg '{"width": 640}' --priority high --timeout 30
//!
//! # Fire and forget; prints the job handle
//! gearman background send_mail --arg '"ada@example.com"' --priority low
//! ```

use anyhow::{anyhow, Result};
use argh::FromArgs;
use gearman_cli::{parse_arg, parse_priority, resolve_servers, task_outcome, SERVERS_ENV};
use gearman_client::GearmanClient;
use gearman_common::Task;
use std::time::Duration;

#[derive(FromArgs)]
/// gearman - submit jobs to Gearman job servers
struct Cli {
    /// log debug output to stderr
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Submit(SubmitArgs),
    Background(BackgroundArgs),
}

/// Arguments for running a foreground job.
///
/// # Example
///
/// ```bash
/// gearman submit reverse --arg hello -s 10.0.0.1 -s 10.0.0.2:7003
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "submit")]
/// run a job and print its result
struct SubmitArgs {
    /// name of the function to run
    #[argh(positional)]
    function: String,

    /// job argument; parsed as JSON when possible, sent as text otherwise
    #[argh(option, short = 'a')]
    arg: Option<String>,

    /// job priority: normal, high or low
    #[argh(option, short = 'p', default = "\"normal\".into()")]
    priority: String,

    /// seconds to wait for the result
    ///
    /// Waits indefinitely when not given.
    #[argh(option, short = 't')]
    timeout: Option<u64>,

    /// job server address (host[:port]); may be repeated
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,
}

/// Arguments for firing a background job.
#[derive(FromArgs)]
#[argh(subcommand, name = "background")]
/// submit a background job and print its handle
struct BackgroundArgs {
    /// name of the function to run
    #[argh(positional)]
    function: String,

    /// job argument; parsed as JSON when possible, sent as text otherwise
    #[argh(option, short = 'a')]
    arg: Option<String>,

    /// job priority: normal, high or low
    #[argh(option, short = 'p', default = "\"normal\".into()")]
    priority: String,

    /// job server address (host[:port]); may be repeated
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Results go to stdout, so logs stay quiet on stderr unless asked for
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Submit(args) => run_submit(args).await,
        Commands::Background(args) => run_background(args).await,
    }
}

async fn connect(servers: Vec<String>) -> Result<GearmanClient> {
    let servers = resolve_servers(servers, std::env::var(SERVERS_ENV).ok());
    tracing::debug!("Job servers: {:?}", servers);
    Ok(GearmanClient::new(servers).await?)
}

async fn run_submit(args: SubmitArgs) -> Result<()> {
    let task_type = parse_priority(&args.priority, false)?;
    let task = Task::new(&args.function, parse_arg(args.arg.as_deref())).with_type(task_type);

    let mut client = connect(args.servers).await?;
    let task = client
        .run_task(task, args.timeout.map(Duration::from_secs))
        .await?;
    client.disconnect().await;

    println!("{}", task_outcome(&task)?);
    Ok(())
}

async fn run_background(args: BackgroundArgs) -> Result<()> {
    let task_type = parse_priority(&args.priority, true)?;
    let task = Task::new(&args.function, parse_arg(args.arg.as_deref())).with_type(task_type);

    let mut client = connect(args.servers).await?;
    let task = client.run_task(task, None).await?;
    client.disconnect().await;

    let handle = task
        .handle
        .ok_or_else(|| anyhow!("No handle assigned to job '{}'", args.function))?;
    println!("{}", handle);
    Ok(())
}
