use anyhow::{Context, Result};
use bdtransfer::cli::{Cli, Command, SendArgs, ServeArgs};
use bdtransfer::config::{expand_tilde, Config};
use bdtransfer::streaming::{
    ProgressSink, SessionConfig, SessionCoordinator, SessionReport, TerminalSink, WriterSink,
};
use bdtransfer::{server, transport};
use clap::Parser;
use colored::Colorize;
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&cli.log_filter(&config));

    match cli.command {
        Command::Send(args) => send(args, &config).await,
        Command::Serve(args) => serve(args, &config).await,
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn send(args: SendArgs, config: &Config) -> Result<()> {
    let addr = args.connect.clone().unwrap_or_else(|| config.connect.clone());
    let file = expand_tilde(&args.file);

    let coordinator = SessionCoordinator::new(SessionConfig {
        metadata_once: args.metadata_once_or(config.metadata_once),
    });
    cancel_on_interrupt(coordinator.cancel_token());

    // stdout stays clean for the JSON report
    let sink: Box<dyn ProgressSink> = if args.json {
        Box::new(WriterSink::new(io::sink()))
    } else if io::stdout().is_terminal() {
        Box::new(TerminalSink::stdout()?)
    } else {
        Box::new(WriterSink::new(io::stdout()))
    };

    let report = coordinator
        .run(&file, transport::connect_tcp(&addr), sink)
        .await
        .with_context(|| format!("transfer of {} to {} failed", file.display(), addr))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &SessionReport) {
    println!(
        "{} {} ({} bytes in {} chunks, {:.2}s)",
        "Sent".green().bold(),
        report.metadata.file_name.bold(),
        report.uplink.bytes_sent,
        report.uplink.chunks_sent,
        report.elapsed_ms as f64 / 1000.0
    );

    match report.downlink.last_percent {
        Some(p) if p >= 100.0 => {}
        Some(p) => println!(
            "{} peer acknowledged only {:.1}%",
            "warning:".yellow().bold(),
            p
        ),
        None => println!(
            "{} peer sent no progress acknowledgments",
            "warning:".yellow().bold()
        ),
    }
}

async fn serve(args: ServeArgs, config: &Config) -> Result<()> {
    let listen = args.listen.unwrap_or_else(|| config.listen.clone());
    let dest = args
        .dest
        .map(|d| expand_tilde(&d))
        .unwrap_or_else(|| config.dest_dir.clone());

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    server::serve(listener, dest, args.once, cancel)
        .await
        .context("peer stopped")?;
    Ok(())
}
