use crate::config::Config;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bdtransfer")]
#[command(about = "Chunked file transfer with live progress from the receiving peer", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: <config dir>/bdtransfer/config.toml)
    #[arg(long, global = true, env = "BDTRANSFER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a file to a peer
    Send(SendArgs),
    /// Run the reference receiving peer
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// File to send
    pub file: PathBuf,

    /// Peer address (host:port)
    #[arg(long)]
    pub connect: Option<String>,

    /// Send file name and size with the first chunk only
    #[arg(long, overrides_with = "no_metadata_once")]
    pub metadata_once: bool,

    /// Send file name and size with every chunk, even if the config says otherwise
    #[arg(long, overrides_with = "metadata_once")]
    pub no_metadata_once: bool,

    /// Print the session report as JSON instead of drawing progress
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (host:port)
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory for received files
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Exit after the first connection
    #[arg(long)]
    pub once: bool,
}

impl SendArgs {
    /// Metadata mode from the flags, falling back to `configured`.
    pub fn metadata_once_or(&self, configured: bool) -> bool {
        match (self.metadata_once, self.no_metadata_once) {
            (true, _) => true,
            (_, true) => false,
            _ => configured,
        }
    }
}

impl Cli {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub fn log_filter(&self, config: &Config) -> String {
        if self.quiet {
            return "error".to_string();
        }
        match self.verbose {
            0 => config.log_filter.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "bdtransfer",
            "send",
            "random_data.bin",
            "--connect",
            "10.1.1.1:50051",
            "--metadata-once",
        ])
        .unwrap();

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.file, PathBuf::from("random_data.bin"));
                assert_eq!(args.connect.as_deref(), Some("10.1.1.1:50051"));
                assert!(args.metadata_once);
                assert!(!args.json);
            }
            other => panic!("Expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_with_global_flags() {
        let cli =
            Cli::try_parse_from(["bdtransfer", "serve", "--dest", "/tmp/in", "--once", "-vv"])
                .unwrap();
        assert_eq!(cli.log_filter(&Config::default()), "trace");

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.dest, Some(PathBuf::from("/tmp/in")));
                assert!(args.once);
                assert!(args.listen.is_none());
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    fn send_args(extra: &[&str]) -> SendArgs {
        let mut argv = vec!["bdtransfer", "send", "f.bin"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Send(args) => args,
            other => panic!("Expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_once_flags_override_config() {
        assert!(!send_args(&["--no-metadata-once"]).metadata_once_or(true));
        assert!(send_args(&["--metadata-once"]).metadata_once_or(false));
        assert!(send_args(&[]).metadata_once_or(true));
        assert!(!send_args(&[]).metadata_once_or(false));
    }

    #[test]
    fn test_last_metadata_flag_wins() {
        let args = send_args(&["--metadata-once", "--no-metadata-once"]);
        assert!(!args.metadata_once_or(true));

        let args = send_args(&["--no-metadata-once", "--metadata-once"]);
        assert!(args.metadata_once_or(false));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["bdtransfer", "-q", "-v", "serve"]).is_err());
    }

    #[test]
    fn test_send_requires_file() {
        assert!(Cli::try_parse_from(["bdtransfer", "send"]).is_err());
    }

    #[test]
    fn test_log_filter_falls_back_to_config() {
        let cli = Cli::try_parse_from(["bdtransfer", "serve"]).unwrap();
        let config = Config {
            log_filter: "warn".into(),
            ..Config::default()
        };
        assert_eq!(cli.log_filter(&config), "warn");
    }
}
