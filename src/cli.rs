//! Command-line interface for dualstt
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Two-tier streaming speech-to-text scheduler
#[derive(Parser, Debug)]
#[command(
    name = "dualstt",
    version,
    about = "Two-tier streaming speech-to-text scheduler"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a WAV file through one session and print events as JSON lines
    Replay {
        /// WAV file (16-bit PCM, any rate and channel count)
        wav: PathBuf,

        /// Number of decode workers (overrides config)
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Language hint sent with the session start (default: config)
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Pace audio at wall-clock speed instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Audio chunk size per send, in milliseconds
        #[arg(long, value_name = "MS", default_value = "100", value_parser = clap::value_parser!(u32).range(10..=1000))]
        chunk_ms: u32,

        /// Simulated decode time per word, in milliseconds
        #[arg(long, value_name = "MS", default_value = "250")]
        word_ms: u32,

        /// Give up after this long. Examples: 30s, 2m, 1m30s
        #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_timeout)]
        timeout: Duration,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment) as TOML
    Show,
    /// Validate the configuration and exit non-zero on error
    Check,
    /// Print the configuration file path
    Path,
}

/// Parse a timeout string.
///
/// Supports any duration format accepted by `humantime`, plus bare numbers
/// as seconds.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay_defaults() {
        let cli = Cli::try_parse_from(["dualstt", "replay", "talk.wav"]).unwrap();
        match cli.command {
            Commands::Replay {
                wav,
                workers,
                language,
                realtime,
                chunk_ms,
                word_ms,
                timeout,
            } => {
                assert_eq!(wav, PathBuf::from("talk.wav"));
                assert!(workers.is_none());
                assert!(language.is_none());
                assert!(!realtime);
                assert_eq!(chunk_ms, 100);
                assert_eq!(word_ms, 250);
                assert_eq!(timeout, Duration::from_secs(60));
            }
            other => panic!("expected replay, got {other:?}"),
        }
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_replay_with_options() {
        let cli = Cli::try_parse_from([
            "dualstt",
            "-vv",
            "replay",
            "talk.wav",
            "--workers",
            "4",
            "--language",
            "de",
            "--realtime",
            "--chunk-ms",
            "20",
            "--timeout",
            "1m30s",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Replay {
                workers,
                language,
                realtime,
                chunk_ms,
                timeout,
                ..
            } => {
                assert_eq!(workers, Some(4));
                assert_eq!(language.as_deref(), Some("de"));
                assert!(realtime);
                assert_eq!(chunk_ms, 20);
                assert_eq!(timeout, Duration::from_secs(90));
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_chunk_ms_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["dualstt", "replay", "a.wav", "--chunk-ms", "5"]).is_err());
    }

    #[test]
    fn test_parse_config_actions() {
        let cli = Cli::try_parse_from(["dualstt", "config", "check", "--config", "/tmp/x.toml"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Check
            }
        ));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));

        for (arg, expected) in [("show", "Show"), ("path", "Path")] {
            let cli = Cli::try_parse_from(["dualstt", "config", arg]).unwrap();
            assert!(format!("{:?}", cli.command).contains(expected));
        }
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["dualstt", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_parse_timeout_formats() {
        assert_eq!(parse_timeout("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_timeout("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_timeout(" 500ms ").unwrap(), Duration::from_millis(500));
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["dualstt"]).is_err());
    }
}
