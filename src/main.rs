use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use dualstt::audio::buffer::ms_to_samples;
use dualstt::audio::{Clock, ManualClock, SystemClock, wav};
use dualstt::cli::{Cli, Commands, ConfigAction};
use dualstt::config::Config;
use dualstt::decode::SyntheticEngine;
use dualstt::runtime::{SessionStart, SttRuntime};
use dualstt::session::SessionInput;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

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
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(workers) = workers {
                config.scheduler.workers = workers;
            }
            dualstt::logging::init(&config.logging, cli.verbose);

            let options = ReplayOptions {
                language,
                realtime,
                chunk_ms,
                word_ms,
            };
            tokio::time::timeout(timeout, run_replay(config, &wav, options))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "replay did not finish within {}",
                        humantime::format_duration(timeout)
                    )
                })??;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.verbose)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "dualstt",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from custom path or default location, then apply
/// environment overrides.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config.with_env_overrides())
}

fn config_path(custom_path: Option<&Path>) -> PathBuf {
    custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path)
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    verbosity: u8,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Check => {
            let config = load_config(custom_path)?;
            dualstt::logging::init(&config.logging, verbosity);
            let path = config_path(custom_path);
            config
                .validate()
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            println!("ok: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", config_path(custom_path).display());
        }
    }
    Ok(())
}

struct ReplayOptions {
    language: Option<String>,
    realtime: bool,
    chunk_ms: u32,
    word_ms: u32,
}

/// Stream a WAV file through one session, printing events as JSON lines.
///
/// Without `--realtime` the audio is pushed as fast as the session accepts
/// it and a manual clock advances by one chunk per send, so interim cadence
/// matches what a live stream would see.
async fn run_replay(config: Config, path: &Path, options: ReplayOptions) -> Result<()> {
    let sample_rate = config.audio.sample_rate;
    let audio = wav::load(path, sample_rate)?;
    tracing::info!(
        path = %path.display(),
        duration_ms = audio.duration_ms(),
        source_rate = audio.source_rate,
        "replaying"
    );

    let engine = Arc::new(SyntheticEngine::new(sample_rate).with_word_ms(options.word_ms));
    let manual = ManualClock::new();
    let clock: Arc<dyn Clock> = if options.realtime {
        Arc::new(SystemClock)
    } else {
        Arc::new(manual.clone())
    };

    let runtime = SttRuntime::builder(config, engine).with_clock(clock).start()?;
    let mut session = runtime.open_session(SessionStart {
        language: options.language,
        sample_rate: Some(sample_rate),
        ..Default::default()
    })?;

    let realtime = options.realtime;
    let chunk = Duration::from_millis(options.chunk_ms as u64);
    let chunk_len = ms_to_samples(options.chunk_ms as u64, sample_rate).max(1) as usize;
    let input = session.input();
    let samples = audio.samples;
    let feeder = tokio::spawn(async move {
        for piece in samples.chunks(chunk_len) {
            if input.send(SessionInput::Audio(piece.to_vec())).await.is_err() {
                return;
            }
            if realtime {
                tokio::time::sleep(chunk).await;
            } else {
                manual.advance(chunk);
                tokio::task::yield_now().await;
            }
        }
        // session may have ended on its own
        let _stopped = input.send(SessionInput::Stop).await.is_ok();
    });

    while let Some(event) = session.next_event().await {
        println!("{}", event.to_json()?);
    }

    if let Err(e) = feeder.await {
        tracing::warn!(error = %e, "audio feeder failed");
    }
    let summary = session.join().await?;
    let status = runtime.status();
    tracing::info!(
        end = ?summary.end,
        finals = summary.finals,
        interims = summary.interims,
        errors = summary.errors,
        stats = %serde_json::to_string(&status.stats)?,
        "replay finished"
    );

    runtime.shutdown().await;
    Ok(())
}
