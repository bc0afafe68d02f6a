use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use conveyor::config::{COOKIE_NAMES, Config, DEFAULT_CONFIG_PATH};
use conveyor::core::{BatchEvent, BatchRun, JobStatus, UploadCoordinator, scan_detailed};
use conveyor::uploaders::HttpUploadClient;
use conveyor::utils::{ClassifyingRetry, FixedDelayRetry, format_bytes, format_duration};

/// 批量上传媒体文件夹
#[derive(Parser, Debug)]
#[command(name = "conveyor", version, about = "Scan a media folder and upload every file with bounded concurrency and retry")]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// 日志文件，`auto` 按时间生成文件名
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<String>,

    /// -v 调试日志，-vv 追踪日志
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload every matching file under a folder
    Batch {
        folder: PathBuf,

        /// Number of concurrent uploads
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        /// Exit non-zero when any file was not uploaded
        #[arg(long)]
        strict: bool,
    },

    /// List the files a batch would upload without uploading
    ScanOnly {
        folder: PathBuf,
    },

    /// Prompt for login cookies or an access token and save them
    SetupCredentials,
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Batch { folder, threads, yes, json, strict } => {
            batch(&cli.config, &folder, threads, yes, json, strict).await
        }
        Commands::ScanOnly { folder } => {
            scan_only(&cli.config, &folder)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::SetupCredentials => {
            setup_credentials(&cli.config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn batch(
    config_path: &Path,
    folder: &Path,
    threads: Option<usize>,
    yes: bool,
    json: bool,
    strict: bool,
) -> Result<ExitCode> {
    let config = Config::load_or_default(config_path);
    let mut policy = config.policy();
    if let Some(threads) = threads {
        policy = policy.with_concurrency(threads);
    }
    policy.validate().context("invalid upload settings")?;

    if !config.credentials.is_configured() {
        bail!("no credentials configured, run `conveyor setup-credentials` first");
    }

    let outcome = scan_detailed(folder, &policy)
        .with_context(|| format!("cannot scan {}", folder.display()))?;
    for rejection in &outcome.rejected {
        info!(file = %rejection.path.display(), reason = %rejection.reason, "not uploading");
    }

    if outcome.jobs.is_empty() {
        println!("No files to upload in {}", folder.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} file(s), {} in total:", outcome.jobs.len(), format_bytes(outcome.total_bytes()));
    for (position, job) in outcome.jobs.iter().enumerate() {
        println!("  {:>3}. {} ({})", position + 1, job.display_name, format_bytes(job.size));
    }
    println!(
        "Concurrency: {}, retries: {}, retry delay: {}",
        policy.concurrency,
        policy.max_retries,
        format_duration(policy.retry_delay)
    );

    if !yes {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let answer = prompt(&mut lines, "Start uploading? [y/N] ").await?;
        if !matches!(answer.to_lowercase().as_str(), "y" | "yes") {
            println!("Cancelled");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let client = HttpUploadClient::new(&config.endpoint)
        .with_context(|| format!("invalid endpoint {}", config.endpoint))?;
    let mut coordinator = UploadCoordinator::new(Arc::new(client));
    if !config.retry_validation_errors {
        coordinator = coordinator.with_retry_policy(Arc::new(ClassifyingRetry::skip_validation_errors(FixedDelayRetry)));
    }

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing uploads in progress");
            cancel.cancel();
        }
    });

    let printer = print_events(coordinator.subscribe());
    let mut run = BatchRun::new(folder, outcome.jobs);
    let result = coordinator.run(&mut run, &policy, &config.credentials).await;
    drop(coordinator);
    let _ = printer.await;

    let summary = result.context("batch upload failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }

    if strict && !summary.is_full_success() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// 调度器释放后 channel 关闭，任务随之结束
fn print_events(mut events: broadcast::Receiver<BatchEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress output fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                BatchEvent::JobStarted { name, attempt, .. } => {
                    if attempt > 1 {
                        println!("▶ {} (attempt {})", name, attempt);
                    } else {
                        println!("▶ {}", name);
                    }
                }
                BatchEvent::JobRetrying { name, delay, error, .. } => {
                    println!("↻ {} failed: {}, retrying in {}", name, error, format_duration(delay));
                }
                BatchEvent::JobFinished { name, status, error, .. } => match (status, error) {
                    (JobStatus::Succeeded, _) => println!("✓ {}", name),
                    (JobStatus::Skipped, error) => println!("· {} skipped: {}", name, error.unwrap_or_default()),
                    (status, Some(error)) => println!("✗ {} {}: {}", name, status, error),
                    (status, None) => println!("✗ {} {}", name, status),
                },
                BatchEvent::RunFinished { .. } => break,
            }
        }
    })
}

fn scan_only(config_path: &Path, folder: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let policy = config.policy();
    policy.validate().context("invalid upload settings")?;

    let outcome = scan_detailed(folder, &policy)
        .with_context(|| format!("cannot scan {}", folder.display()))?;

    println!("Uploadable files in {}:", folder.display());
    for job in &outcome.jobs {
        println!("  ✓ {} ({})", job.display_name, format_bytes(job.size));
    }
    if !outcome.rejected.is_empty() {
        println!("Not uploaded:");
        for rejection in &outcome.rejected {
            println!("  · {}: {}", rejection.path.display(), rejection.reason);
        }
    }
    println!(
        "{} file(s), {} in total, {} rejected",
        outcome.jobs.len(),
        format_bytes(outcome.total_bytes()),
        outcome.rejected.len()
    );

    Ok(())
}

async fn setup_credentials(config_path: &Path) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Paste each cookie value, leave empty to keep the current one.");
    for name in COOKIE_NAMES {
        let value = prompt(&mut lines, &format!("{}: ", name)).await?;
        if !value.is_empty() {
            config.credentials.cookies.insert(name.to_string(), value);
        }
    }

    let token = prompt(&mut lines, "Access token (optional): ").await?;
    if !token.is_empty() {
        config.credentials.access_token = token;
    }

    if !config.credentials.is_configured() {
        bail!("SESSDATA and bili_jct, or an access token, are required");
    }

    config.save(config_path)
        .with_context(|| format!("cannot save {}", config_path.display()))?;
    println!("Credentials saved to {}", config_path.display());

    Ok(())
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;

    let line = lines.next_line().await?.unwrap_or_default();
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch() {
        let cli = Cli::try_parse_from(["conveyor", "batch", "videos", "-t", "4", "--yes", "--strict"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Commands::Batch { folder, threads, yes, json, strict } => {
                assert_eq!(folder, PathBuf::from("videos"));
                assert_eq!(threads, Some(4));
                assert!(yes);
                assert!(!json);
                assert!(strict);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "conveyor", "scan-only", "videos", "-c", "custom.toml", "--log-file", "auto", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.log_file.as_deref(), Some("auto"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::ScanOnly { .. }));
    }

    #[test]
    fn test_batch_requires_folder() {
        assert!(Cli::try_parse_from(["conveyor", "batch"]).is_err());
    }
}
