//! Media Relay - CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use media_relay::{
    bot,
    cli::{Args, Command},
    config::{validate_bot_token, validate_config, Config},
    daemon::Aria2Client,
    dispatch::PipelineDispatcher,
    error::{exit_codes, Error, Result},
    job::{DeliveryMode, JobEvent, JobId, JobStatus, Outcome},
    output::{
        create_download_bar, create_parts_bar, create_spinner, print_banner, print_config_summary, print_error,
        print_info, print_job_detail, print_job_table, print_plan, print_success, print_warning,
    },
    resolve::{Resolver, SourceResolver},
    store::{self, JobStore},
};

/// Why `run` finished without an error value.
enum Finish {
    Ok,
    JobFailed,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Finish::Ok) => ExitCode::from(exit_codes::SUCCESS as u8),
        Ok(Finish::JobFailed) => ExitCode::from(exit_codes::JOB_FAILED as u8),
        Err(e) => {
            print_error(&format!("{}", e));
            match e {
                Error::Config(_) | Error::ConfigValidation { .. } | Error::MissingConfig(_) => {
                    ExitCode::from(exit_codes::CONFIG_ERROR as u8)
                }
                Error::Store(_) => ExitCode::from(exit_codes::STORE_ERROR as u8),
                Error::UnresolvableSource(_)
                | Error::Daemon(_)
                | Error::DaemonRpc { .. }
                | Error::Assembly(_)
                | Error::Upload { .. } => ExitCode::from(exit_codes::PIPELINE_ERROR as u8),
                Error::Cancelled => ExitCode::from(exit_codes::ABORT as u8),
                _ => ExitCode::from(exit_codes::UNEXPECTED_ERROR as u8),
            }
        }
    }
}

async fn run() -> Result<Finish> {
    // Parse CLI arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt().with_env_filter(filter).with_target(false).init();

    let command = args.command();
    if command == Command::Serve {
        print_banner();
    }

    // Load configuration
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        print_warning(&format!(
            "Configuration file not found: {}",
            args.config.display()
        ));
        print_info("Using default configuration with CLI arguments");
        Config::default()
    };

    // Merge CLI arguments into config
    args.merge_into_config(&mut config);

    // Validate configuration
    validate_config(&config)?;

    match command {
        Command::Serve => serve(config).await,
        Command::Fetch { reference, chat, link } => fetch(config, &reference, chat, link).await,
        Command::Plan { reference } => plan(&config, &reference).await,
        Command::Status { id } => status(&config, &id).await,
        Command::Jobs { limit } => jobs(&config, limit).await,
        Command::Cancel { id } => cancel(config, &id).await,
    }
}

/// Run the bot until Ctrl-C.
async fn serve(config: Config) -> Result<Finish> {
    validate_bot_token(&config.bot.token)?;
    print_config_summary(&config);

    check_daemon(&config).await;

    let store = store::open(&config.store).await?;
    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(PipelineDispatcher::from_config(&config, store, &shutdown)?);

    let resumed = dispatcher.resume_all().await?;
    if !resumed.is_empty() {
        print_info(&format!("Resumed {} unfinished job(s)", resumed.len()));
    }
    let janitor = dispatcher.spawn_janitor(config.pipeline.janitor_interval(), shutdown.clone());

    let result = bot::run(&config.bot, config.retry.clone(), dispatcher.clone()).await;

    shutdown.cancel();
    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "Janitor task ended abnormally");
    }
    result.map(|()| Finish::Ok)
}

/// Run one job in the foreground, showing its progress.
async fn fetch(config: Config, reference: &str, chat: Option<i64>, link: bool) -> Result<Finish> {
    let chat = chat.or(config.bot.default_chat_id);
    let delivery = if link { DeliveryMode::Link } else { DeliveryMode::Telegram };
    if !link && chat.is_none() && config.bot.storage_chat_id.is_none() {
        return Err(Error::MissingConfig(
            "a chat to upload to (--chat or bot.default_chat_id)".into(),
        ));
    }

    let store = store::open(&config.store).await?;
    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(PipelineDispatcher::from_config(&config, store, &shutdown)?);

    let job = dispatcher.submit_with(reference, chat, delivery).await?;
    print_info(&format!("Job {} submitted", job.id));

    let mut events = dispatcher.subscribe();
    let mut handle = dispatcher.spawn(job.id);
    let bar = create_download_bar(0);
    bar.set_message("pending");
    let mut parts_bar = None;

    let finished = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = tokio::signal::ctrl_c() => {
                bar.set_message("cancelling");
                dispatcher.cancel(&job.id).await?;
            }
            event = events.recv() => match event {
                Ok(JobEvent::StatusChanged { id, status }) if id == job.id => {
                    bar.set_message(status.to_string());
                }
                Ok(JobEvent::FetchProgress { id, bytes_done, bytes_total, .. }) if id == job.id => {
                    bar.set_length(bytes_total);
                    bar.set_position(bytes_done);
                }
                Ok(JobEvent::UploadProgress { id, parts_acked, total_parts }) if id == job.id => {
                    let parts = parts_bar.get_or_insert_with(|| {
                        bar.finish_and_clear();
                        create_parts_bar(total_parts as u64)
                    });
                    parts.set_length(total_parts as u64);
                    parts.set_position(parts_acked as u64);
                }
                Ok(JobEvent::Finished { id, outcome: Outcome::Done(sent), .. }) if id == job.id => {
                    print_info(&format!("Sent as message {}", sent.message_id));
                }
                Ok(JobEvent::Finished { id, outcome: Outcome::Published { url, expires_at }, .. }) if id == job.id => {
                    print_info(&format!("Download link: {} (until {})", url, expires_at));
                }
                _ => {}
            },
        }
    };
    bar.finish_and_clear();
    if let Some(parts) = parts_bar {
        parts.finish_and_clear();
    }
    shutdown.cancel();

    let job = finished.map_err(|e| Error::Io(std::io::Error::other(e)))??;
    print_job_detail(&job);
    match job.status {
        JobStatus::Done => {
            print_success("Delivered");
            Ok(Finish::Ok)
        }
        JobStatus::Cancelled => Err(Error::Cancelled),
        _ => Ok(Finish::JobFailed),
    }
}

/// Resolve a reference without downloading anything.
async fn plan(config: &Config, reference: &str) -> Result<Finish> {
    let resolver = SourceResolver::new(&config.resolver)?;
    let spinner = create_spinner(&format!("Resolving {}", reference));
    let resolved = resolver.resolve(reference).await;
    spinner.finish_and_clear();

    print_plan(&resolved?);
    Ok(Finish::Ok)
}

async fn status(config: &Config, id: &str) -> Result<Finish> {
    let id: JobId = id.parse()?;
    let store = store::open(&config.store).await?;
    let job = store
        .get(&id)
        .await?
        .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
    print_job_detail(&job);
    Ok(Finish::Ok)
}

async fn jobs(config: &Config, limit: usize) -> Result<Finish> {
    let store: Arc<dyn JobStore> = store::open(&config.store).await?;
    print_job_table(&store.list_recent(limit).await?);
    Ok(Finish::Ok)
}

/// Mark a stored job cancelled. A serving instance running the job notices
/// on its next write and cleans up.
async fn cancel(config: Config, id: &str) -> Result<Finish> {
    let id: JobId = id.parse()?;
    let store = store::open(&config.store).await?;
    let shutdown = CancellationToken::new();
    let dispatcher = PipelineDispatcher::from_config(&config, store, &shutdown)?;

    let cancelled = dispatcher.cancel(&id).await;
    shutdown.cancel();
    if cancelled? {
        print_success(&format!("Job {} cancelled", id));
    } else {
        print_info(&format!("Job {} has already finished", id));
    }
    Ok(Finish::Ok)
}

/// Log the daemon version; an unreachable daemon is not fatal at startup.
async fn check_daemon(config: &Config) {
    let reachable = match Aria2Client::new(&config.daemon) {
        Ok(client) => client.version().await,
        Err(e) => Err(e),
    };
    match reachable {
        Ok(version) => print_info(&format!("Connected to aria2 {}", version.version)),
        Err(e) => print_warning(&format!(
            "aria2 is not reachable at {}: {}",
            config.daemon.rpc_url, e
        )),
    }
}
