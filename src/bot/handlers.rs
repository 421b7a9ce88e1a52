//! Message and command handlers.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::bot::format::{job_line, job_summary, published_line};
use crate::bot::Command;
use crate::dispatch::PipelineDispatcher;
use crate::error::{Error, Result};
use crate::job::{DeliveryMode, JobId};
use crate::resolve::extract_urls;

/// Recent jobs listed by `/jobs`.
const JOBS_LISTED: usize = 10;

/// How many recent jobs `/jobs` scans for the caller's chat.
const JOBS_SCANNED: usize = 200;

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dispatcher: Arc<PipelineDispatcher>,
) -> ResponseResult<()> {
    let chat = msg.chat.id;
    let reply = match cmd {
        Command::Help | Command::Start => Command::descriptions().to_string(),
        Command::Get(reference) if reference.trim().is_empty() => {
            "Usage: /get <link or content id>".to_string()
        }
        Command::Get(reference) => {
            submit_all(&dispatcher, &[reference], chat.0, DeliveryMode::Telegram).await
        }
        Command::Link(reference) if reference.trim().is_empty() => {
            "Usage: /link <link or content id>".to_string()
        }
        Command::Link(_) if !dispatcher.publishes_links() => {
            "Download links are not enabled on this bot.".to_string()
        }
        Command::Link(reference) => {
            submit_all(&dispatcher, &[reference], chat.0, DeliveryMode::Link).await
        }
        Command::Status(id) => render(status(&dispatcher, &id).await),
        Command::Cancel(id) => render(cancel(&dispatcher, &id).await),
        Command::Jobs => render(list_jobs(&dispatcher, chat.0).await),
        Command::Files => render(list_files(&dispatcher, chat.0).await),
    };

    bot.send_message(chat, reply).await?;
    Ok(())
}

/// Plain messages: every link in the text becomes a job.
pub async fn handle_text(bot: Bot, msg: Message, dispatcher: Arc<PipelineDispatcher>) -> ResponseResult<()> {
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    let references = extract_urls(text);
    if references.is_empty() {
        if msg.chat.is_private() {
            bot.send_message(msg.chat.id, "Send me a link to fetch, or /help.")
                .await?;
        }
        return Ok(());
    }

    let reply = submit_all(&dispatcher, &references, msg.chat.id.0, DeliveryMode::Telegram).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Submit and start a job per reference; returns the acknowledgement text.
pub async fn submit_all(
    dispatcher: &Arc<PipelineDispatcher>,
    references: &[String],
    chat_id: i64,
    delivery: DeliveryMode,
) -> String {
    let mut lines = Vec::new();
    for reference in references {
        match dispatcher.submit_with(reference, Some(chat_id), delivery).await {
            Ok(job) => {
                dispatcher.spawn(job.id);
                lines.push(format!("Queued {} as job {}", reference.trim(), job.id));
            }
            Err(e) => {
                tracing::warn!(chat_id, reference = %reference, error = %e, "Failed to submit job");
                lines.push(format!("Could not queue {}: {}", reference.trim(), e.failure_kind().user_message()));
            }
        }
    }
    lines.join("\n")
}

async fn status(dispatcher: &PipelineDispatcher, id: &str) -> Result<String> {
    let id: JobId = id.parse()?;
    Ok(job_summary(&dispatcher.get(&id).await?))
}

async fn cancel(dispatcher: &PipelineDispatcher, id: &str) -> Result<String> {
    let id: JobId = id.parse()?;
    if dispatcher.cancel(&id).await? {
        Ok(format!("Cancelling job {}", id))
    } else {
        Ok(format!("Job {} has already finished", id))
    }
}

async fn list_jobs(dispatcher: &PipelineDispatcher, chat_id: i64) -> Result<String> {
    let jobs: Vec<String> = dispatcher
        .list_recent(JOBS_SCANNED)
        .await?
        .iter()
        .filter(|job| job.chat_id == Some(chat_id))
        .take(JOBS_LISTED)
        .map(job_line)
        .collect();

    if jobs.is_empty() {
        Ok("No jobs yet.".to_string())
    } else {
        Ok(jobs.join("\n"))
    }
}

async fn list_files(dispatcher: &PipelineDispatcher, chat_id: i64) -> Result<String> {
    let now = chrono::Utc::now();
    let files: Vec<String> = dispatcher
        .published_for(chat_id)
        .await?
        .iter()
        .take(JOBS_LISTED)
        .filter_map(|job| published_line(job, now))
        .collect();

    if files.is_empty() {
        Ok("No download links.".to_string())
    } else {
        Ok(files.join("\n"))
    }
}

fn render(result: Result<String>) -> String {
    match result {
        Ok(text) => text,
        Err(Error::JobNotFound(id)) => format!("No job with id {}", id.trim()),
        Err(e) => {
            tracing::warn!(error = %e, "Command failed");
            format!("Something went wrong: {}", e.failure_kind().user_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/get https://example.com/v.mp4", "relaybot").unwrap(),
            Command::Get("https://example.com/v.mp4".into())
        );
        assert_eq!(Command::parse("/jobs", "relaybot").unwrap(), Command::Jobs);
        assert_eq!(Command::parse("/files", "relaybot").unwrap(), Command::Files);
        assert_eq!(
            Command::parse("/link 12345", "relaybot").unwrap(),
            Command::Link("12345".into())
        );
        assert_eq!(
            Command::parse("/cancel@relaybot abc", "relaybot").unwrap(),
            Command::Cancel("abc".into())
        );
        assert!(Command::parse("/unknown", "relaybot").is_err());
    }

    #[test]
    fn test_render_not_found() {
        let text = render(Err(Error::JobNotFound(" nope ".into())));
        assert_eq!(text, "No job with id nope");
    }

    #[test]
    fn test_descriptions_list_commands() {
        let help = Command::descriptions().to_string();
        assert!(help.contains("/get"));
        assert!(help.contains("/cancel"));
        assert!(help.contains("/link"));
    }
}
