//! Delivery of finished jobs to their requesters.

use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config::RetryConfig;
use crate::error::Error;
use crate::job::{JobEvent, MessageHandle, Outcome};
use crate::retry::with_retry;

/// What to tell a requester about a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Copy the uploaded message from the storage chat.
    Copy { to: i64, from: MessageHandle },
    Text { to: i64, text: String },
}

/// Decide the delivery for an event. Cancelled jobs stay silent.
pub fn delivery_for(event: &JobEvent) -> Option<Delivery> {
    let JobEvent::Finished {
        chat_id: Some(chat_id),
        title,
        outcome,
        ..
    } = event
    else {
        return None;
    };

    match outcome {
        // Already uploaded into the requester's chat.
        Outcome::Done(handle) if handle.chat_id == *chat_id => None,
        Outcome::Done(handle) => Some(Delivery::Copy {
            to: *chat_id,
            from: handle.clone(),
        }),
        Outcome::Published { url, expires_at } => {
            let what = title.as_deref().unwrap_or("Your file");
            Some(Delivery::Text {
                to: *chat_id,
                text: format!(
                    "{} is ready: {}\nThe link expires {}.",
                    what,
                    url,
                    expires_at.format("%Y-%m-%d %H:%M UTC")
                ),
            })
        }
        Outcome::Failed(reason) => {
            let what = title.as_deref().unwrap_or("your media");
            Some(Delivery::Text {
                to: *chat_id,
                text: format!("Could not deliver {}: {}.", what, reason),
            })
        }
        Outcome::Cancelled => None,
    }
}

/// Forward finished-job events to Telegram until the channel closes.
pub fn spawn(bot: Bot, mut events: broadcast::Receiver<JobEvent>, retry: RetryConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Notifier fell behind job events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(delivery) = delivery_for(&event) else {
                continue;
            };
            let job_id = event.job_id();
            if let Err(e) = deliver(&bot, &delivery, &retry).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to notify requester");
            }
        }
    })
}

async fn deliver(bot: &Bot, delivery: &Delivery, retry: &RetryConfig) -> Result<(), Error> {
    match delivery {
        Delivery::Copy { to, from } => {
            let (to, from_chat, message_id) = (*to, from.chat_id, from.message_id as i32);
            with_retry(retry, "copy message", || async move {
                bot.copy_message(ChatId(to), ChatId(from_chat), MessageId(message_id))
                    .await
                    .map_err(Error::from)
            })
            .await?;
        }
        Delivery::Text { to, text } => {
            let to = *to;
            with_retry(retry, "send message", || async move {
                bot.send_message(ChatId(to), text.clone())
                    .await
                    .map_err(Error::from)
            })
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    fn finished(chat_id: Option<i64>, outcome: Outcome) -> JobEvent {
        JobEvent::Finished {
            id: JobId::new(),
            chat_id,
            title: Some("clip".into()),
            outcome,
        }
    }

    #[test]
    fn test_done_in_storage_chat_is_copied() {
        let handle = MessageHandle {
            chat_id: -100,
            message_id: 7,
        };
        assert_eq!(
            delivery_for(&finished(Some(5), Outcome::Done(handle.clone()))),
            Some(Delivery::Copy { to: 5, from: handle })
        );
    }

    #[test]
    fn test_done_in_requester_chat_needs_nothing() {
        let handle = MessageHandle {
            chat_id: 5,
            message_id: 7,
        };
        assert_eq!(delivery_for(&finished(Some(5), Outcome::Done(handle))), None);
    }

    #[test]
    fn test_published_file_is_sent_as_link() {
        let expires_at = chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let outcome = Outcome::Published {
            url: "http://files.example/abc/clip.mp4".into(),
            expires_at,
        };
        assert_eq!(
            delivery_for(&finished(Some(5), outcome)),
            Some(Delivery::Text {
                to: 5,
                text: "clip is ready: http://files.example/abc/clip.mp4\nThe link expires 2026-01-02 03:04 UTC.".into()
            })
        );
    }

    #[test]
    fn test_failure_is_reported_with_reason() {
        let delivery = delivery_for(&finished(Some(5), Outcome::Failed("downloading the media failed".into())));
        assert_eq!(
            delivery,
            Some(Delivery::Text {
                to: 5,
                text: "Could not deliver clip: downloading the media failed.".into()
            })
        );
    }

    #[test]
    fn test_cancelled_and_chatless_jobs_are_silent() {
        assert_eq!(delivery_for(&finished(Some(5), Outcome::Cancelled)), None);
        assert_eq!(delivery_for(&finished(None, Outcome::Failed("x".into()))), None);
        let progress = JobEvent::StatusChanged {
            id: JobId::new(),
            status: crate::job::JobStatus::Fetching,
        };
        assert_eq!(delivery_for(&progress), None);
    }
}
