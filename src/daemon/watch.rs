//! Status stream of a single transfer.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::daemon::{DaemonEvent, DownloadDaemon, TaskId, TaskStatus};
use crate::error::Result;

struct WatchState {
    daemon: Arc<dyn DownloadDaemon>,
    task: TaskId,
    poll_interval: Duration,
    events: Option<broadcast::Receiver<DaemonEvent>>,
    cancel: CancellationToken,
    started: bool,
    finished: bool,
}

/// Stream the status of `task` until it reaches a terminal state.
///
/// The first status is fetched immediately, later ones every
/// `poll_interval` or as soon as a notification for the task arrives. The
/// stream ends after yielding a terminal status or an error, and ends
/// without yielding once `cancel` fires. It holds no state beyond the task
/// id, so calling `watch` again resumes observation of the same task.
pub fn watch(
    daemon: Arc<dyn DownloadDaemon>,
    task: TaskId,
    poll_interval: Duration,
    events: Option<broadcast::Receiver<DaemonEvent>>,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<TaskStatus>> {
    let state = WatchState {
        daemon,
        task,
        poll_interval,
        events,
        cancel,
        started: false,
        finished: false,
    };

    stream::unfold(state, |mut s| async move {
        if s.finished || s.cancel.is_cancelled() {
            return None;
        }

        if s.started {
            tokio::select! {
                biased;
                _ = s.cancel.cancelled() => return None,
                _ = next_matching(&mut s.events, &s.task) => {}
                _ = tokio::time::sleep(s.poll_interval) => {}
            }
        }
        s.started = true;

        let item = s.daemon.status(&s.task).await;
        match &item {
            Ok(status) if status.state.is_terminal() => s.finished = true,
            Err(_) => s.finished = true,
            _ => {}
        }
        Some((item, s))
    })
    .boxed()
}

/// Resolve when a notification for `task` arrives. Never resolves without a
/// receiver or after the channel closed, leaving the poll timer in charge.
async fn next_matching(events: &mut Option<broadcast::Receiver<DaemonEvent>>, task: &TaskId) {
    let Some(rx) = events else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(event) if &event.task_id == task => return,
            Ok(_) => continue,
            // Missed notifications may include ours.
            Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => break,
        }
    }
    *events = None;
    std::future::pending().await
}
