//! Text rendering of job state for chat replies.

use chrono::{DateTime, Utc};

use crate::job::{Job, JobStatus};

/// Textual progress bar, e.g. `[#####.....] 50%`.
pub fn progress_bar(done: u64, total: u64, width: usize) -> String {
    let ratio = if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).clamp(0.0, 1.0)
    };
    let filled = (ratio * width as f64).round() as usize;
    format!(
        "[{}{}] {:.0}%",
        "#".repeat(filled),
        ".".repeat(width - filled),
        ratio * 100.0
    )
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Multi-line status of one job.
pub fn job_summary(job: &Job) -> String {
    let mut lines = vec![
        format!("Job {}", job.id),
        format!("Source: {}", job.source_reference),
    ];
    if let Some(title) = &job.title {
        lines.push(format!("Title: {}", title));
    }
    lines.push(format!("Status: {}", job.status));

    match job.status {
        JobStatus::Fetching | JobStatus::Resolving if !job.fetch_plan.is_empty() => {
            let (done, total) = job.bytes_progress();
            lines.push(format!(
                "Parts: {}/{}",
                job.units_complete(),
                job.fetch_plan.len()
            ));
            if total > 0 {
                lines.push(format!(
                    "{} {} of {}",
                    progress_bar(done, total, 10),
                    format_bytes(done),
                    format_bytes(total)
                ));
            }
        }
        JobStatus::Uploading => {
            if let Some(cp) = &job.upload {
                lines.push(format!(
                    "Upload {}",
                    progress_bar(cp.parts_acked as u64, cp.total_parts as u64, 10)
                ));
            }
        }
        JobStatus::Done => {
            if let Some(published) = &job.published {
                lines.push(format!("Link: {}", published.url));
            }
        }
        JobStatus::Failed => {
            if let Some(error) = &job.error {
                lines.push(format!("Reason: {}", error.kind.user_message()));
            }
        }
        _ => {}
    }

    if job.attempt_count > 0 {
        lines.push(format!("Retries: {}", job.attempt_count));
    }
    lines.join("\n")
}

/// One line per job for `/jobs`.
pub fn job_line(job: &Job) -> String {
    let label = job.title.as_deref().unwrap_or(&job.source_reference);
    let short_id: String = job.id.to_string().chars().take(8).collect();
    format!("{} {} {}", short_id, job.status, label)
}

/// Time left until `until`, e.g. `3h 20m`.
pub fn format_remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (until - now).num_minutes();
    match minutes {
        m if m < 1 => "less than a minute".to_string(),
        m if m < 60 => format!("{}m", m),
        m => format!("{}h {}m", m / 60, m % 60),
    }
}

/// One line per live download link for `/files`.
pub fn published_line(job: &Job, now: DateTime<Utc>) -> Option<String> {
    let published = job.published.as_ref()?;
    let label = job.title.as_deref().unwrap_or(&job.source_reference);
    Some(format!(
        "{}: {} (expires in {})",
        label,
        published.url,
        format_remaining(published.expires_at, now)
    ))
}
