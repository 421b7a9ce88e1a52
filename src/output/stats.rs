//! Job listings and details.

use console::style;

use crate::bot::format::format_bytes;
use crate::job::{Job, JobStatus, UnitState};
use crate::resolve::ResolvedSource;

fn styled_status(status: JobStatus) -> String {
    let text = format!("{:<10}", status);
    match status {
        JobStatus::Done => style(text).green().to_string(),
        JobStatus::Failed => style(text).red().to_string(),
        JobStatus::Cancelled => style(text).dim().to_string(),
        _ => style(text).yellow().to_string(),
    }
}

/// Print one line per job, newest first.
pub fn print_job_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }

    println!(
        "{}",
        style(format!("{:<36}  {:<10}  {:<19}  SOURCE", "ID", "STATUS", "UPDATED")).bold()
    );
    for job in jobs {
        println!(
            "{:<36}  {}  {:<19}  {}",
            job.id,
            styled_status(job.status),
            job.updated_at.format("%Y-%m-%d %H:%M:%S"),
            job.title.as_deref().unwrap_or(&job.source_reference)
        );
    }
}

/// Print everything known about one job.
pub fn print_job_detail(job: &Job) {
    println!();
    println!("{}", style(format!("Job {}", job.id)).bold());
    println!("  Status:   {}", styled_status(job.status));
    println!("  Source:   {}", job.source_reference);
    if let Some(title) = &job.title {
        println!("  Title:    {}", title);
    }
    if let Some(chat_id) = job.chat_id {
        println!("  Chat:     {}", chat_id);
    }
    println!("  Created:  {}", job.created_at.to_rfc3339());
    println!("  Updated:  {}", job.updated_at.to_rfc3339());
    println!("  Attempts: {}", job.attempt_count);

    if !job.fetch_plan.is_empty() {
        let (done, total) = job.bytes_progress();
        let failed = job
            .fetch_plan
            .iter()
            .filter(|u| u.state == UnitState::Failed)
            .count();
        println!(
            "  Units:    {}/{} complete, {} failed",
            job.units_complete(),
            job.fetch_plan.len(),
            failed
        );
        println!("  Bytes:    {} of {}", format_bytes(done), format_bytes(total));
    }
    if let Some(path) = &job.artifact_path {
        println!("  Artifact: {}", path.display());
    }
    if let Some(upload) = &job.upload {
        println!(
            "  Upload:   {}/{} parts (file {}, {} resumes)",
            upload.parts_acked, upload.total_parts, upload.file_id, upload.resume_attempts
        );
    }
    if let Some(published) = &job.published {
        println!("  Link:     {}", style(&published.url).cyan());
        println!("  Expires:  {}", published.expires_at.to_rfc3339());
    }
    if let Some(error) = &job.error {
        println!("  Error:    {}", style(&error.detail).red());
    }
    if let Some(cleanup) = job.cleanup_after {
        println!("  Cleanup:  {}", cleanup.to_rfc3339());
    }
    if let Some(owner) = &job.owner {
        println!("  Owner:    {}", owner);
    }
}

/// Print a resolved fetch plan.
pub fn print_plan(resolved: &ResolvedSource) {
    println!();
    if let Some(title) = &resolved.title {
        println!("{}", style(title).bold());
    }
    println!("{} unit(s):", resolved.units.len());
    for unit in &resolved.units {
        println!("  {:>5}  {}", unit.sequence_index, unit.remote_locator);
    }
}
