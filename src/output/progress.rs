//! Progress bar utilities.

use indicatif::{ProgressBar, ProgressStyle};

/// Create a spinner for long-running operations.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

/// Create a byte progress bar for a job; the message shows its stage.
pub fn create_download_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg:>10} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Create a progress bar for upload parts.
pub fn create_parts_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} uploading [{bar:40.cyan/blue}] {pos}/{len} parts")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_bar_counts_parts() {
        let bar = create_parts_bar(12);
        bar.set_position(5);
        assert_eq!(bar.length(), Some(12));
        assert_eq!(bar.position(), 5);
    }
}
