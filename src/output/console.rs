//! Console output utilities.

use console::style;

use crate::config::Config;

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", style("INFO").cyan().bold(), message);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", style("OK").green().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", style("WARN").yellow().bold(), message);
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("ERROR").red().bold(), message);
}

/// Print the application banner.
pub fn print_banner() {
    let banner = r#"
╔═══════════════════════════════════════════════════════╗
║     Media Relay                                       ║
║     aria2 downloads, delivered to Telegram            ║
╚═══════════════════════════════════════════════════════╝
"#;
    println!("{}", style(banner).cyan());
}

/// Print configuration summary. Secrets are never shown.
pub fn print_config_summary(config: &Config) {
    println!();
    println!("{}", style("Configuration:").bold());
    println!("  Daemon: {}", config.daemon.rpc_url);
    println!(
        "  Bot API: {}",
        config.bot.api_url.as_deref().unwrap_or("https://api.telegram.org")
    );
    if let Some(root) = &config.fileserver.root {
        println!("  Published files: {} -> {}", root.display(), config.fileserver.base_url);
    }
    println!(
        "  Store: {} ({})",
        config.store.backend,
        config.store.path().display()
    );
    println!("  Work directory: {}", config.pipeline.work_dir().display());
    println!(
        "  Transfers: {} global, {} per job",
        config.coordinator.global_limit, config.coordinator.per_job_limit
    );
    println!();
}
