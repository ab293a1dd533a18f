// Output formatting for the tend binary

use crate::config::ProcessSpec;
use crate::process::{Disposition, ProcessState, ProcessStatus};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the process table produced by loading a configuration document
pub fn print_spec_table(specs: &[ProcessSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Memory limit")]
        memory_limit: String,
        #[tabled(rename = "Stop")]
        stop: String,
        #[tabled(rename = "Stdout")]
        stdout: String,
        #[tabled(rename = "Stderr")]
        stderr: String,
    }

    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| SpecRow {
            name: spec.name.cyan().to_string(),
            command: truncate(
                &std::iter::once(spec.command.as_str())
                    .chain(spec.args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
                40,
            ),
            memory_limit: spec
                .memory_limit_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            stop: format!(
                "{} / {}",
                spec.stop_signal,
                format_duration(&spec.stop_timeout())
            ),
            stdout: spec.resolve_path(&spec.stdout_path).display().to_string(),
            stderr: spec.resolve_path(&spec.stderr_path).display().to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", specs.len()).dimmed()
    );
}

/// Print a formatted table of supervised processes
pub fn print_process_table(statuses: &[ProcessStatus]) {
    if statuses.is_empty() {
        println!("{}", "No processes are registered".yellow());
        return;
    }

    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last exit")]
        last_exit: String,
    }

    let rows: Vec<ProcessRow> = statuses
        .iter()
        .map(|s| ProcessRow {
            name: truncate(&s.name, 20),
            state: format_state_colored(s),
            pid: s
                .pid
                .filter(|_| s.is_live())
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: s
                .memory_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            uptime: s
                .uptime
                .as_ref()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            restarts: s.restart_count.to_string(),
            last_exit: s
                .last_exit
                .map(|exit| exit.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Color-coded state, falling back to the disposition once the handle is gone
fn format_state_colored(status: &ProcessStatus) -> String {
    match (&status.disposition, status.state) {
        (Disposition::Failed(_), _) => "failed".red().bold().to_string(),
        (Disposition::GaveUp, _) => "gave up".red().to_string(),
        (_, Some(ProcessState::Running)) => "running".green().to_string(),
        (_, Some(ProcessState::Starting)) => "starting".yellow().to_string(),
        (_, Some(ProcessState::Stopping)) => "stopping".yellow().to_string(),
        (Disposition::Supervised, _) if status.restart_pending => {
            "restarting".yellow().to_string()
        }
        _ => "stopped".bright_black().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        if secs == 0 && duration.subsec_millis() > 0 {
            format!("{}ms", duration.subsec_millis())
        } else {
            format!("{}s", secs)
        }
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate on a char boundary, marking the cut with "..."
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2048), "2.0KB");
        assert_eq!(format_memory(200 * 1024 * 1024), "200.0MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("a-very-long-process-name", 10), "a-very-...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }
}
