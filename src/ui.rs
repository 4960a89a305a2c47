use colored::{ColoredString, Colorize};
use declarative::{EventStatus, Report, ResourceStatus, RunSummary};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// Report Rendering
// ============================================================================

/// Colored outcome label of a resource
pub fn state_label(status: &ResourceStatus) -> ColoredString {
    let label = status.state_label();
    match label {
        "failed" => label.red().bold(),
        "skipped" => label.yellow(),
        "changed" | "restarted" => label.green(),
        "noop" => label.cyan(),
        _ => label.dimmed(),
    }
}

fn event_marker(status: EventStatus) -> ColoredString {
    match status {
        EventStatus::Success => "+".green(),
        EventStatus::Failure => "✗".red(),
        EventStatus::Noop => "~".cyan(),
        EventStatus::Audit => "?".yellow(),
    }
}

/// Print one resource with its events
pub fn resource_status(status: &ResourceStatus, verbose: bool) {
    if !verbose && status.state_label() == "unchanged" {
        return;
    }

    let time = status
        .evaluation_time
        .map(|t| format!(" ({})", format_duration(t)))
        .unwrap_or_default();
    println!("  {} {}{}", state_label(status), status.resource, time.dimmed());
    for event in &status.events {
        println!("      {} {}", event_marker(event.status), event.message);
    }
    if let Some(reason) = &status.failure_reason
        && !status.events.iter().any(|e| e.message == *reason)
    {
        println!("      {} {}", "✗".red(), reason);
    }
}

/// Print the summary table of a run
pub fn summary(summary: &RunSummary, noop: bool) {
    section("Summary");
    kv("Resources", &summary.total.to_string());
    if noop {
        kv("Would change", &summary.out_of_sync.to_string());
    } else {
        kv("Changed", &summary.changed.to_string());
        kv("Out of sync", &summary.out_of_sync.to_string());
    }
    kv("Restarted", &summary.restarted.to_string());
    if summary.corrective_change > 0 {
        kv("Corrective", &summary.corrective_change.to_string());
    }
    if summary.skipped > 0 {
        kv("Skipped", &summary.skipped.to_string().yellow().to_string());
    }
    let failed = summary.failed + summary.failed_to_restart;
    if failed > 0 {
        kv("Failed", &failed.to_string().red().to_string());
    }
}

/// Print a whole report
pub fn report(report: &Report, verbose: bool) {
    section("Resources");
    for status in report.statuses() {
        resource_status(status, verbose);
    }
    if report.resources_failed_to_generate {
        warn("Some resources failed to generate additional resources");
    }
    if let Some(e) = &report.store_error {
        warn(&format!("State was not saved: {e}"));
    }

    let run_summary = report.summary();
    summary(&run_summary, report.noop);
    if let Some(duration) = report.duration {
        kv("Duration", &format_duration(duration));
    }

    println!();
    if !run_summary.is_success() {
        error("Run finished with failures");
    } else if report.noop {
        info("Noop run - no changes were made");
    } else {
        success("Run complete");
    }
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

// ============================================================================
// Tests
// ============================================================================
