//! Terminal output formatting.

use batchwire_core::task::BatchSummary;
use batchwire_core::{Task, TaskStatus};
use colored::{ColoredString, Colorize};

pub fn status_colored(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Pending => "pending".dimmed(),
        TaskStatus::Uploading => "uploading".cyan(),
        TaskStatus::Processing => "processing".yellow(),
        TaskStatus::Success => "success".green(),
        TaskStatus::Error => "error".red(),
    }
}

/// Print tasks as a table.
pub fn print_tasks_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("{}", "No tasks.".dimmed());
        return;
    }

    println!("{:<10} {:<30} {:<12} {}", "ID", "Document", "Status", "Detail");
    println!("{}", "-".repeat(80));

    for task in tasks {
        let detail = match (&task.error, task.error_kind) {
            (Some(message), Some(kind)) => format!("{}: {}", kind, message).red().to_string(),
            (Some(message), None) => message.red().to_string(),
            _ if task.result.is_some() => "result received".dimmed().to_string(),
            _ => String::new(),
        };

        println!(
            "{:<10} {:<30} {:<12} {}",
            task.id.get(..8).unwrap_or(&task.id),
            truncate(&task.label, 28),
            status_colored(task.status),
            detail
        );
    }
}

pub fn print_summary(summary: &BatchSummary) {
    println!(
        "{} succeeded, {} failed, {} still processing",
        summary.succeeded.to_string().green().bold(),
        summary.failed.to_string().red().bold(),
        summary.in_flight().to_string().yellow()
    );
}

/// Cut a string to `max_len` characters.
pub fn truncate(s: &str, max_len: usize) -> String {
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
    fn test_truncate() {
        assert_eq!(truncate("cv.pdf", 28), "cv.pdf");
        assert_eq!(truncate("0123456789abcdef", 8), "01234...");
        assert_eq!(truncate("lebenslauf-müller.pdf", 10), "lebensl...");
    }
}
