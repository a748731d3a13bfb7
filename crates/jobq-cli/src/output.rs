//! Table rendering and colorization for CLI output

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use jobq_core::{Job, JobState, QueueMetrics, StatusCounts, WorkerSnapshot};
use prettytable::{format, row, Table};

/// Colored label for a job state
pub fn state_label(state: JobState) -> ColoredString {
    match state {
        JobState::Pending => "pending".yellow(),
        JobState::Processing => "processing".blue(),
        JobState::Failed => "failed".red(),
        JobState::Completed => "completed".green(),
        JobState::Dead => "dead".red().bold(),
        JobState::Cancelled => "cancelled".dimmed(),
    }
}

/// Print a job listing, newest first
pub fn print_jobs_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(row!["ID", "STATE", "PRI", "ATTEMPTS", "CREATED", "COMMAND"]);
    for job in jobs {
        table.add_row(row![
            job.id,
            state_label(job.state),
            job.priority,
            format!("{}/{}", job.attempts, job.max_retries),
            local_time(job.created_at),
            truncate(&job.command, 48),
        ]);
    }
    table.printstd();
}

/// Print the dead letter queue, most recently died first
pub fn print_dlq_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("Dead letter queue is empty.");
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(row!["ID", "ATTEMPTS", "DIED", "LAST ERROR", "COMMAND"]);
    for job in jobs {
        table.add_row(row![
            job.id,
            format!("{}/{}", job.attempts, job.max_retries),
            local_time(job.updated_at),
            truncate(job.error.as_deref().unwrap_or("-"), 40),
            truncate(&job.command, 32),
        ]);
    }
    table.printstd();
}

/// Print per-state counts
pub fn print_status(counts: &StatusCounts) {
    println!("Queue: {} job(s)", counts.total());
    println!("  {:<12} {}", "pending".yellow(), counts.pending);
    println!("  {:<12} {}", "processing".blue(), counts.processing);
    println!("  {:<12} {}", "failed".red(), counts.failed);
    println!("  {:<12} {}", "completed".green(), counts.completed);
    println!("  {:<12} {}", "dead".red().bold(), counts.dead);
    println!("  {:<12} {}", "cancelled".dimmed(), counts.cancelled);
}

/// Print aggregate metrics
pub fn print_metrics(metrics: &QueueMetrics) {
    println!("Total jobs:      {}", metrics.total);
    println!("Completed:       {}", metrics.completed);
    println!("Success rate:    {:.1}%", metrics.success_rate * 100.0);
    println!(
        "Avg completion:  {}ms",
        metrics.avg_completion_latency_ms
    );
}

/// Print the in-process worker snapshot shown while a pool runs
pub fn print_worker_snapshot(workers: &[WorkerSnapshot]) {
    for worker in workers {
        let state = if worker.busy {
            "busy".blue()
        } else {
            "idle".dimmed()
        };
        println!(
            "  {:<10} {:<5} ok={} failed={}",
            worker.id, state, worker.succeeded, worker.failed
        );
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
