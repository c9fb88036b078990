//! Human readable output of collected metrics.

use std::fmt::{self, Write};
use std::time::Duration;

use bytesize::ByteSize;
use yansi::Paint;

use crate::corpus::PopulateSummary;
use crate::loadgen::RunSummary;
use crate::metrics::{LatencySummary, MetricsSnapshot};

/// Prints the final report of a run to stdout.
pub fn print_report(summary: &RunSummary) {
    print!("{}", render_report(summary));
}

/// Prints the result of populating the corpus to stdout.
pub fn print_populate(summary: &PopulateSummary) {
    print!("{}", render_populate(summary));
}

/// Logs a one-line progress summary.
pub fn log_progress(snapshot: &MetricsSnapshot) {
    tracing::info!(
        elapsed = ?snapshot.elapsed,
        writes = snapshot.write_successes,
        write_errors = snapshot.write_errors,
        write_p50 = ?snapshot.write_latency.p50,
        reads = snapshot.read_hits,
        read_misses = snapshot.read_misses,
        read_errors = snapshot.read_errors,
        read_p50 = ?snapshot.read_latency.p50,
        dropped_ticks = snapshot.dropped_write_ticks + snapshot.dropped_read_ticks,
        "progress"
    );
}

/// Renders the final report of a run.
pub fn render_report(summary: &RunSummary) -> String {
    let mut out = String::new();
    write_report(&mut out, summary).ok();
    out
}

/// Renders the result of populating the corpus.
pub fn render_populate(summary: &PopulateSummary) -> String {
    let mut out = String::new();
    write_populate(&mut out, summary).ok();
    out
}

fn write_report(out: &mut String, summary: &RunSummary) -> fmt::Result {
    let metrics = &summary.metrics;
    let duration = summary.duration;

    writeln!(
        out,
        "{} ({:.2?} of load)",
        "## SUMMARY".bold(),
        duration.bold()
    )?;

    if let Some(warmup) = &summary.warmup {
        write_populate(out, warmup)?;
    }

    write!(
        out,
        "{} ({} ops",
        "WRITE:".bold().green(),
        metrics.write_attempts.bold()
    )?;
    if metrics.write_errors > 0 {
        write!(
            out,
            ", {}",
            format!("{} FAILURES", metrics.write_errors).bold().red()
        )?;
    }
    writeln!(out, ")")?;
    if metrics.write_latency.count > 0 {
        write_rates(out, metrics.write_successes, metrics.bytes_written, duration)?;
        write_latency(out, &metrics.write_latency)?;
        write_buckets(out, &metrics.write_buckets)?;
    }

    write!(
        out,
        "{} ({} ops",
        "READ:".bold().green(),
        metrics.read_attempts.bold()
    )?;
    if metrics.read_misses > 0 {
        write!(
            out,
            ", {}",
            format!("{} misses", metrics.read_misses).yellow()
        )?;
    }
    if metrics.read_errors > 0 {
        write!(
            out,
            ", {}",
            format!("{} FAILURES", metrics.read_errors).bold().red()
        )?;
    }
    writeln!(out, ")")?;
    if metrics.read_latency.count > 0 {
        write_rates(out, metrics.read_hits, metrics.bytes_read, duration)?;
        write_latency(out, &metrics.read_latency)?;
        write_buckets(out, &metrics.read_buckets)?;
    }

    let ticks = &summary.ticks;
    write!(
        out,
        "{} {} write, {} read dispatched",
        "TICKS:".bold(),
        ticks.writes_dispatched,
        ticks.reads_dispatched
    )?;
    let dropped = ticks.writes_dropped + ticks.reads_dropped;
    if dropped > 0 {
        write!(
            out,
            "; {}",
            format!(
                "{} write, {} read dropped",
                ticks.writes_dropped, ticks.reads_dropped
            )
            .yellow()
        )?;
    }
    if ticks.abandoned > 0 {
        write!(
            out,
            "; {}",
            format!("{} abandoned", ticks.abandoned).bold().red()
        )?;
    }
    writeln!(out)
}

fn write_populate(out: &mut String, summary: &PopulateSummary) -> fmt::Result {
    write!(
        out,
        "{} {} objects written",
        "WARMUP:".bold().blue(),
        summary.written.bold()
    )?;
    if summary.failed > 0 {
        write!(
            out,
            ", {}",
            format!("{} FAILURES", summary.failed).bold().red()
        )?;
    }
    writeln!(out)
}

fn write_rates(out: &mut String, ops: u64, bytes: u64, duration: Duration) -> fmt::Result {
    let seconds = duration.as_secs_f64();
    let (ops_ps, bytes_ps) = if seconds > 0.0 {
        (ops as f64 / seconds, (bytes as f64 / seconds) as u64)
    } else {
        (0.0, 0)
    };
    writeln!(
        out,
        "  {:.2} operations/s, {}/s",
        ops_ps.bold(),
        ByteSize::b(bytes_ps).bold()
    )
}

fn write_latency(out: &mut String, latency: &LatencySummary) -> fmt::Result {
    let show = |value: Option<Duration>| value.unwrap_or_default();
    writeln!(
        out,
        "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
        show(latency.avg).bold(),
        show(latency.p50),
        show(latency.p90),
        show(latency.p99)
    )
}

fn write_buckets(out: &mut String, buckets: &[(f64, u64)]) -> fmt::Result {
    let total: u64 = buckets.iter().map(|(_, count)| count).sum();
    if total == 0 {
        return Ok(());
    }

    for (bound, count) in buckets.iter().filter(|(_, count)| *count > 0) {
        let share = *count as f64 / total as f64 * 100.0;
        let label = if bound.is_finite() {
            format!("<= {:.0?}", Duration::from_secs_f64(*bound))
        } else {
            "> max".to_owned()
        };
        writeln!(out, "    {label:>10}: {count:>8} ({share:5.1}%)")?;
    }
    Ok(())
}
