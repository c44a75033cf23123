//! `statehold inspect` command: a read-only report over the storage root.
//!
//! Works whether or not the service is running, and never writes.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use statehold_kernel::InspectReport;
use statehold_kernel::inspect::{DEFAULT_INSPECT_EVENTS, inspect};

use crate::opts::GlobalOpts;
use crate::output::{print_success, print_warnings, wants_json};

const WIDTH: usize = 62;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Number of recent events to show
    #[arg(short = 'n', long, default_value_t = DEFAULT_INSPECT_EVENTS)]
    pub events: usize,
}

pub fn cmd_inspect(opts: &GlobalOpts, args: &InspectArgs) -> Result<()> {
    let report = inspect(&opts.data_dir, args.events);
    if wants_json(opts) {
        let warnings = report.warnings.clone();
        return print_success(opts, serde_json::to_value(&report)?, warnings);
    }
    let stdout = io::stdout();
    render(&report, args.events, &mut stdout.lock())?;
    if !opts.quiet {
        print_warnings(&report.warnings)?;
    }
    Ok(())
}

fn rule(out: &mut impl Write, ch: char) -> io::Result<()> {
    writeln!(out, "{}", ch.to_string().repeat(WIDTH))
}

fn section(out: &mut impl Write, title: &str) -> io::Result<()> {
    rule(out, '─')?;
    writeln!(out, "  {title}")?;
    rule(out, '─')
}

pub fn render(report: &InspectReport, event_limit: usize, out: &mut impl Write) -> io::Result<()> {
    if !report.storage_present {
        writeln!(
            out,
            "  storage path {} not found",
            report.storage_path.display()
        )?;
        return Ok(());
    }

    // Missing or unreadable counters show as zeros; the warning says which.
    section(out, "PERSISTENT STATS")?;
    let c = &report.counters;
    for (key, value) in [
        ("startup_count", c.startup_count),
        ("crash_count", c.crash_count),
        ("total_sessions", c.total_sessions),
        ("total_requests", c.total_requests),
    ] {
        writeln!(out, "  {key:<28} {value}")?;
    }

    section(out, "SESSIONS")?;
    if report.sessions.is_empty() {
        writeln!(out, "  (no sessions)")?;
    } else {
        writeln!(out, "  {:<36}  {:<20}  {:>8}  CREATED", "ID", "NAME", "ACCESSES")?;
        rule(out, '·')?;
        for s in &report.sessions {
            writeln!(
                out,
                "  {:<36}  {:<20}  {:>8}  {}",
                s.id, s.name, s.access_count, s.created_at
            )?;
        }
    }
    writeln!(out)?;
    writeln!(out, "  Total: {}", report.sessions.len())?;
    if !report.corrupt_sessions.is_empty() {
        writeln!(out, "  Skipped (corrupt): {}", report.corrupt_sessions.len())?;
    }

    section(out, &format!("RECENT EVENTS  (last {event_limit})"))?;
    if report.total_events == 0 {
        writeln!(out, "  (no events yet)")?;
    } else {
        for e in &report.recent_events {
            write!(out, "  {}  [{}]  {}", e.timestamp, e.instance_id, e.kind)?;
            if !e.attributes.is_empty() {
                let attrs = serde_json::Value::Object(e.attributes.clone());
                write!(out, "  {attrs}")?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
        writeln!(out, "  Total events: {}", report.total_events)?;
    }
    if report.skipped_event_lines > 0 {
        writeln!(out, "  Unreadable lines: {}", report.skipped_event_lines)?;
    }

    rule(out, '═')?;
    writeln!(out)
}
