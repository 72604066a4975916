//! Plan and stage table rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::orchestrator::{RunOutcome, RunResult, TeardownStatus};
use crate::plan::{Hop, HopSequence};
use crate::stage::{StageAction, StageReport};

/// Row for the planned hop table.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "INDEX")]
    index: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "REFERENCE")]
    reference: String,
}

/// Row for the executed stage table.
#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "INDEX")]
    index: usize,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "ACTION")]
    action: String,
    #[tabled(rename = "FROM")]
    from: String,
    #[tabled(rename = "TO")]
    to: String,
    #[tabled(rename = "POLLS")]
    polls: u32,
    #[tabled(rename = "DURATION")]
    duration: String,
}

/// Print the hops about to run, starting version first.
pub fn print_plan(hops: &HopSequence, initial: Option<&Hop>) {
    println!();
    println!("{}", "Upgrade Plan:".bold());

    let mut rows = Vec::with_capacity(hops.len() + 1);
    if let Some(initial) = initial {
        rows.push(PlanRow {
            index: "start".to_string(),
            version: initial.target_version.to_string(),
            reference: initial.reference.clone(),
        });
    }
    rows.extend(hops.iter().enumerate().map(|(i, hop)| PlanRow {
        index: i.to_string(),
        version: hop.target_version.to_string(),
        reference: hop.reference.clone(),
    }));

    if rows.is_empty() {
        println!("  No hops to run.");
        return;
    }

    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{}", table);
}

/// Print the stage table and the run verdict.
pub fn print_summary(result: &RunResult) {
    println!();
    println!("{}", "Stages:".bold());

    if result.stages.is_empty() {
        println!("  No stages completed.");
    } else {
        let rows: Vec<StageRow> = result.stages.iter().map(stage_row).collect();
        let mut table = Table::new(&rows);
        apply_table_style(&mut table);
        println!("{}", table);
    }

    println!();
    match &result.teardown {
        TeardownStatus::NotAttempted => println!("Teardown: {}", "not attempted".dimmed()),
        TeardownStatus::Completed => println!("Teardown: {}", "completed".green()),
        TeardownStatus::Failed(e) => println!("Teardown: {} ({})", "failed".red(), e),
    }

    let final_version = result
        .final_version
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);

    match &result.outcome {
        RunOutcome::Success => println!(
            "{} Staged upgrade completed (final version: {})",
            "✓".green(),
            final_version.bold()
        ),
        RunOutcome::FailedAtBootstrap { reference, error } => println!(
            "{} Bootstrap of {} failed: {}",
            "✗".red(),
            reference,
            error
        ),
        RunOutcome::FailedAtHop {
            index,
            target,
            error,
        } => println!(
            "{} Hop {} to [{}] failed ({}): {}",
            "✗".red(),
            index,
            target,
            error.kind().yellow(),
            error
        ),
        RunOutcome::FailedAtTeardown { error } => {
            println!("{} Teardown failed: {}", "✗".red(), error);
        }
    }
}

fn stage_row(stage: &StageReport) -> StageRow {
    let action = match stage.action {
        StageAction::Upgraded => stage.action.to_string().green().to_string(),
        StageAction::Skipped => stage.action.to_string().dimmed().to_string(),
    };

    StageRow {
        index: stage.index,
        target: stage.target.to_string(),
        action,
        from: stage.version_before.to_string(),
        to: stage.version_after.to_string(),
        polls: stage.polls,
        duration: format_duration(stage.duration_secs()),
    }
}

/// Format seconds as `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// Apply kubectl-style table formatting.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}
