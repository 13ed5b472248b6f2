//! Build reporter - display stage outcomes

use colored::*;
use lspec_build::{PipelineReport, StageOutcome, StageState, WorkspaceReport};
use serde_json::{json, Value};

/// Print a human-readable report of every project
pub fn print(report: &WorkspaceReport) {
    for project in &report.reports {
        print_project(project);
    }

    if let Some(origin) = &report.aborted_by {
        println!();
        println!(
            "{} compiler could not be started ({}), remaining stages were not executed",
            "ABORTED".red().bold(),
            origin
        );
    }
}

fn print_project(report: &PipelineReport) {
    println!("{}", report.project.bold());
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }

    let ran = report.executed().len();
    let skipped = report.count(|s| matches!(s, StageState::Skipped(_)));
    match &report.failure {
        None => println!("  {} ({} ran, {} skipped)\n", "ok".green().bold(), ran, skipped),
        Some(error) => println!("  {} {}\n", "error:".red().bold(), error),
    }
}

fn print_outcome(outcome: &StageOutcome) {
    let label = match &outcome.state {
        StageState::Succeeded => "RAN ".green().bold(),
        StageState::Skipped(_) => "SKIP".dimmed(),
        StageState::Failed(_) => "FAIL".red().bold(),
        StageState::NotExecuted { .. } => "----".yellow(),
        StageState::Pending => "....".normal(),
    };

    if matches!(outcome.state, StageState::Succeeded) {
        println!("  {} {} ({:.2?})", label, outcome.name, outcome.duration);
    } else {
        println!("  {} {}: {}", label, outcome.name, outcome.state);
    }
}

/// JSON form of a workspace report
pub fn to_json(report: &WorkspaceReport) -> Value {
    let projects: Vec<Value> = report
        .reports
        .iter()
        .map(|project| {
            json!({
                "project": project.project,
                "success": project.succeeded(),
                "stages": project.outcomes,
                "error": project.failure.as_ref().map(ToString::to_string),
            })
        })
        .collect();

    json!({
        "success": report.succeeded(),
        "aborted_by": report.aborted_by,
        "projects": projects,
    })
}
