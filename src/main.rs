#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # labcheck
//!
//! Grades a lab submission PDF against an assignment PDF using an
//! OpenAI-compatible model.
//!
//! Configure the model with `OPENAI_API_KEY`, `OPENAI_MODEL` and optionally
//! `OPENAI_ENDPOINT`, `OPENAI_VISION_MODEL`, `OPENAI_TEMPERATURE`,
//! `OPENAI_TOP_P` and `OPENAI_REASONING_EFFORT`, either in the environment or
//! in a `.env` file. Pipeline limits are read from `LABCHECK_*` variables.

use std::sync::Arc;

use anyhow::{Context, Result};
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use labcheck::{
    Coordinator, OpenAiEnv, OpenAiService, PipelineConfig, PipelineResult,
    pipeline::Severity, summary::render_summary,
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Options of the `grade` command.
#[derive(Debug, Clone)]
struct GradeArgs {
    /// Print the full result as JSON instead of a table.
    json:       bool,
    /// Log at DEBUG level.
    verbose:    bool,
    /// Path to the assignment PDF.
    assignment: String,
    /// Path to the submission PDF.
    submission: String,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade a submission
    Grade(GradeArgs),
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    let json = long("json")
        .help("Print the full pipeline result as JSON on stdout")
        .switch();
    let verbose = short('v')
        .long("verbose")
        .help("Show debug logs")
        .switch();
    let assignment = positional::<String>("ASSIGNMENT").help("Path to the assignment PDF");
    let submission = positional::<String>("SUBMISSION").help("Path to the submission PDF");

    let grade = construct!(GradeArgs {
        json,
        verbose,
        assignment,
        submission
    })
    .to_options()
    .command("grade")
    .help("Grade a submission against an assignment")
    .map(Cmd::Grade);

    let cmd = construct!([grade]);

    cmd.to_options()
        .descr("Automated grading of lab submissions")
        .run()
}

/// Prints every failure record to stderr.
fn report_failures(result: &PipelineResult) {
    for failure in &result.failures {
        let label = match failure.severity {
            Severity::Warning => "warning".yellow(),
            Severity::Error => "error".red(),
        };
        eprintln!("{label} [{}] {}: {}", failure.stage, failure.key, failure.cause);
    }
}

/// Runs the pipeline for one pair of PDFs.
async fn grade(args: GradeArgs) -> Result<()> {
    let assignment = std::fs::read(&args.assignment)
        .with_context(|| format!("Failed to read assignment PDF `{}`", args.assignment))?;
    let submission = std::fs::read(&args.submission)
        .with_context(|| format!("Failed to read submission PDF `{}`", args.submission))?;

    let openai = OpenAiEnv::from_env()
        .context("OPENAI_API_KEY and OPENAI_MODEL must be set (environment or .env)")?;
    let coordinator =
        Coordinator::new(Arc::new(OpenAiService::new(openai)), PipelineConfig::from_env());

    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling; waiting for in-flight requests to finish...");
            token.cancel();
        }
    });

    let result = coordinator
        .run_full_analysis(&assignment, &submission)
        .await
        .context("Grading failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render_summary(&result));
        report_failures(&result);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let cmd = options();
    let verbose = match &cmd {
        Cmd::Grade(args) => args.verbose,
    };

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    let filter_layer = LevelFilter::from_level(if verbose { Level::DEBUG } else { Level::INFO });
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match cmd {
        Cmd::Grade(args) => grade(args).await?,
    };

    Ok(())
}
