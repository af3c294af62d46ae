#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # cppgrade
//!
//! Normalizes, builds and reports on a directory of C/C++ submissions.

use std::path::{Path, PathBuf};

use anyhow::Result;
use bpaf::*;
use colored::Colorize;
use cppgrade::{BatchReport, CancelToken, Config, Stages, pipeline, report};
use dotenvy::dotenv;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::SubscriberInitExt};

/// Command line options.
#[derive(Debug, Clone)]
struct Opts {
    /// directory holding the raw submissions
    submissions:         PathBuf,
    /// directory receiving the workspaces
    output:              PathBuf,
    /// direct compiler command override
    command:             Option<String>,
    /// stem of the report files
    report_name:         String,
    /// leave existing workspaces untouched
    keep_output:         bool,
    /// copy archive trees as-is
    keep_file_structure: bool,
    /// concurrent builds override
    jobs:                Option<usize>,
    /// per-step timeout override
    timeout:             Option<u64>,
    /// passes to run
    stages:              Stages,
}

/// Parse the command line arguments.
fn options() -> Opts {
    let submissions = short('s')
        .long("submissions")
        .help("Directory containing the submissions")
        .argument::<PathBuf>("DIR")
        .fallback(PathBuf::from("./submissions"));

    let output = short('o')
        .long("output")
        .help("Directory receiving one workspace per student")
        .argument::<PathBuf>("DIR")
        .fallback(PathBuf::from("./output"));

    let command = short('c')
        .long("command")
        .help("Compiler command used when a submission has no CMakeLists.txt or Makefile")
        .argument::<String>("CMD")
        .optional();

    let report_name = long("report-name")
        .help("Report files are written as <NAME>-<id>.md|csv|json")
        .argument::<String>("NAME")
        .fallback("REPORT".to_string());

    let keep_output = long("keep-output")
        .help("Do not recreate workspaces that already exist")
        .switch();

    let keep_file_structure = long("keep-file-structure")
        .help("Copy archive contents as-is even without a build file")
        .switch();

    let jobs = short('j')
        .long("jobs")
        .help("Number of workspaces built at the same time")
        .argument::<usize>("N")
        .guard(|n| *n > 0, "jobs must be at least 1")
        .optional();

    let timeout = long("timeout")
        .help("Seconds each build step may run, 0 to wait forever")
        .argument::<u64>("SECS")
        .optional();

    let stages = long("stages")
        .help("Comma separated stages to run: normalize,build,report")
        .argument::<String>("LIST")
        .parse(|s| s.parse::<Stages>())
        .fallback(Stages::default());

    construct!(Opts {
        submissions,
        output,
        command,
        report_name,
        keep_output,
        keep_file_structure,
        jobs,
        timeout,
        stages
    })
    .to_options()
    .descr("Batch builder for C/C++ homework submissions")
    .run()
}

/// Layers command line overrides on top of the environment configuration.
fn config_from(opts: &Opts) -> Config {
    let mut config = Config::from_env();
    config.submission_dir = opts.submissions.clone();
    config.output_dir = opts.output.clone();
    config.keep_output = opts.keep_output;
    config.keep_file_structure = opts.keep_file_structure;
    if let Some(command) = &opts.command {
        config.compiler_command = command.clone();
    }
    if let Some(jobs) = opts.jobs {
        config.jobs = jobs;
    }
    if let Some(secs) = opts.timeout {
        config.step_timeout_secs = secs;
    }
    config
}

/// Prints one line per student and per unprocessed submission.
fn print_summary(report: &BatchReport) {
    for failure in &report.failures {
        eprintln!(
            "{} {}: {}",
            "SKIP".yellow().bold(),
            failure.source.display(),
            failure.description
        );
    }
    for (name, result) in &report.builds {
        let tag = if result.succeeded() {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!("{tag} {name}");
    }
    println!(
        "{} of {} submissions built, {} unprocessed",
        report.successes().to_string().bold(),
        report.builds.len(),
        report.failures.len()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let opts = options();
    let config = config_from(&opts);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, letting running steps finish");
                cancel.cancel();
            }
        });
    }

    let batch = pipeline::run(&config, opts.stages, &cancel).await?;

    if opts.stages.report {
        let paths = report::write_reports(&batch, Path::new("."), &opts.report_name)?;
        tracing::info!("Report written to {}", paths.csv.display());
    }

    print_summary(&batch);
    Ok(())
}
