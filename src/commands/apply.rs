//! Apply command - run a catalog against the system

use anyhow::{Context as _, Result};
use declarative::tags::parse_tag_list;
use declarative::{
    NoCoordinator, Persistence, ProgressCallback, Report, ResourceRef, ResourceStatus,
    RunOptions, RunOutcome, Transaction,
};

use crate::Context;
use crate::catalog_file;
use crate::cli::{ApplyArgs, OutputFormat};
use crate::config::Settings;
use crate::ui;

/// Exit status when at least one resource failed
pub const EXIT_FAILED_RESOURCES: u8 = 2;

/// Prints a line per resource as the run progresses
struct StepProgress {
    enabled: bool,
    total: usize,
    done: usize,
}

impl ProgressCallback for StepProgress {
    fn on_run_start(&mut self, count: usize) {
        self.total = count;
    }

    fn on_resource_start(&mut self, resource: &ResourceRef) {
        log::debug!("Evaluating {resource}");
    }

    fn on_resource_complete(&mut self, status: &ResourceStatus) {
        self.done += 1;
        if self.enabled {
            // generated resources can push the count past the initial total
            let total = self.total.max(self.done);
            ui::step(
                self.done,
                total,
                &format!("{} {}", status.resource, ui::state_label(status)),
            );
        }
    }
}

pub fn run(ctx: &Context, args: &ApplyArgs, settings: &Settings) -> Result<u8> {
    let options = run_options(args, settings);
    let human = args.format == OutputFormat::Human && !ctx.quiet;

    if human {
        ui::header(&format!("Applying {}", args.catalog.display()));
        if options.noop {
            ui::warn("Noop run - no changes will be made");
        }
    }

    let report = apply(ctx, args, settings, options, human)?;
    match args.format {
        OutputFormat::Human => {
            if !ctx.quiet {
                ui::report(&report, ctx.verbose > 0);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).context("Could not render report")?;
            println!("{json}");
        }
    }
    Ok(exit_code(report.outcome()))
}

fn apply(
    ctx: &Context,
    args: &ApplyArgs,
    settings: &Settings,
    options: RunOptions,
    human: bool,
) -> Result<Report> {
    let mut catalog = catalog_file::load(&args.catalog)?;
    let state_path = settings.state_path(args.state.as_deref())?;
    log::debug!("Using state store {}", state_path.display());
    let mut store = Persistence::file(&state_path);

    let mut coordinator = NoCoordinator;
    let mut progress = StepProgress {
        enabled: human && ctx.verbose > 0,
        total: 0,
        done: 0,
    };
    let mut transaction =
        Transaction::new(&mut catalog, options, &mut store, &mut coordinator, &mut progress);
    let result = transaction.evaluate();
    let report = transaction.into_report();

    if let Err(e) = result {
        if human {
            for status in report.statuses().iter().filter(|s| s.failed) {
                ui::resource_status(status, true);
            }
        }
        return Err(e).context("Could not apply catalog");
    }
    Ok(report)
}

/// Merge command-line flags over config file settings
fn run_options(args: &ApplyArgs, settings: &Settings) -> RunOptions {
    let tags = args
        .tags
        .as_deref()
        .map_or_else(|| settings.tags.clone(), parse_tag_list);
    let skip_tags = args
        .skip_tags
        .as_deref()
        .map_or_else(|| settings.skip_tags.clone(), parse_tag_list);
    RunOptions {
        noop: args.noop || settings.noop,
        tags,
        skip_tags,
        skip_on_failed_dependency: args.skip_failed_deps || settings.skip_failed_deps,
        ignore_schedules: args.ignore_schedules || settings.ignore_schedules,
    }
}

pub fn exit_code(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Failed => EXIT_FAILED_RESOURCES,
        RunOutcome::Changed | RunOutcome::Unchanged => 0,
    }
}
