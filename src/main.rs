use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use ctxbench::agent;
use ctxbench::cache::ContextCache;
use ctxbench::cli::{Cli, Commands, ReportArgs, RunArgs};
use ctxbench::config::RunConfig;
use ctxbench::report;
use ctxbench::results::{self, ResultStore, WorkItem};
use ctxbench::runner::{self, RunContext};
use ctxbench::scheduler;
use ctxbench::taskset::{self, RepoSpec};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Failures can happen before (or without) the tracing
            // subscriber being installed, so this cannot go through it.
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Report(args) => cmd_report(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config_path = args.config.clone();
    let config = RunConfig::load(config_path.as_deref(), &args)?;

    ctxbench::logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;

    config.validate()?;

    let task_sets = taskset::load_task_sets(&config.task_files)?;
    let work = runner::build_work_items(&task_sets, &config.conditions, config.repetitions);

    info!(
        task_sets = task_sets.len(),
        conditions = config.conditions.len(),
        repetitions = config.repetitions,
        items = work.len(),
        "work plan built"
    );

    let (carried, to_run) = match &config.resume {
        Some(path) => {
            let prior = results::load_prior_records(path)?;
            let plan = results::merge(&prior, work);
            info!(
                prior = prior.len(),
                carried = plan.carried.len(),
                to_run = plan.to_run.len(),
                "merged prior run"
            );
            (plan.carried, plan.to_run)
        }
        None => (Vec::new(), work),
    };

    if config.dry_run {
        print_plan(carried.len(), &to_run);
        return Ok(());
    }

    let agent_path = agent::resolve_agent_cmd(&config.agent_cmd)?;
    info!(
        agent_cmd = %config.agent_cmd,
        agent_path = %agent_path.display(),
        model = config.model.as_deref().unwrap_or("default"),
        parallel = config.parallel,
        "agent resolved"
    );

    let references: HashMap<String, PathBuf> = if config.reference_clones {
        let repos: Vec<RepoSpec> = task_sets.iter().map(|s| s.repo.clone()).collect();
        runner::prepare_references(&repos, &config.workspaces_dir.join(".references"))?
    } else {
        HashMap::new()
    };

    let ctx = RunContext {
        workspaces_dir: config.workspaces_dir.clone(),
        cache: ContextCache::new(&config.cache_dir)?,
        agent_path,
        model: config.model.clone(),
        max_turns: config.max_turns,
        timeouts: config.timeouts(),
        keep_workspaces: config.keep_workspaces,
        references,
    };

    let run_id = format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    let mut store = ResultStore::create(&config.output_dir, &run_id)?;
    store.carry_forward(carried)?;

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
            eprintln!("interrupt received; finishing in-flight attempts");
        })?;
    }

    let outcome = scheduler::run_pool(
        to_run,
        config.parallel as usize,
        &interrupt,
        |item| runner::run_item(&ctx, item),
        |result| {
            // A failed write must not abort the run; the next append or the
            // final summary rewrites the whole manifest anyway.
            if let Err(e) = store.append(result) {
                warn!("failed to persist result: {e}");
            }
        },
    );

    let summary = report::summarize(store.records());
    store.finalize(summary.to_value())?;

    let markdown = report::render_markdown(&run_id, &summary, store.records());
    let report_path = config.output_dir.join(format!("{run_id}.md"));
    std::fs::write(&report_path, &markdown)
        .map_err(|e| anyhow::anyhow!("failed to write report {}: {e}", report_path.display()))?;

    info!(
        results = %store.path().display(),
        report = %report_path.display(),
        attempts = outcome.results.len(),
        "run complete"
    );

    if outcome.interrupted {
        warn!(
            "run was interrupted; resume with --resume {}",
            store.path().display()
        );
    }

    Ok(())
}

fn print_plan(carried: usize, to_run: &[WorkItem]) {
    println!("dry run: {carried} carried from prior run, {} to execute", to_run.len());
    for item in to_run {
        println!(
            "  {} {} {} rep {}",
            item.repo.slug(),
            item.task.id,
            item.condition,
            item.rep_index
        );
    }
}

fn cmd_report(args: ReportArgs) -> anyhow::Result<()> {
    let records = results::load_prior_records(&args.results)?;
    let run_id = args
        .results
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run");

    let summary = report::summarize(&records);
    let markdown = report::render_markdown(run_id, &summary, &records);

    match &args.output {
        Some(path) => {
            std::fs::write(path, &markdown)
                .map_err(|e| anyhow::anyhow!("failed to write report {}: {e}", path.display()))?;
        }
        None => println!("{markdown}"),
    }

    Ok(())
}
