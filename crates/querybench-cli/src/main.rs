//! Querybench command-line runner.

mod args;
mod fork;

use args::{Args, OutputFormat};
use clap::Parser;
use querybench::report::{render_table, to_json};
use querybench::{
    store, BackendKind, BenchConfig, Error, Runner, ScenarioRegistry, ScenarioReport,
};

fn main() {
    // Logs go to stderr; fork workers use stdout for reports.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querybench=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ScenarioRegistry::standard();
    if args.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let filter = args.filter.clone().unwrap_or_default();
    let backends = args.selected_backends();
    let format = args.format;
    let worker = args.fork_worker;
    let config = args.into_config();
    config.validate()?;

    let selected: Vec<_> = registry.matching(&filter);
    if selected.is_empty() {
        return Err(Error::UnknownScenario(filter).into());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        scenarios = selected.len(),
        backends = ?backends,
        forks = config.trial.forks,
        worker,
        "starting run"
    );

    let reports = if worker || config.trial.forks == 0 {
        run_in_process(&config, &registry, &filter, backends)?
    } else {
        fork::run_forks(config.trial.forks)?
    };

    if worker {
        println!("{}", serde_json::to_string(&reports)?);
        return Ok(());
    }

    match format {
        OutputFormat::Table => println!("{}", render_table(&reports)),
        OutputFormat::Json => println!("{}", to_json(&reports)?),
    }
    Ok(())
}

fn run_in_process(
    config: &BenchConfig,
    registry: &ScenarioRegistry,
    filter: &str,
    backends: Vec<BackendKind>,
) -> querybench::Result<Vec<ScenarioReport>> {
    let store = store::init_global(&config.pool)?;
    let runner = Runner::new(&store, config.trial.clone())?.with_backends(backends);
    let reports = runner.run_all(registry.matching(filter));
    store.close();
    reports
}
