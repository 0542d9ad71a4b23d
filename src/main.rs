//! cadbench - benchmark code-generating models on CAD tasks
//!
//! Runs one task prompt against every selected model in order, persisting a
//! record per model, then prints a summary table.

use std::path::PathBuf;

use cadbench::config::BenchConfig;
use cadbench::generator::OllamaGenerator;
use cadbench::orchestrator::RequestOrchestrator;
use cadbench::record::RunRecord;
use cadbench::store::JsonlLedger;

const USAGE: &str = "usage: cadbench --prompt <text> --project <name> [--config <file>] [--model <name>]... [--json-logs] [--metrics]";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    prompt: String,
    project: String,
    config: Option<PathBuf>,
    models: Vec<String>,
    json_logs: bool,
    metrics: bool,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut parsed = CliArgs::default();
        let mut prompt = None;
        let mut project = None;
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| format!("missing value for {}", flag))
            };
            match arg.as_str() {
                "--prompt" => prompt = Some(value("--prompt")?),
                "--project" => project = Some(value("--project")?),
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--model" => parsed.models.push(value("--model")?),
                "--json-logs" => parsed.json_logs = true,
                "--metrics" => parsed.metrics = true,
                other => return Err(format!("unknown argument '{}'", other)),
            }
        }

        parsed.prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or("--prompt is required")?;
        parsed.project = project
            .filter(|p| !p.trim().is_empty())
            .ok_or("--project is required")?;
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = cadbench::tracing::init_tracing(args.json_logs) {
        eprintln!("failed to initialize tracing: {}", e);
    }

    if let Err(e) = run(args).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = BenchConfig::load(args.config.as_deref())?;
    let models = config.select_models(&args.models)?;

    let generator = OllamaGenerator::new(&config.generator.base_url)
        .with_system_prompt(config.generator.system_prompt());
    let ledger = JsonlLedger::new(&config.output_dir, config.ledger.clone());
    let orchestrator = RequestOrchestrator::new(generator, ledger, &config);

    println!("[BENCH] {} model(s), project '{}'", models.len(), args.project);
    let mut records: Vec<RunRecord> = Vec::with_capacity(models.len());

    for model in &models {
        match orchestrator.run(model, &args.project, &args.prompt).await {
            Ok(outcome) => {
                if let Some(dir) = &outcome.project_dir {
                    println!("[BENCH] {} output in {}", model.name, dir.path.display());
                }
                records.push(outcome.record);
            }
            Err(e) => {
                tracing::error!(model = %model.name, error = %e, "run aborted");
                println!("[BENCH] {} aborted: {}", model.name, e);
                records.push(e.record().clone());
            }
        }
    }

    print_summary(&records);
    println!("[BENCH] Records appended to {}", orchestrator.sink().path().display());

    if args.metrics {
        println!("{}", cadbench::metrics::gather_text());
    }
    Ok(())
}

fn print_summary(records: &[RunRecord]) {
    println!();
    println!(
        "{:<28} {:<16} {:>8} {:>14} {:>10} {:>10}",
        "MODEL", "STATUS", "ATTEMPTS", "VOLUME (mm³)", "GEN (s)", "EXEC (s)"
    );
    println!("{}", "─".repeat(91));
    for record in records {
        println!(
            "{:<28} {:<16} {:>8} {:>14.2} {:>10.2} {:>10.2}",
            record.model,
            record.status.as_str(),
            record.attempts,
            record.volume_mm3,
            record.generation_time_s,
            record.execution_time_s
        );
    }
}
