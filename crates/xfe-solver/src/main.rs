use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use xfe_solver::{AnalysisPipeline, AnalysisResults, ModelBuilder, ModelInput};

fn usage() {
    eprintln!("usage:");
    eprintln!("  xfe-solver check <model.json>");
    eprintln!("  xfe-solver run <model.json> [results.json]");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn check_file(path: &Path) -> Result<(), String> {
    let input = ModelInput::from_file(path).map_err(|err| err.to_string())?;
    let (domain, materials) =
        ModelBuilder::build(&input).map_err(|err| format!("{}: {err}", path.display()))?;

    println!("nodes: {}", domain.nodes().len());
    println!("elements: {}", domain.num_elements());
    println!("constraints: {}", domain.constraints().len());
    println!("patterns: {}", domain.patterns().len());
    println!("materials: {}", materials.material_names().join(", "));
    println!(
        "analysis: {:?}, {} steps",
        input.analysis.integrator.analysis_type(),
        input.analysis.num_steps
    );
    Ok(())
}

fn run_file(path: &Path, output: Option<&Path>) -> Result<AnalysisResults, String> {
    let input = ModelInput::from_file(path).map_err(|err| err.to_string())?;
    let (_domain, results) = AnalysisPipeline::run_model(&input)
        .map_err(|err| format!("{}: {err}", path.display()))?;

    println!("analysis_type: {:?}", results.analysis_type);
    println!("equations: {}", results.num_equations);
    println!("steps: {}", results.report.steps.len());
    println!("iterations: {}", results.report.total_iterations());
    println!("final_time: {}", results.report.final_time);

    if let Some(output) = output {
        let text = serde_json::to_string_pretty(&results)
            .map_err(|err| format!("failed to serialize results: {err}"))?;
        std::fs::write(output, text)
            .map_err(|err| format!("failed to write {}: {err}", output.display()))?;
        println!("results: {}", output.display());
    }
    Ok(results)
}

fn main() -> ExitCode {
    init_logging();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("check") if args.len() == 3 => match check_file(Path::new(&args[2])) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("check_error: {err}");
                ExitCode::from(1)
            }
        },
        Some("run") if args.len() == 3 || args.len() == 4 => {
            let output = args.get(3).map(Path::new);
            match run_file(Path::new(&args[2]), output) {
                Ok(_) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("run_error: {err}");
                    ExitCode::from(1)
                }
            }
        }
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
