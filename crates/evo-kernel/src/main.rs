use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use evo_core::OrchestratorSettings;
use evo_kernel::telemetry::{self, LogFormat};
use evo_kernel::test_harness::{run_simulator, SimulatorConfig};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("evo-kernel")
        .version(evo_kernel::VERSION)
        .about("Evolutionary agent orchestration kernel")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run the evolution loop against scripted agents")
                .arg(
                    Arg::new("generations")
                        .long("generations")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of generations to evolve"),
                )
                .arg(
                    Arg::new("population")
                        .long("population")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Agents per generation"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent workers"),
                )
                .arg(
                    Arg::new("tokens")
                        .long("tokens")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Resource tokens in the pool"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                ),
        )
        .subcommand(
            Command::new("check-settings")
                .about("Load and validate a settings file")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML or YAML settings file"),
                ),
        );

    let matches = cli.get_matches();
    let format = if matches.get_flag("json-logs") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    telemetry::init(format);

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                generations: args.get_one::<usize>("generations").copied().unwrap_or(3),
                population: args.get_one::<usize>("population").copied().unwrap_or(8),
                workers: args.get_one::<usize>("workers").copied().unwrap_or(4),
                tokens: args.get_one::<usize>("tokens").copied().unwrap_or(2),
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
            };
            let report = run_simulator(config).await;
            println!("{}", report.generate_text());
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("check-settings", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .ok_or_else(|| anyhow::anyhow!("--path is required"))?;
            let settings = OrchestratorSettings::load(path)
                .with_context(|| format!("invalid settings in {}", path.display()))?;
            println!(
                "{} OK: {} workers, {} resource tokens (constrained: {}), {} kinds",
                path.display(),
                settings.workers,
                settings.resource_tokens.len(),
                settings.resource_constrained,
                settings.kinds.len()
            );
            Ok(())
        }
        _ => anyhow::bail!("unknown subcommand"),
    }
}
