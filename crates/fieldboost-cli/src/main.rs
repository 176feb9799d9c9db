use anyhow::Result;
use clap::{Arg, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use fieldboost_cli::train::input::TrainConfig;
use fieldboost_cli::train::runner;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("FIELDBOOST_LOG", "error,fieldboost=info"))
        .init();

    let matches = Command::new("fieldboost")
        .version(clap::crate_version!())
        .about("Multiclass gradient tree boosting over engine-managed datasets")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("train")
                .about("Boost a classifier on a CSV/TSV table")
                .arg(
                    Arg::new("config")
                        .help("Path to training configuration file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .help("Training table. Overrides `data` in the configuration file.")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output")
                        .help("Path of the JSON run report. Overrides `output_file`.")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("scored_file")
                        .long("scored")
                        .help("Also write class probabilities and predictions for every row (CSV).")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("objective")
                        .long("objective")
                        .help(
                            "Name of the categorical objective field. Defaults to the last column.",
                        )
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("max_iterations")
                        .long("max-iterations")
                        .help("Stop after this many accepted iterations.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .help("Smoothed improvement percentage at which boosting stops.")
                        .value_parser(clap::value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("defaults").about("Print the default training configuration as JSON"),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("train", train_matches)) => handle_train(train_matches),
        Some(("defaults", _)) => {
            println!("{}", serde_json::to_string_pretty(&TrainConfig::default())?);
            Ok(())
        }
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_train(matches: &ArgMatches) -> Result<()> {
    let config_path: &PathBuf = matches
        .get_one("config")
        .ok_or_else(|| anyhow::anyhow!("missing config argument"))?;
    log::info!("[fieldboost] Training from config: {:?}", config_path);

    let config = TrainConfig::from_arguments(config_path, matches)?;
    match runner::run_training(&config) {
        Ok(report) => {
            log::info!(
                "[fieldboost] {} iterations accepted ({:?}), report at {}",
                report.ensemble.len(),
                report.termination,
                config.output_file.display()
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Training failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
