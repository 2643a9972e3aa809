use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use compare_systems::app::CompareApp;
use compare_systems::bvbrc::BvbrcHttpClient;
use compare_systems::config::ConfigLoader;
use compare_systems::error::CompareError;

#[derive(Parser)]
#[command(name = "compare-systems")]
#[command(about = "Cross-genome comparison tables for BV-BRC genome sets")]
#[command(version, author)]
struct Cli {
    /// Job description JSON (defaults to compare-systems.json)
    #[arg(long)]
    jfile: Option<String>,

    /// Directory receiving the JSON tables and report.txt
    #[arg(long, default_value = ".")]
    output_dir: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CompareError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CompareError) -> u8 {
    match error {
        CompareError::MissingConfig
        | CompareError::ConfigRead(_)
        | CompareError::ConfigParse(_)
        | CompareError::NoGenomes => 2,
        CompareError::BvbrcHttp(_)
        | CompareError::BvbrcStatus { .. }
        | CompareError::GroupResolution { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let job = ConfigLoader::resolve(cli.jfile.as_deref()).into_diagnostic()?;
    let output_dir = Utf8PathBuf::from(cli.output_dir);

    let client = BvbrcHttpClient::new().into_diagnostic()?;
    let app = CompareApp::new(client);
    let summary = app.run(&job, &output_dir).into_diagnostic()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).into_diagnostic()?
    );
    Ok(())
}
