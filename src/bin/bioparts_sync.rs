use std::process::ExitCode;

use camino::Utf8Path;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bioparts_sync::app::Pipeline;
use bioparts_sync::config::{ConfigLoader, ResolvedConfig};
use bioparts_sync::error::SyncError;
use bioparts_sync::homology::{Aligner, DiamondAligner, UniprotSparqlClient};
use bioparts_sync::wikibase::WikibaseHttpClient;

#[derive(Parser)]
#[command(name = "bioparts-sync")]
#[command(about = "Publishes a parts registry export to a Wikibase instance")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the sync pipeline")]
    Run(RunArgs),
    #[command(about = "Link composite parts to their constituents")]
    Link(LinkArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_enum)]
    mode: Mode,

    #[arg(short = 'u', long)]
    username: String,

    #[arg(short = 'p', long)]
    password: String,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct LinkArgs {
    #[arg(short = 'u', long)]
    username: String,

    #[arg(short = 'p', long)]
    password: String,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Parse the export from scratch, align, enrich, publish.
    Fresh,
    /// Re-publish whatever is already staged, skipping the export.
    Staged,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sync) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(sync));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingConfig
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_) => 2,
        SyncError::SparqlHttp(_)
        | SyncError::SparqlStatus { .. }
        | SyncError::WikibaseHttp(_)
        | SyncError::WikibaseStatus { .. }
        | SyncError::LoginFailed(_)
        | SyncError::WriteRejected(_)
        | SyncError::UniprotHttp(_)
        | SyncError::UniprotStatus { .. }
        | SyncError::MissingTool(_)
        | SyncError::AlignerFailed(_) => 3,
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
    match cli.command {
        Commands::Run(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
            match args.mode {
                Mode::Fresh => {
                    let aligner = build_aligner(&config).into_diagnostic()?;
                    let mut pipeline = build_pipeline(config, aligner).into_diagnostic()?;
                    let summary = pipeline
                        .run_fresh(&args.username, &args.password)
                        .into_diagnostic()?;
                    println!(
                        "normalized {}, reconciled {}, failed {}",
                        summary.normalized, summary.reconciled, summary.failed
                    );
                }
                Mode::Staged => {
                    let mut pipeline = build_pipeline(config, NopAligner).into_diagnostic()?;
                    let summary = pipeline
                        .run_staged(&args.username, &args.password)
                        .into_diagnostic()?;
                    println!(
                        "reconciled {}, failed {}",
                        summary.reconciled, summary.failed
                    );
                }
            }
            Ok(())
        }
        Commands::Link(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
            let mut pipeline = build_pipeline(config, NopAligner).into_diagnostic()?;
            let summary = pipeline
                .run_link(&args.username, &args.password)
                .into_diagnostic()?;
            println!("linked {}, skipped {}", summary.linked, summary.skipped);
            Ok(())
        }
    }
}

fn build_pipeline<A: Aligner>(
    config: ResolvedConfig,
    aligner: A,
) -> Result<Pipeline<WikibaseHttpClient, UniprotSparqlClient, A>, SyncError> {
    let wikibase = WikibaseHttpClient::new(&config.sparql_endpoint, &config.api_url)?;
    let uniprot = UniprotSparqlClient::new(&config.uniprot_sparql_endpoint)?;
    Ok(Pipeline::new(config, wikibase, uniprot, aligner))
}

/// Fresh mode can reuse a pre-existing alignment report, in which case
/// no aligner database needs to be configured; the DIAMOND wrapper is
/// only built when a database path is present.
fn build_aligner(config: &ResolvedConfig) -> Result<Box<dyn Aligner>, SyncError> {
    match &config.aligner_database {
        Some(database) => Ok(Box::new(DiamondAligner::new(database)?)),
        None => Ok(Box::new(NopAligner)),
    }
}

/// Stands in when no alignment run is wanted (staged and link modes) or
/// possible (no database configured).
struct NopAligner;

impl Aligner for NopAligner {
    fn align(&self, _fasta: &Utf8Path, _report: &Utf8Path) -> Result<(), SyncError> {
        Err(SyncError::AlignerFailed(
            "no aligner database configured".to_string(),
        ))
    }
}

