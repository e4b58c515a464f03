use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use frameloom_contracts::events::EventWriter;
use frameloom_contracts::models::{ModelRegistry, CAP_EDIT, CAP_IMAGE, CAP_TEXT, CAP_VIDEO};
use frameloom_contracts::pricing::CostTable;
use frameloom_contracts::records::ScriptChoice;
use frameloom_contracts::store::{JsonFileStore, KeyValueStore, MemoryStore};
use frameloom_engine::config::{load_dotenv, EngineConfig};
use frameloom_engine::http::ApiClient;
use frameloom_engine::notices::NoticeLevel;
use frameloom_engine::{
    BatchReport, Capabilities, DryrunStudio, ExportOutcome, GenerationBackend, Host,
    HttpBackend, HttpProjectSource, Pipeline, ProjectDataSource, Step, TaskKind,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code when a batch finished with some failed requests.
const PARTIAL_FAILURE_EXIT: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "frameloom", version, about = "Concept to video generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every step from a prompt to videos.
    Run(RunArgs),
    /// Show workflow and asset counts for a project.
    Status(ProjectArgs),
    /// Print the project's graph projection as JSON.
    Graph(ProjectArgs),
    /// Price the next image or video batch for a project.
    Estimate(EstimateArgs),
    /// Write the project's timeline manifest.
    Export(ExportArgs),
    /// Look up the credit price of one model.
    Cost(CostArgs),
    /// List known models.
    Models(ModelsArgs),
}

#[derive(Debug, Clone, Default, clap::Args)]
struct ConnectionArgs {
    /// Studio API base URL; without one the offline dryrun studio is used.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    api_token: Option<String>,
    #[arg(long, value_enum)]
    host: Option<HostArg>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    state: Option<PathBuf>,
}

impl ConnectionArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(api_base) = &self.api_base {
            config.api_base = Some(api_base.trim_end_matches('/').to_string());
        }
        if self.api_token.is_some() {
            config.api_token = self.api_token.clone();
        }
        if let Some(host) = self.host {
            config.host = host.into();
        }
        if self.events.is_some() {
            config.events_path = self.events.clone();
        }
        if let Some(state) = &self.state {
            config.state_path = state.clone();
        }
    }
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "Untitled")]
    project_name: String,
    /// Index of the concept to continue with.
    #[arg(long, default_value_t = 0)]
    concept: usize,
    #[arg(long, value_enum, default_value_t = ScriptArg::A)]
    script: ScriptArg,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    video_model: Option<String>,
    #[arg(long)]
    skip_videos: bool,
    /// Write the timeline manifest here after the run.
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
struct ProjectArgs {
    /// Project to open; defaults to the last selected one.
    #[arg(long)]
    project: Option<String>,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    project: Option<String>,
    /// Directory for the manifest; implies a desktop host.
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
struct EstimateArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
struct CostArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    edit: bool,
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    capability: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScriptArg {
    A,
    B,
}

impl From<ScriptArg> for ScriptChoice {
    fn from(value: ScriptArg) -> Self {
        match value {
            ScriptArg::A => ScriptChoice::A,
            ScriptArg::B => ScriptChoice::B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for TaskKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Image => TaskKind::Image,
            KindArg::Video => TaskKind::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HostArg {
    Desktop,
    Browser,
}

impl From<HostArg> for Host {
    fn from(value: HostArg) -> Self {
        match value {
            HostArg::Desktop => Host::Desktop,
            HostArg::Browser => Host::Browser,
        }
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("frameloom error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FRAMELOOM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn,frameloom_engine=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(dispatch(cli.command))
}

async fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run(args) => run_pipeline(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Graph(args) => run_graph(args).await,
        Command::Estimate(args) => run_estimate(args).await,
        Command::Export(args) => run_export(args).await,
        Command::Cost(args) => run_cost(args),
        Command::Models(args) => run_models(args),
    }
}

fn resolve_config(connection: &ConnectionArgs) -> Result<EngineConfig> {
    load_dotenv(Path::new(".env"))?;
    let mut config = EngineConfig::from_env()?;
    connection.apply(&mut config);
    Ok(config)
}

/// Wire a pipeline to the studio API, or to an in-memory dryrun studio
/// when no API base is configured. Offline sessions never touch the
/// persisted state file.
fn build_pipeline(config: &EngineConfig) -> Result<Pipeline> {
    let store: Arc<dyn KeyValueStore> = match config.api_base {
        Some(_) => Arc::new(JsonFileStore::new(&config.state_path)),
        None => Arc::new(MemoryStore::new()),
    };
    let capabilities = Capabilities::for_host(
        config.host,
        store.clone(),
        config.export_dir.clone(),
        config.api_token.clone(),
    )?;

    let backend: Arc<dyn GenerationBackend>;
    let source: Arc<dyn ProjectDataSource>;
    match &config.api_base {
        Some(api_base) => {
            let client = ApiClient::new(api_base, config.timeout, capabilities.auth.clone())?;
            backend = Arc::new(HttpBackend::new(client.clone()));
            source = Arc::new(HttpProjectSource::new(client));
        }
        None => {
            let studio = Arc::new(DryrunStudio::new());
            backend = studio.clone();
            source = studio;
        }
    }

    let mut pipeline = Pipeline::new(backend, source, capabilities, store, config);
    if let Some(events_path) = &config.events_path {
        pipeline = pipeline.with_events(EventWriter::new(events_path, Uuid::new_v4().to_string()));
    }
    tracing::debug!(backend = pipeline.backend_name(), host = %config.host, "pipeline ready");
    Ok(pipeline)
}

async fn run_pipeline(args: RunArgs) -> Result<i32> {
    let mut config = resolve_config(&args.connection)?;
    if let Some(out) = &args.out {
        config.export_dir = out.clone();
    }
    let mut pipeline = build_pipeline(&config)?;
    let outcome = drive_pipeline(&mut pipeline, &args).await;
    print_notices(&pipeline);
    outcome
}

async fn drive_pipeline(pipeline: &mut Pipeline, args: &RunArgs) -> Result<i32> {
    let project = pipeline
        .create_project(&args.project_name, &args.prompt)
        .await?;
    println!("Project {} ({}) on {}", project.name, project.id, pipeline.backend_name());

    let concepts = pipeline
        .run_concept_writer(&args.prompt, args.text_model.as_deref())
        .await?;
    for (idx, concept) in concepts.iter().enumerate() {
        println!("  [{idx}] {}: {}", concept.title, concept.logline);
    }
    let concept = pipeline.select_concept(args.concept)?;
    println!("Concept: {}", concept.title);

    pipeline
        .run_script_generation(args.text_model.as_deref())
        .await?;
    let script = pipeline.select_script(args.script.into()).await?;
    println!(
        "Script {:?}: {} segments, style '{}'",
        args.script,
        script.segments.len(),
        script.art_style
    );

    let estimate = pipeline.estimate_batch(TaskKind::Image, args.image_model.as_deref())?;
    println!(
        "Images: {} segments with {} ({} credits)",
        estimate.eligible, estimate.model, estimate.total_credits
    );
    let images = pipeline
        .run_image_generation(args.image_model.as_deref())
        .await?;
    print_report(&images);
    let mut any_failed = images.any_failed();

    if !args.skip_videos {
        let videos = pipeline
            .run_video_generation(args.video_model.as_deref())
            .await?;
        print_report(&videos);
        any_failed |= videos.any_failed();
    }

    if args.out.is_some() {
        print_export(pipeline.export_timeline()?)?;
    }
    let workflow = pipeline.workflow();
    println!(
        "Done at {}: {} images, {} videos",
        workflow.current_step(),
        workflow.image_count(),
        workflow.video_count()
    );
    Ok(if any_failed { PARTIAL_FAILURE_EXIT } else { 0 })
}

/// Open `project`, or refresh the last selected one.
async fn open_pipeline(config: &EngineConfig, project: Option<&str>) -> Result<Pipeline> {
    let mut pipeline = build_pipeline(config)?;
    match project {
        Some(project_id) => pipeline.open_project(project_id).await?,
        None if pipeline.project_id().is_some() => pipeline.refresh().await?,
        None => bail!("no project selected; pass --project"),
    }
    Ok(pipeline)
}

async fn run_status(args: ProjectArgs) -> Result<i32> {
    let config = resolve_config(&args.connection)?;
    let pipeline = open_pipeline(&config, args.project.as_deref()).await?;
    let workflow = pipeline.workflow();
    let steps: Vec<_> = Step::ALL
        .iter()
        .map(|step| {
            json!({
                "step": step.label(),
                "status": workflow.status(*step),
                "unlocked": workflow.is_unlocked(*step),
            })
        })
        .collect();
    let status = json!({
        "project": pipeline.project_id(),
        "backend": pipeline.backend_name(),
        "currentStep": workflow.current_step().label(),
        "steps": steps,
        "segments": pipeline.view().segments.len(),
        "images": pipeline.view().image_count(),
        "videos": pipeline.view().video_count(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(0)
}

async fn run_graph(args: ProjectArgs) -> Result<i32> {
    let config = resolve_config(&args.connection)?;
    let pipeline = open_pipeline(&config, args.project.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&pipeline.graph())?);
    Ok(0)
}

async fn run_estimate(args: EstimateArgs) -> Result<i32> {
    let config = resolve_config(&args.connection)?;
    let pipeline = open_pipeline(&config, args.project.as_deref()).await?;
    let estimate = pipeline.estimate_batch(args.kind.into(), args.model.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&estimate)?);
    Ok(0)
}

async fn run_export(args: ExportArgs) -> Result<i32> {
    let mut config = resolve_config(&args.connection)?;
    if let Some(out) = &args.out {
        config.host = Host::Desktop;
        config.export_dir = out.clone();
    }
    let mut pipeline = open_pipeline(&config, args.project.as_deref()).await?;
    print_export(pipeline.export_timeline()?)?;
    Ok(0)
}

fn run_cost(args: CostArgs) -> Result<i32> {
    let costs = CostTable::load();
    let credits = costs.cost_of(&args.category, &args.model, args.edit);
    println!("{} {}: {credits} credits", args.category, args.model);
    Ok(0)
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let registry = ModelRegistry::new(None);
    let models = match args.capability.as_deref() {
        Some(capability) => {
            if ![CAP_TEXT, CAP_IMAGE, CAP_VIDEO, CAP_EDIT].contains(&capability) {
                bail!("unknown capability '{capability}'");
            }
            registry.by_capability(capability)
        }
        None => registry.list().cloned().collect(),
    };
    for model in models {
        println!(
            "{:<20} {:<8} {}",
            model.name,
            model.provider,
            model.capabilities.join(",")
        );
    }
    Ok(0)
}

fn print_report(report: &BatchReport) {
    println!(
        "{} batch with {}: {} launched, {} succeeded, {} failed, {} skipped",
        report.kind,
        report.model,
        report.launched,
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for (key, error) in &report.failed {
        println!("  {key}: {error}");
    }
}

fn print_export(outcome: ExportOutcome) -> Result<()> {
    match outcome {
        ExportOutcome::Written(path) => println!("Timeline written to {}", path.display()),
        ExportOutcome::Download { file_name, bytes } => {
            std::fs::write(&file_name, &bytes)
                .with_context(|| format!("failed to write {file_name}"))?;
            println!("Timeline saved as {file_name} ({} bytes)", bytes.len());
        }
    }
    Ok(())
}

fn print_notices(pipeline: &Pipeline) {
    for notice in pipeline.notices().all() {
        let level = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{level}] {}", notice.message);
    }
}
