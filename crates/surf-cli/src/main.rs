mod replay;
mod runner;
mod server;
mod simulate;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use surf_core::time::unix_millis_to_iso8601;
use surf_core::{
    DetectorConfig, DetectorEvent, RegistrySnapshot, SensorEvent, SurfaceDetector, export_json,
    import_json,
};
use surf_store::{Journal, SessionId};
use tokio_util::sync::CancellationToken;

use crate::replay::ReplayLine;
use crate::runner::{Recorder, Runner};
use crate::server::Server;
use crate::simulate::{SimOptions, SimSource};

#[derive(Parser)]
#[command(name = "surf", about = "Surface detection and keyboard placement engine")]
struct Cli {
    /// Detector config (TOML). Defaults apply to anything left out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detector on stdin/stdout JSON lines until EOF or Ctrl-C
    Serve {
        /// Journal the session
        #[arg(long)]
        record: bool,

        /// Keep this file updated with the latest registry export
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Replay a recorded sensor stream ("-" reads stdin)
    Replay {
        input: PathBuf,

        /// Journal the session
        #[arg(long)]
        record: bool,

        /// Write the final registry export here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Run a scripted session against a synthetic office
    Simulate {
        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, value_enum, default_value_t = SimSource::HitTest)]
        source: SimSource,

        /// Script length in milliseconds
        #[arg(long, default_value_t = 5_000)]
        duration_ms: u64,

        /// Also write the generated sensor stream as a replay file
        #[arg(long)]
        script: Option<PathBuf>,

        /// Journal the session
        #[arg(long)]
        record: bool,
    },

    /// Print the effective detector config as TOML
    Config,

    /// Print a JSON schema
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },

    /// List journaled sessions
    Sessions,

    /// Print the events of a journaled session (default: the latest)
    Events {
        session: Option<String>,

        /// Only events of this type, e.g. placementCreated
        #[arg(long)]
        kind: Option<String>,
    },

    /// Export the registry a journaled session ended with
    Export {
        session: Option<String>,

        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Validate a registry export and summarize it
    Inspect { path: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemaKind {
    SensorEvent,
    DetectorEvent,
    ReplayLine,
    Snapshot,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve { record, snapshot } => cmd_serve(&cli, *record, snapshot.as_deref()),
        Commands::Replay {
            input,
            record,
            snapshot,
        } => cmd_replay(&cli, input, *record, snapshot.as_deref()),
        Commands::Simulate {
            seed,
            source,
            duration_ms,
            script,
            record,
        } => {
            let options = SimOptions {
                seed: *seed,
                source: *source,
                duration_ms: *duration_ms,
                ..SimOptions::default()
            };
            cmd_simulate(&cli, &options, script.as_deref(), *record)
        }
        Commands::Config => cmd_config(&cli),
        Commands::Schema { kind } => cmd_schema(*kind),
        Commands::Sessions => cmd_sessions(),
        Commands::Events { session, kind } => cmd_events(session.as_deref(), kind.as_deref()),
        Commands::Export { session, output } => cmd_export(session.as_deref(), output.as_deref()),
        Commands::Inspect { path } => cmd_inspect(&cli, path),
    }
}

fn load_config(cli: &Cli) -> Result<DetectorConfig> {
    match &cli.config {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(DetectorConfig::default()),
    }
}

fn open_journal() -> Result<Journal> {
    Journal::open_default().context("failed to open journal")
}

fn build_runner(config: DetectorConfig, record: bool) -> Result<Runner> {
    let detector = SurfaceDetector::new(config.clone()).context("invalid detector config")?;
    let runner = Runner::new(detector);
    if !record {
        return Ok(runner);
    }
    Ok(runner.with_recorder(Recorder::new(open_journal()?, config)))
}

fn resolve_session(journal: &Journal, session: Option<&str>) -> Result<SessionId> {
    match session {
        Some(id) => id.parse().context("invalid session id"),
        None => journal
            .latest_session()
            .context("failed to query sessions")?
            .context("no sessions recorded"),
    }
}

fn write_export(path: &Path, snapshot: &RegistrySnapshot) -> Result<()> {
    let json = export_json(snapshot).context("failed to serialize registry")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn report(snapshot: &RegistrySnapshot, session: Option<SessionId>) {
    eprintln!(
        "{} surfaces, {} placements",
        snapshot.surfaces.len(),
        snapshot.placements.len()
    );
    if let Some(session) = session {
        eprintln!("recorded session {session}");
    }
}

fn cmd_serve(cli: &Cli, record: bool, snapshot_path: Option<&Path>) -> Result<()> {
    let runner = build_runner(load_config(cli)?, record)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let result = runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let signals = tokio::spawn(server::cancel_on_signal(shutdown.clone()));
        let (server, snapshots) = Server::new(runner);

        let mirror = snapshot_path.map(|path| {
            let path = path.to_path_buf();
            tokio::spawn(mirror_snapshots(snapshots, path))
        });

        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let result = server.run(input, tokio::io::stdout(), shutdown).await;
        signals.abort();
        if let Some(mirror) = mirror {
            // The sender is gone, so the mirror writes the final state and stops.
            if let Err(e) = mirror.await {
                tracing::warn!("snapshot mirror failed: {e}");
            }
        }
        result
    });
    // Stdin reads park a blocking thread that only returns on the next line.
    runtime.shutdown_timeout(Duration::from_millis(250));

    let (snapshot, session) = result?;
    report(&snapshot, session);
    Ok(())
}

async fn mirror_snapshots(
    mut snapshots: tokio::sync::watch::Receiver<RegistrySnapshot>,
    path: PathBuf,
) {
    loop {
        let json = {
            let snapshot = snapshots.borrow_and_update();
            export_json(&snapshot)
        };
        match json {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    tracing::warn!("failed to write {}: {e}", path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize registry: {e}"),
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn cmd_replay(cli: &Cli, input: &Path, record: bool, snapshot_path: Option<&Path>) -> Result<()> {
    let mut runner = build_runner(load_config(cli)?, record)?;
    let stdout = std::io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let summary = replay::replay(&mut runner, open_input(input)?, &mut output)?;
    let (snapshot, session) = runner.finish(summary.last_at.unwrap_or(0))?;
    if let Some(path) = snapshot_path {
        write_export(path, &snapshot)?;
    }

    eprintln!(
        "replayed {} lines ({} skipped), {} events",
        summary.lines, summary.skipped, summary.emitted
    );
    report(&snapshot, session);
    Ok(())
}

fn cmd_simulate(
    cli: &Cli,
    options: &SimOptions,
    script_path: Option<&Path>,
    record: bool,
) -> Result<()> {
    let mut runner = build_runner(load_config(cli)?, record)?;
    let stdout = std::io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    let (script, summary) = simulate::run(&mut runner, options, &mut output)?;
    if let Some(path) = script_path {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        replay::write_script(&mut BufWriter::new(file), &script)?;
    }
    let (snapshot, session) = runner.finish(summary.last_at.unwrap_or(0))?;

    eprintln!("simulated {} lines, {} events", summary.lines, summary.emitted);
    report(&snapshot, session);
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate().context("invalid detector config")?;
    print!("{}", config.to_toml().context("failed to serialize config")?);
    Ok(())
}

fn cmd_schema(kind: SchemaKind) -> Result<()> {
    let schema = match kind {
        SchemaKind::SensorEvent => schemars::schema_for!(SensorEvent),
        SchemaKind::DetectorEvent => schemars::schema_for!(DetectorEvent),
        SchemaKind::ReplayLine => schemars::schema_for!(ReplayLine),
        SchemaKind::Snapshot => schemars::schema_for!(RegistrySnapshot),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?
    );
    Ok(())
}

fn cmd_sessions() -> Result<()> {
    let journal = open_journal()?;
    let sessions = journal.list_sessions().context("failed to list sessions")?;
    println!("{} sessions", sessions.len());
    for s in &sessions {
        let ended = s
            .ended_at
            .map_or_else(|| "open".to_string(), unix_millis_to_iso8601);
        println!(
            "{}  started {}  ended {}  events {}",
            s.id,
            unix_millis_to_iso8601(s.started_at),
            ended,
            s.event_count
        );
    }
    Ok(())
}

fn cmd_events(session: Option<&str>, kind: Option<&str>) -> Result<()> {
    let journal = open_journal()?;
    let session = resolve_session(&journal, session)?;
    let events = journal
        .session_events(session, kind)
        .context("failed to read events")?;

    let stdout = std::io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    for event in &events {
        serde_json::to_writer(&mut output, event).context("failed to encode event")?;
        writeln!(output).context("failed to write event")?;
    }
    output.flush().context("failed to flush output")?;
    Ok(())
}

fn cmd_export(session: Option<&str>, output: Option<&Path>) -> Result<()> {
    let journal = open_journal()?;
    let session = resolve_session(&journal, session)?;
    let Some(snapshot) = journal
        .session_snapshot(session)
        .context("failed to read session snapshot")?
    else {
        bail!("session {session} has not ended");
    };

    match output {
        Some(path) => {
            write_export(path, &snapshot)?;
            println!("exported session {session} to {}", path.display());
        }
        None => println!(
            "{}",
            export_json(&snapshot).context("failed to serialize registry")?
        ),
    }
    Ok(())
}

fn cmd_inspect(cli: &Cli, path: &Path) -> Result<()> {
    let config = load_config(cli)?;
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let registry = import_json(&json, config.placement.max_placements)
        .with_context(|| format!("invalid export {}", path.display()))?;

    println!("surfaces:   {}", registry.surface_count());
    println!("placements: {}", registry.placement_count());
    match registry.active_placement() {
        Some(active) => println!("active:     {}", active.id),
        None => println!("active:     none"),
    }
    for surface in registry.surfaces_by_creation() {
        println!(
            "  {} {:<7} area {:.3} m²  confidence {:.2}{}",
            surface.id,
            surface.source.as_str(),
            surface.area,
            surface.confidence,
            if surface.has_placement() { "  [keyboard]" } else { "" }
        );
    }
    Ok(())
}
