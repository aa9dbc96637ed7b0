mod version;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{json, Value};
use thoughtlog_core::config::{resolve_config, ResolvedConfig};
use thoughtlog_core::event_log::EventLogStore;
use thoughtlog_core::events::{Actor, EventContext, EventKind, EventPayload, ThoughtEvent};
use thoughtlog_core::git::{self, GitCli};
use thoughtlog_core::project_files::WalkedProjectFiles;
use thoughtlog_core::projection::{project, project_failure_lens};
use thoughtlog_service::api::{self, ApiState};
use thoughtlog_service::logging::init_tracing;
use thoughtlog_service::{HttpEventSource, SyncEngine, Watcher, WatcherSettings};
use tracing::info;

#[derive(Parser)]
#[command(name = "thoughtlog", version, about = "Event log and thought graph for a development session")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the event log if it does not exist
    Init,
    /// List recorded events
    Log {
        /// Only events of this kind (e.g. FILE_CREATED)
        #[arg(long)]
        kind: Option<String>,
        /// Only events that reference this intent id
        #[arg(long)]
        intent: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Append an event
    Emit {
        /// Event kind, e.g. INTENT_DECLARED
        kind: String,
        /// Payload as a JSON object
        #[arg(long)]
        payload: String,
        #[arg(long, default_value = "human")]
        actor: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        /// Explicit event id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Print the graph projection as JSON
    Project {
        /// Only rejections, reverts, abandonments and frozen/cancelled tasks
        #[arg(long)]
        failure_lens: bool,
        #[arg(long)]
        pretty: bool,
    },
    /// Run one reconciliation pass with the remote API
    Sync {
        /// Publish local events instead of pulling remote ones
        #[arg(long)]
        push: bool,
    },
    /// Run the change detectors (and auto-sync) until interrupted
    Watch {
        #[arg(long)]
        no_sync: bool,
    },
    /// Serve an in-memory remote event API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 14141)]
        port: u16,
    },
    /// Show the resolved configuration and where each value came from
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Print version information
    Version {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Some(Command::Watch { .. }) | Some(Command::Serve { .. }) | Some(Command::Sync { .. }) => {
            "info"
        }
        _ => "warn",
    };
    init_tracing(default_filter, cli.json_logs);

    let root = cli.root.as_path();
    match cli.command {
        Some(Command::Init) => {
            let (store, _) = open_store(root)?;
            println!("Initialized event log at {}", store.path()?.display());
        }
        Some(Command::Log { kind, intent, json }) => run_log(root, kind, intent, json)?,
        Some(Command::Emit {
            kind,
            payload,
            actor,
            branch,
            commit,
            id,
        }) => run_emit(root, &kind, &payload, &actor, branch, commit, id)?,
        Some(Command::Project {
            failure_lens,
            pretty,
        }) => {
            let (store, _) = open_store(root)?;
            let events = store.read_all()?;
            let graph = if failure_lens {
                project_failure_lens(&events)
            } else {
                project(&events)
            };
            let text = if pretty {
                serde_json::to_string_pretty(&graph)?
            } else {
                serde_json::to_string(&graph)?
            };
            println!("{}", text);
        }
        Some(Command::Sync { push }) => runtime()?.block_on(run_sync(root, push))?,
        Some(Command::Watch { no_sync }) => runtime()?.block_on(run_watch(root, no_sync))?,
        Some(Command::Serve { host, port }) => runtime()?.block_on(run_serve(&host, port))?,
        Some(Command::Config { json }) => print_config(&resolve_config(root), json)?,
        Some(Command::Version { json }) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&version::as_json())?);
            } else {
                println!("thoughtlog {}", version::full());
            }
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn open_store(root: &Path) -> Result<(EventLogStore, ResolvedConfig)> {
    let config = resolve_config(root);
    let store = EventLogStore::open(root, &config.project_id.value)
        .with_context(|| format!("failed to open event log under {}", root.display()))?;
    Ok((store, config))
}

fn run_log(root: &Path, kind: Option<String>, intent: Option<String>, json: bool) -> Result<()> {
    let (store, _) = open_store(root)?;
    let (events, malformed) = store.read_all_with_errors()?;
    let wanted_kind = kind.map(|kind| kind.trim().to_ascii_uppercase());
    let events: Vec<ThoughtEvent> = events
        .into_iter()
        .filter(|event| {
            wanted_kind
                .as_deref()
                .map_or(true, |kind| event.kind_name().eq_ignore_ascii_case(kind))
        })
        .filter(|event| intent.as_deref().map_or(true, |id| event.links_intent(id)))
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "events": events,
                "malformed": malformed,
            }))?
        );
        return Ok(());
    }

    for event in &events {
        let branch = event.context.git_branch.as_deref().unwrap_or("-");
        println!(
            "{}  {:<22} {:<7} {:<12} {}",
            event.timestamp,
            event.kind_name(),
            event.actor.as_str(),
            branch,
            event.id
        );
    }
    if !malformed.is_empty() {
        eprintln!(
            "skipped {} malformed line(s), first at line {}",
            malformed.len(),
            malformed[0].line
        );
    }
    Ok(())
}

fn run_emit(
    root: &Path,
    kind: &str,
    payload: &str,
    actor: &str,
    branch: Option<String>,
    commit: Option<String>,
    id: Option<String>,
) -> Result<()> {
    let known = EventKind::parse(kind).ok_or_else(|| anyhow!("unknown event kind: {}", kind))?;
    let actor = Actor::parse(actor).ok_or_else(|| anyhow!("unknown actor: {}", actor))?;
    let raw: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    if !raw.is_object() {
        bail!("payload must be a JSON object");
    }
    let payload = EventPayload::decode(known.as_str(), raw)?;

    let (store, config) = open_store(root)?;
    let mut context = EventContext::for_project(config.project_id.value.clone());
    context.git_branch = branch.or_else(|| detect_branch(root));
    context.git_commit = commit;

    let mut event = ThoughtEvent::new(actor, context, payload);
    if let Some(id) = id {
        let id = id.trim().to_string();
        if id.is_empty() {
            bail!("event id must not be empty");
        }
        if store.contains_id(&id)? {
            bail!("event {} already exists", id);
        }
        event = event.with_id(id);
    }
    store.append(&event)?;
    println!("{}", serde_json::to_string(&event)?);
    Ok(())
}

fn detect_branch(root: &Path) -> Option<String> {
    let git = GitCli::new(root).ok()?;
    git::current_branch(&git).ok().flatten()
}

fn remote_source(config: &ResolvedConfig) -> Result<HttpEventSource> {
    HttpEventSource::new(config.api_base_url.value.clone(), config.request_timeout())
        .context("failed to build HTTP client")
}

async fn run_sync(root: &Path, push: bool) -> Result<()> {
    let (store, config) = open_store(root)?;
    let source = remote_source(&config)?;
    let engine = SyncEngine::new(store, Arc::new(source), config.remote_id_policy.value);
    let report = if push {
        engine.sync_log_to_remote().await
    } else {
        engine.sync_remote_to_log().await
    }
    .with_context(|| format!("sync with {} failed", config.api_base_url.value))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_watch(root: &Path, no_sync: bool) -> Result<()> {
    let (store, config) = open_store(root)?;
    let vcs = GitCli::new(root).context("git is required to watch a project")?;
    let watcher = Watcher::start(
        store.clone(),
        Arc::new(WalkedProjectFiles::new(root)),
        Arc::new(vcs),
        WatcherSettings::from_config(&config),
    )
    .await
    .context("failed to start detectors")?;

    let engine = if no_sync {
        None
    } else {
        let engine = SyncEngine::new(
            store,
            Arc::new(remote_source(&config)?),
            config.remote_id_policy.value,
        );
        engine.start_auto_sync(config.sync_interval());
        Some(engine)
    };

    info!(project = %config.project_id.value, "watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    if let Some(engine) = engine {
        engine.stop_auto_sync().await;
    }
    watcher.stop().await;
    Ok(())
}

async fn run_serve(host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    api::serve(listener, ApiState::new(), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("API server failed")?;
    Ok(())
}

fn print_config(config: &ResolvedConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    let value = serde_json::to_value(config)?;
    if let Value::Object(entries) = value {
        for (key, setting) in entries {
            let shown = match &setting["value"] {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let source = setting["source"].as_str().unwrap_or("default");
            println!("{} = {} ({})", key, shown, source);
        }
    }
    Ok(())
}
