//! threat-sync command-line client

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tm_model::{HolderId, ModelId, ThreatModel};
use tm_report::{
    export, file_name, summarize, DashboardLayout, ExportFormat, FileStore, LayoutStore,
    RenderSupervisor,
};
use tm_sync::{
    model_from_stored, AccessLevel, DocumentRef, DocumentStore, HttpBackend, LockCoordinator,
    LockState, PollOutcome, Sharing, StatusPoller, SyncConfig, SyncError,
};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let model = || {
        Arg::new("model")
            .required(true)
            .value_parser(value_parser!(String))
            .help("Threat model id")
    };

    Command::new("threat-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collaborative threat model client")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Backend base URL (overrides the config file)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("watch")
                .about("Follow a model's processing status until it finishes")
                .arg(model()),
        )
        .subcommand(
            Command::new("lock")
                .about("Hold a model's edit lock until interrupted")
                .arg(model())
                .arg(
                    Arg::new("holder")
                        .long("holder")
                        .help("Session id presented to the lock service"),
                ),
        )
        .subcommand(
            Command::new("dashboard")
                .about("Print the threat dashboard")
                .arg(model())
                .arg(
                    Arg::new("layout")
                        .long("layout")
                        .value_parser(value_parser!(PathBuf))
                        .help("File holding the persisted chart layout"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the aggregates as JSON"),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export a model document")
                .arg(model())
                .arg(
                    Arg::new("format")
                        .long("format")
                        .default_value("markdown")
                        .value_parser(["json", "markdown", "md"])
                        .help("Output format"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to write into (stdout if omitted)"),
                ),
        )
        .subcommand(
            Command::new("share")
                .about("Manage collaborators")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List collaborators").arg(model()))
                .subcommand(
                    Command::new("add")
                        .about("Share with a user")
                        .arg(model())
                        .arg(Arg::new("user").required(true))
                        .arg(access_arg()),
                )
                .subcommand(
                    Command::new("set")
                        .about("Change a user's access level")
                        .arg(model())
                        .arg(Arg::new("user").required(true))
                        .arg(access_arg()),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Revoke a user's access")
                        .arg(model())
                        .arg(Arg::new("user").required(true)),
                ),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Only log warnings and errors"),
        )
}

fn access_arg() -> Arg {
    Arg::new("access")
        .long("access")
        .default_value("read_only")
        .value_parser(["read_only", "edit"])
        .help("Access level")
}

fn init_tracing(matches: &ArgMatches) {
    let default_level = if matches.get_flag("quiet") { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<SyncConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("base-url") {
        config = config.with_base_url(url.clone());
    }
    config.validate()?;
    Ok(config)
}

fn model_arg(args: &ArgMatches) -> anyhow::Result<ModelId> {
    args.get_one::<String>("model")
        .map(|id| ModelId::new(id.as_str()))
        .context("model id is required")
}

fn string_arg<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("--{name} is required"))
}

fn access_level(args: &ArgMatches) -> anyhow::Result<AccessLevel> {
    string_arg(args, "access")?
        .parse::<AccessLevel>()
        .map_err(anyhow::Error::msg)
}

async fn load_model(backend: &HttpBackend, id: &ModelId) -> anyhow::Result<ThreatModel> {
    let stored = backend
        .fetch(&DocumentRef::Catalog(id.clone()))
        .await
        .with_context(|| format!("fetching model {id}"))?;
    Ok(model_from_stored(id.clone(), stored)?)
}

async fn watch(backend: Arc<HttpBackend>, config: &SyncConfig, model: ModelId) -> anyhow::Result<()> {
    let mut poller = StatusPoller::spawn(backend, model.clone(), config.poll_interval(), |t| {
        let from = t.from.map_or_else(|| "-".to_string(), |s| s.to_string());
        match &t.report.detail {
            Some(detail) => println!("{from} -> {} ({detail})", t.to),
            None => println!("{from} -> {}", t.to),
        }
        if t.new_run {
            println!("new generation run started");
        }
    });

    let outcome = tokio::select! {
        outcome = poller.join() => outcome,
        _ = tokio::signal::ctrl_c() => PollOutcome::Stopped,
    };
    poller.stop();

    match outcome {
        PollOutcome::Completed => Ok(()),
        PollOutcome::Failed { detail } => {
            bail!("model {model} failed: {}", detail.unwrap_or_else(|| "no detail".to_string()))
        }
        PollOutcome::Stopped => {
            tracing::info!(%model, "watch interrupted");
            Ok(())
        }
    }
}

async fn hold_lock(
    backend: Arc<HttpBackend>,
    config: &SyncConfig,
    model: ModelId,
    holder: HolderId,
) -> anyhow::Result<()> {
    let lock = LockCoordinator::new(backend, model.clone(), holder, config);
    let guard = match lock.acquire().await {
        Ok(guard) => guard,
        Err(SyncError::LockConflict { holder, acquired_at }) => {
            println!("{model} is locked by {holder} since {acquired_at}; read-only");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("holding lock on {model} as {}; Ctrl-C to release", lock.holder());

    let mut states = lock.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = states.borrow_and_update().clone();
                if snapshot.state == LockState::Lost {
                    let by = snapshot
                        .conflict
                        .map_or_else(|| "heartbeat failures".to_string(), |c| c.holder.to_string());
                    bail!("lock on {model} lost ({by})");
                }
            }
        }
    }

    guard.release().await?;
    println!("released lock on {model}");
    Ok(())
}

async fn dashboard(
    backend: Arc<HttpBackend>,
    model: ModelId,
    layout_path: Option<&PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let threat_model = load_model(&backend, &model).await?;
    let summary = summarize(&threat_model.threats);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let layout = match layout_path {
        Some(path) => {
            let store = LayoutStore::new(FileStore::new(path));
            let layout = store.load();
            if let Err(e) = store.save(&layout) {
                tracing::warn!(error = %e, "could not persist dashboard layout");
            }
            layout
        }
        None => DashboardLayout::default(),
    };

    let mut supervisor = RenderSupervisor::new();
    let title = if threat_model.title.is_empty() {
        model.as_str()
    } else {
        threat_model.title.as_str()
    };
    println!("{title}: {} threats", summary.total);
    for view in supervisor.render_layout(&layout, &summary) {
        println!();
        println!("{}", view.to_text());
    }
    let failed = supervisor.failed_charts();
    if !failed.is_empty() {
        tracing::warn!(?failed, "some charts could not be rendered");
    }
    Ok(())
}

async fn export_model(
    backend: Arc<HttpBackend>,
    model: ModelId,
    format: ExportFormat,
    out: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let threat_model = load_model(&backend, &model).await?;
    let document = export(&threat_model, format)?;
    match out {
        Some(dir) => {
            let path = dir.join(file_name(&threat_model, format));
            std::fs::write(&path, document)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => println!("{document}"),
    }
    Ok(())
}

async fn share(backend: Arc<HttpBackend>, args: &ArgMatches) -> anyhow::Result<()> {
    let Some((action, args)) = args.subcommand() else {
        bail!("missing share action");
    };
    let sharing = Sharing::new(backend, model_arg(args)?);
    match action {
        "list" => {
            for c in sharing.list().await? {
                let role = if c.is_owner { " (owner)" } else { "" };
                println!("{}\t{}{role}", c.user_id, c.access_level);
            }
        }
        "add" => {
            let user = string_arg(args, "user")?;
            sharing.add(user, access_level(args)?).await?;
            println!("shared with {user}");
        }
        "set" => {
            let user = string_arg(args, "user")?;
            let level = access_level(args)?;
            sharing.update_access(user, level).await?;
            println!("{user} now has {level} access");
        }
        "remove" => {
            let user = string_arg(args, "user")?;
            sharing.remove(user).await?;
            println!("removed {user}");
        }
        other => bail!("unknown share action {other}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(&matches);
    let config = load_config(&matches)?;
    let backend = Arc::new(HttpBackend::new(&config)?);
    tracing::debug!(base_url = backend.base_url(), "backend configured");

    match matches.subcommand() {
        Some(("watch", args)) => watch(backend, &config, model_arg(args)?).await,
        Some(("lock", args)) => {
            let holder = args
                .get_one::<String>("holder")
                .map_or_else(HolderId::generate, |h| HolderId::new(h.as_str()));
            hold_lock(backend, &config, model_arg(args)?, holder).await
        }
        Some(("dashboard", args)) => {
            dashboard(
                backend,
                model_arg(args)?,
                args.get_one::<PathBuf>("layout"),
                args.get_flag("json"),
            )
            .await
        }
        Some(("export", args)) => {
            let format: ExportFormat = string_arg(args, "format")?.parse()?;
            export_model(backend, model_arg(args)?, format, args.get_one::<PathBuf>("out")).await
        }
        Some(("share", args)) => share(backend, args).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
