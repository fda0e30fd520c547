//! Control binary for the quill-analyzer update manager.
//!
//! `status` and `check` are one-shot diagnostics against the local install
//! and the release index; `run` drives the scheduler in the foreground and
//! answers consent prompts on the terminal.

use quill_updater::component::ensure_stdlib_component;
use quill_updater::paths::InstallLayout;
use quill_updater::source::{self, HttpReleaseIndex, ReleaseIndex};
use quill_updater::store::VersionStore;
use quill_updater::{Result, UpdateError, UpdatePrompt, UpdateScheduler, UpdaterConfig};
use std::io::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr so subcommand output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("quill_updater=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("quill-updater-ctl failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "status" => status(),
        "check" => check(),
        "run" => run_foreground().await,
        "ensure-component" => ensure_component(),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(UpdateError::Config(format!(
            "unknown subcommand `{other}` (use status|check|run|ensure-component)"
        ))),
    }
}

fn load_config() -> Result<UpdaterConfig> {
    let path = UpdaterConfig::default_config_path();
    if path.is_file() {
        UpdaterConfig::from_file(&path)
    } else {
        Ok(UpdaterConfig::default())
    }
}

/// Open the version store, downgrading a corrupt state file to a warning so
/// diagnostics still print.
fn open_store(layout: &InstallLayout) -> VersionStore {
    match VersionStore::load(&layout.state_file) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("warning: {e}; treating the installed version as unknown");
            VersionStore::recover(&layout.state_file)
        }
    }
}

fn status() -> Result<()> {
    let config = load_config()?;
    let layout = InstallLayout::resolve();
    let store = open_store(&layout);

    println!("channel:       {}", config.channel);
    match store.current() {
        Some(record) => println!(
            "installed:     {} ({})",
            record.version,
            record.installed_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("installed:     none"),
    }
    match store.last_checked_at() {
        Some(at) => println!("last checked:  {}", at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("last checked:  never"),
    }
    if let Some(version) = store.dismissed() {
        println!("dismissed:     {version}");
    }
    if let Some(path) = &config.server_path {
        println!(
            "server path:   {} (user-managed, updates disabled)",
            path.display()
        );
    }
    let missing = if layout.server_binary.is_file() {
        ""
    } else {
        " (missing)"
    };
    println!("binary:        {}{missing}", layout.server_binary.display());
    if layout.previous_binary.is_file() {
        println!("previous:      {}", layout.previous_binary.display());
    }
    Ok(())
}

fn check() -> Result<()> {
    let config = load_config()?;
    let layout = InstallLayout::resolve();
    let platform = source::platform_key().ok_or_else(|| {
        UpdateError::NoReleaseForPlatform(format!(
            "{}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    })?;

    let index = HttpReleaseIndex::new(&config.index);
    let descriptor = index.latest(config.channel, platform)?;
    let store = open_store(&layout);

    match store.current() {
        Some(record) if !descriptor.supersedes(Some(record)) => {
            println!("up to date: {} ({})", record.version, record.channel);
        }
        current => {
            let installed = current.map_or_else(
                || "nothing installed".to_owned(),
                |record| format!("installed {}", record.version),
            );
            println!(
                "update available: {} on {} ({installed})",
                descriptor.version, descriptor.channel
            );
        }
    }
    Ok(())
}

fn ensure_component() -> Result<()> {
    let config = load_config()?;
    // Explicit invocation overrides the config toggle.
    let mut component = config.component;
    component.ensure_stdlib = true;
    ensure_stdlib_component(&component)?;
    println!("stdlib source component present");
    Ok(())
}

async fn run_foreground() -> Result<()> {
    let config = load_config()?;
    let channel = config.channel;
    let layout = InstallLayout::resolve();
    let index = Arc::new(HttpReleaseIndex::new(&config.index));
    let cancel = CancellationToken::new();
    let (scheduler, _handle, mut prompts) =
        UpdateScheduler::new(config, layout, index, cancel.clone());

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    println!(
        "quill-updater v{} ({channel} channel)",
        env!("CARGO_PKG_VERSION")
    );
    println!("Press Ctrl+C to stop.");

    let task = tokio::spawn(scheduler.run());

    // The prompt channel closes when the scheduler finishes shutting down.
    while let Some(prompt) = prompts.recv().await {
        answer_prompt(prompt, &cancel).await;
    }

    task.await
        .map_err(|e| UpdateError::Scheduler(format!("scheduler task panicked: {e}")))?;
    Ok(())
}

async fn answer_prompt(prompt: UpdatePrompt, cancel: &CancellationToken) {
    let size = prompt
        .size
        .map(|bytes| format!(" ({:.1} MiB)", bytes as f64 / (1024.0 * 1024.0)))
        .unwrap_or_default();
    println!(
        "update available: {} on the {} channel{size}",
        prompt.version, prompt.channel
    );
    print!("download and install? [y/N] ");
    let _ = std::io::stdout().flush();

    // Read the answer on a plain thread: a blocked stdin read must not keep
    // the runtime from shutting down on Ctrl+C.
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(read_yes());
    });

    let confirmed = tokio::select! {
        () = cancel.cancelled() => {
            // Shutting down; dropping the prompt counts as declining.
            println!();
            return;
        }
        answer = rx => answer.unwrap_or(false),
    };

    let delivered = if confirmed {
        prompt.confirm()
    } else {
        prompt.decline()
    };
    if !delivered {
        println!("the updater stopped waiting for this prompt");
    }
}

fn read_yes() -> bool {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes" | "Yes")
}

fn print_usage() {
    println!("usage: quill-updater-ctl <status|check|run|ensure-component>");
}
