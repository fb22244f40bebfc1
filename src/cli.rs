//! CLI surface for the gallery shell.
//!
//! The real UI shell is a separate process concern; this binary runs the
//! backend core headless: route the invocation, and when it owns the window
//! role, render load results as text until stdin closes or a signal lands.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config;
use crate::index::{BannerSeverity, FsReader, LoadState};
use crate::instance::{IndexRefresh, InstanceRouter, RouteDecision, WindowControl};
use crate::Result;
use crate::view::{GalleryProjection, PollUpdate, Poller};
use crate::workspace::{CanonPath, WorkspaceKey};

#[derive(Parser, Debug)]
#[command(
    name = "nextgallery",
    version,
    about = "Per-workspace gallery viewer core",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Workspace directory to open.
    #[arg(long, value_name = "PATH")]
    pub workspace: PathBuf,

    /// View to navigate to after activation.
    #[arg(long, value_name = "VIEW")]
    pub view: Option<String>,

    /// Errors only.
    #[arg(short = 'q', long, default_value_t = false)]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Headless stand-in for the shell window: always valid and foreground.
#[derive(Default)]
struct ShellWindow;

impl WindowControl for ShellWindow {
    fn is_valid(&self) -> bool {
        true
    }

    fn is_minimized(&self) -> bool {
        false
    }

    fn is_foreground(&self) -> bool {
        true
    }

    fn bring_to_front(&self) {
        tracing::info!("window: bring to front");
    }

    fn restore_from_minimized(&self) {
        tracing::info!("window: restore from minimized");
    }

    fn flash_taskbar(&self) {
        tracing::info!("window: flash taskbar");
    }

    fn navigate_to(&self, view: &str) {
        tracing::info!(view, "window: navigate");
    }
}

/// Refresh capability handed to the activation service before the poller
/// exists; forwards once the window role is confirmed.
#[derive(Default)]
struct LateRefresh {
    poller: Mutex<Option<Arc<Poller>>>,
}

impl LateRefresh {
    fn attach(&self, poller: Arc<Poller>) {
        *self.poller.lock().unwrap() = Some(poller);
    }
}

impl IndexRefresh for LateRefresh {
    fn refresh(&self) {
        if let Some(poller) = self.poller.lock().unwrap().as_ref() {
            poller.refresh();
        }
    }
}

/// Run one invocation. Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let workspace_input = cli.workspace.to_string_lossy();
    let canon = CanonPath::normalize(&workspace_input)?;
    let key = WorkspaceKey::from_canon(&canon);
    tracing::info!(%key, workspace = %canon, "resolved workspace");

    let config = config::load();
    let window = Arc::new(ShellWindow::default());
    let refresh = Arc::new(LateRefresh::default());
    let router = InstanceRouter::new(key, canon, config.transport);

    let decision = router.route(cli.view.as_deref(), window.clone(), refresh.clone())?;
    let primary = match decision {
        RouteDecision::ActivateExisting => {
            tracing::info!("forwarded activation to existing window");
            return Ok(0);
        }
        RouteDecision::CreateWindow(primary) => Some(primary),
        RouteDecision::CreateWindowDegraded => {
            tracing::warn!("running without single-instance guarantees");
            None
        }
    };

    let (poller, updates) = Poller::spawn(config.poll, cli.workspace.clone(), Arc::new(FsReader));
    let poller = Arc::new(poller);
    refresh.attach(poller.clone());
    if let Some(view) = cli.view.as_deref() {
        window.navigate_to(view);
    }

    shell_loop(&updates);
    drop(primary);
    Ok(0)
}

/// Render loop: apply updates until stdin closes or a signal arrives.
fn shell_loop(updates: &crossbeam::channel::Receiver<PollUpdate>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());

    let (eof_tx, eof_rx) = crossbeam::channel::bounded::<()>(1);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut sink = Vec::new();
        let _ = std::io::stdin().read_to_end(&mut sink);
        let _ = eof_tx.send(());
    });

    let mut projection = GalleryProjection::new();

    // Always render the initial load, even if stdin is already closed.
    if let Ok(update) = updates.recv_timeout(Duration::from_secs(5)) {
        projection.apply(&update.result);
        render(&projection);
    }

    loop {
        crossbeam::select! {
            recv(updates) -> msg => {
                let Ok(update) = msg else { break };
                projection.apply(&update.result);
                render(&projection);
            }
            recv(eof_rx) -> _ => {
                tracing::info!("stdin closed, shutting down");
                break;
            }
            default(Duration::from_millis(200)) => {
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!("shutdown signal received");
                    break;
                }
            }
        }
    }
}

fn render(projection: &GalleryProjection) {
    match projection.banner().severity {
        BannerSeverity::None => {}
        BannerSeverity::Info => println!("[info] {}", projection.banner().message),
        BannerSeverity::Warning => println!("[warning] {}", projection.banner().message),
    }
    match projection.state() {
        LoadState::Loading => println!("loading..."),
        LoadState::Empty => println!("no items yet"),
        LoadState::List { items } => {
            println!("{} item(s)", items.len());
            for row in items {
                println!(
                    "  {} {} seed={} {}",
                    row.job_id,
                    row.kind.as_str(),
                    row.seed,
                    row.prompt
                );
            }
        }
        LoadState::Fatal { message, .. } => println!("[fatal] {message}"),
    }
}
