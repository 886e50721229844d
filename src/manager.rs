use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
pub const STARTUP_POLL_ATTEMPTS: usize = 20;
pub const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("failed to spawn the chat server: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("chat server did not open port {port} in time")]
    NotReady { port: u16 },
}

/// Start/inspect hooks for the supervised chat server.
pub trait ServerControl: Send + Sync + 'static {
    fn is_running(&self) -> bool;

    /// Starts the server unless its port already answers.
    fn ensure_running(&self) -> Result<(), ManagerError>;
}

pub type SharedServerControl = Arc<dyn ServerControl>;

/// Supervises a `serve` child of the current executable on a local port.
#[derive(Debug)]
pub struct ProcessServerControl {
    port: u16,
    app_root: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessServerControl {
    pub fn new(port: u16, app_root: impl Into<PathBuf>) -> Self {
        Self {
            port,
            app_root: app_root.into(),
            child: Mutex::new(None),
        }
    }

    fn spawn_server(&self) -> Result<Child, ManagerError> {
        let exe = std::env::current_exe().map_err(ManagerError::CurrentExe)?;
        Command::new(exe)
            .arg("serve")
            .current_dir(self.app_root.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ManagerError::Spawn)
    }
}

impl ServerControl for ProcessServerControl {
    fn is_running(&self) -> bool {
        is_port_open(self.port)
    }

    fn ensure_running(&self) -> Result<(), ManagerError> {
        if is_port_open(self.port) {
            return Ok(());
        }

        let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if reap_exited(&mut slot).is_none() {
            if let Some(mut stale) = slot.take() {
                warn!(pid = stale.id(), "chat server child is alive but not listening");
                let _ = stale.kill();
                let _ = stale.wait();
            }
        }
        kill_port_listeners(self.port);
        *slot = Some(self.spawn_server()?);
        drop(slot);

        for _ in 0..STARTUP_POLL_ATTEMPTS {
            if is_port_open(self.port) {
                info!(port = self.port, "chat server is up");
                return Ok(());
            }
            std::thread::sleep(STARTUP_POLL_INTERVAL);
        }
        Err(ManagerError::NotReady { port: self.port })
    }
}

/// Collects the exit status of a finished child and clears the slot.
/// Returns `None` while the child is still running or when there is none.
pub fn reap_exited(slot: &mut Option<Child>) -> Option<ExitStatus> {
    let child = slot.as_mut()?;
    match child.try_wait() {
        Ok(Some(status)) => {
            warn!(pid = child.id(), %status, "chat server exited");
            *slot = None;
            Some(status)
        }
        Ok(None) => None,
        Err(error) => {
            warn!(error = %error, "cannot poll chat server child");
            None
        }
    }
}

pub fn is_port_open(port: u16) -> bool {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok()
}

/// Best effort; tool failures are ignored.
pub fn kill_port_listeners(port: u16) {
    if cfg!(windows) {
        let Some(output) = command_stdout(Command::new("netstat").arg("-ano")) else {
            return;
        };
        for pid in parse_netstat_pids(output.as_str(), port) {
            warn!(port, pid = %pid, "killing stale listener");
            let _ = Command::new("taskkill")
                .args(["/PID", pid.as_str(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        return;
    }

    let Some(output) = command_stdout(Command::new("lsof").args(["-ti", format!("tcp:{port}").as_str()]))
    else {
        return;
    };
    for pid in parse_lsof_pids(output.as_str()) {
        warn!(port, pid = %pid, "killing stale listener");
        let _ = Command::new("kill")
            .arg(pid.as_str())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

fn command_stdout(command: &mut Command) -> Option<String> {
    let output = command.stderr(Stdio::null()).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
}

pub fn parse_lsof_pids(output: &str) -> Vec<String> {
    output
        .split_whitespace()
        .filter(|pid| pid.chars().all(|ch| ch.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// PIDs of `LISTENING` rows bound to `:port`, deduplicated.
pub fn parse_netstat_pids(output: &str, port: u16) -> Vec<String> {
    let needle = format!(":{port} ");
    output
        .lines()
        .filter(|line| line.contains(needle.as_str()) && line.to_uppercase().contains("LISTEN"))
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_manager_router(control: SharedServerControl) -> Router {
    Router::new()
        .route("/status", get(status_handler).fallback(not_found_handler))
        .route("/restart", post(restart_handler).fallback(not_found_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn(cors_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

/// Brings the chat server up once, then serves the control routes.
pub async fn serve_manager(port: u16, control: SharedServerControl) -> std::io::Result<()> {
    let startup = control.clone();
    match tokio::task::spawn_blocking(move || startup.ensure_running()).await {
        Ok(Ok(())) => info!("chat server is running"),
        Ok(Err(error)) => warn!(error = %error, "initial chat server start failed"),
        Err(join_error) => warn!(error = %join_error, "initial start task failed"),
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(bind = %addr, "starting skillchat manager");
    axum::serve(listener, build_manager_router(control)).await
}

async fn status_handler(State(control): State<SharedServerControl>) -> &'static str {
    let running = tokio::task::spawn_blocking(move || control.is_running())
        .await
        .unwrap_or(false);
    if running {
        "OK"
    } else {
        "DOWN"
    }
}

async fn restart_handler(State(control): State<SharedServerControl>) -> &'static str {
    tokio::task::spawn_blocking(move || {
        if let Err(error) = control.ensure_running() {
            warn!(error = %error, "chat server restart failed");
        }
    });
    "OK"
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("text/plain"));
    response
}
