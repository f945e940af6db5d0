//! Browser process management.
//!
//! Launches one Chromium-family browser with a remote debugging port and
//! connects a CDP client to its first page target.

use super::cdp::CdpClient;
use autologin_core::Error;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Whether the browser window is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// No window; the browser is closed when the run ends.
    Headless,
    /// Maximized window; the browser is left running for the user.
    Visible,
}

impl DisplayMode {
    /// Interpret the first command-line argument. Only `--show`,
    /// `--visible`, `-v` and `-s` (any case) select a visible browser.
    pub fn from_cli_arg(arg: Option<&str>) -> Self {
        match arg.map(|a| a.to_lowercase()) {
            Some(a) if matches!(a.as_str(), "--show" | "--visible" | "-v" | "-s") => Self::Visible,
            _ => Self::Headless,
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self, Self::Headless)
    }
}

/// Supported browser engines. All of them speak CDP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub mode: DisplayMode,
    /// Explicit binary; searched for when `None`.
    pub binary: Option<String>,
    pub user_data_dir: PathBuf,
    /// `width,height` used in headless mode.
    pub window_size: String,
    pub launch_timeout: Duration,
}

/// A running browser with its CDP connection.
pub struct BrowserSession {
    pub mode: DisplayMode,
    pub debug_port: u16,
    process: Child,
    pub cdp: CdpClient,
    pub user_data_dir: PathBuf,
}

impl BrowserSession {
    /// Launch a browser and connect to its page target.
    pub async fn launch(opts: &LaunchOptions) -> autologin_core::Result<Self> {
        Self::spawn(opts).await.map_err(Error::Browser)
    }

    async fn spawn(opts: &LaunchOptions) -> Result<Self, String> {
        let browser_path = match &opts.binary {
            Some(path) => path.clone(),
            None => find_any_browser()
                .ok_or_else(|| "No Chrome, Chromium or Edge installation found".to_string())?,
        };

        std::fs::create_dir_all(&opts.user_data_dir)
            .map_err(|e| format!("Failed to create user data dir: {}", e))?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(
            opts.mode,
            debug_port,
            &opts.user_data_dir,
            &opts.window_size,
        );

        info!(
            port = debug_port,
            mode = ?opts.mode,
            browser = %browser_path,
            "Launching browser"
        );

        let mut cmd = Command::new(&browser_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(opts.mode.is_headless());
        // A visible browser must survive this process and its Ctrl-C.
        #[cfg(unix)]
        if !opts.mode.is_headless() {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to launch {}: {}", browser_path, e))?;

        wait_for_cdp_ready(&mut child, debug_port, opts.launch_timeout).await?;

        // Page target, not browser-level, so Page/Runtime/DOM work
        let page_ws_url = get_page_ws_url(debug_port).await?;
        let cdp = CdpClient::connect(&page_ws_url).await?;

        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("DOM").await?;
        cdp.enable_domain("Network").await?;

        info!(ws_url = %page_ws_url, "CDP connection established (page target)");

        Ok(Self {
            mode: opts.mode,
            debug_port,
            process: child,
            cdp,
            user_data_dir: opts.user_data_dir.clone(),
        })
    }

    /// Close the browser and wait for the process to go away.
    pub async fn close(mut self) {
        if let Err(e) = self.cdp.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.process.kill().await;
    }

    /// Hand the browser over to the user. The process keeps running after
    /// the CDP connection is dropped.
    pub fn detach(self) -> Option<u32> {
        let pid = self.process.id();
        debug!(pid = ?pid, "Detaching from browser");
        pid
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.mode.is_headless() {
            let _ = self.process.start_kill();
        }
    }
}

fn build_browser_args(
    mode: DisplayMode,
    debug_port: u16,
    user_data_dir: &Path,
    window_size: &str,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
    ];
    match mode {
        DisplayMode::Headless => {
            args.push("--headless=new".to_string());
            args.push("--no-sandbox".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--disable-gpu".to_string());
            args.push(format!("--window-size={}", window_size));
            args.push("--disable-blink-features=AutomationControlled".to_string());
        }
        DisplayMode::Visible => {
            args.push("--start-maximized".to_string());
        }
    }
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome",
                    "google-chrome-stable",
                    "chromium",
                    "chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec![
                    "microsoft-edge",
                    "microsoft-edge-stable",
                    "/usr/bin/microsoft-edge",
                ]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/')
            && !candidate.contains('\\')
            && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Chrome first, then Edge.
pub fn find_any_browser() -> Option<String> {
    [BrowserEngine::Chrome, BrowserEngine::Edge]
        .into_iter()
        .find_map(find_browser_binary)
}

async fn find_free_port() -> Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the debugging endpoint answers.
async fn wait_for_cdp_ready(
    child: &mut Child,
    port: u16,
    timeout: Duration,
) -> Result<String, String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(format!("Browser exited during startup ({})", status));
        }
        if start.elapsed() > timeout {
            return Err(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the WebSocket URL of the first page target via `/json/list`.
/// Retries a few times since the page target may not appear immediately.
async fn get_page_ws_url(port: u16) -> Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err("No page target found after retries".to_string())
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}
