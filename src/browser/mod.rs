//! Per-run browser session over CDP.
//!
//! One run owns exactly one session. The session launches lazily on the
//! first navigation, keeps exactly one active page, and is closed exactly
//! once on every exit path.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{BrowserError, ConfigError};

const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

/// Accepted engine variants. Only the chromium family can be driven over
/// CDP; `Gecko` and `Webkit` parse but are rejected before launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrowserEngine {
    Primary,
    Gecko,
    Webkit,
    EdgeChannel,
}

impl BrowserEngine {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" | "chromium" => Ok(BrowserEngine::Primary),
            "gecko" => Ok(BrowserEngine::Gecko),
            "webkit" => Ok(BrowserEngine::Webkit),
            "chromium-edge-channel" | "edge" => Ok(BrowserEngine::EdgeChannel),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserEngine::Primary => "primary",
            BrowserEngine::Gecko => "gecko",
            BrowserEngine::Webkit => "webkit",
            BrowserEngine::EdgeChannel => "chromium-edge-channel",
        }
    }

    /// Fails for variants the CDP driver cannot launch. Checked by the run
    /// coordinator before any model or browser work starts.
    pub fn ensure_supported(&self) -> Result<(), ConfigError> {
        match self {
            BrowserEngine::Primary | BrowserEngine::EdgeChannel => Ok(()),
            BrowserEngine::Gecko | BrowserEngine::Webkit => {
                Err(ConfigError::UnsupportedEngine(self.name().to_string()))
            }
        }
    }
}

/// Browser configuration carried by a test instruction.
#[derive(Clone, Debug)]
pub struct BrowserOptions {
    pub engine: BrowserEngine,
    pub headless: bool,
    pub max_iterations: u32,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::Primary,
            headless: true,
            max_iterations: 10,
        }
    }
}

struct LiveSession {
    #[allow(dead_code)] // Browser must stay alive for the page to work
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
}

enum SessionState {
    Uninitialized,
    Ready(LiveSession),
    Closed,
}

/// One-shot browser lifecycle: uninitialized → ready → closed.
pub struct BrowserSession {
    state: Mutex<SessionState>,
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    /// Launches the browser and opens an empty page. A second call is a
    /// no-op; a call after `close` fails.
    pub async fn initialize(
        &self,
        engine: BrowserEngine,
        headless: bool,
    ) -> Result<(), BrowserError> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Ready(_) => return Ok(()),
            SessionState::Closed => {
                return Err(BrowserError::Operation(
                    "session is already closed".to_string(),
                ));
            }
            SessionState::Uninitialized => {}
        }

        let config = launch_config(engine, headless)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::warn!(error = %err, "CDP handler error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        tracing::info!(engine = engine.name(), headless, "browser session ready");
        *state = SessionState::Ready(LiveSession {
            browser,
            handler_task,
            page,
        });
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().await, SessionState::Ready(_))
    }

    /// The active page handle. Fails before initialization and after close.
    pub async fn page(&self) -> Result<Page, BrowserError> {
        match &*self.state.lock().await {
            SessionState::Ready(live) => Ok(live.page.clone()),
            _ => Err(BrowserError::SessionNotReady),
        }
    }

    /// Current page URL as reported by the driver.
    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page().await?;
        let url = page
            .url()
            .await
            .map_err(BrowserError::from)?
            .unwrap_or_default();
        Ok(url)
    }

    /// Current page title, empty when the page has none.
    pub async fn title(&self) -> Result<String, BrowserError> {
        let page = self.page().await?;
        let title = page
            .get_title()
            .await
            .map_err(BrowserError::from)?
            .unwrap_or_default();
        Ok(title)
    }

    /// Tears everything down. Idempotent; safe to call from the close tool
    /// and again from the coordinator.
    pub async fn close(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock().await;
        if let SessionState::Ready(mut live) = std::mem::replace(&mut *state, SessionState::Closed)
        {
            if let Err(err) = live.browser.close().await {
                tracing::warn!(error = %err, "browser close reported an error");
            }
            let _ = live.browser.wait().await;
            live.handler_task.abort();
            tracing::info!("browser session closed");
        }
        Ok(())
    }
}

fn launch_config(engine: BrowserEngine, headless: bool) -> Result<BrowserConfig, BrowserError> {
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .arg("--disable-gpu")
        .arg("--disable-software-rasterizer")
        .viewport(chromiumoxide::handler::viewport::Viewport {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        });

    builder = if headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    builder = match engine {
        BrowserEngine::Primary => builder,
        BrowserEngine::EdgeChannel => {
            let executable = edge_executable().ok_or_else(|| {
                BrowserError::Launch("no Edge executable found for the edge channel".to_string())
            })?;
            builder.chrome_executable(executable)
        }
        BrowserEngine::Gecko | BrowserEngine::Webkit => {
            return Err(BrowserError::Launch(format!(
                "engine {} cannot be driven over CDP",
                engine.name()
            )));
        }
    };

    builder.build().map_err(BrowserError::Launch)
}

/// Edge-channel discovery: explicit override first, then well-known paths.
fn edge_executable() -> Option<std::path::PathBuf> {
    if let Ok(path) = std::env::var("QA_AGENT_EDGE_BINARY") {
        let path = std::path::PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/usr/bin/microsoft-edge",
        "/usr/bin/microsoft-edge-stable",
        "/opt/microsoft/msedge/msedge",
        "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    ]
    .iter()
    .map(std::path::PathBuf::from)
    .find(|path| path.exists())
}
