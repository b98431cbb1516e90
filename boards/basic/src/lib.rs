//! Generic board that shows pages produced by a pluggable [`Renderer`].
//!
//! Pages are either held one at a time for the board delay, or merged into a
//! scroll strip when the board is in scroll mode and the canvas can scroll.
//! The board owns cancellation of its own in-flight renders, which is what
//! live status changes use to get fresh settings on screen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use image::RgbaImage;
use sportsmatrix_core::{
    blit, Board, BoardConfig, BoardError, BoardSettings, Canvas, Enabler, HttpHandler,
    RenderOutcome, Result, RpcHandler, ScrollCanvas, ScrollDirection, ScrollParams, Status,
    StatusService,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Produces the pages a [`BasicBoard`] displays
pub trait Renderer: Send + Sync {
    /// Board name, also used as the RPC path prefix
    fn name(&self) -> &str;

    /// Render one page per item for a canvas of `width` x `height`.
    ///
    /// Settings are read here, on every render, never cached.
    fn prepare<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        width: u32,
        height: u32,
        settings: &'a BoardSettings,
    ) -> BoxFuture<'a, Result<Vec<RgbaImage>>>;

    /// Drop cached draw artifacts
    fn clear_draw_cache(&self) {}

    fn http_handlers(&self) -> Vec<HttpHandler> {
        Vec::new()
    }
}

struct Inner {
    renderer: Box<dyn Renderer>,
    settings: BoardSettings,
    active: Mutex<HashMap<u64, CancellationToken>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Derive a fresh child token for one render attempt
    fn begin_render(self: &Arc<Self>, parent: &CancellationToken) -> ActiveRender {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, token.clone());
        }
        ActiveRender {
            inner: self.clone(),
            id,
            token,
        }
    }

    /// Cancel this board's in-flight renders, leaving the parent untouched
    fn cancel_board(&self) {
        if let Ok(active) = self.active.lock() {
            for token in active.values() {
                token.cancel();
            }
        }
    }
}

/// Registration of an in-flight render, removed on drop
struct ActiveRender {
    inner: Arc<Inner>,
    id: u64,
    token: CancellationToken,
}

impl Drop for ActiveRender {
    fn drop(&mut self) {
        if let Ok(mut active) = self.inner.active.lock() {
            active.remove(&self.id);
        }
    }
}

/// Board implementation driven by a [`Renderer`]
pub struct BasicBoard {
    inner: Arc<Inner>,
}

impl BasicBoard {
    pub fn new(renderer: impl Renderer + 'static, config: &BoardConfig) -> Self {
        let board = Self {
            inner: Arc::new(Inner {
                renderer: Box::new(renderer),
                settings: BoardSettings::new(config),
                active: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        };
        info!(board = board.name(), "registering basic board");
        board
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.inner.settings
    }

    /// Cancel the current render of this board only
    pub fn cancel_board(&self) {
        self.inner.cancel_board();
    }

    /// Status service for this board
    pub fn status_service(&self) -> Arc<dyn StatusService> {
        Arc::new(StatusServer {
            inner: self.inner.clone(),
        })
    }

    /// Prepare a scroll strip with scroll mode forced on and the given padding.
    ///
    /// The board's own scroll settings are restored before this returns. The
    /// strip is not played.
    pub async fn scroll_strip(
        &self,
        cancel: &CancellationToken,
        width: u32,
        height: u32,
        padding: u32,
    ) -> Result<ScrollCanvas> {
        let settings = &self.inner.settings;
        let _restore = settings.override_scroll(padding);
        let params = ScrollParams {
            direction: settings.scroll_direction(),
            speed: settings.scroll_delay(),
            pad: settings.scroll_pad(),
            tight: settings.tight_scroll(),
            loops: settings.scroll_loops(),
        };

        let pages = self
            .inner
            .renderer
            .prepare(cancel, width, height, settings)
            .await?;

        let mut scroll = ScrollCanvas::new(width, height);
        scroll.set_params(params);
        for page in pages {
            scroll.add_page(page);
        }
        scroll.merge();
        Ok(scroll)
    }

    async fn scroll_render(&self, cancel: &CancellationToken, canvas: &mut dyn Canvas) -> Result<()> {
        let padding = self.inner.settings.scroll_pad();
        let mut scroll = self
            .scroll_strip(cancel, canvas.width(), canvas.height(), padding)
            .await?;
        if cancel.is_cancelled() {
            return Err(BoardError::Canceled);
        }
        scroll.play(cancel, canvas).await
    }

    async fn page_render(&self, cancel: &CancellationToken, canvas: &mut dyn Canvas) -> Result<()> {
        let settings = &self.inner.settings;
        let pages = self
            .inner
            .renderer
            .prepare(cancel, canvas.width(), canvas.height(), settings)
            .await?;
        if pages.is_empty() {
            debug!(board = self.name(), "no pages to render");
        }

        for page in &pages {
            if cancel.is_cancelled() {
                return Err(BoardError::Canceled);
            }
            canvas.clear()?;
            blit(canvas, page, 0, 0);
            canvas.render()?;

            tokio::select! {
                _ = cancel.cancelled() => return Err(BoardError::Canceled),
                _ = tokio::time::sleep(settings.board_delay()) => {},
            }
        }
        Ok(())
    }
}

impl Board for BasicBoard {
    fn name(&self) -> &str {
        self.inner.renderer.name()
    }

    fn render<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        canvas: &'a mut dyn Canvas,
    ) -> BoxFuture<'a, Result<RenderOutcome>> {
        Box::pin(async move {
            let active = self.inner.begin_render(cancel);
            if canvas.scrollable() && self.inner.settings.scroll_mode() {
                self.scroll_render(&active.token, canvas).await?;
            } else {
                self.page_render(&active.token, canvas).await?;
            }
            Ok(RenderOutcome::Handled)
        })
    }

    fn enabler(&self) -> &Enabler {
        self.inner.settings.enabler()
    }

    fn scroll_mode(&self) -> bool {
        self.inner.settings.scroll_mode()
    }

    fn set_scroll_mode(&self, enabled: bool) {
        self.inner.settings.set_scroll_mode(enabled);
    }

    fn scroll_delay(&self) -> std::time::Duration {
        self.inner.settings.scroll_delay()
    }

    fn set_scroll_delay(&self, delay: std::time::Duration) {
        self.inner.settings.set_scroll_delay(delay);
    }

    fn scroll_direction(&self) -> ScrollDirection {
        self.inner.settings.scroll_direction()
    }

    fn scroll_pad(&self) -> u32 {
        self.inner.settings.scroll_pad()
    }

    fn clear_draw_cache(&self) {
        self.inner.renderer.clear_draw_cache();
    }

    fn http_handlers(&self) -> Vec<HttpHandler> {
        self.inner.renderer.http_handlers()
    }

    fn rpc_handler(&self) -> Option<RpcHandler> {
        Some(RpcHandler {
            path_prefix: format!("/{}", self.name()),
            service: self.status_service(),
        })
    }
}

/// Status endpoint backed by the board's atomic settings
struct StatusServer {
    inner: Arc<Inner>,
}

impl StatusService for StatusServer {
    fn get_status(&self) -> Status {
        self.inner.settings.status()
    }

    fn set_status(&self, status: &Status) -> bool {
        if !self.inner.settings.apply_status(status) {
            return false;
        }
        info!(
            board = self.inner.renderer.name(),
            "status changed, restarting render"
        );
        self.inner.renderer.clear_draw_cache();
        self.inner.cancel_board();
        true
    }
}
