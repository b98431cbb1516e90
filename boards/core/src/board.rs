//! Core Board trait and related types.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::canvas::Canvas;
use crate::enabler::Enabler;
use crate::error::{BoardError, Result};
use crate::scroll::{ScrollCanvas, ScrollDirection, ScrollParams};
use crate::settings::DEFAULT_SCROLL_DELAY;
use crate::status::StatusService;

/// What a board hands back from a render
pub enum RenderOutcome {
    /// The board drew into the canvas and displayed it itself
    Handled,
    /// A separate canvas the caller must flush
    Display(Box<dyn Canvas>),
    /// Scroll content the caller must play back on the canvas
    Scroll(ScrollCanvas),
}

impl std::fmt::Debug for RenderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handled => f.write_str("Handled"),
            Self::Display(canvas) => write!(f, "Display({})", canvas.name()),
            Self::Scroll(scroll) => write!(f, "Scroll({} pages)", scroll.page_count()),
        }
    }
}

/// Handler for an HTTP path, payloads are opaque to the scheduler
pub type HttpHandlerFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Clone)]
pub struct HttpHandler {
    pub path: String,
    pub handler: HttpHandlerFn,
}

impl std::fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHandler").field("path", &self.path).finish()
    }
}

/// Status service mounted under a path prefix by an RPC transport
#[derive(Clone)]
pub struct RpcHandler {
    pub path_prefix: String,
    pub service: Arc<dyn StatusService>,
}

impl std::fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcHandler")
            .field("path_prefix", &self.path_prefix)
            .finish()
    }
}

/// Core board trait - object-safe for `dyn Board`
///
/// A board renders into any number of canvases concurrently, so every method
/// takes `&self` and mutable state lives behind atomics.
pub trait Board: Send + Sync {
    /// Unique board name
    fn name(&self) -> &str;

    /// Draw into `canvas`, or return content for the caller to display.
    ///
    /// When `cancel` fires the board must stop drawing as soon as practical and
    /// return [`BoardError::Canceled`].
    fn render<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        canvas: &'a mut dyn Canvas,
    ) -> BoxFuture<'a, Result<RenderOutcome>>;

    fn enabler(&self) -> &Enabler;

    fn enabled(&self) -> bool {
        self.enabler().enabled()
    }
    fn enable(&self) -> bool {
        self.enabler().enable()
    }
    fn disable(&self) -> bool {
        self.enabler().disable()
    }

    // === Scroll parameters, read on every render ===

    fn scroll_mode(&self) -> bool {
        false
    }
    fn set_scroll_mode(&self, _enabled: bool) {}
    fn scroll_delay(&self) -> Duration {
        DEFAULT_SCROLL_DELAY
    }
    fn set_scroll_delay(&self, _delay: Duration) {}
    fn scroll_direction(&self) -> ScrollDirection {
        ScrollDirection::default()
    }
    fn scroll_pad(&self) -> u32 {
        0
    }

    /// Eligible only for a secondary slot. The default rotation ignores it.
    fn in_between(&self) -> bool {
        false
    }

    /// Drop cached draw artifacts
    fn clear_draw_cache(&self) {}

    fn http_handlers(&self) -> Vec<HttpHandler> {
        Vec::new()
    }
    fn rpc_handler(&self) -> Option<RpcHandler> {
        None
    }
}

/// Render `board` onto `canvas` and display whatever it hands back.
///
/// Scroll content plays in the board's direction and at its speed as they were
/// when the render started. Padding, tightness and loop count stay as the
/// board set them on the strip.
pub async fn render(
    board: &dyn Board,
    cancel: &CancellationToken,
    canvas: &mut dyn Canvas,
) -> Result<()> {
    let direction = board.scroll_direction();
    let speed = board.scroll_delay();

    match board.render(cancel, canvas).await? {
        RenderOutcome::Handled => Ok(()),
        RenderOutcome::Display(mut other) => other.render(),
        RenderOutcome::Scroll(mut scroll) => {
            if !canvas.scrollable() {
                warn!(
                    board = board.name(),
                    canvas = canvas.name(),
                    "scroll content for a canvas that cannot scroll"
                );
                return Err(BoardError::InvalidCanvas("canvas cannot host a scroll strip"));
            }
            if (scroll.width(), scroll.height()) != (canvas.width(), canvas.height()) {
                warn!(
                    board = board.name(),
                    canvas = canvas.name(),
                    "scroll content prepared for another geometry"
                );
                return Err(BoardError::InvalidCanvas("scroll strip geometry does not match canvas"));
            }
            scroll.set_params(ScrollParams {
                direction,
                speed,
                ..scroll.params()
            });
            scroll.play(cancel, canvas).await
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::canvas::{ImgCanvas, NullCanvas, PreviewFrame};

    enum Mode {
        Handled,
        Display,
        Scroll,
        PaddedScroll,
        Undersized,
    }

    struct TestBoard {
        enabler: Enabler,
        mode: Mode,
        shown: std::sync::Mutex<Option<PreviewFrame>>,
        delay_ms: AtomicU64,
    }

    impl TestBoard {
        fn new(mode: Mode) -> Self {
            Self {
                enabler: Enabler::new(true),
                mode,
                shown: Default::default(),
                delay_ms: AtomicU64::new(5),
            }
        }
    }

    impl Board for TestBoard {
        fn name(&self) -> &str {
            "test"
        }

        fn render<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
            canvas: &'a mut dyn Canvas,
        ) -> BoxFuture<'a, Result<RenderOutcome>> {
            Box::pin(async move {
                match &self.mode {
                    Mode::Handled => {
                        canvas.put_pixel(0, 0, Rgba([9, 9, 9, 255]));
                        canvas.render()?;
                        Ok(RenderOutcome::Handled)
                    },
                    Mode::Display => {
                        let other = ImgCanvas::preview(2, 2);
                        *self.shown.lock().unwrap() = other.frame();
                        Ok(RenderOutcome::Display(Box::new(other)))
                    },
                    Mode::Scroll => {
                        let mut scroll = ScrollCanvas::new(canvas.width(), canvas.height());
                        scroll.add_page(RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])));
                        Ok(RenderOutcome::Scroll(scroll))
                    },
                    Mode::PaddedScroll => {
                        let mut scroll = ScrollCanvas::new(canvas.width(), canvas.height());
                        scroll.set_params(ScrollParams {
                            pad: 3,
                            tight: false,
                            ..Default::default()
                        });
                        scroll.add_page(RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])));
                        scroll.merge();
                        // settings changed mid-render must not reach this playback
                        self.delay_ms.store(500, Ordering::SeqCst);
                        Ok(RenderOutcome::Scroll(scroll))
                    },
                    Mode::Undersized => {
                        let mut scroll = ScrollCanvas::new(1, 1);
                        scroll.add_page(RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])));
                        Ok(RenderOutcome::Scroll(scroll))
                    },
                }
            })
        }

        fn enabler(&self) -> &Enabler {
            &self.enabler
        }

        fn scroll_delay(&self) -> Duration {
            Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn handled_outcome_is_left_alone() {
        let board = TestBoard::new(Mode::Handled);
        let mut canvas = NullCanvas::new(4, 4);
        render(&board, &CancellationToken::new(), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.frames(), 1);
    }

    #[tokio::test]
    async fn display_outcome_is_flushed() {
        let board = TestBoard::new(Mode::Display);
        let mut canvas = NullCanvas::new(4, 4);
        render(&board, &CancellationToken::new(), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.frames(), 0);
        let shown = board.shown.lock().unwrap().clone().unwrap();
        assert!(!shown.png().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_outcome_plays_on_canvas() {
        let board = TestBoard::new(Mode::Scroll);
        let mut canvas = NullCanvas::new(4, 2);
        render(&board, &CancellationToken::new(), &mut canvas)
            .await
            .unwrap();
        // 2 wide strip across 4 pixels, steps 0..=6
        assert_eq!(canvas.frames(), 7);
    }

    #[tokio::test]
    async fn scroll_outcome_needs_scrollable_canvas() {
        let board = TestBoard::new(Mode::Scroll);
        let mut canvas = ImgCanvas::new(4, 2);
        let res = render(&board, &CancellationToken::new(), &mut canvas).await;
        assert!(matches!(res, Err(BoardError::InvalidCanvas(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_keeps_strip_padding_and_start_speed() {
        let board = TestBoard::new(Mode::PaddedScroll);
        let mut canvas = NullCanvas::new(4, 2);
        let started = tokio::time::Instant::now();
        render(&board, &CancellationToken::new(), &mut canvas)
            .await
            .unwrap();
        // loose strip of 2 + 2 * 3 across 4 pixels, steps 0..=12
        assert_eq!(canvas.frames(), 13);
        // 13 steps at the 5ms delay read before the render
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn scroll_for_other_geometry_is_rejected() {
        let board = TestBoard::new(Mode::Undersized);
        let mut canvas = NullCanvas::new(4, 2);
        let res = render(&board, &CancellationToken::new(), &mut canvas).await;
        assert!(matches!(res, Err(BoardError::InvalidCanvas(_))));
        assert_eq!(canvas.frames(), 0);
    }
}
