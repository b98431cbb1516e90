//! The render scheduler.
//!
//! Boards are visited in registration order. Each board renders onto every
//! canvas concurrently, and the next board only starts once all of those
//! renders have returned. A screen-off window cancels the running pass and
//! blanks every canvas until a screen-on window fires.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sportsmatrix_core::{Board, Canvas, ImgCanvas, PreviewFrame};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MatrixConfig;
use crate::error::{ConfigError, MatrixError, Result};
use crate::schedule::{Clock, ScheduleTimer, ScheduleWindow, SystemClock, WindowAction};

/// How long canceled renders get to return before their tasks are aborted
const CANCEL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenCommand {
    On,
    Off,
}

/// Requests screen transitions from schedule windows or anything else
#[derive(Debug, Clone)]
pub struct ScreenHandle {
    tx: UnboundedSender<ScreenCommand>,
}

impl ScreenHandle {
    pub fn channel() -> (Self, UnboundedReceiver<ScreenCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on(&self) {
        let _ = self.tx.send(ScreenCommand::On);
    }

    pub fn off(&self) {
        let _ = self.tx.send(ScreenCommand::Off);
    }
}

/// A registered canvas. The mutex keeps renders and clears from overlapping.
#[derive(Clone)]
struct CanvasSlot {
    name: String,
    always_render: bool,
    canvas: Arc<tokio::sync::Mutex<Box<dyn Canvas>>>,
}

impl CanvasSlot {
    fn new(canvas: Box<dyn Canvas>) -> Self {
        Self {
            name: canvas.name().to_string(),
            always_render: canvas.always_render(),
            canvas: Arc::new(tokio::sync::Mutex::new(canvas)),
        }
    }
}

/// Cancellation contexts. `current` is replaced on every screen-off.
struct PassState {
    root: CancellationToken,
    current: CancellationToken,
}

/// One traversal of the board list
struct RenderCycle {
    token: CancellationToken,
    canvases: Vec<CanvasSlot>,
    /// Boards enabled when the pass started
    enabled: HashSet<usize>,
}

pub struct Matrix {
    config: MatrixConfig,
    boards: Vec<Arc<dyn Board>>,
    canvases: Vec<CanvasSlot>,
    preview: Option<PreviewFrame>,
    windows: Vec<ScheduleWindow>,
    clock: Arc<dyn Clock>,
    screen: ScreenHandle,
    screen_rx: Mutex<Option<UnboundedReceiver<ScreenCommand>>>,
    screen_on: AtomicBool,
    wake: Arc<Notify>,
    pass: Mutex<PassState>,
    closed: AtomicBool,
}

impl Matrix {
    /// Register boards and canvases.
    ///
    /// Adds the preview canvas when the web UI is served, and parses the
    /// screen on/off schedules.
    pub fn new(
        config: MatrixConfig,
        canvases: Vec<Box<dyn Canvas>>,
        boards: Vec<Arc<dyn Board>>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for board in &boards {
            if !names.insert(board.name().to_string()) {
                return Err(ConfigError::DuplicateBoard(board.name().to_string()));
            }
        }

        let mut windows = Vec::new();
        for expr in &config.screen_off_times {
            windows.push(ScheduleWindow::new(expr, WindowAction::ScreenOff)?);
        }
        for expr in &config.screen_on_times {
            windows.push(ScheduleWindow::new(expr, WindowAction::ScreenOn)?);
        }

        let mut slots: Vec<CanvasSlot> = canvases.into_iter().map(CanvasSlot::new).collect();
        let mut preview = None;
        if config.serve_web_ui {
            let (width, height) = config.preview_size();
            let canvas = ImgCanvas::preview(width, height);
            preview = canvas.frame();
            info!(width, height, port = config.http_listen_port, "registering preview canvas");
            slots.push(CanvasSlot::new(Box::new(canvas)));
        }

        let wake = Arc::new(Notify::new());
        for board in &boards {
            let wake = wake.clone();
            board
                .enabler()
                .set_state_change_notifier(Arc::new(move || wake.notify_one()));
        }

        let (screen, screen_rx) = ScreenHandle::channel();
        let root = CancellationToken::new();
        Ok(Self {
            config,
            boards,
            canvases: slots,
            preview,
            windows,
            clock: Arc::new(SystemClock),
            screen,
            screen_rx: Mutex::new(Some(screen_rx)),
            screen_on: AtomicBool::new(true),
            wake,
            pass: Mutex::new(PassState {
                current: root.child_token(),
                root,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Evaluate schedules against another clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_window(&mut self, window: ScheduleWindow) {
        self.windows.push(window);
    }

    pub fn windows(&self) -> &[ScheduleWindow] {
        &self.windows
    }

    pub fn boards(&self) -> &[Arc<dyn Board>] {
        &self.boards
    }

    pub fn screen(&self) -> ScreenHandle {
        self.screen.clone()
    }

    pub fn screen_is_on(&self) -> bool {
        self.screen_on.load(Ordering::Acquire)
    }

    /// Last frame shown on the preview canvas, PNG encoded
    pub fn preview_frame(&self) -> std::result::Result<PreviewFrame, ConfigError> {
        self.preview
            .clone()
            .ok_or(ConfigError::MissingCanvas("preview"))
    }

    /// Run the render loop, screen watcher and schedule timer until
    /// `shutdown` fires.
    pub async fn serve(&self, shutdown: &CancellationToken) -> Result<()> {
        if self.boards.is_empty() {
            return Err(MatrixError::NoBoards);
        }
        let screen_rx = self
            .screen_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| MatrixError::Startup(io::Error::other("matrix is already serving")))?;

        if let Ok(mut pass) = self.pass.lock() {
            pass.root = shutdown.child_token();
            pass.current = pass.root.child_token();
        }

        for window in &self.windows {
            info!(schedule = %window.schedule, action = ?window.action, "registered schedule");
        }
        let timer = ScheduleTimer::new(self.clock.clone(), self.windows.clone());

        info!(
            boards = self.boards.len(),
            canvases = self.canvases.len(),
            "starting render loop"
        );
        tokio::select! {
            _ = self.render_loop(shutdown) => {},
            _ = self.screen_watcher(screen_rx, shutdown) => {},
            _ = timer.run(self.config.timer_poll, &self.screen, shutdown) => {},
        }
        Ok(())
    }

    async fn render_loop(&self, shutdown: &CancellationToken) {
        let mut cursor = 0;
        let mut idle_cleared = false;

        while !shutdown.is_cancelled() {
            let enabled: HashSet<usize> = self
                .boards
                .iter()
                .enumerate()
                .filter(|(_, board)| board.enabled())
                .map(|(i, _)| i)
                .collect();

            if enabled.is_empty() {
                if !idle_cleared {
                    info!("all boards disabled, clearing canvases");
                    self.clear_canvases().await;
                    idle_cleared = true;
                }
                self.idle(shutdown).await;
                continue;
            }
            idle_cleared = false;

            match self.begin_pass(enabled) {
                Some(cycle) => self.run_pass(&cycle, &mut cursor).await,
                None => self.idle(shutdown).await,
            }
        }
    }

    /// Wait for a board to be enabled, the screen to come on, or the poll
    /// interval
    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {},
            _ = self.wake.notified() => {},
            _ = tokio::time::sleep(self.config.idle_poll) => {},
        }
    }

    /// Start a pass on the canvases allowed to render. With the screen off
    /// only always-render canvases qualify.
    fn begin_pass(&self, enabled: HashSet<usize>) -> Option<RenderCycle> {
        let pass = self.pass.lock().ok()?;
        let screen_on = self.screen_is_on();
        let canvases: Vec<CanvasSlot> = self
            .canvases
            .iter()
            .filter(|slot| screen_on || slot.always_render)
            .cloned()
            .collect();
        if canvases.is_empty() {
            return None;
        }
        Some(RenderCycle {
            token: pass.current.child_token(),
            canvases,
            enabled,
        })
    }

    /// Visit boards from `cursor` to the end of the list. An interrupted pass
    /// leaves the cursor on the board after the one it was rendering.
    async fn run_pass(&self, cycle: &RenderCycle, cursor: &mut usize) {
        while *cursor < self.boards.len() {
            if cycle.token.is_cancelled() {
                return;
            }
            let index = *cursor;
            *cursor += 1;

            let board = &self.boards[index];
            if !cycle.enabled.contains(&index) || !board.enabled() {
                debug!(board = board.name(), "skipping disabled board");
                continue;
            }
            self.render_board(board, cycle).await;
        }
        *cursor = 0;
    }

    async fn render_board(&self, board: &Arc<dyn Board>, cycle: &RenderCycle) {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for slot in &cycle.canvases {
            let board = board.clone();
            let slot = slot.clone();
            let token = cycle.token.child_token();
            tasks.spawn(async move {
                let mut canvas = slot.canvas.lock().await;
                match sportsmatrix_core::render(board.as_ref(), &token, &mut **canvas).await {
                    Ok(()) => {},
                    Err(e) if e.is_canceled() => {
                        debug!(board = board.name(), canvas = %slot.name, "render canceled");
                    },
                    Err(e) => {
                        error!(board = board.name(), canvas = %slot.name, error = %e, "render failed");
                    },
                }
            });
        }

        let watchdog = tokio::time::sleep(self.config.watchdog);
        tokio::pin!(watchdog);
        let mut overdue = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => {
                        error!(board = board.name(), "render task panicked");
                    },
                    Some(_) => {},
                },
                _ = cycle.token.cancelled() => {
                    let drain = async { while tasks.join_next().await.is_some() {} };
                    if tokio::time::timeout(CANCEL_GRACE, drain).await.is_err() {
                        warn!(board = board.name(), "render ignored cancellation, aborting");
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                    }
                    return;
                },
                _ = &mut watchdog, if !overdue => {
                    overdue = true;
                    warn!(
                        board = board.name(),
                        elapsed = ?started.elapsed(),
                        "board render is taking too long"
                    );
                },
            }
        }

        // Hold the board on screen for at least the dwell floor
        let elapsed = started.elapsed();
        if let Some(remaining) = self.config.min_dwell.checked_sub(elapsed) {
            tokio::select! {
                _ = cycle.token.cancelled() => {},
                _ = tokio::time::sleep(remaining) => {},
            }
        }
    }

    async fn screen_watcher(
        &self,
        mut commands: UnboundedReceiver<ScreenCommand>,
        shutdown: &CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => return,
                command = commands.recv() => command,
            };
            match command {
                Some(ScreenCommand::On) => self.turn_screen_on(),
                Some(ScreenCommand::Off) => self.turn_screen_off().await,
                None => {
                    shutdown.cancelled().await;
                    return;
                },
            }
        }
    }

    /// Cancel the running pass and blank every canvas
    async fn turn_screen_off(&self) {
        {
            let Ok(mut pass) = self.pass.lock() else {
                return;
            };
            if self
                .screen_on
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!("screen is already off");
                return;
            }
            warn!("turning screen off");
            pass.current.cancel();
            pass.current = pass.root.child_token();
        }
        self.clear_canvases().await;
    }

    /// Bring the screen back. A pass running on always-render canvases only
    /// is cut short so the next board renders on every canvas.
    fn turn_screen_on(&self) {
        let Ok(mut pass) = self.pass.lock() else {
            return;
        };
        if self
            .screen_on
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("screen is already on");
            return;
        }
        warn!("turning screen on");
        if self.canvases.iter().any(|slot| !slot.always_render) {
            pass.current.cancel();
            pass.current = pass.root.child_token();
        }
        self.wake.notify_one();
    }

    async fn clear_canvases(&self) {
        for slot in &self.canvases {
            if let Err(e) = slot.canvas.lock().await.clear() {
                error!(canvas = %slot.name, error = %e, "failed to clear canvas");
            }
        }
    }

    /// Close every canvas. Only the first call has any effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.canvases {
            if let Err(e) = slot.canvas.lock().await.close() {
                error!(canvas = %slot.name, error = %e, "failed to close canvas");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use basicboard::BasicBoard;
    use futures::future::BoxFuture;
    use image::Rgba;
    use sportsmatrix_core::{
        BoardConfig, BoardError, Enabler, RenderOutcome, Result as BoardResult, BLACK,
    };

    use super::*;
    use crate::pattern::{Color, PatternRenderer};
    use crate::schedule::tests::{at, ManualClock};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Canvas that counts what the scheduler does to it
    #[derive(Default)]
    struct Tally {
        name: &'static str,
        scrollable: bool,
        clears: Arc<AtomicUsize>,
        renders: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl Tally {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }
    }

    impl Canvas for Tally {
        fn name(&self) -> &str {
            self.name
        }
        fn width(&self) -> u32 {
            8
        }
        fn height(&self) -> u32 {
            4
        }
        fn get_pixel(&self, _x: u32, _y: u32) -> Rgba<u8> {
            BLACK
        }
        fn put_pixel(&mut self, _x: u32, _y: u32, _color: Rgba<u8>) {}
        fn clear(&mut self) -> BoardResult<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn render(&mut self) -> BoardResult<()> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&mut self) -> BoardResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn scrollable(&self) -> bool {
            self.scrollable
        }
    }

    /// Board that logs its renders and takes `work` to finish
    struct Scripted {
        name: String,
        enabler: Enabler,
        work: Duration,
        fail: bool,
        /// Keeps working after its token is canceled
        stubborn: bool,
        log: Log,
    }

    impl Scripted {
        fn new(name: &str, work: Duration, log: &Log) -> Self {
            Self {
                name: name.into(),
                enabler: Enabler::new(true),
                work,
                fail: false,
                stubborn: false,
                log: log.clone(),
            }
        }
    }

    impl Board for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn render<'a>(
            &'a self,
            cancel: &'a CancellationToken,
            canvas: &'a mut dyn Canvas,
        ) -> BoxFuture<'a, BoardResult<RenderOutcome>> {
            Box::pin(async move {
                let push = |event: &str| {
                    self.log
                        .lock()
                        .unwrap()
                        .push(format!("{event}:{}:{}", self.name, canvas.name()))
                };
                push("start");
                if self.stubborn {
                    tokio::time::sleep(self.work).await;
                    push("end");
                    return Ok(RenderOutcome::Handled);
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        push("cancel");
                        return Err(BoardError::Canceled);
                    },
                    _ = tokio::time::sleep(self.work) => push("end"),
                }
                if self.fail {
                    return Err(BoardError::Render("no data".into()));
                }
                Ok(RenderOutcome::Handled)
            })
        }

        fn enabler(&self) -> &Enabler {
            &self.enabler
        }
    }

    fn config(min_dwell: Duration) -> MatrixConfig {
        MatrixConfig {
            serve_web_ui: false,
            min_dwell,
            ..Default::default()
        }
    }

    fn events(log: &Log, kind: &str) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(kind))
            .cloned()
            .collect()
    }

    fn spawn_serve(matrix: &Arc<Matrix>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let shutdown = CancellationToken::new();
        let handle = {
            let matrix = matrix.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { matrix.serve(&shutdown).await.unwrap() })
        };
        (shutdown, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn renders_boards_in_order_across_canvases() {
        let log = Log::default();
        let mut failing = Scripted::new("b", Duration::from_millis(300), &log);
        failing.fail = true;
        let boards: Vec<Arc<dyn Board>> = vec![
            Arc::new(Scripted::new("a", Duration::from_millis(100), &log)),
            Arc::new(failing),
            Arc::new(Scripted::new("c", Duration::from_millis(200), &log)),
        ];
        let canvases: Vec<Box<dyn Canvas>> =
            vec![Box::new(Tally::named("x")), Box::new(Tally::named("y"))];
        let matrix = Arc::new(Matrix::new(config(Duration::from_secs(1)), canvases, boards).unwrap());

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 12, "{log:?}");
        for (i, board) in ["a", "b", "c"].iter().enumerate() {
            let chunk = &log[i * 4..i * 4 + 4];
            let mut starts: Vec<_> = chunk[..2].to_vec();
            starts.sort();
            assert_eq!(starts, [format!("start:{board}:x"), format!("start:{board}:y")]);
            assert!(chunk[2..].iter().all(|e| e.starts_with(&format!("end:{board}:"))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_clears_once() {
        let log = Log::default();
        let board = Arc::new(Scripted::new("a", Duration::from_millis(10), &log));
        board.disable();
        let tally = Tally::named("x");
        let clears = tally.clears.clone();
        let matrix = Arc::new(
            Matrix::new(
                config(Duration::ZERO),
                vec![Box::new(tally)],
                vec![board.clone() as Arc<dyn Board>],
            )
            .unwrap(),
        );

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert!(events(&log, "start").is_empty());

        board.enable();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!events(&log, "start").is_empty());
        assert_eq!(clears.load(Ordering::SeqCst), 1);

        board.disable();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clears.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_mid_pass_waits_for_next_pass() {
        let log = Log::default();
        let first = Arc::new(Scripted::new("a", Duration::from_secs(1), &log));
        let second = Arc::new(Scripted::new("b", Duration::from_secs(1), &log));
        second.disable();
        let boards: Vec<Arc<dyn Board>> = vec![first, second.clone()];
        let matrix = Arc::new(
            Matrix::new(config(Duration::from_secs(5)), vec![Box::new(Tally::named("x"))], boards)
                .unwrap(),
        );

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_millis(500)).await;
        second.enable();
        tokio::time::sleep(Duration::from_millis(11_500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(
            events(&log, "start"),
            ["start:a:x", "start:a:x", "start:b:x"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn screen_off_cancels_clears_and_resumes() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> = ["a", "b", "c"]
            .into_iter()
            .map(|name| Arc::new(Scripted::new(name, Duration::from_secs(10), &log)) as Arc<dyn Board>)
            .collect();
        let tally = Tally::named("x");
        let clears = tally.clears.clone();
        let matrix = Arc::new(
            Matrix::new(config(Duration::from_secs(5)), vec![Box::new(tally)], boards).unwrap(),
        );
        let screen = matrix.screen();

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(15)).await;
        screen.off();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!matrix.screen_is_on());
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock().unwrap(),
            ["start:a:x", "end:a:x", "start:b:x", "cancel:b:x"]
        );

        // a second off is a no-op
        screen.off();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(clears.load(Ordering::SeqCst), 1);

        screen.on();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(events(&log, "start").last().unwrap(), "start:c:x");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn screen_off_keeps_always_render_canvases() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> =
            vec![Arc::new(Scripted::new("a", Duration::from_millis(100), &log))];
        let matrix = Arc::new(
            Matrix::new(
                MatrixConfig {
                    web_board_width: 16,
                    ..config(Duration::from_secs(1))
                },
                vec![Box::new(Tally::named("x"))],
                boards,
            )
            .unwrap(),
        );
        let screen = matrix.screen();

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_millis(50)).await;
        screen.off();
        tokio::time::sleep(Duration::from_millis(10)).await;
        log.lock().unwrap().clear();
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // serve_web_ui is off in this config, so nothing may render
        assert!(events(&log, "start").is_empty());

        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> =
            vec![Arc::new(Scripted::new("a", Duration::from_millis(100), &log))];
        let matrix = Arc::new(
            Matrix::new(
                MatrixConfig {
                    serve_web_ui: true,
                    web_board_width: 16,
                    ..config(Duration::from_secs(1))
                },
                vec![Box::new(Tally::named("x"))],
                boards,
            )
            .unwrap(),
        );
        let screen = matrix.screen();

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_millis(50)).await;
        screen.off();
        tokio::time::sleep(Duration::from_millis(10)).await;
        log.lock().unwrap().clear();
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let starts = events(&log, "start");
        assert!(!starts.is_empty());
        assert!(starts.iter().all(|e| e == "start:a:preview"));
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_cancels_only_that_board() {
        let log = Log::default();
        let scrolling = Arc::new(BasicBoard::new(
            PatternRenderer::new("pattern", vec![Color([255, 0, 0])]),
            &BoardConfig {
                scroll_mode: true,
                scroll_loops: 0,
                use_gradient: false,
                ..Default::default()
            },
        ));
        let service = scrolling.status_service();
        let boards: Vec<Arc<dyn Board>> = vec![
            scrolling,
            Arc::new(Scripted::new("next", Duration::from_millis(100), &log)),
        ];
        let tally = Tally {
            name: "x",
            scrollable: true,
            ..Default::default()
        };
        let renders = tally.renders.clone();
        let matrix = Arc::new(
            Matrix::new(config(Duration::from_secs(1)), vec![Box::new(tally)], boards).unwrap(),
        );

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(renders.load(Ordering::SeqCst) > 0);
        assert!(events(&log, "start").is_empty());

        let mut status = service.get_status();
        status.use_gradient = true;
        assert!(service.set_status(&status));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(events(&log, "end"), ["end:next:x"]);
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn serve_requires_boards() {
        let matrix = Matrix::new(config(Duration::ZERO), vec![Box::new(Tally::named("x"))], vec![]).unwrap();
        let res = matrix.serve(&CancellationToken::new()).await;
        assert!(matches!(res, Err(MatrixError::NoBoards)));
    }

    #[test]
    fn rejects_bad_construction() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> = vec![
            Arc::new(Scripted::new("a", Duration::ZERO, &log)),
            Arc::new(Scripted::new("a", Duration::ZERO, &log)),
        ];
        let res = Matrix::new(config(Duration::ZERO), vec![], boards);
        assert!(matches!(res, Err(ConfigError::DuplicateBoard(name)) if name == "a"));

        let bad = MatrixConfig {
            screen_off_times: vec!["0 25 * * *".into()],
            ..config(Duration::ZERO)
        };
        let res = Matrix::new(bad, vec![], vec![]);
        assert!(matches!(res, Err(ConfigError::InvalidSchedule { .. })));
    }

    #[test]
    fn preview_frame_needs_web_ui() {
        let matrix = Matrix::new(config(Duration::ZERO), vec![], vec![]).unwrap();
        assert!(matches!(
            matrix.preview_frame(),
            Err(ConfigError::MissingCanvas("preview"))
        ));

        let matrix = Matrix::new(
            MatrixConfig {
                serve_web_ui: true,
                web_board_width: 20,
                ..config(Duration::ZERO)
            },
            vec![],
            vec![],
        )
        .unwrap();
        assert!(matrix.preview_frame().unwrap().png().is_empty());
        assert_eq!(matrix.canvases[0].name, "preview");
    }

    #[tokio::test]
    async fn close_runs_once() {
        let tally = Tally::named("x");
        let closes = tally.closes.clone();
        let matrix = Matrix::new(config(Duration::ZERO), vec![Box::new(tally)], vec![]).unwrap();
        matrix.close().await;
        matrix.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn screen_windows_follow_clock() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> =
            vec![Arc::new(Scripted::new("a", Duration::from_millis(100), &log))];
        let clock = ManualClock::at(at("2024-03-01 22:58"));
        let matrix = Arc::new(
            Matrix::new(
                MatrixConfig {
                    screen_off_times: vec!["0 23 * * *".into()],
                    screen_on_times: vec!["0 7 * * *".into()],
                    ..config(Duration::from_secs(1))
                },
                vec![Box::new(Tally::named("x"))],
                boards,
            )
            .unwrap()
            .with_clock(clock.clone()),
        );

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(matrix.screen_is_on());

        clock.set(at("2024-03-01 23:00"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!matrix.screen_is_on());

        clock.set(at("2024-03-02 07:00"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(matrix.screen_is_on());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn screen_on_resumes_matrix_while_preview_renders() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> = ["a", "b", "c"]
            .into_iter()
            .map(|name| Arc::new(Scripted::new(name, Duration::from_secs(10), &log)) as Arc<dyn Board>)
            .collect();
        let matrix = Arc::new(
            Matrix::new(
                MatrixConfig {
                    serve_web_ui: true,
                    web_board_width: 16,
                    ..config(Duration::from_secs(5))
                },
                vec![Box::new(Tally::named("x"))],
                boards,
            )
            .unwrap(),
        );
        let screen = matrix.screen();

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(1)).await;
        screen.off();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(events(&log, "start").contains(&"start:b:preview".to_string()));
        assert!(!events(&log, "start").contains(&"start:b:x".to_string()));

        screen.on();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let starts = events(&log, "start");
        assert!(starts.contains(&"start:c:x".to_string()), "{starts:?}");
        assert!(starts.contains(&"start:c:preview".to_string()), "{starts:?}");
        assert!(events(&log, "cancel").contains(&"cancel:b:preview".to_string()));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_warns_without_killing_render() {
        let log = Log::default();
        let boards: Vec<Arc<dyn Board>> =
            vec![Arc::new(Scripted::new("slow", Duration::from_secs(3), &log))];
        let matrix = Arc::new(
            Matrix::new(
                MatrixConfig {
                    watchdog: Duration::from_secs(1),
                    ..config(Duration::ZERO)
                },
                vec![Box::new(Tally::named("x"))],
                boards,
            )
            .unwrap(),
        );

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(events(&log, "end"), ["end:slow:x"]);
        assert!(events(&log, "cancel").is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn screen_off_aborts_render_ignoring_cancel() {
        let log = Log::default();
        let mut stubborn = Scripted::new("stuck", Duration::from_secs(60), &log);
        stubborn.stubborn = true;
        let tally = Tally::named("x");
        let clears = tally.clears.clone();
        let matrix = Arc::new(
            Matrix::new(
                config(Duration::from_secs(5)),
                vec![Box::new(tally)],
                vec![Arc::new(stubborn) as Arc<dyn Board>],
            )
            .unwrap(),
        );
        let screen = matrix.screen();

        let (shutdown, handle) = spawn_serve(&matrix);
        tokio::time::sleep(Duration::from_secs(1)).await;
        screen.off();
        tokio::time::sleep(Duration::from_millis(500)).await;
        // still inside the grace period, the render holds the canvas
        assert_eq!(clears.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), ["start:stuck:x"]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(events(&log, "end").is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
