//! Per-board configuration, loaded as plain data and then held in atomics so
//! the render loop and status handlers can share it without a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enabler::Enabler;
use crate::scroll::ScrollDirection;

pub const DEFAULT_BOARD_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_SCROLL_DELAY: Duration = Duration::from_millis(50);

/// Board configuration as it appears in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub enabled: bool,
    /// Play content as a scroll strip on scrollable canvases
    pub scroll_mode: bool,
    /// How long each page is held when not scrolling
    #[serde(with = "humantime_serde")]
    pub board_delay: Duration,
    /// Time per pixel step while scrolling
    #[serde(with = "humantime_serde")]
    pub scroll_delay: Duration,
    pub scroll_direction: ScrollDirection,
    /// Padding around each page in loose scroll
    pub scroll_pad: u32,
    /// Use a single gap between pages instead of padding each page
    pub tight_scroll: bool,
    pub tight_scroll_padding: u32,
    /// Times the strip is played per render, 0 loops until canceled
    pub scroll_loops: u32,
    /// Cron expressions that enable the board
    pub on_times: Vec<String>,
    /// Cron expressions that disable the board
    pub off_times: Vec<String>,
    pub show_record: bool,
    pub gambling_spread: bool,
    pub use_gradient: bool,
    pub live_only: bool,
    pub detailed_live: bool,
    pub show_league_logo: bool,
    pub hide_favorite_score: bool,
    pub favorite_sticky: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scroll_mode: false,
            board_delay: DEFAULT_BOARD_DELAY,
            scroll_delay: DEFAULT_SCROLL_DELAY,
            scroll_direction: ScrollDirection::default(),
            scroll_pad: 4,
            tight_scroll: false,
            tight_scroll_padding: 1,
            scroll_loops: 1,
            on_times: Vec::new(),
            off_times: Vec::new(),
            show_record: false,
            gambling_spread: false,
            use_gradient: true,
            live_only: false,
            detailed_live: false,
            show_league_logo: false,
            hide_favorite_score: false,
            favorite_sticky: false,
        }
    }
}

/// Live board settings. Every accessor reads the atomic store directly.
#[derive(Debug)]
pub struct BoardSettings {
    enabler: Enabler,
    board_delay: Duration,
    pub(crate) scroll_mode: AtomicBool,
    scroll_delay_us: AtomicU64,
    scroll_direction: AtomicU8,
    scroll_pad: AtomicU32,
    pub(crate) tight_scroll: AtomicBool,
    tight_scroll_padding: AtomicU32,
    scroll_loops: AtomicU32,
    pub(crate) show_record: AtomicBool,
    pub(crate) gambling_spread: AtomicBool,
    pub(crate) use_gradient: AtomicBool,
    pub(crate) live_only: AtomicBool,
    pub(crate) detailed_live: AtomicBool,
    pub(crate) show_league_logo: AtomicBool,
    pub(crate) hide_favorite_score: AtomicBool,
    pub(crate) favorite_sticky: AtomicBool,
}

impl BoardSettings {
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            enabler: Enabler::new(config.enabled),
            board_delay: config.board_delay,
            scroll_mode: AtomicBool::new(config.scroll_mode),
            scroll_delay_us: AtomicU64::new(config.scroll_delay.as_micros() as u64),
            scroll_direction: AtomicU8::new(config.scroll_direction as u8),
            scroll_pad: AtomicU32::new(config.scroll_pad),
            tight_scroll: AtomicBool::new(config.tight_scroll),
            tight_scroll_padding: AtomicU32::new(config.tight_scroll_padding),
            scroll_loops: AtomicU32::new(config.scroll_loops),
            show_record: AtomicBool::new(config.show_record),
            gambling_spread: AtomicBool::new(config.gambling_spread),
            use_gradient: AtomicBool::new(config.use_gradient),
            live_only: AtomicBool::new(config.live_only),
            detailed_live: AtomicBool::new(config.detailed_live),
            show_league_logo: AtomicBool::new(config.show_league_logo),
            hide_favorite_score: AtomicBool::new(config.hide_favorite_score),
            favorite_sticky: AtomicBool::new(config.favorite_sticky),
        }
    }

    pub fn enabler(&self) -> &Enabler {
        &self.enabler
    }

    pub fn board_delay(&self) -> Duration {
        self.board_delay
    }

    pub fn scroll_mode(&self) -> bool {
        self.scroll_mode.load(Ordering::Acquire)
    }

    pub fn set_scroll_mode(&self, enabled: bool) {
        self.scroll_mode.store(enabled, Ordering::Release);
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_micros(self.scroll_delay_us.load(Ordering::Acquire))
    }

    pub fn set_scroll_delay(&self, delay: Duration) {
        self.scroll_delay_us
            .store(delay.as_micros() as u64, Ordering::Release);
    }

    pub fn scroll_direction(&self) -> ScrollDirection {
        ScrollDirection::from_u8(self.scroll_direction.load(Ordering::Acquire))
    }

    pub fn set_scroll_direction(&self, direction: ScrollDirection) {
        self.scroll_direction
            .store(direction as u8, Ordering::Release);
    }

    /// Effective padding: the tight gap in tight scroll, otherwise the loose pad
    pub fn scroll_pad(&self) -> u32 {
        if self.tight_scroll() {
            self.tight_scroll_padding.load(Ordering::Acquire)
        } else {
            self.scroll_pad.load(Ordering::Acquire)
        }
    }

    pub fn tight_scroll(&self) -> bool {
        self.tight_scroll.load(Ordering::Acquire)
    }

    /// Loop count for one scroll render, `None` loops until canceled
    pub fn scroll_loops(&self) -> Option<u32> {
        match self.scroll_loops.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn show_record(&self) -> bool {
        self.show_record.load(Ordering::Acquire)
    }

    pub fn gambling_spread(&self) -> bool {
        self.gambling_spread.load(Ordering::Acquire)
    }

    pub fn use_gradient(&self) -> bool {
        self.use_gradient.load(Ordering::Acquire)
    }

    pub fn live_only(&self) -> bool {
        self.live_only.load(Ordering::Acquire)
    }

    pub fn detailed_live(&self) -> bool {
        self.detailed_live.load(Ordering::Acquire)
    }

    pub fn show_league_logo(&self) -> bool {
        self.show_league_logo.load(Ordering::Acquire)
    }

    pub fn hide_favorite_score(&self) -> bool {
        self.hide_favorite_score.load(Ordering::Acquire)
    }

    pub fn favorite_sticky(&self) -> bool {
        self.favorite_sticky.load(Ordering::Acquire)
    }

    /// Force scroll mode on with the given padding until the guard drops.
    ///
    /// The previous scroll mode and padding are restored afterwards, so a
    /// borrowed scroll render never leaves the board reconfigured.
    pub fn override_scroll(&self, padding: u32) -> ScrollOverride<'_> {
        let tight = self.tight_scroll();
        let pad_slot = if tight {
            &self.tight_scroll_padding
        } else {
            &self.scroll_pad
        };
        ScrollOverride {
            settings: self,
            scroll_mode: self.scroll_mode.swap(true, Ordering::AcqRel),
            forced_padding: padding,
            padding: pad_slot.swap(padding, Ordering::AcqRel),
            tight,
        }
    }
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self::new(&BoardConfig::default())
    }
}

/// Restores scroll settings changed by [`BoardSettings::override_scroll`].
///
/// A value that was changed again while the override was held is kept.
pub struct ScrollOverride<'a> {
    settings: &'a BoardSettings,
    scroll_mode: bool,
    forced_padding: u32,
    padding: u32,
    tight: bool,
}

impl Drop for ScrollOverride<'_> {
    fn drop(&mut self) {
        let settings = self.settings;
        let _ = settings.scroll_mode.compare_exchange(
            true,
            self.scroll_mode,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let pad_slot = if self.tight {
            &settings.tight_scroll_padding
        } else {
            &settings.scroll_pad
        };
        let _ = pad_slot.compare_exchange(
            self.forced_padding,
            self.padding,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
