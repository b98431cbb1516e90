//! Live status mutation and query surface.
//!
//! An RPC transport decodes requests into [`Status`] and hands them to a
//! [`StatusService`]. Only the effect lives here.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::settings::BoardSettings;

/// Every live-reconfigurable board flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub enabled: bool,
    pub scroll_enabled: bool,
    pub tight_scroll_enabled: bool,
    pub record_rank_enabled: bool,
    pub odds_enabled: bool,
    pub use_gradient: bool,
    pub live_only: bool,
    pub detailed_live: bool,
    pub show_league_logo: bool,
    pub favorite_hidden: bool,
    pub favorite_sticky: bool,
}

/// Status get/set endpoint of a board
pub trait StatusService: Send + Sync {
    /// Current flags, read straight from the atomic store
    fn get_status(&self) -> Status;

    /// Store the flags. Any changed field invalidates the board's cached draw
    /// artifacts and cancels its in-flight render. Returns true if anything
    /// changed.
    fn set_status(&self, status: &Status) -> bool;
}

fn swap(flag: &AtomicBool, value: bool) -> bool {
    flag.compare_exchange(!value, value, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

impl BoardSettings {
    pub fn status(&self) -> Status {
        Status {
            enabled: self.enabler().enabled(),
            scroll_enabled: self.scroll_mode(),
            tight_scroll_enabled: self.tight_scroll(),
            record_rank_enabled: self.show_record(),
            odds_enabled: self.gambling_spread(),
            use_gradient: self.use_gradient(),
            live_only: self.live_only(),
            detailed_live: self.detailed_live(),
            show_league_logo: self.show_league_logo(),
            favorite_hidden: self.hide_favorite_score(),
            favorite_sticky: self.favorite_sticky(),
        }
    }

    /// Store every field, returning true if any of them changed
    pub fn apply_status(&self, status: &Status) -> bool {
        let changes = [
            self.enabler().store(status.enabled),
            swap(&self.scroll_mode, status.scroll_enabled),
            swap(&self.tight_scroll, status.tight_scroll_enabled),
            swap(&self.show_record, status.record_rank_enabled),
            swap(&self.gambling_spread, status.odds_enabled),
            swap(&self.use_gradient, status.use_gradient),
            swap(&self.live_only, status.live_only),
            swap(&self.detailed_live, status.detailed_live),
            swap(&self.show_league_logo, status.show_league_logo),
            swap(&self.hide_favorite_score, status.favorite_hidden),
            swap(&self.favorite_sticky, status.favorite_sticky),
        ];
        changes.contains(&true)
    }
}
