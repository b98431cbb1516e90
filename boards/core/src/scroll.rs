//! Scroll strip compositor.
//!
//! A board in scroll mode renders one page per item. The pages are merged into
//! a single strip along the scroll axis, and the strip is then translated
//! across a fixed canvas one pixel per step.

use std::time::Duration;

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::canvas::{Canvas, BLACK};
use crate::error::{BoardError, Result};
use crate::settings::DEFAULT_SCROLL_DELAY;

/// Floor for the per-step delay, a zero delay would spin
const MIN_SCROLL_DELAY: Duration = Duration::from_millis(1);

/// Direction content travels across the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ScrollDirection {
    #[default]
    RightToLeft = 0,
    LeftToRight = 1,
    BottomToTop = 2,
    TopToBottom = 3,
}

impl ScrollDirection {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::LeftToRight,
            2 => Self::BottomToTop,
            3 => Self::TopToBottom,
            _ => Self::RightToLeft,
        }
    }

    pub fn is_horizontal(&self) -> bool {
        matches!(self, Self::RightToLeft | Self::LeftToRight)
    }
}

/// Playback parameters, captured once when a scroll render starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollParams {
    pub direction: ScrollDirection,
    /// Time per pixel step
    pub speed: Duration,
    pub pad: u32,
    /// Tight scroll puts `pad` between pages only, loose scroll surrounds
    /// every page with `pad`
    pub tight: bool,
    /// `None` plays until canceled
    pub loops: Option<u32>,
}

impl Default for ScrollParams {
    fn default() -> Self {
        Self {
            direction: ScrollDirection::default(),
            speed: DEFAULT_SCROLL_DELAY,
            pad: 0,
            tight: false,
            loops: Some(1),
        }
    }
}

/// Length of the merged strip along the scroll axis
pub fn strip_extent(page_extents: &[u32], pad: u32, tight: bool) -> u32 {
    let content: u32 = page_extents.iter().sum();
    let count = page_extents.len() as u32;
    if count == 0 {
        return 0;
    }
    if tight {
        content + pad * (count - 1)
    } else {
        content + 2 * pad * count
    }
}

/// Pre-rendered scrollable content for a canvas of fixed geometry
pub struct ScrollCanvas {
    width: u32,
    height: u32,
    params: ScrollParams,
    pages: Vec<RgbaImage>,
    strip: Option<RgbaImage>,
}

impl ScrollCanvas {
    /// Scroll content for a viewport of `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            params: ScrollParams::default(),
            pages: Vec::new(),
            strip: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn params(&self) -> ScrollParams {
        self.params
    }

    pub fn set_params(&mut self, params: ScrollParams) {
        if params.direction.is_horizontal() != self.params.direction.is_horizontal()
            || params.pad != self.params.pad
            || params.tight != self.params.tight
        {
            self.strip = None;
        }
        self.params = params;
    }

    pub fn set_speed(&mut self, speed: Duration) {
        self.params.speed = speed;
    }

    pub fn add_page(&mut self, page: RgbaImage) {
        self.pages.push(page);
        self.strip = None;
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn extent_of(&self, page: &RgbaImage) -> (u32, u32) {
        if self.params.direction.is_horizontal() {
            (page.width(), page.height())
        } else {
            (page.height(), page.width())
        }
    }

    /// Merge the pages into a single strip, returning it
    pub fn merge(&mut self) -> &RgbaImage {
        if self.strip.is_none() {
            let strip = self.build_strip();
            debug!(
                pages = self.pages.len(),
                width = strip.width(),
                height = strip.height(),
                "merged scroll strip"
            );
            self.strip = Some(strip);
        }
        self.strip.get_or_insert_with(|| RgbaImage::new(0, 0))
    }

    fn build_strip(&self) -> RgbaImage {
        let ScrollParams { pad, tight, .. } = self.params;
        let extents: Vec<u32> = self.pages.iter().map(|p| self.extent_of(p).0).collect();
        let length = strip_extent(&extents, pad, tight);
        let across = self
            .pages
            .iter()
            .map(|p| self.extent_of(p).1)
            .max()
            .unwrap_or(0);

        let horizontal = self.params.direction.is_horizontal();
        let mut strip = if horizontal {
            RgbaImage::from_pixel(length, across, BLACK)
        } else {
            RgbaImage::from_pixel(across, length, BLACK)
        };

        let gap = i64::from(if tight { pad } else { 2 * pad });
        let mut cursor: i64 = if tight { 0 } else { pad as i64 };
        for (page, extent) in self.pages.iter().zip(extents) {
            if horizontal {
                imageops::replace(&mut strip, page, cursor, 0);
            } else {
                imageops::replace(&mut strip, page, 0, cursor);
            }
            cursor += extent as i64 + gap;
        }
        strip
    }

    /// Translate the strip across `target` until the configured loops are
    /// done or `cancel` fires.
    ///
    /// Cancellation stops translation immediately, mid-loop.
    pub async fn play(&mut self, cancel: &CancellationToken, target: &mut dyn Canvas) -> Result<()> {
        let params = self.params;
        let strip = self.merge();
        let horizontal = params.direction.is_horizontal();
        let extent = if horizontal { strip.width() } else { strip.height() };
        if extent == 0 {
            return Ok(());
        }
        let view = if horizontal {
            target.width()
        } else {
            target.height()
        };
        let steps = extent + view;
        let delay = params.speed.max(MIN_SCROLL_DELAY);

        let mut played = 0;
        loop {
            for step in 0..=steps {
                if cancel.is_cancelled() {
                    return Err(BoardError::Canceled);
                }
                draw_frame(target, strip, params.direction, step as i64, extent as i64);
                target.render()?;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BoardError::Canceled),
                    _ = tokio::time::sleep(delay) => {},
                }
            }
            played += 1;
            if params.loops.is_some_and(|loops| played >= loops) {
                return Ok(());
            }
        }
    }
}

/// Draw the strip as seen at `step`. Step 0 has the strip just outside the
/// leading edge, step `extent + view` has it just past the trailing edge.
fn draw_frame(
    target: &mut dyn Canvas,
    strip: &RgbaImage,
    direction: ScrollDirection,
    step: i64,
    extent: i64,
) {
    let (width, height) = (target.width(), target.height());
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = match direction {
                ScrollDirection::RightToLeft => (x as i64 + step - width as i64, y as i64),
                ScrollDirection::LeftToRight => (x as i64 + extent - step, y as i64),
                ScrollDirection::BottomToTop => (x as i64, y as i64 + step - height as i64),
                ScrollDirection::TopToBottom => (x as i64, y as i64 + extent - step),
            };
            let pixel = if sx >= 0 && sy >= 0 {
                strip
                    .get_pixel_checked(sx as u32, sy as u32)
                    .copied()
                    .unwrap_or(BLACK)
            } else {
                BLACK
            };
            target.put_pixel(x, y, pixel);
        }
    }
}
