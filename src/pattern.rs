//! Built-in test pattern board: one solid or gradient page per color.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Mutex;

use basicboard::Renderer;
use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sportsmatrix_core::{BoardError, BoardSettings, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Utility for parsing hex colors from config and the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub fn rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.0;
        Rgba([r, g, b, 255])
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [r, g, b] = self.0;
        f.write_str(&format!("#{r:02x}{g:02x}{b:02x}"))
    }
}

impl FromStr for Color {
    type Err = String;
    fn from_str(code: &str) -> std::result::Result<Self, Self::Err> {
        let mut hex = code.trim_start_matches('#').to_string();
        match hex.len() {
            3 => {
                // Extend 3 character hex colors
                hex = hex.chars().flat_map(|a| [a, a]).collect();
            },
            6 => {},
            l => return Err(format!("Invalid hex length for {code}: {l}")),
        }
        if let Ok(channel_bytes) = u32::from_str_radix(&hex, 16) {
            let r = ((channel_bytes >> 16) & 0xFF) as u8;
            let g = ((channel_bytes >> 8) & 0xFF) as u8;
            let b = (channel_bytes & 0xFF) as u8;
            Ok(Self([r, g, b]))
        } else {
            Err(format!("Invalid hex color: {code}"))
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

type CacheKey = (u32, u32, bool);

/// Renders a page per configured color, cached per geometry and gradient mode
pub struct PatternRenderer {
    name: String,
    colors: Vec<Color>,
    cache: Mutex<HashMap<CacheKey, Vec<RgbaImage>>>,
}

impl PatternRenderer {
    pub fn new(name: impl Into<String>, colors: Vec<Color>) -> Self {
        Self {
            name: name.into(),
            colors,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn draw(&self, width: u32, height: u32, gradient: bool) -> Vec<RgbaImage> {
        self.colors
            .iter()
            .map(|color| {
                if gradient {
                    gradient_page(*color, width, height)
                } else {
                    RgbaImage::from_pixel(width, height, color.rgba())
                }
            })
            .collect()
    }
}

/// Fade from `color` on the left edge to black on the right
fn gradient_page(color: Color, width: u32, height: u32) -> RgbaImage {
    let span = width.saturating_sub(1).max(1);
    RgbaImage::from_fn(width, height, |x, _| {
        let scale = |c: u8| (u32::from(c) * (span - x.min(span)) / span) as u8;
        let [r, g, b] = color.0;
        Rgba([scale(r), scale(g), scale(b), 255])
    })
}

impl Renderer for PatternRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        width: u32,
        height: u32,
        settings: &'a BoardSettings,
    ) -> BoxFuture<'a, Result<Vec<RgbaImage>>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(BoardError::Canceled);
            }
            let key = (width, height, settings.use_gradient());
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| BoardError::Render("pattern cache poisoned".into()))?;
            let pages = cache
                .entry(key)
                .or_insert_with(|| self.draw(width, height, key.2));
            Ok(pages.clone())
        })
    }

    fn clear_draw_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            debug!(board = %self.name, entries = cache.len(), "clearing draw cache");
            cache.clear();
        }
    }
}
