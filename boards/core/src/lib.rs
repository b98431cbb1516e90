//! Core traits and types for sportsmatrix board and canvas abstraction.
//!
//! This crate provides:
//! - The `Canvas` trait and in-memory canvases (`ImgCanvas`, `NullCanvas`)
//! - The `Board` trait, its explicit `RenderOutcome`, and the `render` helper
//! - `Enabler` and `BoardSettings`, the atomic state shared with status handlers
//! - The `ScrollCanvas` strip compositor

mod board;
mod canvas;
mod enabler;
mod error;
mod scroll;
mod settings;
mod status;

pub use board::{render, Board, HttpHandler, HttpHandlerFn, RenderOutcome, RpcHandler};
pub use canvas::{blit, Canvas, ImgCanvas, NullCanvas, PreviewFrame, BLACK};
pub use enabler::{Enabler, StateChangeNotifier};
pub use error::{BoardError, Result};
pub use scroll::{strip_extent, ScrollCanvas, ScrollDirection, ScrollParams};
pub use settings::{
    BoardConfig, BoardSettings, ScrollOverride, DEFAULT_BOARD_DELAY, DEFAULT_SCROLL_DELAY,
};
pub use status::{Status, StatusService};
