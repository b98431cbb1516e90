//! Errors raised by boards and canvases.

/// Errors that can occur while rendering a board onto a canvas
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The render was canceled, either by the pass or by the board itself
    #[error("render canceled")]
    Canceled,

    /// The board failed to produce its content
    #[error("render failed: {0}")]
    Render(String),

    /// The canvas cannot host what the board tried to draw
    #[error("invalid canvas: {0}")]
    InvalidCanvas(&'static str),

    /// The canvas was already closed
    #[error("canvas is closed")]
    Closed,

    /// Image encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic IO error, usually from a display backend
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoardError {
    /// Cancellation is a clean early return, never a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, BoardError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
