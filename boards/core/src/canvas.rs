//! Canvas contract and the in-memory canvas variants.

use std::io::Cursor;
use std::sync::{Arc, RwLock};

use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::{BoardError, Result};

/// Color used for cleared and uncovered pixels
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A drawable surface with fixed geometry.
///
/// Boards draw into a canvas, and whoever owns the canvas flushes it with
/// [`Canvas::render`]. A canvas is only ever mutated by one render at a time.
pub trait Canvas: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Read a pixel. Out of bounds reads return [`BLACK`].
    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8>;

    /// Write a pixel. Out of bounds writes are ignored.
    fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>);

    /// Reset every pixel
    fn clear(&mut self) -> Result<()>;

    /// Push the current buffer to the display
    fn render(&mut self) -> Result<()>;

    /// Release any backing resource
    fn close(&mut self) -> Result<()>;

    /// Whether the canvas can host a scroll strip
    fn scrollable(&self) -> bool {
        false
    }

    /// Whether the canvas keeps receiving renders while the screen is off
    fn always_render(&self) -> bool {
        false
    }
}

/// Draw `image` onto `canvas` with its top left corner at (`x`, `y`), clipping
/// anything outside the canvas.
pub fn blit(canvas: &mut dyn Canvas, image: &RgbaImage, x: i64, y: i64) {
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    for (px, py, pixel) in image.enumerate_pixels() {
        let (cx, cy) = (x + px as i64, y + py as i64);
        if (0..width).contains(&cx) && (0..height).contains(&cy) {
            canvas.put_pixel(cx as u32, cy as u32, *pixel);
        }
    }
}

/// Last flushed frame of a preview canvas, PNG encoded
#[derive(Debug, Clone, Default)]
pub struct PreviewFrame(Arc<RwLock<Vec<u8>>>);

impl PreviewFrame {
    /// Copy of the latest PNG, empty until the first flush
    pub fn png(&self) -> Vec<u8> {
        self.0.read().map(|buf| buf.clone()).unwrap_or_default()
    }

    fn store(&self, png: Vec<u8>) {
        if let Ok(mut buf) = self.0.write() {
            *buf = png;
        }
    }
}

/// Canvas backed by an in-memory image.
///
/// Used for page rendering, and as the web preview surface which encodes each
/// flushed frame to PNG.
pub struct ImgCanvas {
    name: String,
    image: RgbaImage,
    scrollable: bool,
    always_render: bool,
    preview: Option<PreviewFrame>,
    closed: bool,
}

impl ImgCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: "image".into(),
            image: RgbaImage::from_pixel(width, height, BLACK),
            scrollable: false,
            always_render: false,
            preview: None,
            closed: false,
        }
    }

    /// Web preview surface. Always renders, even while the screen is off.
    pub fn preview(width: u32, height: u32) -> Self {
        Self {
            name: "preview".into(),
            scrollable: true,
            always_render: true,
            preview: Some(PreviewFrame::default()),
            ..Self::new(width, height)
        }
    }

    /// Handle to the encoded frame, if this is a preview canvas
    pub fn frame(&self) -> Option<PreviewFrame> {
        self.preview.clone()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl Canvas for ImgCanvas {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.image.get_pixel_checked(x, y).copied().unwrap_or(BLACK)
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            *pixel = color;
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.image.pixels_mut().for_each(|p| *p = BLACK);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if self.closed {
            return Err(BoardError::Closed);
        }
        if let Some(frame) = &self.preview {
            let mut png = Vec::new();
            self.image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
            frame.store(png);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn scrollable(&self) -> bool {
        self.scrollable
    }

    fn always_render(&self) -> bool {
        self.always_render
    }
}

/// Canvas that keeps a pixel buffer but never displays it.
///
/// Stands in for the hardware matrix when no display backend is attached.
pub struct NullCanvas {
    image: RgbaImage,
    frames: u64,
}

impl NullCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, BLACK),
            frames: 0,
        }
    }

    /// Number of flushes seen so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Canvas for NullCanvas {
    fn name(&self) -> &str {
        "null"
    }

    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.image.get_pixel_checked(x, y).copied().unwrap_or(BLACK)
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            *pixel = color;
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.image.pixels_mut().for_each(|p| *p = BLACK);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn scrollable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_clips_to_canvas() {
        let mut canvas = ImgCanvas::new(4, 4);
        let red = Rgba([255, 0, 0, 255]);
        let page = RgbaImage::from_pixel(3, 3, red);

        blit(&mut canvas, &page, 2, -1);

        assert_eq!(canvas.get_pixel(2, 0), red);
        assert_eq!(canvas.get_pixel(3, 1), red);
        assert_eq!(canvas.get_pixel(1, 0), BLACK);
        assert_eq!(canvas.get_pixel(2, 2), BLACK);
        assert_eq!(canvas.get_pixel(9, 9), BLACK);
    }

    #[test]
    fn preview_encodes_png_on_render() {
        let mut canvas = ImgCanvas::preview(8, 4);
        let frame = canvas.frame().unwrap();
        assert!(frame.png().is_empty());
        assert!(canvas.always_render());

        canvas.put_pixel(0, 0, Rgba([0, 255, 0, 255]));
        canvas.render().unwrap();

        let decoded = image::load_from_memory(&frame.png()).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn closed_canvas_refuses_render() {
        let mut canvas = ImgCanvas::new(2, 2);
        canvas.close().unwrap();
        assert!(matches!(canvas.render(), Err(BoardError::Closed)));
    }

    #[test]
    fn clear_resets_pixels() {
        let mut canvas = NullCanvas::new(2, 2);
        canvas.put_pixel(1, 1, Rgba([1, 2, 3, 255]));
        canvas.clear().unwrap();
        assert_eq!(canvas.get_pixel(1, 1), BLACK);
        canvas.render().unwrap();
        assert_eq!(canvas.frames(), 1);
    }
}
