use facebadge_hw::{DisplayError, Framebuffer};
use image::RgbImage;

/// Where kiosk screens are drawn.
pub trait Presenter {
    type Error: std::fmt::Display;

    fn size(&self) -> (u32, u32);
    fn show(&mut self, image: &RgbImage) -> Result<(), Self::Error>;
    fn clear(&mut self) -> Result<(), Self::Error>;
}

impl Presenter for Framebuffer {
    type Error = DisplayError;

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn show(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        Framebuffer::show(self, image)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        Framebuffer::clear(self)
    }
}
