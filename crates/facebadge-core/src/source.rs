use image::RgbImage;

/// Anything that yields camera frames on demand.
///
/// A failed read is transient: the detection loop skips that sample and
/// carries on with the animation.
pub trait FrameSource {
    type Error: std::fmt::Display;

    fn capture(&mut self) -> Result<RgbImage, Self::Error>;
}
