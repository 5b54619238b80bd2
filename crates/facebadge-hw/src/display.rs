//! Linux framebuffer output for the kiosk LCD.
//!
//! The panel is mounted upside down, so every image is rotated 180 degrees
//! before it is written.

use image::imageops::FilterType;
use image::RgbImage;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_WIDTH: u32 = 240;
const DEFAULT_HEIGHT: u32 = 240;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("framebuffer not found: {0}")]
    DeviceNotFound(String),
    #[error("unsupported framebuffer depth: {0} bits per pixel")]
    UnsupportedDepth(u32),
    #[error("framebuffer write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel layout of the framebuffer memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelFormat {
    /// 16 bits per pixel, little-endian 5-6-5.
    Rgb565,
    /// 32 bits per pixel, byte order B, G, R, A.
    Bgra8888,
}

impl PanelFormat {
    fn from_depth(bits: u32) -> Result<Self, DisplayError> {
        match bits {
            16 => Ok(Self::Rgb565),
            32 => Ok(Self::Bgra8888),
            other => Err(DisplayError::UnsupportedDepth(other)),
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Bgra8888 => 4,
        }
    }
}

/// An opened `/dev/fbN` device.
pub struct Framebuffer {
    file: File,
    pub width: u32,
    pub height: u32,
    pub format: PanelFormat,
    line_length: usize,
}

impl Framebuffer {
    /// Open a framebuffer device, reading its geometry from sysfs.
    ///
    /// Missing sysfs attributes fall back to a 240x240 RGB565 panel.
    pub fn open(device: &Path) -> Result<Self, DisplayError> {
        if !device.exists() {
            return Err(DisplayError::DeviceNotFound(device.display().to_string()));
        }

        let sysfs = sysfs_dir(device);
        let (width, height) = sysfs
            .as_deref()
            .and_then(|dir| read_attr(dir, "virtual_size"))
            .and_then(|s| parse_size(&s))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        let bits = sysfs
            .as_deref()
            .and_then(|dir| read_attr(dir, "bits_per_pixel"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(16);
        let format = PanelFormat::from_depth(bits)?;
        let line_length = sysfs
            .as_deref()
            .and_then(|dir| read_attr(dir, "stride"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(width as usize * format.bytes_per_pixel());

        let file = OpenOptions::new().write(true).open(device)?;

        tracing::info!(
            device = %device.display(),
            width,
            height,
            format = ?format,
            "opened framebuffer"
        );

        Ok(Self {
            file,
            width,
            height,
            format,
            line_length,
        })
    }

    /// Draw an image, scaled to the panel and rotated 180 degrees.
    pub fn show(&mut self, image: &RgbImage) -> Result<(), DisplayError> {
        let bytes = encode(image, self.width, self.height, self.format, self.line_length);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Fill the panel with black.
    pub fn clear(&mut self) -> Result<(), DisplayError> {
        self.show(&RgbImage::new(self.width, self.height))
    }
}

fn sysfs_dir(device: &Path) -> Option<PathBuf> {
    let name = device.file_name()?.to_str()?;
    Some(PathBuf::from("/sys/class/graphics").join(name))
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(attr)).ok()
}

/// Parse a sysfs `virtual_size` value such as "240,240".
fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(',')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Scale, rotate and pack an image into framebuffer memory layout.
fn encode(image: &RgbImage, width: u32, height: u32, format: PanelFormat, line_length: usize) -> Vec<u8> {
    let scaled;
    let source = if image.dimensions() == (width, height) {
        image
    } else {
        scaled = image::imageops::resize(image, width, height, FilterType::Triangle);
        &scaled
    };
    let rotated = image::imageops::rotate180(source);

    let bpp = format.bytes_per_pixel();
    let line_length = line_length.max(width as usize * bpp);
    let mut out = vec![0u8; line_length * height as usize];
    for (x, y, pixel) in rotated.enumerate_pixels() {
        let offset = y as usize * line_length + x as usize * bpp;
        let [r, g, b] = pixel.0;
        match format {
            PanelFormat::Rgb565 => {
                let packed = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
                out[offset..offset + 2].copy_from_slice(&packed.to_le_bytes());
            }
            PanelFormat::Bgra8888 => {
                out[offset..offset + 4].copy_from_slice(&[b, g, r, 0xFF]);
            }
        }
    }
    out
}
