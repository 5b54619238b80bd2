//! Pre-rendered kiosk screens.
//!
//! Assets:
//!   assets/idle/*.jpg              idle animation
//!   assets/scan/*.jpg              scan animation
//!   assets/messages/<key>.png      badge banner per message
//!   assets/messages/unknown.png    rejection screen
//!   assets/fonts/badge.ttf         badge name and initial
//!
//! Missing assets fall back to plain screens so the kiosk still runs.

use ab_glyph::{FontVec, PxScale};
use facebadge_core::{BadgeMessage, Screen};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::collections::HashMap;
use std::path::Path;

const AVATAR_SIZE: u32 = 140;
const AVATAR_TOP: u32 = 30;
const NAME_TOP: i32 = 185;
const NAME_SCALE: f32 = 20.0;
const INITIAL_SCALE: f32 = 60.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FONT_FILE: &str = "fonts/badge.ttf";
const SYSTEM_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";
/// Placeholder disc colours; each identity keeps the same one.
const PLACEHOLDER_FILLS: [Rgb<u8>; 6] = [
    Rgb([60, 60, 60]),
    Rgb([40, 70, 110]),
    Rgb([40, 95, 60]),
    Rgb([110, 60, 30]),
    Rgb([90, 40, 100]),
    Rgb([30, 90, 95]),
];
const PLACEHOLDER_RING: Rgb<u8> = Rgb([255, 255, 255]);
const PLACEHOLDER_RING_WIDTH: f32 = 3.0;
const REJECTION_FILL: Rgb<u8> = Rgb([90, 0, 0]);

pub struct Screens {
    width: u32,
    height: u32,
    idle: Vec<RgbImage>,
    scan: Vec<RgbImage>,
    banners: HashMap<BadgeMessage, RgbImage>,
    rejection: RgbImage,
    font: Option<FontVec>,
}

impl Screens {
    /// Plain black animations, no banners.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            idle: vec![RgbImage::new(width, height)],
            scan: vec![RgbImage::new(width, height)],
            banners: HashMap::new(),
            rejection: RgbImage::from_pixel(width, height, REJECTION_FILL),
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    /// Load every asset, scaled to a `width` x `height` panel.
    pub fn load(asset_dir: &Path, width: u32, height: u32) -> Self {
        let mut screens = Self::blank(width, height);

        let idle = load_sequence(&asset_dir.join("idle"), width, height);
        if idle.is_empty() {
            tracing::warn!(dir = %asset_dir.join("idle").display(), "no idle animation; using a blank screen");
        } else {
            screens.idle = idle;
        }
        let scan = load_sequence(&asset_dir.join("scan"), width, height);
        if scan.is_empty() {
            tracing::warn!(dir = %asset_dir.join("scan").display(), "no scan animation; using a blank screen");
        } else {
            screens.scan = scan;
        }

        let messages = asset_dir.join("messages");
        for message in BadgeMessage::ALL {
            let path = messages.join(format!("{}.png", message.key()));
            match image::open(&path) {
                Ok(img) => {
                    screens.banners.insert(message, fit_width(img.to_rgb8(), width));
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "badge banner missing"),
            }
        }
        match image::open(messages.join("unknown.png")) {
            Ok(img) => screens.rejection = image::imageops::resize(&img.to_rgb8(), width, height, FilterType::Triangle),
            Err(e) => tracing::warn!(error = %e, "rejection screen missing; using a plain one"),
        }
        if let Some(font) = load_font(asset_dir) {
            screens = screens.with_font(font);
        }

        tracing::info!(
            idle = screens.idle.len(),
            scan = screens.scan.len(),
            banners = screens.banners.len(),
            font = screens.font.is_some(),
            "screens loaded"
        );
        screens
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn scan_count(&self) -> usize {
        self.scan.len()
    }

    pub fn frame(&self, screen: Screen) -> &RgbImage {
        match screen {
            Screen::Idle(i) => &self.idle[i % self.idle.len()],
            Screen::Scan(i) => &self.scan[i % self.scan.len()],
        }
    }

    pub fn rejection(&self) -> &RgbImage {
        &self.rejection
    }

    /// Circular avatar, or a placeholder disc with the identity's initial,
    /// then the display name and the message banner.
    pub fn badge(&self, identity_id: &str, avatar: Option<&Path>, message: BadgeMessage) -> RgbImage {
        let mut canvas = RgbImage::new(self.width, self.height);
        let cx = self.width as f32 / 2.0;
        let cy = (AVATAR_TOP + AVATAR_SIZE / 2) as f32;
        let radius = AVATAR_SIZE as f32 / 2.0;

        let portrait = avatar.and_then(|path| match image::open(path) {
            Ok(img) => Some(square_crop(img.to_rgb8(), AVATAR_SIZE)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable avatar; using placeholder");
                None
            }
        });
        let fill = placeholder_fill(identity_id);

        let left = cx - radius;
        let top = cy - radius;
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist > radius {
                    continue;
                }
                let pixel = match &portrait {
                    Some(img) => {
                        let px = ((x as f32 - left).max(0.0) as u32).min(AVATAR_SIZE - 1);
                        let py = ((y as f32 - top).max(0.0) as u32).min(AVATAR_SIZE - 1);
                        *img.get_pixel(px, py)
                    }
                    None if dist > radius - PLACEHOLDER_RING_WIDTH => PLACEHOLDER_RING,
                    None => fill,
                };
                canvas.put_pixel(x, y, pixel);
            }
        }

        let name = display_name(identity_id);
        if let Some(font) = &self.font {
            if portrait.is_none() {
                let initial = name.chars().next().map_or_else(|| "?".to_string(), |c| c.to_string());
                let (w, h) = text_size(PxScale::from(INITIAL_SCALE), font, &initial);
                let x = cx as i32 - w as i32 / 2;
                let y = cy as i32 - h as i32 / 2;
                draw_text_mut(&mut canvas, TEXT_COLOR, x, y, PxScale::from(INITIAL_SCALE), font, &initial);
            }
            let (w, _) = text_size(PxScale::from(NAME_SCALE), font, &name);
            let x = (self.width as i32 - w as i32) / 2;
            draw_text_mut(&mut canvas, TEXT_COLOR, x, NAME_TOP, PxScale::from(NAME_SCALE), font, &name);
        }

        if let Some(banner) = self.banners.get(&message) {
            let x = (self.width.saturating_sub(banner.width()) / 2) as i64;
            let y = self.height.saturating_sub(banner.height()) as i64;
            image::imageops::overlay(&mut canvas, banner, x, y);
        }
        canvas
    }
}

/// Identity id as shown on the badge: `_` becomes a space and each word is
/// capitalized, e.g. `mary_jane` -> `Mary Jane`.
pub fn display_name(identity_id: &str) -> String {
    let mut name = String::with_capacity(identity_id.len());
    let mut in_word = false;
    for c in identity_id.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if in_word {
                name.extend(c.to_lowercase());
            } else {
                name.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            name.push(c);
            in_word = false;
        }
    }
    name
}

fn placeholder_fill(identity_id: &str) -> Rgb<u8> {
    // FNV-1a: stable across runs and builds.
    let hash = identity_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3));
    PLACEHOLDER_FILLS[(hash % PLACEHOLDER_FILLS.len() as u64) as usize]
}

fn load_font(asset_dir: &Path) -> Option<FontVec> {
    for path in [asset_dir.join(FONT_FILE), Path::new(SYSTEM_FONT).to_path_buf()] {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "badge font loaded");
                return Some(font);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "unusable badge font"),
        }
    }
    tracing::warn!("no badge font; names will not be drawn");
    None
}

/// Blend an image toward black; `level` 1.0 is the original, 0.0 is black.
pub fn fade(image: &RgbImage, level: f32) -> RgbImage {
    let level = level.clamp(0.0, 1.0);
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * level).round() as u8;
        }
    }
    out
}

fn load_sequence(dir: &Path, width: u32, height: u32) -> Vec<RgbImage> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| match image::open(path) {
            Ok(img) => Some(image::imageops::resize(&img.to_rgb8(), width, height, FilterType::Triangle)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable animation frame");
                None
            }
        })
        .collect()
}

fn square_crop(img: RgbImage, size: u32) -> RgbImage {
    let side = img.width().min(img.height());
    let x = (img.width() - side) / 2;
    let y = (img.height() - side) / 2;
    let square = image::imageops::crop_imm(&img, x, y, side, side).to_image();
    image::imageops::resize(&square, size, size, FilterType::Lanczos3)
}

/// Shrink a banner wider than the panel, keeping its aspect ratio.
fn fit_width(banner: RgbImage, width: u32) -> RgbImage {
    if banner.width() <= width || banner.width() == 0 {
        return banner;
    }
    let height = ((banner.height() as u64 * width as u64) / banner.width() as u64).max(1) as u32;
    image::imageops::resize(&banner, width, height, FilterType::Triangle)
}
