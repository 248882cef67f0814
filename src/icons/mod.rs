//! Best-effort application icons for display clients
//!
//! Icons are resolved once per executable path and cached, including
//! misses. A session without an icon gets [`FALLBACK_ICON`].

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

#[cfg(windows)]
mod windows;

/// Glyph the display shows when no icon could be extracted
pub const FALLBACK_ICON: &str = "./assets/noicon.png";

/// Edge length of extracted icons, in pixels
pub const ICON_SIZE: u32 = 32;

/// Max per-channel distance from the corner color that still counts as
/// background when clearing opaque icons
const BACKGROUND_THRESHOLD: u8 = 12;

/// Extracts an icon for an executable as a data URI
pub trait IconSource {
    fn extract(&self, exe_path: &Path) -> Option<String>;
}

/// Source that never finds an icon
pub struct NoIcons;

impl IconSource for NoIcons {
    fn extract(&self, _exe_path: &Path) -> Option<String> {
        None
    }
}

/// Per-executable icon cache
pub struct IconResolver {
    source: Box<dyn IconSource>,
    cache: HashMap<PathBuf, Option<String>>,
}

impl IconResolver {
    pub fn new(source: Box<dyn IconSource>) -> Self {
        Self {
            source,
            cache: HashMap::new(),
        }
    }

    /// Resolver backed by the platform's icon extraction
    pub fn platform() -> Self {
        #[cfg(windows)]
        return Self::new(Box::new(windows::ShellIconSource));

        #[cfg(not(windows))]
        return Self::new(Box::new(NoIcons));
    }

    /// Icon reference for a session, falling back to the default glyph
    pub fn resolve(&mut self, exe_path: Option<&Path>) -> String {
        let Some(path) = exe_path else {
            return FALLBACK_ICON.to_string();
        };

        let source = &self.source;
        self.cache
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                let icon = source.extract(path);
                debug!(?path, found = icon.is_some(), "icon resolved");
                icon
            })
            .clone()
            .unwrap_or_else(|| FALLBACK_ICON.to_string())
    }

    /// Number of cached executables
    #[cfg(test)]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Encode a square RGBA buffer as a `data:image/png;base64,...` URI
pub fn encode_png_data_uri(size: u32, rgba: Vec<u8>) -> Option<String> {
    let image = image::RgbaImage::from_raw(size, size, rgba)?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .ok()?;
    Some(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}

/// Make an icon's flat background transparent
///
/// Legacy icons drawn without an alpha channel come out fully opaque.
/// Starting from the four corners, every pixel connected to them whose
/// color stays within `threshold` of the averaged corner color gets
/// alpha 0.
pub fn clear_background(rgba: &mut [u8], size: usize, threshold: u8) {
    if size == 0 || rgba.len() < size * size * 4 {
        return;
    }

    let pixel = |x: usize, y: usize| (y * size + x) * 4;
    let corners = [
        pixel(0, 0),
        pixel(size - 1, 0),
        pixel(0, size - 1),
        pixel(size - 1, size - 1),
    ];
    let mut background = [0u8; 3];
    for (channel, value) in background.iter_mut().enumerate() {
        let sum: u32 = corners.iter().map(|&i| rgba[i + channel] as u32).sum();
        *value = (sum / corners.len() as u32) as u8;
    }

    let mut visited = vec![false; size * size];
    let mut stack = vec![(0, 0), (size - 1, 0), (0, size - 1), (size - 1, size - 1)];
    while let Some((x, y)) = stack.pop() {
        if visited[y * size + x] {
            continue;
        }
        visited[y * size + x] = true;

        let i = pixel(x, y);
        let close = (0..3).all(|c| rgba[i + c].abs_diff(background[c]) <= threshold);
        if !close {
            continue;
        }
        rgba[i + 3] = 0;

        if x > 0 {
            stack.push((x - 1, y));
        }
        if x + 1 < size {
            stack.push((x + 1, y));
        }
        if y > 0 {
            stack.push((x, y - 1));
        }
        if y + 1 < size {
            stack.push((x, y + 1));
        }
    }
}

/// Finish a raw BGRA bitmap from the OS into an RGBA data URI
pub(crate) fn finish_bgra(mut pixels: Vec<u8>, size: u32) -> Option<String> {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    let has_alpha = pixels.chunks_exact(4).any(|px| px[3] != 0);
    if !has_alpha {
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 255;
        }
        clear_background(&mut pixels, size as usize, BACKGROUND_THRESHOLD);
    }
    encode_png_data_uri(size, pixels)
}
