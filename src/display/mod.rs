use serde::{Deserialize, Serialize};

/// A physical display as reported by the platform (or configured statically).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

fn default_scale_factor() -> f64 {
    1.0
}

/// Capture rectangle in physical pixels. Width and height are always even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

pub trait DisplayProvider: Send + Sync {
    fn displays(&self) -> Vec<DisplayInfo>;
}

/// Display table taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDisplays {
    displays: Vec<DisplayInfo>,
}

impl StaticDisplays {
    pub fn new(displays: Vec<DisplayInfo>) -> Self {
        Self { displays }
    }
}

impl DisplayProvider for StaticDisplays {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.clone()
    }
}

/// Maps a logical screen id to capture geometry.
///
/// `None` means "capture the whole virtual desktop": either no id was given,
/// the id is unknown, or the scaled size collapses to zero. Callers fall back
/// to full-desktop capture and never fail the job on it.
pub fn resolve(provider: &dyn DisplayProvider, screen_id: &str) -> Option<Geometry> {
    let screen_id = screen_id.trim();
    if screen_id.is_empty() {
        return None;
    }

    let display = provider
        .displays()
        .into_iter()
        .find(|d| d.id == screen_id)?;

    let scale = if display.scale_factor.is_finite() && display.scale_factor > 0.0 {
        display.scale_factor
    } else {
        1.0
    };

    let width = round_down_even((display.width as f64 * scale).round() as u32);
    let height = round_down_even((display.height as f64 * scale).round() as u32);
    if width == 0 || height == 0 {
        return None;
    }

    Some(Geometry {
        x: (display.x as f64 * scale).round() as i32,
        y: (display.y as f64 * scale).round() as i32,
        width,
        height,
    })
}

fn round_down_even(value: u32) -> u32 {
    value & !1
}
