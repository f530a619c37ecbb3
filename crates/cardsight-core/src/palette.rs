//! Deterministic per-class display colors.
//!
//! Ten base colors cycle by class index; each lap around the palette shifts
//! the shade by `STRIDE` percent so neighbouring laps stay distinguishable.

use crate::types::Rgba;

const STRIDE: i64 = 10;

/// Base colors as `[r, g, b]` in `0.0..=1.0`.
const BASE_COLORS: [[f32; 3]; 10] = [
    [1.0, 0.0, 0.0], // red
    [90.0 / 255.0, 200.0 / 255.0, 250.0 / 255.0], // light blue
    [0.0, 1.0, 0.0], // green
    [1.0, 0.5, 0.0], // orange
    [0.0, 0.0, 1.0], // blue
    [0.5, 0.0, 0.5], // purple
    [1.0, 0.0, 1.0], // magenta
    [1.0, 1.0, 0.0], // yellow
    [0.0, 1.0, 1.0], // cyan
    [0.6, 0.4, 0.2], // brown
];

pub const PALETTE_SIZE: usize = BASE_COLORS.len();

/// Shade adjustment, in percent, applied to the base color for `index`.
pub fn shade_percent(index: usize) -> i64 {
    let lap = (index / PALETTE_SIZE) as i64;
    (STRIDE / 2 - lap) * STRIDE
}

/// Color for a label-table slot (class index already offset by one).
pub fn color_for_class(index: usize) -> Rgba {
    let [r, g, b] = BASE_COLORS[index % PALETTE_SIZE];
    let delta = shade_percent(index) as f32 / 100.0;
    let shift = |c: f32| ((c + delta).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba::new(shift(r), shift(g), shift(b), 255)
}
