// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Rendered still images

use image::RgbaImage;

/// RGBA8 raster produced by a render target snapshot
pub type RasterStill = RgbaImage;

/// Pixel stride used when sampling alpha for opacity checks
pub const ALPHA_SAMPLE_STRIDE: usize = 10;

/// True if every sampled pixel is fully opaque
///
/// Samples every `stride`-th pixel in row-major order. An empty raster is never opaque:
/// the first screen of a session is typically an unpainted canvas.
pub fn is_opaque(still: &RasterStill, stride: usize) -> bool {
    let pixels = still.as_raw();
    if pixels.is_empty() {
        return false;
    }

    pixels
        .chunks_exact(4)
        .step_by(stride.max(1))
        .all(|px| px[3] == u8::MAX)
}

/// Round a dimension up to the next even number
pub fn round_up_even(value: u32) -> u32 {
    value.saturating_add(value & 1)
}
