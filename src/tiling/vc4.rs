// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VC4 "T" tiled layout.
//!
//! The image is cut into 4k tiles of 32x32 pixels, stored row after row, except that odd tile
//! rows are stored right to left. Each tile is a 2x2 grid of 1k sub-tiles of 16x16 pixels whose
//! storage order alternates with the tile row parity, and each sub-tile is a 4x4 raster of 64 byte
//! micro-tiles (4x4 pixels). Only 32 bits per pixel are handled.

use crate::utils::align_up;

pub const BYTES_PER_PIXEL: usize = 4;

pub const MICRO_TILE_WIDTH: usize = 4;
pub const MICRO_TILE_HEIGHT: usize = 4;
const MICRO_TILE_LINE_SIZE: usize = MICRO_TILE_WIDTH * BYTES_PER_PIXEL;
const MICRO_TILE_SIZE: usize = MICRO_TILE_LINE_SIZE * MICRO_TILE_HEIGHT;
const MICRO_TILES_PER_SUB_TILE_ROW: usize = 4;

const SUB_TILE_WIDTH: usize = 16;
const SUB_TILE_HEIGHT: usize = 16;
const SUB_TILE_SIZE: usize = 1024;

pub const TILE_WIDTH: usize = 32;
pub const TILE_HEIGHT: usize = 32;
pub const TILE_SIZE: usize = 4096;

// Storage slot of the sub-tile at index (sub_y * 2 + sub_x). Slots on even tile rows hold
// BL, TL, TR, BR; on odd tile rows TR, BR, BL, TL. Sub-tile row 0 is the bottom one.
const EVEN_ROW_SUB_TILE_SLOT: [usize; 4] = [0, 3, 1, 2];
const ODD_ROW_SUB_TILE_SLOT: [usize; 4] = [2, 1, 3, 0];

/// Tile counts of a T-tiled image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TGeometry {
    pub width: usize,
    pub height: usize,
    pub tiles_per_row: usize,
    pub tiles_per_column: usize,
}

impl TGeometry {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            tiles_per_row: align_up(width, TILE_WIDTH) / TILE_WIDTH,
            tiles_per_column: align_up(height, TILE_HEIGHT) / TILE_HEIGHT,
        }
    }

    /// Pitch of one row of tiles, expressed per pixel line as the display API expects.
    pub fn pitch(&self) -> usize {
        self.tiles_per_row * TILE_WIDTH * BYTES_PER_PIXEL
    }

    /// Bytes needed to hold the whole tiled image.
    pub fn size(&self) -> usize {
        self.tiles_per_row * self.tiles_per_column * TILE_SIZE
    }
}

pub fn linear_offset(x: usize, y: usize, pitch: usize) -> usize {
    y * pitch + x * BYTES_PER_PIXEL
}

/// Byte offset of the micro-tile starting at pixel (`x`, `y`) in the tiled buffer.
///
/// `x` and `y` must be multiples of the micro-tile dimensions.
pub fn t_tile_offset(x: usize, y: usize, tiles_per_row: usize) -> usize {
    debug_assert!(x % MICRO_TILE_WIDTH == 0 && y % MICRO_TILE_HEIGHT == 0);

    let tile_x = x / TILE_WIDTH;
    let tile_y = y / TILE_HEIGHT;
    let odd_row = tile_y % 2 == 1;

    // Odd tile rows are laid out in reverse.
    let tile_column = if odd_row { tiles_per_row - 1 - tile_x } else { tile_x };
    let tile_offset = (tile_y * tiles_per_row + tile_column) * TILE_SIZE;

    let sub_x = (x % TILE_WIDTH) / SUB_TILE_WIDTH;
    let sub_y = (y % TILE_HEIGHT) / SUB_TILE_HEIGHT;
    let sub_index = sub_y * 2 + sub_x;
    let slot = if odd_row {
        ODD_ROW_SUB_TILE_SLOT[sub_index]
    } else {
        EVEN_ROW_SUB_TILE_SLOT[sub_index]
    };

    let micro_x = (x % SUB_TILE_WIDTH) / MICRO_TILE_WIDTH;
    let micro_y = (y % SUB_TILE_HEIGHT) / MICRO_TILE_HEIGHT;
    let micro_offset = (micro_y * MICRO_TILES_PER_SUB_TILE_ROW + micro_x) * MICRO_TILE_SIZE;

    tile_offset + slot * SUB_TILE_SIZE + micro_offset
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    TiledToLinear,
    LinearToTiled,
}

fn convert(
    tiled: *mut u8,
    linear: *mut u8,
    linear_pitch: usize,
    width: usize,
    height: usize,
    direction: Direction,
) {
    let geometry = TGeometry::new(width, height);

    for y in (0..height).step_by(MICRO_TILE_HEIGHT) {
        let lines = MICRO_TILE_HEIGHT.min(height - y);
        for x in (0..width).step_by(MICRO_TILE_WIDTH) {
            let line_len = MICRO_TILE_WIDTH.min(width - x) * BYTES_PER_PIXEL;
            let mut tiled_pos = t_tile_offset(x, y, geometry.tiles_per_row);
            let mut linear_pos = linear_offset(x, y, linear_pitch);

            for _ in 0..lines {
                // SAFETY: the public entry points checked that both buffers cover the image.
                unsafe {
                    match direction {
                        Direction::TiledToLinear => std::ptr::copy_nonoverlapping(
                            tiled.add(tiled_pos),
                            linear.add(linear_pos),
                            line_len,
                        ),
                        Direction::LinearToTiled => std::ptr::copy_nonoverlapping(
                            linear.add(linear_pos),
                            tiled.add(tiled_pos),
                            line_len,
                        ),
                    }
                }
                tiled_pos += MICRO_TILE_LINE_SIZE;
                linear_pos += linear_pitch;
            }
        }
    }
}

fn check_sizes(
    tiled_len: usize,
    linear_len: usize,
    linear_pitch: usize,
    width: usize,
    height: usize,
) {
    let geometry = TGeometry::new(width, height);
    assert!(tiled_len >= geometry.size(), "tiled buffer too small for {width}x{height}");
    assert!(linear_pitch >= width * BYTES_PER_PIXEL, "linear pitch {linear_pitch} too small");
    if height > 0 {
        assert!(
            linear_len >= (height - 1) * linear_pitch + width * BYTES_PER_PIXEL,
            "linear buffer too small for {width}x{height}"
        );
    }
}

/// Detiles a `width`x`height` T-tiled image from `src` into `dst` using `dst_pitch`.
pub fn tiled_to_linear(dst: &mut [u8], dst_pitch: usize, src: &[u8], width: usize, height: usize) {
    check_sizes(src.len(), dst.len(), dst_pitch, width, height);
    convert(
        src.as_ptr() as *mut u8,
        dst.as_mut_ptr(),
        dst_pitch,
        width,
        height,
        Direction::TiledToLinear,
    );
}

/// Tiles a `width`x`height` linear image read from `src` with `src_pitch` into `dst`.
pub fn linear_to_tiled(dst: &mut [u8], src: &[u8], src_pitch: usize, width: usize, height: usize) {
    check_sizes(dst.len(), src.len(), src_pitch, width, height);
    convert(
        dst.as_mut_ptr(),
        src.as_ptr() as *mut u8,
        src_pitch,
        width,
        height,
        Direction::LinearToTiled,
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    #[test]
    fn offsets_follow_the_snake_order() {
        // Two tiles per row.
        assert_eq!(t_tile_offset(0, 0, 2), 0);
        assert_eq!(t_tile_offset(4, 0, 2), 64);
        assert_eq!(t_tile_offset(0, 4, 2), 256);
        // Even row sub-tiles: BL, TL, TR, BR.
        assert_eq!(t_tile_offset(0, 16, 2), 1024);
        assert_eq!(t_tile_offset(16, 16, 2), 2048);
        assert_eq!(t_tile_offset(16, 0, 2), 3072);
        assert_eq!(t_tile_offset(32, 0, 2), 4096);
        // Odd rows run right to left with sub-tiles TR, BR, BL, TL.
        assert_eq!(t_tile_offset(32, 32, 2), 2 * 4096 + 2 * 1024);
        assert_eq!(t_tile_offset(0, 32, 2), 3 * 4096 + 2 * 1024);
        assert_eq!(t_tile_offset(16, 48, 2), 3 * 4096);
        assert_eq!(t_tile_offset(16, 32, 2), 3 * 4096 + 1024);
        assert_eq!(t_tile_offset(0, 48, 2), 3 * 4096 + 3 * 1024);
    }

    #[test]
    fn offsets_are_a_bijection() {
        for (width, height) in [(32, 32), (64, 96), (128, 64), (96, 96)] {
            let geometry = TGeometry::new(width, height);
            let mut seen = HashSet::new();
            for y in (0..height).step_by(MICRO_TILE_HEIGHT) {
                for x in (0..width).step_by(MICRO_TILE_WIDTH) {
                    let offset = t_tile_offset(x, y, geometry.tiles_per_row);
                    assert_eq!(offset % MICRO_TILE_SIZE, 0);
                    assert!(offset + MICRO_TILE_SIZE <= geometry.size());
                    assert!(seen.insert(offset), "({x}, {y}) collides at {offset}");
                }
            }
            assert_eq!(seen.len() * MICRO_TILE_SIZE, width * height * BYTES_PER_PIXEL);
        }
    }

    #[test]
    fn round_trip_restores_linear_image() {
        for (width, height) in [(32, 32), (64, 32), (96, 128), (256, 256)] {
            let pitch = width * BYTES_PER_PIXEL;
            let original = pattern(pitch * height);
            let mut tiled = vec![0u8; TGeometry::new(width, height).size()];
            let mut linear = vec![0u8; original.len()];

            linear_to_tiled(&mut tiled, &original, pitch, width, height);
            assert_ne!(&tiled[..original.len()], &original[..]);
            tiled_to_linear(&mut linear, pitch, &tiled, width, height);
            assert_eq!(linear, original);
        }
    }

    #[test]
    fn round_trip_honours_padded_pitch() {
        let (width, height) = (64, 64);
        let pitch = width * BYTES_PER_PIXEL + 64;
        let original = pattern(pitch * height);
        let mut tiled = vec![0u8; TGeometry::new(width, height).size()];
        let mut linear = vec![0u8; original.len()];

        linear_to_tiled(&mut tiled, &original, pitch, width, height);
        tiled_to_linear(&mut linear, pitch, &tiled, width, height);
        for y in 0..height {
            let row = y * pitch..y * pitch + width * BYTES_PER_PIXEL;
            assert_eq!(linear[row.clone()], original[row]);
        }
    }

    #[test]
    fn micro_tile_lines_are_contiguous() {
        let (width, height) = (32, 32);
        let pitch = width * BYTES_PER_PIXEL;
        let mut linear = vec![0u8; pitch * height];
        // Mark the pixel at (5, 2).
        linear[linear_offset(5, 2, pitch)..][..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut tiled = vec![0u8; TGeometry::new(width, height).size()];
        linear_to_tiled(&mut tiled, &linear, pitch, width, height);

        let at = t_tile_offset(4, 0, 1) + 2 * MICRO_TILE_LINE_SIZE + BYTES_PER_PIXEL;
        assert_eq!(&tiled[at..at + 4], &[1, 2, 3, 4]);
    }

    #[test]
    fn geometry_rounds_to_whole_tiles() {
        let geometry = TGeometry::new(100, 33);
        assert_eq!(geometry.tiles_per_row, 4);
        assert_eq!(geometry.tiles_per_column, 2);
        assert_eq!(geometry.pitch(), 512);
        assert_eq!(geometry.size(), 8 * TILE_SIZE);
    }

    #[test]
    fn partial_edge_micro_tiles_round_trip() {
        let (width, height) = (37, 21);
        let pitch = align_up(width * BYTES_PER_PIXEL, 64);
        let original = pattern(pitch * height);
        let mut tiled = vec![0u8; TGeometry::new(width, height).size()];
        let mut linear = vec![0u8; original.len()];

        linear_to_tiled(&mut tiled, &original, pitch, width, height);
        tiled_to_linear(&mut linear, pitch, &tiled, width, height);
        for y in 0..height {
            let row = y * pitch..y * pitch + width * BYTES_PER_PIXEL;
            assert_eq!(linear[row.clone()], original[row]);
        }
    }
}
