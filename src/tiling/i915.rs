// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Intel tiling: modifier mapping, stride/size rules and the blit contract used to convert
//! between tiled buffers and their linear shadows.

use std::fmt::Debug;
use std::ptr::NonNull;

use drm_fourcc::DrmModifier;
use enumn::N;

use crate::device::Domain;
use crate::device::DriverControl;
use crate::error::Error;
use crate::error::Result;
use crate::utils::align_up;
use crate::utils::next_pot_from;

/// Tiling modes understood by the i915 GEM tiling ioctls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, N)]
#[repr(u32)]
pub enum I915Tiling {
    None = 0,
    X = 1,
    Y = 2,
    Yf = 3,
}

/// `I915_FORMAT_MOD_Yf_TILED`, which `drm-fourcc` has no named variant for.
pub const I915_FORMAT_MOD_YF_TILED: DrmModifier = DrmModifier::Unrecognized(0x0100_0000_0000_0003);

pub fn modifier_to_tiling(modifier: DrmModifier) -> Result<I915Tiling> {
    match modifier {
        DrmModifier::Linear => Ok(I915Tiling::None),
        DrmModifier::I915_x_tiled => Ok(I915Tiling::X),
        DrmModifier::I915_y_tiled => Ok(I915Tiling::Y),
        yf if yf == I915_FORMAT_MOD_YF_TILED => Ok(I915Tiling::Yf),
        other => Err(Error::UnsupportedModifier(u64::from(other))),
    }
}

/// Width in bytes and height in rows of one tile.
pub fn tile_size(gen: u32, tiling: I915Tiling, bpp: u32) -> Result<(u32, u32)> {
    match tiling {
        I915Tiling::None => Ok((64, 1)),
        I915Tiling::X if gen == 2 => Ok((128, 16)),
        I915Tiling::X => Ok((512, 8)),
        I915Tiling::Y if gen == 2 => Ok((128, 16)),
        I915Tiling::Y => Ok((128, 32)),
        I915Tiling::Yf => match bpp {
            8 => Ok((64, 64)),
            16 | 32 => Ok((128, 32)),
            64 | 128 => Ok((256, 16)),
            _ => Err(Error::Unsupported("Yf tiling at this bpp")),
        },
    }
}

/// Returns `(size, stride)` in bytes for a `width`x`height` buffer that the kernel will accept
/// with the given tiling.
pub fn calc_fb_size(
    gen: u32,
    width: u32,
    height: u32,
    bpp: u32,
    tiling: I915Tiling,
) -> Result<(u32, u32)> {
    let byte_width = width * (bpp / 8);

    if tiling != I915Tiling::None && gen <= 3 {
        // Old generations fence tiled regions, which need power-of-two strides and sizes.
        let stride = next_pot_from(512, byte_width);
        let size = next_pot_from(1024 * 1024, stride * height);
        return Ok((size, stride));
    }

    let (tile_width, tile_height) = tile_size(gen, tiling, bpp)?;
    let stride = align_up(byte_width, tile_width);
    Ok((stride * align_up(height, tile_height), stride))
}

/// Byte offset of the byte at (`x_bytes`, `y`) in a buffer of `pitch` bytes per row, laid out
/// with the tiles of generation `gen`.
pub fn tiled_offset(
    gen: u32,
    tiling: I915Tiling,
    pitch: usize,
    x_bytes: usize,
    y: usize,
) -> Result<usize> {
    if tiling == I915Tiling::None {
        return Ok(y * pitch + x_bytes);
    }
    if tiling == I915Tiling::Yf {
        return Err(Error::Unsupported("CPU access to Yf tiled memory"));
    }

    let (tile_width, tile_height) = tile_size(gen, tiling, 32)?;
    let (tile_width, tile_height) = (tile_width as usize, tile_height as usize);
    let tile = ((y / tile_height) * (pitch / tile_width) + x_bytes / tile_width)
        * tile_width
        * tile_height;

    if tiling == I915Tiling::X {
        return Ok(tile + (y % tile_height) * tile_width + x_bytes % tile_width);
    }

    // Y tiles are columns of 16 bytes, stored column-major.
    let column = (x_bytes % tile_width) / 16;
    Ok(tile + column * tile_height * 16 + (y % tile_height) * 16 + x_bytes % 16)
}

/// A rectangular copy between two GEM objects, each read or written under its own tiling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlitCopy {
    /// Hardware generation, which picks the tile geometry.
    pub gen: u32,
    pub src_handle: u32,
    pub src_pitch: u32,
    pub src_tiling: I915Tiling,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dst_handle: u32,
    pub dst_pitch: u32,
    pub dst_tiling: I915Tiling,
    pub dst_x: u32,
    pub dst_y: u32,
    pub cpp: u32,
}

impl BlitCopy {
    fn src_span(&self) -> Result<usize> {
        self.span(self.src_tiling, self.src_pitch, self.src_y + self.height)
    }

    fn dst_span(&self) -> Result<usize> {
        self.span(self.dst_tiling, self.dst_pitch, self.dst_y + self.height)
    }

    fn span(&self, tiling: I915Tiling, pitch: u32, rows: u32) -> Result<usize> {
        let (_, tile_height) = tile_size(self.gen, tiling, self.cpp * 8)?;
        Ok(align_up(rows, tile_height) as usize * pitch as usize)
    }
}

/// Submits blit copies. The copy only has to be queued; completion is awaited separately with
/// `I915Control::wait`.
pub trait Blitter: Debug {
    fn copy(&self, control: &dyn DriverControl, copy: &BlitCopy) -> Result<()>;
}

/// Reference blitter doing the copy with the CPU through the tile address math.
///
/// This does not handle bit-6 swizzling, so a GPU blitter should be installed on platforms that
/// swizzle.
#[derive(Debug, Default)]
pub struct CpuBlitter;

impl Blitter for CpuBlitter {
    fn copy(&self, control: &dyn DriverControl, copy: &BlitCopy) -> Result<()> {
        let i915 = control.i915().ok_or(Error::DriverMismatch("i915"))?;

        log::debug!("CPU blit {:?}", copy);

        let src_span = copy.src_span()?;
        let dst_span = copy.dst_span()?;

        i915.set_domain(copy.src_handle, Domain::Cpu, None)?;
        i915.set_domain(copy.dst_handle, Domain::Cpu, Some(Domain::Cpu))?;

        let src = i915.mmap_cpu(copy.src_handle, src_span)?;
        let dst = match i915.mmap_cpu(copy.dst_handle, dst_span) {
            Ok(dst) => dst,
            Err(err) => {
                if let Err(unmap) = control.munmap(src, src_span) {
                    log::error!("Failed to unmap blit source {}: {}", copy.src_handle, unmap);
                }
                return Err(err);
            }
        };

        let ret = copy_pixels(src, dst, copy);

        let src_unmap = control.munmap(src, src_span);
        let dst_unmap = control.munmap(dst, dst_span);
        ret.and(src_unmap).and(dst_unmap)
    }
}

fn copy_pixels(src: NonNull<u8>, dst: NonNull<u8>, copy: &BlitCopy) -> Result<()> {
    let cpp = copy.cpp as usize;

    for row in 0..copy.height as usize {
        for column in 0..copy.width as usize {
            let src_offset = tiled_offset(
                copy.gen,
                copy.src_tiling,
                copy.src_pitch as usize,
                (copy.src_x as usize + column) * cpp,
                copy.src_y as usize + row,
            )?;
            let dst_offset = tiled_offset(
                copy.gen,
                copy.dst_tiling,
                copy.dst_pitch as usize,
                (copy.dst_x as usize + column) * cpp,
                copy.dst_y as usize + row,
            )?;
            // SAFETY: both mappings span every row of the rectangle rounded up to whole tiles,
            // and a pixel never straddles a 16 byte tile column.
            unsafe {
                std::ptr::copy(
                    src.as_ptr().add(src_offset),
                    dst.as_ptr().add(dst_offset),
                    cpp,
                );
            }
        }
    }

    Ok(())
}
