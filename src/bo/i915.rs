// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! i915 GEM buffer objects.
//!
//! Tiled objects get a linear shadow object at construction. A linear map blits the tiled
//! content into the shadow and maps that; the matching unmap blits it back.

use std::rc::Rc;

use drm_fourcc::DrmModifier;

use crate::bo::Bo;
use crate::bo::BoBackend;
use crate::bo::Mapping;
use crate::device::Device;
use crate::device::Domain;
use crate::device::I915Control;
use crate::error::Error;
use crate::error::Result;
use crate::format::format_info;
use crate::tiling::i915::calc_fb_size;
use crate::tiling::i915::modifier_to_tiling;
use crate::tiling::i915::BlitCopy;
use crate::tiling::i915::I915Tiling;
use crate::Fourcc;

#[derive(Debug)]
struct Layout {
    gen: u32,
    width: u32,
    height: u32,
    cpp: u32,
    stride: u32,
}

#[derive(Debug)]
pub struct I915Bo {
    tiling: I915Tiling,
    layout: Option<Layout>,
    shadow: Option<Rc<Bo>>,
}

impl I915Bo {
    fn blit(&self, i915: &dyn I915Control, src: &Bo, dst: &Bo, to_shadow: bool) -> Result<()> {
        let layout = self.layout.as_ref().ok_or(Error::Unsupported("blit of an untiled BO"))?;
        let (src_tiling, dst_tiling) = if to_shadow {
            (self.tiling, I915Tiling::None)
        } else {
            (I915Tiling::None, self.tiling)
        };

        // The shadow shares the tiled stride, so one pitch fits both sides.
        i915.blit(&BlitCopy {
            gen: layout.gen,
            src_handle: src.handle(),
            src_pitch: layout.stride,
            src_tiling,
            src_x: 0,
            src_y: 0,
            width: layout.width,
            height: layout.height,
            dst_handle: dst.handle(),
            dst_pitch: layout.stride,
            dst_tiling,
            dst_x: 0,
            dst_y: 0,
            cpp: layout.cpp,
        })?;
        i915.wait(dst.handle())
    }
}

impl BoBackend for I915Bo {
    fn map(&self, bo: &Bo, linear: bool) -> Result<Mapping> {
        let i915 = bo.device().i915()?;

        match (&self.shadow, linear) {
            (Some(shadow), true) => {
                self.blit(i915, bo, shadow, true)?;
                i915.set_domain(shadow.handle(), Domain::Cpu, Some(Domain::Cpu))?;
                let ptr = i915.mmap_cpu(shadow.handle(), shadow.size())?;
                Ok(Mapping::new(ptr, shadow.size()))
            }
            _ => {
                i915.set_domain(bo.handle(), Domain::Gtt, Some(Domain::Gtt))?;
                let ptr = i915.mmap_gtt(bo.handle(), bo.size())?;
                Ok(Mapping::new(ptr, bo.size()))
            }
        }
    }

    fn unmap(&self, bo: &Bo, mapping: Mapping, linear: bool) -> Result<()> {
        let device = bo.device();

        // The shadow view stays mapped until its content is back in the tiled object.
        if let (Some(shadow), true) = (&self.shadow, linear) {
            let i915 = device.i915()?;
            i915.set_domain(shadow.handle(), Domain::Gtt, None)?;
            self.blit(i915, shadow, bo, false)?;
        }

        device.control().munmap(mapping.ptr(), mapping.len())
    }

    fn destroy(&self, bo: &Bo) -> Result<()> {
        // The shadow reference goes with the backend, right after this.
        bo.device().control().gem_close(bo.handle())
    }
}

/// Allocates an untiled object of `size` bytes.
pub fn new_bo(device: &Rc<Device>, size: usize) -> Result<Rc<Bo>> {
    let handle = device.i915()?.create(size)?;
    let backend = I915Bo { tiling: I915Tiling::None, layout: None, shadow: None };
    Ok(Bo::new(device, handle, size, Box::new(backend)))
}

/// Allocates an object holding a `width`x`height` image of `format` laid out as `modifier`.
///
/// Returns the object and its stride in bytes.
pub fn new_tiled_bo(
    device: &Rc<Device>,
    width: u32,
    height: u32,
    format: Fourcc,
    modifier: DrmModifier,
) -> Result<(Rc<Bo>, u32)> {
    let info = format_info(format).ok_or(Error::UnsupportedFormat(format))?;
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    let tiling = modifier_to_tiling(modifier)?;
    let bpp = info.bpp(0);
    let (size, stride) = calc_fb_size(device.options().i915_gen, width, height, bpp, tiling)?;

    let i915 = device.i915()?;
    let handle = i915.create(size as usize)?;

    let shadow = match tiled_setup(device, handle, tiling, stride, height) {
        Ok(shadow) => shadow,
        Err(e) => {
            if let Err(close) = device.control().gem_close(handle) {
                log::error!("Failed to close i915 BO {}: {}", handle, close);
            }
            return Err(e);
        }
    };

    log::debug!("i915 BO {} is {:?} tiled with stride {}", handle, tiling, stride);

    let gen = device.options().i915_gen;
    let layout = Layout { gen, width, height, cpp: bpp / 8, stride };
    let backend = I915Bo { tiling, layout: Some(layout), shadow };
    Ok((Bo::new(device, handle, size as usize, Box::new(backend)), stride))
}

fn tiled_setup(
    device: &Rc<Device>,
    handle: u32,
    tiling: I915Tiling,
    stride: u32,
    height: u32,
) -> Result<Option<Rc<Bo>>> {
    if tiling == I915Tiling::None {
        return Ok(None);
    }
    device.i915()?.set_tiling(handle, tiling, stride)?;
    new_bo(device, stride as usize * height as usize).map(Some)
}

#[cfg(test)]
mod tests {
    use drm_fourcc::DrmFourcc;

    use super::*;
    use crate::device::dummy::DummyDriver;
    use crate::device::Driver;
    use crate::tiling::i915::tiled_offset;
    use crate::tiling::i915::I915_FORMAT_MOD_YF_TILED;

    fn i915_device() -> (DummyDriver, Rc<Device>) {
        let dummy = DummyDriver::new(Driver::I915);
        let device = dummy.clone().into_device();
        (dummy, device)
    }

    fn xrgb() -> Fourcc {
        Fourcc::from(DrmFourcc::Xrgb8888)
    }

    fn write_pixels(mapping: Mapping, stride: usize, width: usize, height: usize) {
        // SAFETY: the mapping covers `height` rows of `stride` bytes.
        let bytes =
            unsafe { std::slice::from_raw_parts_mut(mapping.ptr().as_ptr(), mapping.len()) };
        for y in 0..height {
            for x in 0..width {
                let value = ((y * width + x) as u32).to_le_bytes();
                bytes[y * stride + x * 4..][..4].copy_from_slice(&value);
            }
        }
    }

    #[test]
    fn tiled_bo_gets_a_shadow_and_tiling() {
        let (dummy, device) = i915_device();
        let (bo, stride) =
            new_tiled_bo(&device, 100, 40, xrgb(), DrmModifier::I915_x_tiled).unwrap();
        assert_eq!(stride, 512);
        assert_eq!(bo.size(), 512 * 40);
        assert_eq!(dummy.tiling(bo.handle()), Some((I915Tiling::X, 512)));
        // The tiled object and its shadow.
        assert_eq!(dummy.live_objects(), 2);

        drop(bo);
        assert_eq!(dummy.live_objects(), 0);
    }

    #[test]
    fn linear_modifier_has_no_shadow() {
        let (dummy, device) = i915_device();
        let (bo, stride) = new_tiled_bo(&device, 16, 16, xrgb(), DrmModifier::Linear).unwrap();
        assert_eq!(stride, 64);
        assert_eq!(dummy.live_objects(), 1);

        bo.map(true).unwrap();
        assert_eq!(dummy.domains(bo.handle()), Some((Domain::Gtt, Some(Domain::Gtt))));
        bo.unmap().unwrap();
        assert_eq!(dummy.blit_count(), 0);
    }

    #[test]
    fn linear_view_round_trips_through_the_shadow() {
        let (dummy, device) = i915_device();
        let (bo, stride) =
            new_tiled_bo(&device, 64, 40, xrgb(), DrmModifier::I915_y_tiled).unwrap();
        let stride = stride as usize;

        let mapping = bo.map(true).unwrap();
        assert_eq!(dummy.blit_count(), 1);
        write_pixels(mapping, stride, 64, 40);
        bo.unmap().unwrap();
        assert_eq!(dummy.blit_count(), 2);
        assert_eq!(dummy.waited_handles().last(), Some(&bo.handle()));

        // The tiled storage holds each pixel at its Y-tiled address.
        let tiled = dummy.contents(bo.handle()).unwrap();
        for (x, y) in [(0usize, 0usize), (3, 0), (4, 0), (63, 7), (10, 39)] {
            let offset = tiled_offset(9, I915Tiling::Y, stride, x * 4, y).unwrap();
            let value = u32::from_le_bytes(tiled[offset..offset + 4].try_into().unwrap());
            assert_eq!(value as usize, y * 64 + x, "pixel ({x}, {y})");
        }

        // And a new linear view reads it back.
        let mapping = bo.map(true).unwrap();
        // SAFETY: the mapping is live until the unmap below.
        let bytes = unsafe { std::slice::from_raw_parts(mapping.ptr().as_ptr(), mapping.len()) };
        let value = u32::from_le_bytes(bytes[39 * stride + 10 * 4..][..4].try_into().unwrap());
        assert_eq!(value, 39 * 64 + 10);
        bo.unmap().unwrap();
    }

    #[test]
    fn native_view_maps_the_aperture() {
        let (dummy, device) = i915_device();
        let (bo, _) = new_tiled_bo(&device, 64, 8, xrgb(), DrmModifier::I915_x_tiled).unwrap();

        bo.map(false).unwrap();
        assert_eq!(dummy.blit_count(), 0);
        assert_eq!(dummy.domains(bo.handle()), Some((Domain::Gtt, Some(Domain::Gtt))));
        assert!(matches!(bo.map(true), Err(Error::LinearityMismatch { current: false })));
        bo.unmap().unwrap();
        assert_eq!(dummy.live_mappings(), 0);
    }

    #[test]
    fn failed_tiling_setup_releases_the_object() {
        let (dummy, device) = i915_device();
        // Yf cannot be applied by the kernel interface.
        let err = new_tiled_bo(&device, 64, 64, xrgb(), I915_FORMAT_MOD_YF_TILED).unwrap_err();
        assert!(matches!(err, Error::Ioctl { .. }));
        assert_eq!(dummy.live_objects(), 0);
        assert_eq!(dummy.closed_handles().len(), 1);
    }

    #[test]
    fn failed_write_back_keeps_the_linear_view() {
        let (dummy, device) = i915_device();
        let (bo, stride) = new_tiled_bo(&device, 64, 8, xrgb(), DrmModifier::I915_x_tiled).unwrap();

        let mapping = bo.map(true).unwrap();
        write_pixels(mapping, stride as usize, 64, 8);
        dummy.fail_maps_of(bo.handle());

        assert!(matches!(bo.unmap(), Err(Error::Ioctl { op: "I915_GEM_MMAP", .. })));
        assert!(bo.is_mapped());
        assert_eq!(bo.mapping().map(|(m, _)| m.ptr()), Some(mapping.ptr()));
        assert_eq!(dummy.live_mappings(), 1);

        dummy.clear_failures();
        assert_eq!(bo.unmap().unwrap(), 0);
        assert!(!bo.is_mapped());
        assert_eq!(dummy.live_mappings(), 0);

        let tiled = dummy.contents(bo.handle()).unwrap();
        let offset = tiled_offset(9, I915Tiling::X, stride as usize, 5 * 4, 7).unwrap();
        let value = u32::from_le_bytes(tiled[offset..offset + 4].try_into().unwrap());
        assert_eq!(value, 7 * 64 + 5);
    }

    #[test]
    fn needs_an_i915_device() {
        let device = DummyDriver::new(Driver::Vc4).into_device();
        assert!(matches!(new_bo(&device, 4096), Err(Error::DriverMismatch("i915"))));
    }
}
