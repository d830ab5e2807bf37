// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VC4 framebuffers.
//!
//! A linear map of a T-tiled framebuffer maps the tiled BO as stored, detiles it into a dumb
//! shadow buffer and hands out the shadow. Unmapping tiles the shadow back and frees it.

use std::cell::RefCell;
use std::rc::Rc;

use drm_fourcc::DrmModifier;

use crate::bo::new_dumb_bo;
use crate::bo::vc4::new_bo;
use crate::bo::Bo;
use crate::bo::Mapping;
use crate::device::Device;
use crate::error::Error;
use crate::error::Result;
use crate::format::format_info;
use crate::framebuffer::map_planes;
use crate::framebuffer::unmap_planes;
use crate::framebuffer::Framebuffer;
use crate::framebuffer::FramebufferBackend;
use crate::framebuffer::FramebufferPlane;
use crate::framebuffer::PlaneMapping;
use crate::tiling::vc4::linear_to_tiled;
use crate::tiling::vc4::tiled_to_linear;
use crate::tiling::vc4::TGeometry;
use crate::tiling::vc4::BYTES_PER_PIXEL;
use crate::utils::align_up;
use crate::Fourcc;

#[derive(Debug)]
struct Shadow {
    bo: Rc<Bo>,
    pitch: u32,
}

#[derive(Debug, Default)]
pub struct Vc4Framebuffer {
    shadow: RefCell<Option<Shadow>>,
}

// SAFETY: callers pass live mappings that do not overlap.
unsafe fn as_slices<'a>(tiled: Mapping, linear: Mapping) -> (&'a mut [u8], &'a mut [u8]) {
    (
        std::slice::from_raw_parts_mut(tiled.ptr().as_ptr(), tiled.len()),
        std::slice::from_raw_parts_mut(linear.ptr().as_ptr(), linear.len()),
    )
}

impl Vc4Framebuffer {
    fn uses_shadow(fb: &Framebuffer, linear: bool) -> bool {
        linear && fb.modifier() == DrmModifier::Broadcom_vc4_t_tiled
    }

    fn map_shadow(&self, fb: &Framebuffer, tiled: Mapping) -> Result<PlaneMapping> {
        let (bo, pitch) = new_dumb_bo(fb.device(), fb.width(), fb.height(), fb.format().fourcc, 0)?;
        let mapping = bo.map(true)?;

        // SAFETY: both BOs are mapped and distinct.
        let (src, dst) = unsafe { as_slices(tiled, mapping) };
        tiled_to_linear(dst, pitch as usize, src, fb.width() as usize, fb.height() as usize);

        log::debug!("Detiled framebuffer {} into shadow BO {}", fb.id(), bo.handle());
        *self.shadow.borrow_mut() = Some(Shadow { bo, pitch });
        Ok(PlaneMapping { mapping, pitch })
    }

    fn retile(&self, fb: &Framebuffer, shadow: &Shadow) -> Result<()> {
        let tiled_bo = &fb.planes()[0].bo;
        let (tiled, _) = tiled_bo.mapping().ok_or(Error::NotMapped)?;
        let (linear, _) = shadow.bo.mapping().ok_or(Error::NotMapped)?;

        // SAFETY: both BOs are mapped and distinct.
        let (dst, src) = unsafe { as_slices(tiled, linear) };
        linear_to_tiled(dst, src, shadow.pitch as usize, fb.width() as usize, fb.height() as usize);

        log::debug!("Tiled shadow BO {} back into framebuffer {}", shadow.bo.handle(), fb.id());
        Ok(())
    }
}

impl FramebufferBackend for Vc4Framebuffer {
    fn map(&self, fb: &Framebuffer, linear: bool) -> Result<Vec<PlaneMapping>> {
        if !Self::uses_shadow(fb, linear) {
            return map_planes(fb.planes(), linear);
        }

        let tiled_bo = &fb.planes()[0].bo;
        let tiled = tiled_bo.map(false)?;
        match self.map_shadow(fb, tiled) {
            Ok(mapping) => Ok(vec![mapping]),
            Err(e) => {
                if let Err(unmap) = tiled_bo.unmap() {
                    log::error!("Failed to unmap BO {}: {}", tiled_bo.handle(), unmap);
                }
                Err(e)
            }
        }
    }

    fn unmap(&self, fb: &Framebuffer, linear: bool) -> Result<()> {
        if !Self::uses_shadow(fb, linear) {
            return unmap_planes(fb.planes());
        }

        let shadow = self.shadow.borrow_mut().take().ok_or(Error::NotMapped)?;

        // The shadow stays mapped until the tiled BO is unmapped.
        let unmapped = self.retile(fb, &shadow).and_then(|_| fb.planes()[0].bo.unmap());
        if let Err(e) = unmapped {
            *self.shadow.borrow_mut() = Some(shadow);
            return Err(e);
        }

        if let Err(e) = shadow.bo.unmap() {
            log::error!("Failed to unmap shadow BO {}: {}", shadow.bo.handle(), e);
        }
        Ok(())
    }
}

/// Creates a single-plane VC4 framebuffer, linear or T-tiled.
///
/// T-tiled buffers are sized to whole 32x32 tiles and need 32 bits per pixel.
pub fn new_framebuffer(
    device: &Rc<Device>,
    width: u32,
    height: u32,
    format: Fourcc,
    modifier: DrmModifier,
) -> Result<Rc<Framebuffer>> {
    let info = format_info(format).ok_or(Error::UnsupportedFormat(format))?;
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    let cpp = info.cpp[0] as u32;

    let (bo, pitch) = match modifier {
        DrmModifier::Linear => {
            let pitch = align_up(width * cpp, 64);
            (new_bo(device, pitch as usize * height as usize)?, pitch)
        }
        DrmModifier::Broadcom_vc4_t_tiled => {
            if cpp as usize != BYTES_PER_PIXEL {
                return Err(Error::Unsupported("T tiling of formats other than 32 bpp"));
            }
            let geometry = TGeometry::new(width as usize, height as usize);
            let bo = new_bo(device, geometry.size())?;
            device.vc4()?.set_tiling(bo.handle(), modifier)?;
            (bo, geometry.pitch() as u32)
        }
        other => return Err(Error::UnsupportedModifier(other.into())),
    };

    let planes = vec![FramebufferPlane { bo, pitch, offset: 0 }];
    let backend = Box::new(Vc4Framebuffer::default());
    Framebuffer::new(device, width, height, format, modifier, planes, backend)
}
