// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use drm_fourcc::DrmModifier;

use crate::bo::i915::new_tiled_bo;
use crate::device::Device;
use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::framebuffer::FramebufferPlane;
use crate::framebuffer::PlaneMapper;
use crate::Fourcc;

/// Creates a single-plane i915 framebuffer. Linear maps of tiled layouts go through the BO's
/// shadow, so the plane pitch is valid for both views.
pub fn new_framebuffer(
    device: &Rc<Device>,
    width: u32,
    height: u32,
    format: Fourcc,
    modifier: DrmModifier,
) -> Result<Rc<Framebuffer>> {
    let (bo, pitch) = new_tiled_bo(device, width, height, format, modifier)?;
    let planes = vec![FramebufferPlane { bo, pitch, offset: 0 }];
    Framebuffer::new(device, width, height, format, modifier, planes, Box::new(PlaneMapper))
}

#[cfg(test)]
mod tests {
    use drm_fourcc::DrmFourcc;

    use super::*;
    use crate::device::dummy::DummyDriver;
    use crate::device::Driver;
    use crate::error::Error;
    use crate::tiling::i915::I915_FORMAT_MOD_YF_TILED;

    #[test]
    fn tiled_framebuffer_linear_round_trip() {
        let dummy = DummyDriver::new(Driver::I915);
        let device = dummy.clone().into_device();
        let format = Fourcc::from(DrmFourcc::Argb8888);
        let fb = device.new_framebuffer(200, 50, format, DrmModifier::I915_x_tiled).unwrap();

        let cmd = dummy.framebuffer(fb.id()).unwrap();
        assert_eq!(cmd.pitches[0], 1024);
        assert_eq!(cmd.modifiers, Some([u64::from(DrmModifier::I915_x_tiled), 0, 0, 0]));

        fb.map(true).unwrap();
        let pitch = fb.plane_pitch(0).unwrap() as usize;
        fb.with_plane_mut(0, |bytes| {
            for y in 0..50 {
                bytes[y * pitch..][..800].fill(y as u8);
            }
        })
        .unwrap();
        fb.unmap().unwrap();

        fb.map(true).unwrap();
        let rows_match = fb
            .with_plane(0, |bytes| {
                (0..50).all(|y| bytes[y * pitch..][..800].iter().all(|b| *b == y as u8))
            })
            .unwrap();
        assert!(rows_match);
        fb.unmap().unwrap();

        // X tiles hold 8 rows of 512 bytes.
        let tiled = dummy.contents(fb.planes()[0].bo.handle()).unwrap();
        assert_eq!(tiled[512], 1);
        assert_eq!(tiled[2 * 4096], 8);
    }

    #[test]
    fn yf_is_rejected_by_the_kernel_interface() {
        let device = DummyDriver::new(Driver::I915).into_device();
        let format = Fourcc::from(DrmFourcc::Xrgb8888);
        let err = new_framebuffer(&device, 64, 64, format, I915_FORMAT_MOD_YF_TILED).unwrap_err();
        assert!(matches!(err, Error::Ioctl { .. }));
    }
}
