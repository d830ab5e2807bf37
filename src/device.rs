// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The driver-control surface and the device handle every buffer object and framebuffer hangs
//! off.

use std::fmt;
use std::fmt::Debug;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::rc::Rc;

use drm_fourcc::DrmModifier;

use crate::error::Error;
use crate::error::Result;
use crate::format::MAX_PLANES;
use crate::framebuffer::Framebuffer;
use crate::tiling::i915::BlitCopy;
use crate::tiling::i915::I915Tiling;
use crate::Fourcc;

pub mod drm;
pub mod dummy;

/// Kernel driver behind a device node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Driver {
    I915,
    Vc4,
    Other(String),
}

impl Driver {
    pub fn from_name(name: &str) -> Self {
        match name {
            "i915" => Driver::I915,
            "vc4" => Driver::Vc4,
            other => Driver::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::I915 => f.write_str("i915"),
            Driver::Vc4 => f.write_str("vc4"),
            Driver::Other(name) => f.write_str(name),
        }
    }
}

/// GEM cache domains.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    Cpu,
    Gtt,
}

impl Domain {
    pub fn bits(self) -> u32 {
        match self {
            Domain::Cpu => 0x1,
            Domain::Gtt => 0x40,
        }
    }
}

/// Result of a dumb buffer allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DumbAllocation {
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

/// Everything needed to register a framebuffer with the display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramebufferCommand {
    pub width: u32,
    pub height: u32,
    pub format: Fourcc,
    pub handles: [u32; MAX_PLANES],
    pub pitches: [u32; MAX_PLANES],
    pub offsets: [u32; MAX_PLANES],
    /// Set for every plane when the layout is not linear.
    pub modifiers: Option<[u64; MAX_PLANES]>,
}

/// Driver calls every DRM device offers.
///
/// Failures are driver-call failures: callers are expected to treat them as fatal.
pub trait DriverControl: Debug {
    fn driver(&self) -> Driver;

    fn supports_fb_modifiers(&self) -> Result<bool>;

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbAllocation>;

    fn destroy_dumb(&self, handle: u32) -> Result<()>;

    /// Maps `size` bytes of a dumb buffer for CPU reads and writes.
    fn map_dumb(&self, handle: u32, size: usize) -> Result<NonNull<u8>>;

    fn gem_close(&self, handle: u32) -> Result<()>;

    fn munmap(&self, ptr: NonNull<u8>, size: usize) -> Result<()>;

    fn add_framebuffer(&self, cmd: &FramebufferCommand) -> Result<u32>;

    fn remove_framebuffer(&self, id: u32) -> Result<()>;

    fn i915(&self) -> Option<&dyn I915Control> {
        None
    }

    fn vc4(&self) -> Option<&dyn Vc4Control> {
        None
    }
}

/// i915 GEM calls.
pub trait I915Control {
    fn create(&self, size: usize) -> Result<u32>;

    /// Sets the tiling of `handle`. Fails if the kernel did not apply the requested tiling.
    fn set_tiling(&self, handle: u32, tiling: I915Tiling, stride: u32) -> Result<()>;

    fn get_tiling(&self, handle: u32) -> Result<I915Tiling>;

    fn set_domain(&self, handle: u32, read: Domain, write: Option<Domain>) -> Result<()>;

    /// Maps through the aperture, which presents tiled objects linearly.
    fn mmap_gtt(&self, handle: u32, size: usize) -> Result<NonNull<u8>>;

    /// Maps the backing pages directly.
    fn mmap_cpu(&self, handle: u32, size: usize) -> Result<NonNull<u8>>;

    /// Blocks until all GPU work on `handle` completes. There is no timeout.
    fn wait(&self, handle: u32) -> Result<()>;

    /// Queues a copy; pair it with `wait` on the destination.
    fn blit(&self, copy: &BlitCopy) -> Result<()>;
}

/// VC4 BO calls.
pub trait Vc4Control {
    fn create(&self, size: usize) -> Result<u32>;

    fn mmap(&self, handle: u32, size: usize) -> Result<NonNull<u8>>;

    fn set_tiling(&self, handle: u32, modifier: DrmModifier) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceOptions {
    pub path: PathBuf,
    /// Hardware generation used for i915 stride and size rules.
    pub i915_gen: u32,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self { path: PathBuf::from("/dev/dri/card0"), i915_gen: 9 }
    }
}

impl DeviceOptions {
    /// Defaults overridden by `GEM_FB_DEVICE` and `GEM_FB_I915_GEN`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(path) = std::env::var_os("GEM_FB_DEVICE") {
            options.path = PathBuf::from(path);
        }
        if let Ok(gen) = std::env::var("GEM_FB_I915_GEN") {
            match gen.parse() {
                Ok(gen) => options.i915_gen = gen,
                Err(_) => log::warn!("Ignoring invalid GEM_FB_I915_GEN value {gen:?}"),
            }
        }
        options
    }
}

/// An open driver connection.
#[derive(Debug)]
pub struct Device {
    control: Box<dyn DriverControl>,
    options: DeviceOptions,
}

impl Device {
    /// Opens the DRM node named by `options`.
    pub fn open(options: DeviceOptions) -> Result<Rc<Self>> {
        let control = drm::DrmDevice::open(&options.path)?;
        log::debug!("Opened {} device at {}", control.driver(), options.path.display());
        Ok(Self::with_control(Box::new(control), options))
    }

    pub fn with_control(control: Box<dyn DriverControl>, options: DeviceOptions) -> Rc<Self> {
        Rc::new(Self { control, options })
    }

    pub fn control(&self) -> &dyn DriverControl {
        self.control.as_ref()
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn driver(&self) -> Driver {
        self.control.driver()
    }

    pub fn i915(&self) -> Result<&dyn I915Control> {
        self.control.i915().ok_or(Error::DriverMismatch("i915"))
    }

    pub fn vc4(&self) -> Result<&dyn Vc4Control> {
        self.control.vc4().ok_or(Error::DriverMismatch("vc4"))
    }

    /// Creates a framebuffer with the backend matching this device's driver.
    pub fn new_framebuffer(
        self: &Rc<Self>,
        width: u32,
        height: u32,
        format: Fourcc,
        modifier: DrmModifier,
    ) -> Result<Rc<Framebuffer>> {
        match self.driver() {
            #[cfg(feature = "i915")]
            Driver::I915 => {
                crate::framebuffer::i915::new_framebuffer(self, width, height, format, modifier)
            }
            #[cfg(feature = "vc4")]
            Driver::Vc4 => {
                crate::framebuffer::vc4::new_framebuffer(self, width, height, format, modifier)
            }
            _ => crate::framebuffer::new_dumb_framebuffer(self, width, height, format, modifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dummy::DummyDriver;
    use super::*;

    #[test]
    fn driver_names() {
        assert_eq!(Driver::from_name("i915"), Driver::I915);
        assert_eq!(Driver::from_name("vc4"), Driver::Vc4);
        assert_eq!(Driver::from_name("amdgpu"), Driver::Other("amdgpu".to_string()));
        assert_eq!(Driver::Other("virtio_gpu".to_string()).to_string(), "virtio_gpu");
    }

    #[test]
    fn capability_views_follow_the_driver() {
        let device = DummyDriver::new(Driver::Vc4).into_device();
        assert!(device.vc4().is_ok());
        assert!(matches!(device.i915(), Err(Error::DriverMismatch("i915"))));

        let device = DummyDriver::new(Driver::Other("virtio_gpu".into())).into_device();
        assert!(device.vc4().is_err());
        assert!(device.i915().is_err());
    }

    #[test]
    fn default_options() {
        let options = DeviceOptions::default();
        assert_eq!(options.path, PathBuf::from("/dev/dri/card0"));
        assert_eq!(options.i915_gen, 9);
    }
}
