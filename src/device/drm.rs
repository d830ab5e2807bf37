// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Driver control through a `/dev/dri` node.

use std::ffi::c_char;
use std::fs::File;
use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use drm_fourcc::DrmModifier;
use nix::errno::Errno;
use nix::ioctl_readwrite;
use nix::ioctl_write_ptr;
use nix::libc;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;

use crate::device::Domain;
use crate::device::Driver;
use crate::device::DriverControl;
use crate::device::DumbAllocation;
use crate::device::FramebufferCommand;
use crate::device::I915Control;
use crate::device::Vc4Control;
use crate::error::Error;
use crate::error::Result;
use crate::format::MAX_PLANES;
use crate::tiling::i915::BlitCopy;
use crate::tiling::i915::Blitter;
use crate::tiling::i915::CpuBlitter;
use crate::tiling::i915::I915Tiling;
use crate::utils::handle_eintr;

// UNSAFE: every ioctl below passes a pointer to a repr(C) struct matching the kernel uAPI layout
// of the same request, and the fd stays open for as long as the DrmDevice lives. Mappings are
// handed out as raw pointers; the buffer object layer owns their lifetime.

// Defined in include/uapi/drm/drm.h and drm_mode.h
const DRM_IOCTL_BASE: u8 = b'd';
const DRM_COMMAND_BASE: u8 = 0x40;
const DRM_CAP_ADDFB2_MODIFIERS: u64 = 0x10;
const DRM_MODE_FB_MODIFIERS: u32 = 1 << 1;

#[repr(C)]
struct drm_version {
    version_major: i32,
    version_minor: i32,
    version_patchlevel: i32,
    name_len: usize,
    name: *mut c_char,
    date_len: usize,
    date: *mut c_char,
    desc_len: usize,
    desc: *mut c_char,
}
ioctl_readwrite!(drm_ioctl_version, DRM_IOCTL_BASE, 0x00, drm_version);

#[repr(C)]
#[derive(Default)]
struct drm_gem_close {
    handle: u32,
    pad: u32,
}
ioctl_write_ptr!(drm_ioctl_gem_close, DRM_IOCTL_BASE, 0x09, drm_gem_close);

#[repr(C)]
#[derive(Default)]
struct drm_get_cap {
    capability: u64,
    value: u64,
}
ioctl_readwrite!(drm_ioctl_get_cap, DRM_IOCTL_BASE, 0x0c, drm_get_cap);

ioctl_readwrite!(drm_ioctl_mode_rmfb, DRM_IOCTL_BASE, 0xaf, u32);

#[repr(C)]
#[derive(Default)]
struct drm_mode_create_dumb {
    height: u32,
    width: u32,
    bpp: u32,
    flags: u32,
    handle: u32,
    pitch: u32,
    size: u64,
}
ioctl_readwrite!(drm_ioctl_mode_create_dumb, DRM_IOCTL_BASE, 0xb2, drm_mode_create_dumb);

#[repr(C)]
#[derive(Default)]
struct drm_mode_map_dumb {
    handle: u32,
    pad: u32,
    offset: u64,
}
ioctl_readwrite!(drm_ioctl_mode_map_dumb, DRM_IOCTL_BASE, 0xb3, drm_mode_map_dumb);

#[repr(C)]
#[derive(Default)]
struct drm_mode_destroy_dumb {
    handle: u32,
}
ioctl_readwrite!(drm_ioctl_mode_destroy_dumb, DRM_IOCTL_BASE, 0xb4, drm_mode_destroy_dumb);

#[repr(C)]
#[derive(Default)]
struct drm_mode_fb_cmd2 {
    fb_id: u32,
    width: u32,
    height: u32,
    pixel_format: u32,
    flags: u32,
    handles: [u32; MAX_PLANES],
    pitches: [u32; MAX_PLANES],
    offsets: [u32; MAX_PLANES],
    modifier: [u64; MAX_PLANES],
}
ioctl_readwrite!(drm_ioctl_mode_addfb2, DRM_IOCTL_BASE, 0xb8, drm_mode_fb_cmd2);

// Defined in include/uapi/drm/i915_drm.h
#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_create {
    size: u64,
    handle: u32,
    pad: u32,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_create,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x1b,
    drm_i915_gem_create
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_mmap {
    handle: u32,
    pad: u32,
    offset: u64,
    size: u64,
    addr_ptr: u64,
    flags: u64,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_mmap,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x1e,
    drm_i915_gem_mmap
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_set_domain {
    handle: u32,
    read_domains: u32,
    write_domain: u32,
}
ioctl_write_ptr!(
    drm_ioctl_i915_gem_set_domain,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x1f,
    drm_i915_gem_set_domain
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_set_tiling {
    handle: u32,
    tiling_mode: u32,
    stride: u32,
    swizzle_mode: u32,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_set_tiling,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x21,
    drm_i915_gem_set_tiling
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_get_tiling {
    handle: u32,
    tiling_mode: u32,
    swizzle_mode: u32,
    phys_swizzle_mode: u32,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_get_tiling,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x22,
    drm_i915_gem_get_tiling
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_mmap_gtt {
    handle: u32,
    pad: u32,
    offset: u64,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_mmap_gtt,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x24,
    drm_i915_gem_mmap_gtt
);

#[repr(C)]
#[derive(Default)]
struct drm_i915_gem_wait {
    bo_handle: u32,
    flags: u32,
    timeout_ns: i64,
}
ioctl_readwrite!(
    drm_ioctl_i915_gem_wait,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x2c,
    drm_i915_gem_wait
);

// Defined in include/uapi/drm/vc4_drm.h
#[repr(C)]
#[derive(Default)]
struct drm_vc4_create_bo {
    size: u32,
    flags: u32,
    handle: u32,
    pad: u32,
}
ioctl_readwrite!(
    drm_ioctl_vc4_create_bo,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x03,
    drm_vc4_create_bo
);

#[repr(C)]
#[derive(Default)]
struct drm_vc4_mmap_bo {
    handle: u32,
    flags: u32,
    offset: u64,
}
ioctl_readwrite!(drm_ioctl_vc4_mmap_bo, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x04, drm_vc4_mmap_bo);

#[repr(C)]
#[derive(Default)]
struct drm_vc4_set_tiling {
    handle: u32,
    flags: u32,
    modifier: u64,
}
ioctl_write_ptr!(
    drm_ioctl_vc4_set_tiling,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x08,
    drm_vc4_set_tiling
);

/// An open DRM device node.
#[derive(Debug)]
pub struct DrmDevice {
    file: File,
    driver: Driver,
    blitter: Box<dyn Blitter>,
}

impl DrmDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let driver = Driver::from_name(&driver_name(&file)?);

        Ok(Self { file, driver, blitter: Box::new(CpuBlitter) })
    }

    /// Replaces the blitter used for i915 tiled/linear copies.
    pub fn with_blitter(mut self, blitter: Box<dyn Blitter>) -> Self {
        self.blitter = blitter;
        self
    }

    fn fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    fn mmap_offset(&self, op: &'static str, size: usize, offset: u64) -> Result<NonNull<u8>> {
        let len = NonZeroUsize::new(size).ok_or(Error::ioctl(op, Errno::EINVAL))?;
        let ptr = handle_eintr(op, &mut || unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.file,
                offset as libc::off_t,
            )
        })?;
        Ok(ptr.cast())
    }
}

fn driver_name(file: &File) -> Result<String> {
    let mut name = [0u8; 64];
    let mut version = drm_version {
        version_major: 0,
        version_minor: 0,
        version_patchlevel: 0,
        name_len: name.len(),
        name: name.as_mut_ptr() as *mut c_char,
        date_len: 0,
        date: std::ptr::null_mut(),
        desc_len: 0,
        desc: std::ptr::null_mut(),
    };
    handle_eintr("VERSION", &mut || unsafe {
        drm_ioctl_version(file.as_raw_fd(), &mut version)
    })?;

    let len = version.name_len.min(name.len());
    Ok(String::from_utf8_lossy(&name[..len]).into_owned())
}

impl DriverControl for DrmDevice {
    fn driver(&self) -> Driver {
        self.driver.clone()
    }

    fn supports_fb_modifiers(&self) -> Result<bool> {
        let mut cap = drm_get_cap { capability: DRM_CAP_ADDFB2_MODIFIERS, value: 0 };
        let ret =
            handle_eintr("GET_CAP", &mut || unsafe { drm_ioctl_get_cap(self.fd(), &mut cap) });
        match ret {
            Ok(_) => Ok(cap.value != 0),
            // Kernels that predate the capability reject the query.
            Err(Error::Ioctl { errno: Errno::EINVAL, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbAllocation> {
        let mut create = drm_mode_create_dumb { width, height, bpp, ..Default::default() };
        handle_eintr("CREATE_DUMB", &mut || unsafe {
            drm_ioctl_mode_create_dumb(self.fd(), &mut create)
        })?;

        Ok(DumbAllocation { handle: create.handle, pitch: create.pitch, size: create.size })
    }

    fn destroy_dumb(&self, handle: u32) -> Result<()> {
        let mut destroy = drm_mode_destroy_dumb { handle };
        handle_eintr("DESTROY_DUMB", &mut || unsafe {
            drm_ioctl_mode_destroy_dumb(self.fd(), &mut destroy)
        })?;
        Ok(())
    }

    fn map_dumb(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        let mut map = drm_mode_map_dumb { handle, ..Default::default() };
        handle_eintr("MAP_DUMB", &mut || unsafe { drm_ioctl_mode_map_dumb(self.fd(), &mut map) })?;
        self.mmap_offset("MAP_DUMB", size, map.offset)
    }

    fn gem_close(&self, handle: u32) -> Result<()> {
        let close = drm_gem_close { handle, pad: 0 };
        handle_eintr("GEM_CLOSE", &mut || unsafe { drm_ioctl_gem_close(self.fd(), &close) })?;
        Ok(())
    }

    fn munmap(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        handle_eintr("munmap", &mut || unsafe { munmap(ptr.cast(), size) })
    }

    fn add_framebuffer(&self, cmd: &FramebufferCommand) -> Result<u32> {
        let mut fb = drm_mode_fb_cmd2 {
            width: cmd.width,
            height: cmd.height,
            pixel_format: cmd.format.into(),
            handles: cmd.handles,
            pitches: cmd.pitches,
            offsets: cmd.offsets,
            ..Default::default()
        };
        if let Some(modifiers) = cmd.modifiers {
            fb.flags = DRM_MODE_FB_MODIFIERS;
            fb.modifier = modifiers;
        }
        handle_eintr("ADDFB2", &mut || unsafe { drm_ioctl_mode_addfb2(self.fd(), &mut fb) })?;
        Ok(fb.fb_id)
    }

    fn remove_framebuffer(&self, id: u32) -> Result<()> {
        let mut id = id;
        handle_eintr("RMFB", &mut || unsafe { drm_ioctl_mode_rmfb(self.fd(), &mut id) })?;
        Ok(())
    }

    fn i915(&self) -> Option<&dyn I915Control> {
        match self.driver {
            Driver::I915 => Some(self),
            _ => None,
        }
    }

    fn vc4(&self) -> Option<&dyn Vc4Control> {
        match self.driver {
            Driver::Vc4 => Some(self),
            _ => None,
        }
    }
}

impl I915Control for DrmDevice {
    fn create(&self, size: usize) -> Result<u32> {
        let mut create = drm_i915_gem_create { size: size as u64, ..Default::default() };
        handle_eintr("I915_GEM_CREATE", &mut || unsafe {
            drm_ioctl_i915_gem_create(self.fd(), &mut create)
        })?;
        Ok(create.handle)
    }

    fn set_tiling(&self, handle: u32, tiling: I915Tiling, stride: u32) -> Result<()> {
        let mut set = drm_i915_gem_set_tiling {
            handle,
            tiling_mode: tiling as u32,
            stride,
            ..Default::default()
        };
        handle_eintr("I915_GEM_SET_TILING", &mut || unsafe {
            drm_ioctl_i915_gem_set_tiling(self.fd(), &mut set)
        })?;

        // The kernel reports the tiling it actually applied.
        if I915Tiling::n(set.tiling_mode) != Some(tiling) {
            log::error!("Asked for {:?} tiling, kernel applied mode {}", tiling, set.tiling_mode);
            return Err(Error::Unsupported("requested tiling not applied"));
        }
        Ok(())
    }

    fn get_tiling(&self, handle: u32) -> Result<I915Tiling> {
        let mut get = drm_i915_gem_get_tiling { handle, ..Default::default() };
        handle_eintr("I915_GEM_GET_TILING", &mut || unsafe {
            drm_ioctl_i915_gem_get_tiling(self.fd(), &mut get)
        })?;
        I915Tiling::n(get.tiling_mode).ok_or(Error::Unsupported("unknown tiling mode"))
    }

    fn set_domain(&self, handle: u32, read: Domain, write: Option<Domain>) -> Result<()> {
        let set = drm_i915_gem_set_domain {
            handle,
            read_domains: read.bits(),
            write_domain: write.map_or(0, Domain::bits),
        };
        handle_eintr("I915_GEM_SET_DOMAIN", &mut || unsafe {
            drm_ioctl_i915_gem_set_domain(self.fd(), &set)
        })?;
        Ok(())
    }

    fn mmap_gtt(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        let mut map = drm_i915_gem_mmap_gtt { handle, ..Default::default() };
        handle_eintr("I915_GEM_MMAP_GTT", &mut || unsafe {
            drm_ioctl_i915_gem_mmap_gtt(self.fd(), &mut map)
        })?;
        self.mmap_offset("I915_GEM_MMAP_GTT", size, map.offset)
    }

    fn mmap_cpu(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        let mut map = drm_i915_gem_mmap { handle, size: size as u64, ..Default::default() };
        handle_eintr("I915_GEM_MMAP", &mut || unsafe {
            drm_ioctl_i915_gem_mmap(self.fd(), &mut map)
        })?;
        NonNull::new(map.addr_ptr as *mut u8).ok_or(Error::ioctl("I915_GEM_MMAP", Errno::EFAULT))
    }

    fn wait(&self, handle: u32) -> Result<()> {
        let mut wait = drm_i915_gem_wait { bo_handle: handle, flags: 0, timeout_ns: -1 };
        handle_eintr("I915_GEM_WAIT", &mut || unsafe {
            drm_ioctl_i915_gem_wait(self.fd(), &mut wait)
        })?;
        Ok(())
    }

    fn blit(&self, copy: &BlitCopy) -> Result<()> {
        self.blitter.copy(self, copy)
    }
}

impl Vc4Control for DrmDevice {
    fn create(&self, size: usize) -> Result<u32> {
        let size = u32::try_from(size).map_err(|_| Error::ioctl("VC4_CREATE_BO", Errno::E2BIG))?;
        let mut create = drm_vc4_create_bo { size, ..Default::default() };
        handle_eintr("VC4_CREATE_BO", &mut || unsafe {
            drm_ioctl_vc4_create_bo(self.fd(), &mut create)
        })?;
        Ok(create.handle)
    }

    fn mmap(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        let mut map = drm_vc4_mmap_bo { handle, ..Default::default() };
        handle_eintr("VC4_MMAP_BO", &mut || unsafe { drm_ioctl_vc4_mmap_bo(self.fd(), &mut map) })?;
        self.mmap_offset("VC4_MMAP_BO", size, map.offset)
    }

    fn set_tiling(&self, handle: u32, modifier: DrmModifier) -> Result<()> {
        let set = drm_vc4_set_tiling { handle, flags: 0, modifier: modifier.into() };
        handle_eintr("VC4_SET_TILING", &mut || unsafe {
            drm_ioctl_vc4_set_tiling(self.fd(), &set)
        })?;
        Ok(())
    }
}
