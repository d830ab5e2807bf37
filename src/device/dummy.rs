// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy driver whose only purpose is to let the buffer and framebuffer
//! code run so we can test it in isolation.
//!
//! Objects live in heap memory. Every mapping of an object returns the same address, and the
//! aperture has no fences, so GTT mappings expose the raw tiled layout. The driver records what
//! was done to it and can be told to fail mappings.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;

use drm_fourcc::DrmModifier;
use nix::errno::Errno;

use crate::device::Device;
use crate::device::DeviceOptions;
use crate::device::Domain;
use crate::device::Driver;
use crate::device::DriverControl;
use crate::device::DumbAllocation;
use crate::device::FramebufferCommand;
use crate::device::I915Control;
use crate::device::Vc4Control;
use crate::error::Error;
use crate::error::Result;
use crate::tiling::i915::BlitCopy;
use crate::tiling::i915::Blitter;
use crate::tiling::i915::CpuBlitter;
use crate::tiling::i915::I915Tiling;
use crate::utils::align_up;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Dumb,
    I915,
    Vc4,
}

#[derive(Debug)]
struct DummyObject {
    kind: ObjectKind,
    memory: NonNull<u8>,
    size: usize,
    map_count: usize,
    tiling: I915Tiling,
    stride: u32,
    vc4_modifier: DrmModifier,
    read_domain: Domain,
    write_domain: Option<Domain>,
}

impl DummyObject {
    fn new(kind: ObjectKind, size: usize) -> Self {
        let memory = Box::into_raw(vec![0u8; size.max(1)].into_boxed_slice());
        Self {
            kind,
            // SAFETY: Box::into_raw never returns null.
            memory: unsafe { NonNull::new_unchecked(memory as *mut u8) },
            size,
            map_count: 0,
            tiling: I915Tiling::None,
            stride: 0,
            vc4_modifier: DrmModifier::Linear,
            read_domain: Domain::Cpu,
            write_domain: Some(Domain::Cpu),
        }
    }
}

impl Drop for DummyObject {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.memory.as_ptr(), self.size.max(1));
        // SAFETY: memory came from Box::into_raw with this exact length.
        drop(unsafe { Box::from_raw(slice) });
    }
}

#[derive(Debug, Default)]
struct DummyState {
    next_handle: u32,
    next_framebuffer: u32,
    objects: HashMap<u32, DummyObject>,
    // Closed while still mapped; freed at the last munmap.
    orphans: Vec<DummyObject>,
    framebuffers: HashMap<u32, FramebufferCommand>,
    failing_maps: HashSet<u32>,
    failing_unmaps: HashSet<u32>,
    closed: Vec<u32>,
    blits: usize,
    waits: Vec<u32>,
}

impl DummyState {
    fn object(&mut self, handle: u32, op: &'static str) -> Result<&mut DummyObject> {
        self.objects.get_mut(&handle).ok_or(Error::ioctl(op, Errno::ENOENT))
    }

    fn insert(&mut self, object: DummyObject) -> u32 {
        self.next_handle += 1;
        self.objects.insert(self.next_handle, object);
        self.next_handle
    }

    fn map(&mut self, handle: u32, size: usize, op: &'static str) -> Result<NonNull<u8>> {
        if self.failing_maps.contains(&handle) {
            return Err(Error::ioctl(op, Errno::EFAULT));
        }
        let object = self.object(handle, op)?;
        if size > object.size {
            return Err(Error::ioctl(op, Errno::EINVAL));
        }
        object.map_count += 1;
        Ok(object.memory)
    }

    fn close(&mut self, handle: u32, op: &'static str) -> Result<()> {
        let object = self.objects.remove(&handle).ok_or(Error::ioctl(op, Errno::ENOENT))?;
        if object.map_count > 0 {
            self.orphans.push(object);
        }
        self.closed.push(handle);
        Ok(())
    }
}

#[derive(Debug)]
struct DummyInner {
    driver: Driver,
    fb_modifiers: RefCell<bool>,
    state: RefCell<DummyState>,
    blitter: CpuBlitter,
}

/// In-memory driver. Clones share the same state, so a test can keep one to inspect what the
/// device it handed out did.
#[derive(Clone, Debug)]
pub struct DummyDriver(Rc<DummyInner>);

impl DummyDriver {
    pub fn new(driver: Driver) -> Self {
        Self(Rc::new(DummyInner {
            driver,
            fb_modifiers: RefCell::new(true),
            state: Default::default(),
            blitter: CpuBlitter,
        }))
    }

    pub fn into_device(self) -> Rc<Device> {
        Device::with_control(Box::new(self), DeviceOptions::default())
    }

    pub fn set_fb_modifiers(&self, supported: bool) {
        *self.0.fb_modifiers.borrow_mut() = supported;
    }

    /// Makes every later mapping of `handle` fail.
    pub fn fail_maps_of(&self, handle: u32) {
        self.0.state.borrow_mut().failing_maps.insert(handle);
    }

    /// Makes every later munmap of a mapping of `handle` fail.
    pub fn fail_unmaps_of(&self, handle: u32) {
        self.0.state.borrow_mut().failing_unmaps.insert(handle);
    }

    pub fn clear_failures(&self) {
        let mut state = self.0.state.borrow_mut();
        state.failing_maps.clear();
        state.failing_unmaps.clear();
    }

    pub fn closed_handles(&self) -> Vec<u32> {
        self.0.state.borrow().closed.clone()
    }

    pub fn live_objects(&self) -> usize {
        self.0.state.borrow().objects.len()
    }

    pub fn live_mappings(&self) -> usize {
        let state = self.0.state.borrow();
        state.objects.values().chain(state.orphans.iter()).map(|o| o.map_count).sum()
    }

    pub fn framebuffer(&self, id: u32) -> Option<FramebufferCommand> {
        self.0.state.borrow().framebuffers.get(&id).cloned()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.0.state.borrow().framebuffers.len()
    }

    pub fn blit_count(&self) -> usize {
        self.0.state.borrow().blits
    }

    pub fn waited_handles(&self) -> Vec<u32> {
        self.0.state.borrow().waits.clone()
    }

    pub fn object_kind(&self, handle: u32) -> Option<ObjectKind> {
        self.0.state.borrow().objects.get(&handle).map(|o| o.kind)
    }

    pub fn tiling(&self, handle: u32) -> Option<(I915Tiling, u32)> {
        self.0.state.borrow().objects.get(&handle).map(|o| (o.tiling, o.stride))
    }

    pub fn vc4_modifier(&self, handle: u32) -> Option<DrmModifier> {
        self.0.state.borrow().objects.get(&handle).map(|o| o.vc4_modifier)
    }

    pub fn domains(&self, handle: u32) -> Option<(Domain, Option<Domain>)> {
        self.0.state.borrow().objects.get(&handle).map(|o| (o.read_domain, o.write_domain))
    }

    /// Copy of the raw storage of `handle`.
    pub fn contents(&self, handle: u32) -> Option<Vec<u8>> {
        let state = self.0.state.borrow();
        let object = state.objects.get(&handle)?;
        let mut contents = vec![0u8; object.size];
        // SAFETY: the object owns `size` bytes at `memory`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                object.memory.as_ptr(),
                contents.as_mut_ptr(),
                object.size,
            )
        };
        Some(contents)
    }

    fn alloc_object(&self, kind: ObjectKind, size: usize) -> u32 {
        self.0.state.borrow_mut().insert(DummyObject::new(kind, size))
    }
}

impl DriverControl for DummyDriver {
    fn driver(&self) -> Driver {
        self.0.driver.clone()
    }

    fn supports_fb_modifiers(&self) -> Result<bool> {
        Ok(*self.0.fb_modifiers.borrow())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbAllocation> {
        if width == 0 || height == 0 || bpp == 0 {
            return Err(Error::ioctl("CREATE_DUMB", Errno::EINVAL));
        }
        let pitch = align_up(width * bpp.div_ceil(8), 64);
        let size = pitch as u64 * height as u64;
        let handle = self.alloc_object(ObjectKind::Dumb, size as usize);
        Ok(DumbAllocation { handle, pitch, size })
    }

    fn destroy_dumb(&self, handle: u32) -> Result<()> {
        self.0.state.borrow_mut().close(handle, "DESTROY_DUMB")
    }

    fn map_dumb(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        self.0.state.borrow_mut().map(handle, size, "MAP_DUMB")
    }

    fn gem_close(&self, handle: u32) -> Result<()> {
        self.0.state.borrow_mut().close(handle, "GEM_CLOSE")
    }

    fn munmap(&self, ptr: NonNull<u8>, _size: usize) -> Result<()> {
        let mut state = self.0.state.borrow_mut();
        let DummyState { objects, failing_unmaps, .. } = &mut *state;
        if let Some((handle, object)) =
            objects.iter_mut().find(|(_, o)| o.memory == ptr && o.map_count > 0)
        {
            if failing_unmaps.contains(handle) {
                return Err(Error::ioctl("munmap", Errno::EINVAL));
            }
            object.map_count -= 1;
            return Ok(());
        }
        let orphan = state
            .orphans
            .iter()
            .position(|o| o.memory == ptr)
            .ok_or(Error::ioctl("munmap", Errno::EINVAL))?;
        state.orphans[orphan].map_count -= 1;
        if state.orphans[orphan].map_count == 0 {
            state.orphans.swap_remove(orphan);
        }
        Ok(())
    }

    fn add_framebuffer(&self, cmd: &FramebufferCommand) -> Result<u32> {
        if cmd.modifiers.is_some() && !*self.0.fb_modifiers.borrow() {
            return Err(Error::ioctl("ADDFB2", Errno::EINVAL));
        }
        let mut state = self.0.state.borrow_mut();
        let planes = cmd.handles.iter().take_while(|handle| **handle != 0);
        for handle in planes {
            state.object(*handle, "ADDFB2")?;
        }
        state.next_framebuffer += 1;
        let id = state.next_framebuffer;
        state.framebuffers.insert(id, cmd.clone());
        Ok(id)
    }

    fn remove_framebuffer(&self, id: u32) -> Result<()> {
        self.0
            .state
            .borrow_mut()
            .framebuffers
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::ioctl("RMFB", Errno::ENOENT))
    }

    fn i915(&self) -> Option<&dyn I915Control> {
        match self.0.driver {
            Driver::I915 => Some(self),
            _ => None,
        }
    }

    fn vc4(&self) -> Option<&dyn Vc4Control> {
        match self.0.driver {
            Driver::Vc4 => Some(self),
            _ => None,
        }
    }
}

impl I915Control for DummyDriver {
    fn create(&self, size: usize) -> Result<u32> {
        if size == 0 {
            return Err(Error::ioctl("I915_GEM_CREATE", Errno::EINVAL));
        }
        Ok(self.alloc_object(ObjectKind::I915, size))
    }

    fn set_tiling(&self, handle: u32, tiling: I915Tiling, stride: u32) -> Result<()> {
        let tile_width = match tiling {
            I915Tiling::None => 1,
            I915Tiling::X => 512,
            I915Tiling::Y => 128,
            I915Tiling::Yf => return Err(Error::ioctl("I915_GEM_SET_TILING", Errno::EINVAL)),
        };
        if stride % tile_width != 0 {
            return Err(Error::ioctl("I915_GEM_SET_TILING", Errno::EINVAL));
        }
        let mut state = self.0.state.borrow_mut();
        let object = state.object(handle, "I915_GEM_SET_TILING")?;
        object.tiling = tiling;
        object.stride = stride;
        Ok(())
    }

    fn get_tiling(&self, handle: u32) -> Result<I915Tiling> {
        Ok(self.0.state.borrow_mut().object(handle, "I915_GEM_GET_TILING")?.tiling)
    }

    fn set_domain(&self, handle: u32, read: Domain, write: Option<Domain>) -> Result<()> {
        let mut state = self.0.state.borrow_mut();
        let object = state.object(handle, "I915_GEM_SET_DOMAIN")?;
        object.read_domain = read;
        object.write_domain = write;
        Ok(())
    }

    fn mmap_gtt(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        self.0.state.borrow_mut().map(handle, size, "I915_GEM_MMAP_GTT")
    }

    fn mmap_cpu(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        self.0.state.borrow_mut().map(handle, size, "I915_GEM_MMAP")
    }

    fn wait(&self, handle: u32) -> Result<()> {
        let mut state = self.0.state.borrow_mut();
        state.object(handle, "I915_GEM_WAIT")?;
        state.waits.push(handle);
        Ok(())
    }

    fn blit(&self, copy: &BlitCopy) -> Result<()> {
        {
            let mut state = self.0.state.borrow_mut();
            state.object(copy.src_handle, "blit")?;
            state.object(copy.dst_handle, "blit")?;
            state.blits += 1;
        }
        self.0.blitter.copy(self, copy)
    }
}

impl Vc4Control for DummyDriver {
    fn create(&self, size: usize) -> Result<u32> {
        if size == 0 {
            return Err(Error::ioctl("VC4_CREATE_BO", Errno::EINVAL));
        }
        Ok(self.alloc_object(ObjectKind::Vc4, size))
    }

    fn mmap(&self, handle: u32, size: usize) -> Result<NonNull<u8>> {
        self.0.state.borrow_mut().map(handle, size, "VC4_MMAP_BO")
    }

    fn set_tiling(&self, handle: u32, modifier: DrmModifier) -> Result<()> {
        if !matches!(modifier, DrmModifier::Linear | DrmModifier::Broadcom_vc4_t_tiled) {
            return Err(Error::ioctl("VC4_SET_TILING", Errno::EINVAL));
        }
        let mut state = self.0.state.borrow_mut();
        state.object(handle, "VC4_SET_TILING")?.vc4_modifier = modifier;
        Ok(())
    }
}
