// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference-counted GEM buffer objects.
//!
//! A [`Bo`] wraps a kernel buffer handle. How it is mapped, unmapped and destroyed depends on the
//! driver that allocated it, so each `Bo` carries a [`BoBackend`] chosen by its constructor. The
//! backend runs its destroy step exactly once, when the last `Rc<Bo>` goes away.

use std::cell::RefCell;
use std::fmt::Debug;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::device::Device;
use crate::error::Error;
use crate::error::Result;
use crate::format::format_info;
use crate::Fourcc;

#[cfg(feature = "i915")]
pub mod i915;
#[cfg(feature = "vc4")]
pub mod vc4;

/// A CPU mapping of some object memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    pub fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The part of this mapping starting `offset` bytes in.
    pub fn at_offset(&self, offset: usize) -> Option<Mapping> {
        if offset > self.len {
            return None;
        }
        // SAFETY: offset is within the mapping.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) };
        Some(Mapping { ptr, len: self.len - offset })
    }
}

/// Driver-specific map/unmap/destroy steps of a [`Bo`].
///
/// Backend-private state lives in the implementing type.
pub trait BoBackend: Debug {
    /// Maps `bo`; `linear` asks for a linear view of a tiled object.
    fn map(&self, bo: &Bo, linear: bool) -> Result<Mapping>;

    /// Undoes a `map` that returned `mapping`.
    fn unmap(&self, bo: &Bo, mapping: Mapping, linear: bool) -> Result<()>;

    /// Releases the kernel object. Runs once, after the last reference is dropped.
    fn destroy(&self, bo: &Bo) -> Result<()>;
}

#[derive(Debug, Default)]
struct MapState {
    mapping: Option<Mapping>,
    count: u32,
    linear: bool,
}

/// A GEM buffer object shared through `Rc`.
#[derive(Debug)]
pub struct Bo {
    device: Rc<Device>,
    handle: u32,
    size: usize,
    state: RefCell<MapState>,
    backend: Box<dyn BoBackend>,
}

impl Bo {
    /// Wraps an already allocated kernel object. The returned `Bo` owns `handle`.
    pub fn new(
        device: &Rc<Device>,
        handle: u32,
        size: usize,
        backend: Box<dyn BoBackend>,
    ) -> Rc<Self> {
        log::debug!("New BO handle {} of {} bytes", handle, size);
        Rc::new(Self {
            device: Rc::clone(device),
            handle,
            size,
            state: Default::default(),
            backend,
        })
    }

    pub fn device(&self) -> &Rc<Device> {
        &self.device
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.state.borrow().mapping.is_some()
    }

    /// Number of outstanding `map` calls.
    pub fn map_count(&self) -> u32 {
        self.state.borrow().count
    }

    /// The current mapping and whether it is the linear view.
    pub fn mapping(&self) -> Option<(Mapping, bool)> {
        let state = self.state.borrow();
        state.mapping.map(|mapping| (mapping, state.linear))
    }

    /// Maps the object for CPU access.
    ///
    /// Mapping an already mapped object with the same linearity returns the same mapping and
    /// must be balanced by another `unmap`. Asking for the other linearity fails and leaves the
    /// existing mapping untouched.
    pub fn map(&self, linear: bool) -> Result<Mapping> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(mapping) = state.mapping {
                if state.linear != linear {
                    return Err(Error::LinearityMismatch { current: state.linear });
                }
                state.count += 1;
                return Ok(mapping);
            }
        }

        let mapping = self.backend.map(self, linear)?;
        log::debug!("Mapped BO {} (linear: {}) at {:?}", self.handle, linear, mapping.ptr);

        *self.state.borrow_mut() = MapState { mapping: Some(mapping), count: 1, linear };
        Ok(mapping)
    }

    /// Drops one `map` reference and returns how many are left. The backend unmap runs when the
    /// count reaches zero; if it fails the object stays mapped.
    pub fn unmap(&self) -> Result<u32> {
        let (mapping, linear) = {
            let mut state = self.state.borrow_mut();
            let mapping = state.mapping.ok_or(Error::NotMapped)?;
            if state.count > 1 {
                state.count -= 1;
                return Ok(state.count);
            }
            (mapping, state.linear)
        };

        self.backend.unmap(self, mapping, linear)?;
        log::debug!("Unmapped BO {}", self.handle);

        *self.state.borrow_mut() = MapState::default();
        Ok(0)
    }
}

impl Drop for Bo {
    fn drop(&mut self) {
        let state = std::mem::take(self.state.get_mut());
        if let Some(mapping) = state.mapping {
            log::warn!("Dropping BO {} while mapped {} time(s)", self.handle, state.count);
            if let Err(e) = self.backend.unmap(self, mapping, state.linear) {
                log::error!("Failed to unmap BO {}: {}", self.handle, e);
            }
        }

        log::debug!("Destroying BO {}", self.handle);
        if let Err(e) = self.backend.destroy(self) {
            log::error!("Failed to destroy BO {}: {}", self.handle, e);
        }
    }
}

/// Backend of buffers allocated with the generic dumb buffer calls.
#[derive(Debug, Default)]
pub struct DumbBo;

impl BoBackend for DumbBo {
    fn map(&self, bo: &Bo, _linear: bool) -> Result<Mapping> {
        let ptr = bo.device.control().map_dumb(bo.handle, bo.size)?;
        Ok(Mapping::new(ptr, bo.size))
    }

    fn unmap(&self, bo: &Bo, mapping: Mapping, _linear: bool) -> Result<()> {
        bo.device.control().munmap(mapping.ptr, mapping.len)
    }

    fn destroy(&self, bo: &Bo) -> Result<()> {
        bo.device.control().gem_close(bo.handle)
    }
}

/// Allocates a dumb buffer big enough for `plane` of a `width`x`height` image of `format`.
///
/// Returns the buffer and its pitch in bytes.
pub fn new_dumb_bo(
    device: &Rc<Device>,
    width: u32,
    height: u32,
    format: Fourcc,
    plane: usize,
) -> Result<(Rc<Bo>, u32)> {
    let info = format_info(format).ok_or(Error::UnsupportedFormat(format))?;
    if plane >= info.num_planes {
        return Err(Error::InvalidPlane(plane));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }

    let control = device.control();
    let alloc = control.create_dumb(width, height, info.bpp(plane))?;

    let needed = width as u64 * height as u64 * info.cpp[plane] as u64;
    let size = match usize::try_from(alloc.size) {
        Ok(size) if alloc.size >= needed => size,
        _ => {
            log::error!("Dumb buffer {} has {} bytes, {} needed", alloc.handle, alloc.size, needed);
            if let Err(e) = control.destroy_dumb(alloc.handle) {
                log::error!("Failed to destroy dumb buffer {}: {}", alloc.handle, e);
            }
            return Err(Error::Unsupported("driver returned an undersized dumb buffer"));
        }
    };

    Ok((Bo::new(device, alloc.handle, size, Box::new(DumbBo)), alloc.pitch))
}

#[cfg(test)]
mod tests {
    use drm_fourcc::DrmFourcc;

    use super::*;
    use crate::device::dummy::DummyDriver;
    use crate::device::Driver;

    fn dumb_device() -> (DummyDriver, Rc<Device>) {
        let dummy = DummyDriver::new(Driver::Other("dummy".into()));
        let device = dummy.clone().into_device();
        (dummy, device)
    }

    fn xrgb() -> Fourcc {
        Fourcc::from(DrmFourcc::Xrgb8888)
    }

    #[test]
    fn destroy_runs_once_after_last_reference() {
        let (dummy, device) = dumb_device();
        let (bo, pitch) = new_dumb_bo(&device, 64, 32, xrgb(), 0).unwrap();
        assert_eq!(pitch, 256);
        let handle = bo.handle();

        let refs: Vec<_> = (0..3).map(|_| Rc::clone(&bo)).collect();
        drop(bo);
        assert!(dummy.closed_handles().is_empty());
        drop(refs);
        assert_eq!(dummy.closed_handles(), vec![handle]);
        assert_eq!(dummy.live_objects(), 0);
    }

    #[test]
    fn nested_maps_share_one_mapping() {
        let (dummy, device) = dumb_device();
        let (bo, _) = new_dumb_bo(&device, 16, 16, xrgb(), 0).unwrap();

        let first = bo.map(false).unwrap();
        let second = bo.map(false).unwrap();
        assert_eq!(first, second);
        assert_eq!(bo.map_count(), 2);
        assert_eq!(dummy.live_mappings(), 1);

        assert_eq!(bo.unmap().unwrap(), 1);
        assert!(bo.is_mapped());
        assert_eq!(dummy.live_mappings(), 1);
        assert_eq!(bo.unmap().unwrap(), 0);
        assert!(!bo.is_mapped());
        assert_eq!(dummy.live_mappings(), 0);

        assert!(matches!(bo.unmap(), Err(Error::NotMapped)));
    }

    #[test]
    fn other_linearity_is_refused_and_keeps_the_mapping() {
        let (dummy, device) = dumb_device();
        let (bo, _) = new_dumb_bo(&device, 16, 16, xrgb(), 0).unwrap();

        let mapping = bo.map(true).unwrap();
        assert!(matches!(bo.map(false), Err(Error::LinearityMismatch { current: true })));
        assert_eq!(bo.mapping(), Some((mapping, true)));
        assert_eq!(bo.map_count(), 1);
        assert_eq!(dummy.live_mappings(), 1);

        bo.unmap().unwrap();
        bo.map(false).unwrap();
        assert_eq!(bo.mapping().map(|(_, linear)| linear), Some(false));
    }

    #[test]
    fn dropping_a_mapped_bo_unmaps_first() {
        let (dummy, device) = dumb_device();
        let (bo, _) = new_dumb_bo(&device, 16, 16, xrgb(), 0).unwrap();
        bo.map(false).unwrap();
        bo.map(false).unwrap();

        drop(bo);
        assert_eq!(dummy.live_mappings(), 0);
        assert_eq!(dummy.closed_handles().len(), 1);
    }

    #[test]
    fn failed_map_leaves_the_bo_unmapped() {
        let (dummy, device) = dumb_device();
        let (bo, _) = new_dumb_bo(&device, 16, 16, xrgb(), 0).unwrap();
        dummy.fail_maps_of(bo.handle());

        assert!(matches!(bo.map(false), Err(Error::Ioctl { .. })));
        assert!(!bo.is_mapped());
        assert_eq!(bo.map_count(), 0);
    }

    #[test]
    fn dumb_constructor_validates_its_arguments() {
        let (dummy, device) = dumb_device();
        assert!(matches!(
            new_dumb_bo(&device, 16, 16, Fourcc::from(b"NV12"), 0),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(new_dumb_bo(&device, 16, 16, xrgb(), 1), Err(Error::InvalidPlane(1))));
        assert!(matches!(
            new_dumb_bo(&device, 0, 16, xrgb(), 0),
            Err(Error::InvalidDimensions { width: 0, height: 16 })
        ));
        assert_eq!(dummy.live_objects(), 0);

        let (bo, pitch) = new_dumb_bo(&device, 10, 3, Fourcc::from(DrmFourcc::Rgb565), 0).unwrap();
        assert_eq!(pitch, 64);
        assert_eq!(bo.size(), 64 * 3);
    }

    #[test]
    fn mapping_offsets() {
        let mut backing = [0u8; 16];
        let mapping = Mapping::new(NonNull::new(backing.as_mut_ptr()).unwrap(), backing.len());
        let tail = mapping.at_offset(12).unwrap();
        assert_eq!(tail.len(), 4);
        assert_eq!(tail.ptr().as_ptr() as usize - mapping.ptr().as_ptr() as usize, 12);
        assert!(mapping.at_offset(16).unwrap().is_empty());
        assert!(mapping.at_offset(17).is_none());
    }
}
