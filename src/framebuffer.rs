// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Framebuffers: one buffer object per plane, registered with the display.
//!
//! Mapping a framebuffer maps all of its planes at once. As with [`Bo`], maps nest when they
//! ask for the same linearity and the framebuffer is either fully mapped or fully unmapped.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt::Debug;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::Rc;

use drm_fourcc::DrmModifier;

use crate::bo::new_dumb_bo;
use crate::bo::Bo;
use crate::bo::Mapping;
use crate::device::Device;
use crate::device::FramebufferCommand;
use crate::error::Error;
use crate::error::Result;
use crate::format::format_info;
use crate::format::FormatInfo;
use crate::format::MAX_PLANES;
use crate::Fourcc;
use crate::Resolution;

#[cfg(feature = "i915")]
pub mod i915;
#[cfg(feature = "vc4")]
pub mod vc4;

/// A plane as registered with the display.
#[derive(Clone, Debug)]
pub struct FramebufferPlane {
    pub bo: Rc<Bo>,
    pub pitch: u32,
    pub offset: u32,
}

/// A CPU view of one plane: where it starts and its row pitch in that view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneMapping {
    pub mapping: Mapping,
    pub pitch: u32,
}

/// Driver-specific map/unmap steps of a [`Framebuffer`].
pub trait FramebufferBackend: Debug {
    /// Maps every plane and returns their views, in plane order.
    fn map(&self, fb: &Framebuffer, linear: bool) -> Result<Vec<PlaneMapping>>;

    /// Undoes a successful `map`.
    fn unmap(&self, fb: &Framebuffer, linear: bool) -> Result<()>;
}

/// Maps `planes` in order. If one fails, the planes mapped before it are unmapped in reverse
/// order and the error is returned.
pub(crate) fn map_planes(planes: &[FramebufferPlane], linear: bool) -> Result<Vec<PlaneMapping>> {
    let mut mappings = Vec::with_capacity(planes.len());

    for (index, plane) in planes.iter().enumerate() {
        let ret = plane.bo.map(linear).and_then(|mapping| {
            mapping.at_offset(plane.offset as usize).ok_or_else(|| {
                if let Err(e) = plane.bo.unmap() {
                    log::error!("Failed to unmap BO {}: {}", plane.bo.handle(), e);
                }
                Error::InvalidPlane(index)
            })
        });
        match ret {
            Ok(mapping) => mappings.push(PlaneMapping { mapping, pitch: plane.pitch }),
            Err(e) => {
                log::debug!("Mapping plane {} failed ({}), unwinding", index, e);
                for mapped in planes[..mappings.len()].iter().rev() {
                    if let Err(unmap) = mapped.bo.unmap() {
                        log::error!("Failed to unmap BO {}: {}", mapped.bo.handle(), unmap);
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(mappings)
}

/// Unmaps every plane, returning the first error.
pub(crate) fn unmap_planes(planes: &[FramebufferPlane]) -> Result<()> {
    let mut ret = Ok(());
    for plane in planes {
        if let Err(e) = plane.bo.unmap() {
            log::error!("Failed to unmap BO {}: {}", plane.bo.handle(), e);
            if ret.is_ok() {
                ret = Err(e);
            }
        }
    }
    ret
}

/// Backend mapping each plane BO as it is.
#[derive(Debug, Default)]
pub struct PlaneMapper;

impl FramebufferBackend for PlaneMapper {
    fn map(&self, fb: &Framebuffer, linear: bool) -> Result<Vec<PlaneMapping>> {
        map_planes(fb.planes(), linear)
    }

    fn unmap(&self, fb: &Framebuffer, _linear: bool) -> Result<()> {
        unmap_planes(fb.planes())
    }
}

#[derive(Debug, Default)]
struct MapState {
    planes: Vec<PlaneMapping>,
    count: u32,
    linear: bool,
}

#[derive(Debug)]
pub struct Framebuffer {
    device: Rc<Device>,
    id: u32,
    resolution: Resolution,
    format: &'static FormatInfo,
    modifier: DrmModifier,
    planes: Vec<FramebufferPlane>,
    state: RefCell<MapState>,
    // Set while a closure is looking at plane memory.
    accessing: Cell<bool>,
    backend: Box<dyn FramebufferBackend>,
}

impl Framebuffer {
    /// Registers a framebuffer made of `planes` with the display.
    ///
    /// Each plane's BO is kept alive for as long as the framebuffer exists.
    pub fn new(
        device: &Rc<Device>,
        width: u32,
        height: u32,
        format: Fourcc,
        modifier: DrmModifier,
        planes: Vec<FramebufferPlane>,
        backend: Box<dyn FramebufferBackend>,
    ) -> Result<Rc<Self>> {
        let info = format_info(format).ok_or(Error::UnsupportedFormat(format))?;
        if planes.len() != info.num_planes {
            return Err(Error::PlaneCountMismatch { expected: info.num_planes, got: planes.len() });
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        if let Some(index) = planes.iter().position(|p| p.offset as usize >= p.bo.size()) {
            return Err(Error::InvalidPlane(index));
        }

        let control = device.control();
        let tiled = modifier != DrmModifier::Linear;
        if tiled && !control.supports_fb_modifiers()? {
            return Err(Error::ModifiersUnsupported);
        }

        let mut cmd = FramebufferCommand { width, height, format, ..Default::default() };
        let mut modifiers = [0u64; MAX_PLANES];
        for (i, plane) in planes.iter().enumerate() {
            cmd.handles[i] = plane.bo.handle();
            cmd.pitches[i] = plane.pitch;
            cmd.offsets[i] = plane.offset;
            modifiers[i] = modifier.into();
        }
        if tiled {
            cmd.modifiers = Some(modifiers);
        }

        let id = control.add_framebuffer(&cmd)?;
        log::debug!(
            "Added framebuffer {}: {}x{} {} modifier {:#x}",
            id,
            width,
            height,
            info.name,
            u64::from(modifier)
        );

        Ok(Rc::new(Self {
            device: Rc::clone(device),
            id,
            resolution: Resolution::new(width, height),
            format: info,
            modifier,
            planes,
            state: Default::default(),
            accessing: Cell::new(false),
            backend,
        }))
    }

    pub fn device(&self) -> &Rc<Device> {
        &self.device
    }

    /// Display identifier of this framebuffer.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn format(&self) -> &'static FormatInfo {
        self.format
    }

    pub fn modifier(&self) -> DrmModifier {
        self.modifier
    }

    pub fn planes(&self) -> &[FramebufferPlane] {
        &self.planes
    }

    pub fn is_mapped(&self) -> bool {
        !self.state.borrow().planes.is_empty()
    }

    pub fn map_count(&self) -> u32 {
        self.state.borrow().count
    }

    /// Maps every plane for CPU access, through a linear view if `linear` is set.
    pub fn map(&self, linear: bool) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if !state.planes.is_empty() {
                if state.linear != linear {
                    return Err(Error::LinearityMismatch { current: state.linear });
                }
                state.count += 1;
                return Ok(());
            }
        }

        let planes = self.backend.map(self, linear)?;
        log::debug!("Mapped framebuffer {} (linear: {})", self.id, linear);

        *self.state.borrow_mut() = MapState { planes, count: 1, linear };
        Ok(())
    }

    /// Undoes one `map`. Unmapping an unmapped framebuffer does nothing.
    pub fn unmap(&self) -> Result<()> {
        if self.accessing.get() {
            return Err(Error::Busy);
        }

        let linear = {
            let mut state = self.state.borrow_mut();
            if state.planes.is_empty() {
                return Ok(());
            }
            if state.count > 1 {
                state.count -= 1;
                return Ok(());
            }
            state.linear
        };

        self.backend.unmap(self, linear)?;
        log::debug!("Unmapped framebuffer {}", self.id);

        *self.state.borrow_mut() = MapState::default();
        Ok(())
    }

    /// Maps the framebuffer for the lifetime of the returned guard.
    pub fn map_guard(&self, linear: bool) -> Result<FramebufferMapping<'_>> {
        self.map(linear)?;
        Ok(FramebufferMapping { fb: self })
    }

    fn plane_mapping(&self, plane: usize) -> Option<PlaneMapping> {
        self.state.borrow().planes.get(plane).copied()
    }

    /// Start of `plane` in the current view, offset included. `None` when unmapped.
    pub fn plane_ptr(&self, plane: usize) -> Option<NonNull<u8>> {
        self.plane_mapping(plane).map(|p| p.mapping.ptr())
    }

    /// Bytes reachable from `plane_ptr`.
    pub fn plane_len(&self, plane: usize) -> Option<usize> {
        self.plane_mapping(plane).map(|p| p.mapping.len())
    }

    /// Row pitch of `plane` in the current view, which differs from the registered pitch when
    /// a linear view goes through a shadow buffer.
    pub fn plane_pitch(&self, plane: usize) -> Option<u32> {
        self.plane_mapping(plane).map(|p| p.pitch)
    }

    fn access<R>(&self, plane: usize, f: impl FnOnce(Mapping) -> R) -> Result<R> {
        if plane >= self.planes.len() {
            return Err(Error::InvalidPlane(plane));
        }
        let mapping = self.plane_mapping(plane).ok_or(Error::NotMapped)?;
        if self.accessing.replace(true) {
            return Err(Error::Busy);
        }
        let ret = f(mapping.mapping);
        self.accessing.set(false);
        Ok(ret)
    }

    /// Runs `f` on the mapped bytes of `plane`.
    pub fn with_plane<R>(&self, plane: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.access(plane, |mapping| {
            // SAFETY: the plane stays mapped while `accessing` is set, since unmap refuses to run.
            let bytes =
                unsafe { std::slice::from_raw_parts(mapping.ptr().as_ptr(), mapping.len()) };
            f(bytes)
        })
    }

    /// Runs `f` on the mapped bytes of `plane`, writable.
    pub fn with_plane_mut<R>(&self, plane: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.access(plane, |mapping| {
            // SAFETY: as in `with_plane`; `accessing` also rules out a second live slice.
            let bytes =
                unsafe { std::slice::from_raw_parts_mut(mapping.ptr().as_ptr(), mapping.len()) };
            f(bytes)
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        let state = std::mem::take(self.state.get_mut());
        if !state.planes.is_empty() {
            log::warn!("Dropping framebuffer {} while mapped {} time(s)", self.id, state.count);
            if let Err(e) = self.backend.unmap(self, state.linear) {
                log::error!("Failed to unmap framebuffer {}: {}", self.id, e);
            }
        }

        log::debug!("Removing framebuffer {}", self.id);
        if let Err(e) = self.device.control().remove_framebuffer(self.id) {
            log::error!("Failed to remove framebuffer {}: {}", self.id, e);
        }
    }
}

/// Keeps a framebuffer mapped until dropped.
#[derive(Debug)]
pub struct FramebufferMapping<'a> {
    fb: &'a Framebuffer,
}

impl Deref for FramebufferMapping<'_> {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        self.fb
    }
}

impl Drop for FramebufferMapping<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.fb.unmap() {
            log::error!("Failed to unmap framebuffer {}: {}", self.fb.id, e);
        }
    }
}

/// Creates a linear framebuffer backed by dumb buffers, one per plane.
pub fn new_dumb_framebuffer(
    device: &Rc<Device>,
    width: u32,
    height: u32,
    format: Fourcc,
    modifier: DrmModifier,
) -> Result<Rc<Framebuffer>> {
    let info = format_info(format).ok_or(Error::UnsupportedFormat(format))?;
    if modifier != DrmModifier::Linear {
        return Err(Error::UnsupportedModifier(modifier.into()));
    }

    let planes = (0..info.num_planes)
        .map(|plane| {
            let (bo, pitch) = new_dumb_bo(device, width, height, format, plane)?;
            Ok(FramebufferPlane { bo, pitch, offset: 0 })
        })
        .collect::<Result<Vec<_>>>()?;

    Framebuffer::new(device, width, height, format, modifier, planes, Box::new(PlaneMapper))
}
