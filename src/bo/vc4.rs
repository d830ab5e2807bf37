// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use crate::bo::Bo;
use crate::bo::BoBackend;
use crate::bo::Mapping;
use crate::device::Device;
use crate::error::Result;

/// VC4 buffer objects. They are always mapped as stored; T-tiled conversion happens at the
/// framebuffer level.
#[derive(Debug, Default)]
pub struct Vc4Bo;

impl BoBackend for Vc4Bo {
    fn map(&self, bo: &Bo, _linear: bool) -> Result<Mapping> {
        let ptr = bo.device().vc4()?.mmap(bo.handle(), bo.size())?;
        Ok(Mapping::new(ptr, bo.size()))
    }

    fn unmap(&self, bo: &Bo, mapping: Mapping, _linear: bool) -> Result<()> {
        bo.device().control().munmap(mapping.ptr(), mapping.len())
    }

    fn destroy(&self, bo: &Bo) -> Result<()> {
        bo.device().control().gem_close(bo.handle())
    }
}

pub fn new_bo(device: &Rc<Device>, size: usize) -> Result<Rc<Bo>> {
    let handle = device.vc4()?.create(size)?;
    Ok(Bo::new(device, handle, size, Box::new(Vc4Bo)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::DummyDriver;
    use crate::device::dummy::ObjectKind;
    use crate::device::Driver;
    use crate::error::Error;

    #[test]
    fn vc4_bo_lifecycle() {
        let dummy = DummyDriver::new(Driver::Vc4);
        let device = dummy.clone().into_device();

        let bo = new_bo(&device, 8192).unwrap();
        assert_eq!(dummy.object_kind(bo.handle()), Some(ObjectKind::Vc4));

        let mapping = bo.map(true).unwrap();
        assert_eq!(mapping.len(), 8192);
        assert_eq!(bo.map(true).unwrap(), mapping);
        bo.unmap().unwrap();
        bo.unmap().unwrap();
        assert_eq!(dummy.live_mappings(), 0);

        let handle = bo.handle();
        drop(bo);
        assert_eq!(dummy.closed_handles(), vec![handle]);
    }

    #[test]
    fn zero_sized_allocation_fails() {
        let device = DummyDriver::new(Driver::Vc4).into_device();
        assert!(matches!(new_bo(&device, 0), Err(Error::Ioctl { .. })));
    }
}
