// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer object and framebuffer layer for exercising DRM kernel drivers.
//!
//! Tests open a [`device::Device`], allocate buffer objects ([`bo::Bo`]) or whole framebuffers
//! ([`framebuffer::Framebuffer`]), map them for CPU access (optionally through a linear view of a
//! tiled layout), write or check pixels, unmap them and drop them. Each driver plugs its own
//! map/unmap/destroy strategy in at construction time.

pub mod bo;
pub mod device;
pub mod error;
pub mod format;
pub mod framebuffer;
pub mod pattern;
pub mod tiling;
pub mod utils;

use std::fmt;
use std::str::FromStr;

pub use drm_fourcc::DrmFourcc;
pub use drm_fourcc::DrmModifier;

pub use crate::error::Error;
pub use crate::error::Result;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A four-character pixel format code, as used by the DRM display API.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Fourcc(u32);

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }
}

impl From<DrmFourcc> for Fourcc {
    fn from(fourcc: DrmFourcc) -> Self {
        Self(fourcc as u32)
    }
}

impl From<Fourcc> for [u8; 4] {
    fn from(n: Fourcc) -> Self {
        n.0.to_le_bytes()
    }
}

impl FromStr for Fourcc {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes: &[u8; 4] =
            s.as_bytes().try_into().map_err(|_| "a fourcc must be exactly 4 characters")?;
        Ok(Fourcc::from(bytes))
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: [u8; 4] = (*self).into();

        f.write_fmt(format_args!(
            "{}{}{}{}",
            c[0] as char, c[1] as char, c[2] as char, c[3] as char
        ))
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}
