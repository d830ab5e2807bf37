// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use nix::errno::Errno;
use thiserror::Error;

use crate::Fourcc;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(Fourcc),
    #[error("unsupported layout modifier {0:#018x}")]
    UnsupportedModifier(u64),
    #[error("the display does not support framebuffer modifiers")]
    ModifiersUnsupported,
    #[error("format needs {expected} planes but {got} were given")]
    PlaneCountMismatch { expected: usize, got: usize },
    #[error("invalid plane index {0}")]
    InvalidPlane(usize),
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("already mapped with linear={current}")]
    LinearityMismatch { current: bool },
    #[error("object is not mapped")]
    NotMapped,
    #[error("mapping is in use")]
    Busy,
    #[error("device does not provide {0} operations")]
    DriverMismatch(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("{op} failed: {errno}")]
    Ioctl { op: &'static str, errno: Errno },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn ioctl(op: &'static str, errno: Errno) -> Self {
        Error::Ioctl { op, errno }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
