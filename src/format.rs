// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Static table of the pixel formats framebuffers can be created with.

use drm_fourcc::DrmFourcc;

use crate::Fourcc;

pub const MAX_PLANES: usize = 4;

#[derive(Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub fourcc: Fourcc,
    pub name: &'static str,
    pub num_planes: usize,
    /// Bytes per pixel of each plane.
    pub cpp: [u8; MAX_PLANES],
    /// Color depth in bits, alpha included.
    pub depth: u32,
}

impl FormatInfo {
    pub fn bpp(&self, plane: usize) -> u32 {
        self.cpp[plane] as u32 * 8
    }
}

const fn single_plane(fourcc: DrmFourcc, name: &'static str, cpp: u8, depth: u32) -> FormatInfo {
    FormatInfo {
        fourcc: Fourcc(fourcc as u32),
        name,
        num_planes: 1,
        cpp: [cpp, 0, 0, 0],
        depth,
    }
}

static FORMATS: [FormatInfo; 6] = [
    single_plane(DrmFourcc::Rgb565, "RGB565", 2, 16),
    single_plane(DrmFourcc::Xrgb8888, "XRGB8888", 4, 24),
    single_plane(DrmFourcc::Xrgb2101010, "XRGB2101010", 4, 30),
    single_plane(DrmFourcc::Argb8888, "ARGB8888", 4, 32),
    single_plane(DrmFourcc::Xbgr8888, "XBGR8888", 4, 24),
    single_plane(DrmFourcc::Abgr8888, "ABGR8888", 4, 32),
];

/// Looks up the descriptor of `fourcc`. `None` means the format is not supported.
pub fn format_info(fourcc: Fourcc) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|f| f.fourcc == fourcc)
}

/// Every format of the table, in table order.
pub fn supported_formats() -> Vec<Fourcc> {
    FORMATS.iter().map(|f| f.fourcc).collect()
}

/// Finds the single-plane format with the given bits per pixel and depth.
pub fn bpp_depth_to_format(bpp: u32, depth: u32) -> Option<Fourcc> {
    FORMATS.iter().find(|f| f.bpp(0) == bpp && f.depth == depth).map(|f| f.fourcc)
}

pub fn format_to_bpp(fourcc: Fourcc) -> Option<u32> {
    format_info(fourcc).map(|f| f.bpp(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown_formats() {
        let info = format_info(Fourcc::from(DrmFourcc::Xrgb8888)).unwrap();
        assert_eq!(info.num_planes, 1);
        assert_eq!(info.cpp[0], 4);
        assert_eq!(info.name, "XRGB8888");

        let info = format_info(Fourcc::from(b"RG16")).unwrap();
        assert_eq!(info.cpp[0], 2);

        assert!(format_info(Fourcc::from(DrmFourcc::Nv12)).is_none());
        assert!(format_info(Fourcc::from(0)).is_none());
    }

    #[test]
    fn every_format_is_single_plane() {
        for fourcc in supported_formats() {
            let info = format_info(fourcc).unwrap();
            assert_eq!(info.num_planes, 1, "{fourcc}");
            assert!(info.cpp[0] > 0);
        }
    }

    #[test]
    fn bpp_and_depth_lookups() {
        assert_eq!(bpp_depth_to_format(32, 24), Some(Fourcc::from(DrmFourcc::Xrgb8888)));
        assert_eq!(bpp_depth_to_format(32, 30), Some(Fourcc::from(DrmFourcc::Xrgb2101010)));
        assert_eq!(bpp_depth_to_format(16, 16), Some(Fourcc::from(DrmFourcc::Rgb565)));
        assert_eq!(bpp_depth_to_format(24, 24), None);
        assert_eq!(format_to_bpp(Fourcc::from(DrmFourcc::Abgr8888)), Some(32));
    }
}
