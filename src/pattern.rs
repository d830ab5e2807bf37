// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw pixel writes and checksums on mapped framebuffers.

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use drm_fourcc::DrmFourcc;

use crate::error::Error;
use crate::error::Result;
use crate::format::FormatInfo;
use crate::framebuffer::Framebuffer;
use crate::Fourcc;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }
}

fn expand_10(c: u8) -> u32 {
    (c as u32) << 2 | (c as u32) >> 6
}

/// Encodes `color` as one pixel of `format`.
pub fn pack_color(format: Fourcc, color: Color) -> Result<u32> {
    let (r, g, b, a) = (color.r as u32, color.g as u32, color.b as u32, color.a as u32);
    let fourcc =
        DrmFourcc::try_from(u32::from(format)).map_err(|_| Error::UnsupportedFormat(format))?;

    match fourcc {
        DrmFourcc::Rgb565 => Ok((r >> 3) << 11 | (g >> 2) << 5 | b >> 3),
        DrmFourcc::Xrgb8888 | DrmFourcc::Argb8888 => Ok(a << 24 | r << 16 | g << 8 | b),
        DrmFourcc::Xbgr8888 | DrmFourcc::Abgr8888 => Ok(a << 24 | b << 16 | g << 8 | r),
        DrmFourcc::Xrgb2101010 => {
            Ok(0x3 << 30 | expand_10(color.r) << 20 | expand_10(color.g) << 10 | expand_10(color.b))
        }
        _ => Err(Error::UnsupportedFormat(format)),
    }
}

fn write_pixel(info: &FormatInfo, dst: &mut [u8], value: u32) {
    match info.cpp[0] {
        2 => LittleEndian::write_u16(dst, value as u16),
        _ => LittleEndian::write_u32(dst, value),
    }
}

fn read_pixel_bytes(info: &FormatInfo, src: &[u8]) -> u32 {
    match info.cpp[0] {
        2 => LittleEndian::read_u16(src) as u32,
        _ => LittleEndian::read_u32(src),
    }
}

/// Writes every pixel of plane 0 of the mapped `fb` with `pixel(x, y)`.
fn paint(fb: &Framebuffer, mut pixel: impl FnMut(u32, u32) -> Result<u32>) -> Result<()> {
    let info = fb.format();
    let cpp = info.cpp[0] as usize;
    let pitch = fb.plane_pitch(0).ok_or(Error::NotMapped)? as usize;
    let (width, height) = (fb.width(), fb.height());

    fb.with_plane_mut(0, |bytes| {
        for (y, line) in bytes.chunks_mut(pitch).take(height as usize).enumerate() {
            for (x, dst) in line[..width as usize * cpp].chunks_exact_mut(cpp).enumerate() {
                write_pixel(info, dst, pixel(x as u32, y as u32)?);
            }
        }
        Ok::<(), Error>(())
    })?
}

/// Fills plane 0 of the mapped `fb` with `color`.
pub fn fill(fb: &Framebuffer, color: Color) -> Result<()> {
    let value = pack_color(fb.format().fourcc, color)?;
    paint(fb, |_, _| Ok(value))
}

/// Paints a gradient going from black to red horizontally and to green vertically.
pub fn paint_gradient(fb: &Framebuffer) -> Result<()> {
    let fourcc = fb.format().fourcc;
    let (width, height) = (fb.width().max(2) - 1, fb.height().max(2) - 1);
    paint(fb, |x, y| {
        let color = Color::rgb((x * 255 / width) as u8, (y * 255 / height) as u8, 0x40);
        pack_color(fourcc, color)
    })
}

/// Reads the raw pixel value at (`x`, `y`) of plane 0 of the mapped `fb`.
pub fn read_pixel(fb: &Framebuffer, x: u32, y: u32) -> Result<u32> {
    if x >= fb.width() || y >= fb.height() {
        return Err(Error::InvalidDimensions { width: x, height: y });
    }
    let info = fb.format();
    let cpp = info.cpp[0] as usize;
    let pitch = fb.plane_pitch(0).ok_or(Error::NotMapped)? as usize;
    let offset = y as usize * pitch + x as usize * cpp;
    fb.with_plane(0, |bytes| read_pixel_bytes(info, &bytes[offset..offset + cpp]))
}

/// CRC32 of the visible pixels of `plane`, ignoring row padding.
pub fn plane_crc(fb: &Framebuffer, plane: usize) -> Result<u32> {
    let row_len = fb.width() as usize * fb.format().cpp.get(plane).copied().unwrap_or(0) as usize;
    let pitch = fb.plane_pitch(plane).ok_or(Error::NotMapped)? as usize;
    let height = fb.height() as usize;

    fb.with_plane(plane, |bytes| {
        let mut hasher = crc32fast::Hasher::new();
        for line in bytes.chunks(pitch).take(height) {
            hasher.update(&line[..row_len]);
        }
        hasher.finalize()
    })
}

#[cfg(test)]
mod tests {
    use drm_fourcc::DrmModifier;

    use super::*;
    use crate::device::dummy::DummyDriver;
    use crate::device::Driver;
    use crate::framebuffer::new_dumb_framebuffer;

    #[test]
    fn packing_per_format() {
        let color = Color { r: 0xff, g: 0x80, b: 0x01, a: 0x20 };
        assert_eq!(pack_color(Fourcc::from(DrmFourcc::Argb8888), color).unwrap(), 0x20ff8001);
        assert_eq!(pack_color(Fourcc::from(DrmFourcc::Abgr8888), color).unwrap(), 0x200180ff);
        assert_eq!(pack_color(Fourcc::from(DrmFourcc::Rgb565), color).unwrap(), 0xfc00);
        assert_eq!(
            pack_color(Fourcc::from(DrmFourcc::Xrgb2101010), Color::rgb(0xff, 0, 0)).unwrap(),
            0xfff0_0000
        );
        assert!(pack_color(Fourcc::from(b"NV12"), color).is_err());
    }

    #[test]
    fn fill_and_read_back() {
        let device = DummyDriver::new(Driver::Other("dummy".into())).into_device();
        let format = Fourcc::from(DrmFourcc::Rgb565);
        let fb = new_dumb_framebuffer(&device, 30, 7, format, DrmModifier::Linear).unwrap();

        assert!(matches!(fill(&fb, Color::rgb(0, 0, 0xff)), Err(Error::NotMapped)));

        let _mapping = fb.map_guard(true).unwrap();
        fill(&fb, Color::rgb(0, 0, 0xff)).unwrap();
        assert_eq!(read_pixel(&fb, 29, 6).unwrap(), 0x1f);
        assert!(read_pixel(&fb, 30, 0).is_err());

        paint_gradient(&fb).unwrap();
        assert_eq!(read_pixel(&fb, 0, 0).unwrap(), 0x0008);
        assert_eq!(read_pixel(&fb, 29, 6).unwrap(), 0xffe8);
    }

    #[test]
    fn crc_ignores_padding() {
        let device = DummyDriver::new(Driver::Other("dummy".into())).into_device();
        let format = Fourcc::from(DrmFourcc::Xrgb8888);
        // 10 pixels leave 24 bytes of padding per 64 byte row.
        let fb = new_dumb_framebuffer(&device, 10, 3, format, DrmModifier::Linear).unwrap();
        let _mapping = fb.map_guard(false).unwrap();
        fill(&fb, Color::rgb(1, 2, 3)).unwrap();
        let before = plane_crc(&fb, 0).unwrap();

        fb.with_plane_mut(0, |bytes| bytes[60..64].fill(0xaa)).unwrap();
        assert_eq!(plane_crc(&fb, 0).unwrap(), before);

        let expected: Vec<u8> = (0..30).flat_map(|_| [3u8, 2, 1, 0xff]).collect();
        assert_eq!(before, crc32fast::hash(&expected));
    }
}
