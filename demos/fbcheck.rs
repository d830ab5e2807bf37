// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! fbcheck, a small program creating a framebuffer, painting it through a linear view and
//! checking that the pixels survive an unmap/map cycle.

use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;

use gem_fb::device::dummy::DummyDriver;
use gem_fb::device::Device;
use gem_fb::device::DeviceOptions;
use gem_fb::device::Driver;
use gem_fb::pattern::paint_gradient;
use gem_fb::pattern::plane_crc;
use gem_fb::tiling::i915::I915_FORMAT_MOD_YF_TILED;
use gem_fb::DrmModifier;
use gem_fb::Fourcc;

#[derive(Debug, Clone, Copy)]
struct Modifier(DrmModifier);

impl FromStr for Modifier {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Modifier(DrmModifier::Linear)),
            "x" => Ok(Modifier(DrmModifier::I915_x_tiled)),
            "y" => Ok(Modifier(DrmModifier::I915_y_tiled)),
            "yf" => Ok(Modifier(I915_FORMAT_MOD_YF_TILED)),
            "t" => Ok(Modifier(DrmModifier::Broadcom_vc4_t_tiled)),
            _ => Err("unrecognized modifier. Valid values: linear, x, y, yf, t"),
        }
    }
}

/// Framebuffer round trip check
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the DRM device node. Default: $GEM_FB_DEVICE or /dev/dri/card0
    #[argh(option)]
    device: Option<PathBuf>,

    /// use the in-memory driver instead of a device node, emulating the named driver
    /// (i915, vc4, or anything else for dumb buffers)
    #[argh(option)]
    dummy: Option<String>,

    /// framebuffer width in pixels
    #[argh(option, default = "640")]
    width: u32,

    /// framebuffer height in pixels
    #[argh(option, default = "480")]
    height: u32,

    /// pixel format fourcc. Default: XR24
    #[argh(option, default = "Fourcc::from(b\"XR24\")")]
    format: Fourcc,

    /// layout modifier (linear, x, y, yf or t). Default: linear
    #[argh(option, default = "Modifier(DrmModifier::Linear)")]
    modifier: Modifier,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let device = match args.dummy {
        Some(name) => DummyDriver::new(Driver::from_name(&name)).into_device(),
        None => {
            let mut options = DeviceOptions::from_env();
            if let Some(path) = args.device {
                options.path = path;
            }
            Device::open(options)?
        }
    };

    let fb = device.new_framebuffer(args.width, args.height, args.format, args.modifier.0)?;
    log::info!(
        "Created framebuffer {} ({}x{} {} on {})",
        fb.id(),
        fb.width(),
        fb.height(),
        fb.format().name,
        device.driver()
    );

    let painted = {
        let _mapping = fb.map_guard(true)?;
        paint_gradient(&fb)?;
        plane_crc(&fb, 0)?
    };

    let read_back = {
        let _mapping = fb.map_guard(true)?;
        plane_crc(&fb, 0)?
    };

    println!("{:08x} {:08x}", painted, read_back);
    if painted != read_back {
        anyhow::bail!("framebuffer content changed across unmap/map");
    }

    Ok(())
}
