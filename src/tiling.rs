// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Address translation between GPU tiled layouts and CPU linear layouts.

pub mod i915;
pub mod vc4;
