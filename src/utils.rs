// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

use nix::errno::Errno;

use crate::error::Error;
use crate::error::Result;

/// Rounds `value` up to the next multiple of `alignment`.
pub fn align_up<T>(value: T, alignment: T) -> T
where
    T: Copy
        + std::ops::Add<Output = T>
        + std::ops::Sub<Output = T>
        + std::ops::Div<Output = T>
        + std::ops::Mul<Output = T>
        + From<u8>,
{
    let one = T::from(1u8);
    ((value + alignment - one) / alignment) * alignment
}

/// Smallest power of two that is `>= value`, starting the search at `start`.
pub fn next_pot_from(start: u32, value: u32) -> u32 {
    let mut pot = start;
    while pot < value {
        pot *= 2;
    }
    pot
}

/// Retries a driver call for as long as it is interrupted.
pub(crate) fn handle_eintr<T>(
    op: &'static str,
    cb: &mut impl FnMut() -> nix::Result<T>,
) -> Result<T> {
    loop {
        match cb() {
            Ok(ret) => return Ok(ret),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(errno) => return Err(Error::ioctl(op, errno)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiples() {
        assert_eq!(align_up(0u32, 32), 0);
        assert_eq!(align_up(1u32, 32), 32);
        assert_eq!(align_up(32usize, 32), 32);
        assert_eq!(align_up(33usize, 4), 36);
    }

    #[test]
    fn next_pot_from_starts_at_floor() {
        assert_eq!(next_pot_from(512, 100), 512);
        assert_eq!(next_pot_from(512, 513), 1024);
        assert_eq!(next_pot_from(1024 * 1024, 4096 * 1024), 4096 * 1024);
    }

    #[test]
    fn handle_eintr_retries_interrupted_calls() {
        let mut attempts = 0;
        let ret = handle_eintr("test", &mut || {
            attempts += 1;
            if attempts < 3 {
                Err(Errno::EINTR)
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(ret.unwrap(), 3);

        let err = handle_eintr::<()>("test", &mut || Err(Errno::EINVAL)).unwrap_err();
        assert!(matches!(err, Error::Ioctl { op: "test", errno: Errno::EINVAL }));
    }
}
