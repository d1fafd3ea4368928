// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Memory model primitives: slots, the handle map, private allocations, and
//! per-budget accounting (§3, §4.4).

pub mod info;
pub mod map;
pub mod private_map;
pub mod slot;

pub use info::MemoryInfo;
pub use map::MemoryMap;
pub use private_map::PrivateMemoryMap;
pub use slot::{MemorySlot, Specials};
