// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Sector storage interface consumed by `phylum`.
//!
//! This crate holds only the contract: a sector-indexed read/write/erase
//! surface that stands in for the wear-levelling / translation layer a real
//! flash device would sit behind. Concrete implementations live in
//! `phylum-ds-std`.

pub use phylum_err::{Error, FsError, IoError, Result};

/// A logical sector number. `INVALID_SECTOR` denotes "none" everywhere a
/// `SectorId` is optional.
pub type SectorId = u32;

pub const INVALID_SECTOR: SectorId = SectorId::MAX;

/// Names a chain: `head` is its first sector, `tail` its current last one.
/// Either field may be [`INVALID_SECTOR`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HeadTail {
    pub head: SectorId,
    pub tail: SectorId,
}

impl HeadTail {
    pub const INVALID: HeadTail = HeadTail { head: INVALID_SECTOR, tail: INVALID_SECTOR };

    pub fn new(head: SectorId, tail: SectorId) -> Self {
        Self { head, tail }
    }

    pub fn valid(&self) -> bool {
        self.head != INVALID_SECTOR
    }
}

/// Read/write/erase access to fixed-size logical sectors.
///
/// All I/O is sector-sized; partial sector I/O is not supported.
/// Implementations are expected to support concurrent `read`/`write` calls
/// through interior mutability the way [`std::fs::File`]'s `*_at` methods
/// do, since `phylum` holds shared references to a `SectorMap` across many
/// chain and tree objects rather than threading a single `&mut` through the
/// whole call graph.
pub trait SectorMap {
    /// Fixed byte length `S` of every sector.
    fn sector_size(&self) -> usize;

    /// Current number of live sectors; used to seed [`crate::SectorId`]
    /// allocation.
    fn size(&self) -> SectorId;

    /// Reads exactly `sector_size()` bytes into `buf`.
    fn read(&self, sector: SectorId, buf: &mut [u8]) -> Result<()>;

    /// Writes exactly `sector_size()` bytes from `buf`.
    fn write(&self, sector: SectorId, buf: &[u8]) -> Result<()>;

    /// Wipes every sector back to the erased-flash value (`0xff`).
    fn clear(&self) -> Result<()>;

    /// Existence check used by `mount()` before trusting a head sector.
    fn find(&self, sector: SectorId) -> Result<bool>;
}
