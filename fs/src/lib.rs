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

//! Phylum: a small embedded file system that persists named files on a
//! sector-addressable flash device, built on the [`phylum_ds::SectorMap`]
//! abstraction over the underlying wear-levelling/translation layer.
//!
//! [`Phylum`] is the facade most callers want: a flat, `crc32(name)`-keyed
//! directory rooted at a fixed sector, with file content either inline or
//! promoted to its own [`data_chain::DataChain`]. The modules underneath it
//! — sector allocation, working buffers, page locks, the delimited-record
//! buffer, sector chains, the B+ tree sector, and the tree-backed directory
//! alternative — are public in their own right for callers that want to
//! assemble a different volume layout (e.g. a [`directory_tree::DirectoryTree`]
//! instead of a flat [`directory_chain::DirectoryChain`]).

pub mod data_chain;
pub mod delimited_buffer;
pub mod directory_chain;
pub mod directory_tree;
pub mod entries;
pub mod file_appender;
pub mod file_reader;
pub mod free_sectors_chain;
pub mod page_lock;
pub mod sector_allocator;
pub mod sector_chain;
pub mod tree_sector;
pub mod varint;
pub mod working_buffers;

pub use phylum_ds::{HeadTail, SectorId, SectorMap, INVALID_SECTOR};
pub use phylum_err::{CorruptReason, Error, FsError, IoError, Result};

use delimited_buffer::DelimitedBuffer;
use directory_chain::{AttributeSlot, DirectoryChain};
use entries::{FileId, SuperBlock, Tag};
use file_appender::FileAppender;
use file_reader::FileReader;
use free_sectors_chain::FreeSectorsChain;
use page_lock::PageLock;
use sector_allocator::SectorAllocator;
use working_buffers::WorkingBuffers;

/// Sector zero holds nothing but the [`SuperBlock`] record; one and two are
/// preassigned roots the way a boot sector reserves fixed cluster numbers
/// for a root directory, rather than letting them float through the
/// allocator like everything created afterward.
const SUPERBLOCK_SECTOR: SectorId = 0;
const DIRECTORY_SECTOR: SectorId = 1;
const FREE_SECTORS_SECTOR: SectorId = 2;

/// Parameters every on-flash structure and the allocator/buffer pool must
/// agree on before a volume is formatted or mounted. Passed in by the
/// caller rather than read off an on-flash boot sector, since nothing is
/// self-describing until `format()` has written the `SuperBlock` itself.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    pub sector_size: usize,
    pub working_buffers: usize,
    pub tree_order: usize,
}

impl Geometry {
    pub fn new(sector_size: usize, working_buffers: usize, tree_order: usize) -> Self {
        Self { sector_size, working_buffers, tree_order }
    }
}

/// A mounted (or freshly formatted) volume: the allocator, working-buffer
/// pool, and a flat [`DirectoryChain`] rooted at a fixed sector, plus the
/// [`FreeSectorsChain`] that takes back whatever the directory or its data
/// chains stop using. Each caller owns the `SectorMap`/`SectorAllocator`/
/// `WorkingBuffers` it hands in, the same split every chain and tree type
/// in this crate uses, so several `Phylum` handles can share one pool if
/// a caller wants that.
pub struct Phylum<'a> {
    sectors: &'a dyn SectorMap,
    allocator: &'a SectorAllocator,
    buffers: &'a WorkingBuffers,
    geometry: Geometry,
    directory: DirectoryChain<'a>,
    free_sectors: FreeSectorsChain<'a>,
}

impl<'a> Phylum<'a> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        geometry: Geometry,
    ) -> Result<Self> {
        if geometry.sector_size != sectors.sector_size() {
            return Err(FsError::Corrupt(CorruptReason::SectorSizeMismatch {
                expected: geometry.sector_size,
                found: sectors.sector_size(),
            })
            .into());
        }
        if geometry.sector_size != buffers.buffer_size() {
            return Err(FsError::Corrupt(CorruptReason::SectorSizeMismatch {
                expected: geometry.sector_size,
                found: buffers.buffer_size(),
            })
            .into());
        }

        let directory = DirectoryChain::new(sectors, allocator, buffers, DIRECTORY_SECTOR)?;
        let free_sectors =
            FreeSectorsChain::new(sectors, allocator, buffers, HeadTail::new(FREE_SECTORS_SECTOR, INVALID_SECTOR))?;
        Ok(Self { sectors, allocator, buffers, geometry, directory, free_sectors })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Writes a fresh `SuperBlock` plus empty directory and free-sectors
    /// chains. Destroys whatever a prior volume left in those sectors.
    pub fn format(&mut self) -> Result<()> {
        self.write_superblock()?;
        self.directory.format()?;
        self.free_sectors.format()
    }

    /// Verifies the `SuperBlock` and both chain headers, then leaves the
    /// volume ready for `touch`/`find`/`append`/`open`.
    pub fn mount(&mut self) -> Result<()> {
        self.verify_superblock()?;
        self.directory.mount()?;
        self.free_sectors.mount()
    }

    fn write_superblock(&self) -> Result<()> {
        let buffer = DelimitedBuffer::new(self.buffers.allocate()?);
        let mut lock = PageLock::overwrite(self.sectors, buffer, SUPERBLOCK_SECTOR)?;
        lock.db_mut().append_record(&SuperBlock::new(SuperBlock::CURRENT_VERSION))?;
        lock.db_mut().terminate()?;
        lock.flush()
    }

    fn verify_superblock(&self) -> Result<()> {
        let buffer = DelimitedBuffer::new(self.buffers.allocate()?);
        let lock = PageLock::reading(self.sectors, buffer, SUPERBLOCK_SECTOR)?;
        let header = lock.db_ref().header::<SuperBlock>();
        match header {
            Some(header) if header.tag == Tag::SuperBlock as u8 && header.version.get() == SuperBlock::CURRENT_VERSION => {
                Ok(())
            }
            Some(header) => Err(FsError::Corrupt(CorruptReason::HeaderTagMismatch {
                sector: SUPERBLOCK_SECTOR,
                expected: Tag::SuperBlock as u8,
                found: header.tag,
            })
            .into()),
            None => Err(FsError::Corrupt(CorruptReason::HeaderTagMismatch {
                sector: SUPERBLOCK_SECTOR,
                expected: Tag::SuperBlock as u8,
                found: Tag::None as u8,
            })
            .into()),
        }
    }

    /// Creates an empty directory entry for `name`, ready for
    /// [`Self::append`] to write content into.
    pub fn touch(&mut self, name: &str) -> Result<FileId> {
        self.directory.touch(name)
    }

    /// Looks `name` up, filling in any attribute slots whose type matches
    /// an attribute already recorded for the file.
    pub fn find(&mut self, name: &str, attributes: &mut [AttributeSlot<'_>]) -> Result<bool> {
        self.directory.find(name, attributes)
    }

    /// Opens `name` for append, `touch`ing it first if it doesn't already
    /// exist. Dropping the returned [`FileAppender`] without calling
    /// `close` leaves any buffered-but-unflushed bytes unwritten.
    pub fn append(&mut self, name: &str) -> Result<FileAppender<'a, '_>> {
        if !self.directory.find(name, &mut [])? {
            self.directory.touch(name)?;
            self.directory.find(name, &mut [])?;
        }
        let found = self.directory.open()?;
        Ok(FileAppender::new(self.sectors, self.allocator, self.buffers, &mut self.directory, found, &[]))
    }

    /// Opens `name` for reading. Errors with [`FsError::NameNotFound`] if
    /// no live entry matches.
    pub fn open(&mut self, name: &str) -> Result<FileReader<'a>> {
        if !self.directory.find(name, &mut [])? {
            return Err(FsError::NameNotFound.into());
        }
        let found = self.directory.open()?;
        FileReader::open(self.sectors, self.allocator, self.buffers, &mut self.directory, found)
    }

    /// Direct access to the volume's reclaim queue, for callers that free
    /// chains or trees of their own and want to hand the sectors back.
    pub fn free_sectors(&mut self) -> &mut FreeSectorsChain<'a> {
        &mut self.free_sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylum_ds_std::MemorySectorMap;

    fn geometry() -> Geometry {
        Geometry::new(256, 4, 4)
    }

    #[test]
    fn format_then_mount_round_trips() {
        let map = MemorySectorMap::new(geometry().sector_size);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(geometry().working_buffers, geometry().sector_size);

        {
            let mut phylum = Phylum::new(&map, &allocator, &buffers, geometry()).unwrap();
            phylum.format().unwrap();
        }

        let mut phylum = Phylum::new(&map, &allocator, &buffers, geometry()).unwrap();
        phylum.mount().unwrap();
    }

    #[test]
    fn mounting_a_mismatched_geometry_is_a_corrupt_error() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let bad = Geometry::new(128, 4, 4);
        assert!(Phylum::new(&map, &allocator, &buffers, bad).is_err());
    }

    #[test]
    fn mounting_before_formatting_fails() {
        let map = MemorySectorMap::new(geometry().sector_size);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(geometry().working_buffers, geometry().sector_size);
        let mut phylum = Phylum::new(&map, &allocator, &buffers, geometry()).unwrap();
        assert!(phylum.mount().is_err());
    }

    #[test]
    fn touch_write_read_round_trips_through_the_facade() {
        let map = MemorySectorMap::new(geometry().sector_size);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(geometry().working_buffers, geometry().sector_size);
        let mut phylum = Phylum::new(&map, &allocator, &buffers, geometry()).unwrap();
        phylum.format().unwrap();

        let mut appender = phylum.append("greeting.txt").unwrap();
        appender.write(b"hello, phylum").unwrap();
        appender.close().unwrap();

        let mut reader = phylum.open("greeting.txt").unwrap();
        let mut out = [0u8; 13];
        assert_eq!(reader.read(&mut out).unwrap(), 13);
        assert_eq!(&out, b"hello, phylum");
    }

    #[test]
    fn opening_a_missing_file_is_name_not_found() {
        let map = MemorySectorMap::new(geometry().sector_size);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(geometry().working_buffers, geometry().sector_size);
        let mut phylum = Phylum::new(&map, &allocator, &buffers, geometry()).unwrap();
        phylum.format().unwrap();

        assert!(phylum.open("missing.txt").is_err());
    }
}
