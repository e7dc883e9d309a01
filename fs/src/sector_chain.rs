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

//! A sector-linked list shared by every chain-shaped structure: directories,
//! free-sectors chains, data chains and the sector lists backing a B+ tree.
//! [`ChainKind`] supplies the part that's specific to one of those (its
//! header layout and tag); [`SectorChain`] supplies the traversal and
//! growth machinery that's the same for all of them.
//!
//! Growing the chain is the one place crash consistency matters. Unlike the
//! append-one-sector-at-a-time C original, which patches the old tail's `np`
//! and flushes it *before* the new tail's own header has ever reached flash,
//! [`SectorChain::grow_tail`] makes the new tail durable first and only then
//! patches and flushes the old tail. A crash between the two writes leaves
//! the old tail's `np` still pointing nowhere (as if the chain simply hadn't
//! grown yet) rather than pointing at a sector whose header was never
//! written.

use std::marker::PhantomData;

use log::trace;
use phylum_ds::{HeadTail, SectorId, SectorMap, INVALID_SECTOR};
use phylum_err::{CorruptReason, FsError, Result};

use crate::delimited_buffer::DelimitedBuffer;
use crate::entries::{SectorChainHeader, Tag};
use crate::page_lock::PageLock;
use crate::sector_allocator::SectorAllocator;

/// What makes one kind of sector chain different from another: its header
/// layout (so `write_header`/`patch_np` can be type-specific, e.g.
/// [`crate::entries::DataChainHeader`] carries a `bytes` count that a plain
/// [`SectorChainHeader`] doesn't) and how to find the end of a loaded
/// sector's live content.
pub trait ChainKind {
    const TAG: Tag;

    /// Writes this kind's header at the buffer's current position (which is
    /// always the start of a freshly cleared sector) with the given
    /// previous/next pointers.
    fn write_header(db: &mut DelimitedBuffer, pp: SectorId, np: SectorId) -> Result<()>;

    /// Rewrites the `np` field of the header already written to `db` (the
    /// buffer currently mirrors the sector on flash).
    fn patch_np(db: &mut DelimitedBuffer, np: SectorId) -> Result<()>;

    /// `np` of the header already written to `db`, or `None` if the sector
    /// doesn't hold a header of this kind at all (corruption).
    fn next_pointer(db: &DelimitedBuffer) -> Option<SectorId>;

    /// Positions `db`'s cursor just past this sector's live content, right
    /// after a fresh load. The default walks delimited records to the first
    /// zero-length terminator, which is correct for every chain except
    /// [`crate::data_chain::DataChain`], whose payload isn't record-framed.
    fn seek_end_of_buffer(db: &mut DelimitedBuffer) {
        db.seek_end();
    }
}

fn write_plain_header(db: &mut DelimitedBuffer, tag: Tag, pp: SectorId, np: SectorId) -> Result<()> {
    db.append_record(&SectorChainHeader::new(tag, pp, np))?;
    Ok(())
}

fn patch_plain_np(db: &mut DelimitedBuffer, np: SectorId) -> Result<()> {
    db.write_header_with::<SectorChainHeader, _>(|header| header.np = np.into())
}

fn plain_next_pointer(db: &DelimitedBuffer) -> Option<SectorId> {
    db.header::<SectorChainHeader>().map(|header| header.np())
}

/// Marker for a directory chain's own sector header.
pub struct DirectoryChainKind;

impl ChainKind for DirectoryChainKind {
    const TAG: Tag = Tag::DirectorySector;

    fn write_header(db: &mut DelimitedBuffer, pp: SectorId, np: SectorId) -> Result<()> {
        write_plain_header(db, Self::TAG, pp, np)
    }

    fn patch_np(db: &mut DelimitedBuffer, np: SectorId) -> Result<()> {
        patch_plain_np(db, np)
    }

    fn next_pointer(db: &DelimitedBuffer) -> Option<SectorId> {
        plain_next_pointer(db)
    }
}

/// Marker for a free-sectors chain's own sector header.
pub struct FreeSectorsChainKind;

impl ChainKind for FreeSectorsChainKind {
    const TAG: Tag = Tag::FreeSectorsChain;

    fn write_header(db: &mut DelimitedBuffer, pp: SectorId, np: SectorId) -> Result<()> {
        write_plain_header(db, Self::TAG, pp, np)
    }

    fn patch_np(db: &mut DelimitedBuffer, np: SectorId) -> Result<()> {
        patch_plain_np(db, np)
    }

    fn next_pointer(db: &DelimitedBuffer) -> Option<SectorId> {
        plain_next_pointer(db)
    }
}

// A B+ tree's sector-linked-list doesn't fit `ChainKind`: its header carries
// only a single `tail` pointer (`TreeSectorHeader`, §4.9), not the two-way
// `pp`/`np` every other chain kind here has. `tree_sector` manages its own
// sector list directly instead of going through `SectorChain`.

/// A sector-linked list: traversal, in-place header patching and
/// tail growth, generic over [`ChainKind`].
pub struct SectorChain<'a, K: ChainKind> {
    sectors: &'a dyn SectorMap,
    allocator: &'a SectorAllocator,
    lock: PageLock<'a>,
    head: SectorId,
    tail: SectorId,
    length_sectors: u32,
    appendable: bool,
    _kind: PhantomData<K>,
}

impl<'a, K: ChainKind> SectorChain<'a, K> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffer: DelimitedBuffer<'a>,
        chain: HeadTail,
    ) -> Self {
        Self {
            sectors,
            allocator,
            lock: PageLock::empty(sectors, buffer),
            head: chain.head,
            tail: chain.tail,
            length_sectors: 0,
            appendable: false,
            _kind: PhantomData,
        }
    }

    /// Verifies `head()` exists and carries this kind's header tag, then
    /// rewinds so the chain is ready to be walked. Leaves `tail()` at
    /// `head()`; a subsequent [`Self::seek_end_of_chain`] corrects it once
    /// the real tail is known.
    pub fn mount(&mut self) -> Result<()> {
        let head = self.head;
        if !self.sectors.find(head)? {
            return Err(FsError::NotFound { sector: head }.into());
        }

        self.lock.replace(head)?;
        let tag = self.lock.db_ref().iter().next().and_then(|record| record.tag());
        if tag != Some(K::TAG) {
            return Err(FsError::Corrupt(CorruptReason::HeaderTagMismatch {
                sector: head,
                expected: K::TAG as u8,
                found: tag.map(|t| t as u8).unwrap_or(0),
            })
            .into());
        }

        self.tail = head;
        self.back_to_head();
        Ok(())
    }

    /// Writes this kind's header to `head()` (already a known, preassigned
    /// sector) and flushes, starting a fresh one-sector chain.
    pub fn format(&mut self) -> Result<()> {
        let head = self.head;
        self.lock.replace_blank(head)?;
        K::write_header(self.lock.db_mut(), INVALID_SECTOR, INVALID_SECTOR)?;
        self.lock.flush()?;
        self.tail = head;
        self.appendable = true;
        Ok(())
    }

    pub fn head(&self) -> SectorId {
        self.head
    }

    pub fn tail(&self) -> SectorId {
        self.tail
    }

    pub fn chain(&self) -> HeadTail {
        HeadTail::new(self.head, self.tail)
    }

    pub fn length_sectors(&self) -> u32 {
        self.length_sectors
    }

    pub fn appendable(&self) -> bool {
        self.appendable
    }

    pub fn sector(&self) -> SectorId {
        self.lock.sector()
    }

    pub fn valid(&self) -> bool {
        self.head != INVALID_SECTOR && self.tail != INVALID_SECTOR
    }

    pub fn db(&self) -> &DelimitedBuffer<'a> {
        self.lock.db()
    }

    pub fn db_mut(&mut self) -> &mut DelimitedBuffer<'a> {
        self.lock.db_mut()
    }

    pub fn db_ref(&self) -> &DelimitedBuffer<'a> {
        self.lock.db_ref()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.lock.flush()
    }

    fn set_head(&mut self, sector: SectorId) {
        self.head = sector;
        if self.tail == INVALID_SECTOR {
            self.tail = sector;
        }
    }

    fn set_tail(&mut self, sector: SectorId) {
        self.tail = sector;
        if self.head == INVALID_SECTOR {
            self.head = sector;
        }
    }

    /// Starts the chain from scratch if it has no sectors yet; a no-op
    /// otherwise.
    pub fn create_if_necessary(&mut self) -> Result<()> {
        if self.head != INVALID_SECTOR || self.tail != INVALID_SECTOR {
            return Ok(());
        }
        self.grow_tail()
    }

    /// Forgets whatever sector is currently loaded so the next `forward()`
    /// starts again from `head()`. Does not flush; callers must not hold
    /// unflushed writes when rewinding.
    pub fn back_to_head(&mut self) {
        self.length_sectors = 0;
        self.lock.unload();
    }

    /// Loads the next sector in the chain, or the head sector if nothing is
    /// loaded yet. Returns `false` once the chain's end has been reached.
    pub fn forward(&mut self) -> Result<bool> {
        self.appendable = false;

        if !self.valid() {
            return Err(FsError::LogicError("sector chain has no head to walk").into());
        }

        if self.lock.sector() == INVALID_SECTOR {
            trace!("sector-chain: forward first-load sector={}", self.head);
            self.lock.replace(self.head)?;
        } else {
            let np = K::next_pointer(self.lock.db_ref())
                .ok_or(FsError::LogicError("sector chain header missing from loaded sector"))?;
            if np == INVALID_SECTOR || np == 0 {
                return Ok(false);
            }
            trace!("sector-chain: forward sector={np}");
            self.lock.replace(np)?;
        }

        self.tail = self.lock.sector();
        K::seek_end_of_buffer(self.lock.db_mut());
        self.length_sectors += 1;
        Ok(true)
    }

    /// Walks to the end of the chain, loading every sector along the way.
    /// Leaves the last sector loaded with the cursor past its live content,
    /// ready for [`Self::grow_tail`] or an in-place append.
    pub fn seek_end_of_chain(&mut self) -> Result<()> {
        self.back_to_head();
        while self.forward()? {}
        self.appendable = true;
        Ok(())
    }

    /// Appends a brand-new sector to the tail of the chain. The new tail's
    /// header is written and flushed before the previous tail's `np` is
    /// patched and flushed, so a crash mid-growth never leaves a dangling
    /// pointer to a sector without a header.
    pub fn grow_tail(&mut self) -> Result<()> {
        let previous_sector = self.lock.sector();
        let allocated = self.allocator.allocate()?;

        trace!("sector-chain: grow previous={previous_sector} allocated={allocated}");

        self.lock.replace_blank(allocated)?;
        K::write_header(self.lock.db_mut(), previous_sector, INVALID_SECTOR)?;
        self.lock.flush()?;

        self.set_tail(allocated);

        if previous_sector != INVALID_SECTOR {
            self.lock.replace(previous_sector)?;
            K::patch_np(self.lock.db_mut(), allocated)?;
            self.lock.flush()?;

            self.lock.replace(allocated)?;
        } else {
            self.set_head(allocated);
        }
        K::seek_end_of_buffer(self.lock.db_mut());

        self.length_sectors += 1;
        self.appendable = true;
        Ok(())
    }

    /// Pops the head sector off the chain without flushing any patched
    /// pointer back into it: reads the popped sector's own header to learn
    /// what follows, then simply forgets it. The reverse of
    /// [`Self::grow_tail`], used by [`crate::free_sectors_chain::FreeSectorsChain`]
    /// to hand a reclaimed sub-chain sector back one at a time.
    pub fn pop_head(&mut self) -> Result<Option<SectorId>> {
        if self.head == INVALID_SECTOR {
            return Ok(None);
        }

        let popped = self.head;
        self.lock.replace(popped)?;
        let np = K::next_pointer(self.lock.db_ref()).unwrap_or(INVALID_SECTOR);
        self.lock.unload();

        self.head = np;
        if self.tail == popped {
            self.tail = np;
        }
        Ok(Some(popped))
    }

    /// Writes this sector's header if the cursor is still at the very
    /// start, i.e. nothing has been appended to it yet. Returns whether a
    /// header was written.
    pub fn write_header_if_at_start(&mut self, pp: SectorId, np: SectorId) -> Result<bool> {
        if self.lock.db_ref().position() > 0 {
            return Ok(false);
        }
        K::write_header(self.lock.db_mut(), pp, np)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_allocator::SectorAllocator;
    use crate::working_buffers::WorkingBuffers;
    use phylum_ds_std::MemorySectorMap;

    fn chain<'a>(
        map: &'a MemorySectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
    ) -> SectorChain<'a, DirectoryChainKind> {
        SectorChain::new(map, allocator, DelimitedBuffer::new(buffers.allocate().unwrap()), HeadTail::INVALID)
    }

    #[test]
    fn create_if_necessary_allocates_a_single_sector_chain_of_one() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(2, 64);
        let mut c = chain(&map, &allocator, &buffers);

        c.create_if_necessary().unwrap();

        assert!(c.valid());
        assert_eq!(c.head(), c.tail());
    }

    #[test]
    fn grow_tail_links_the_previous_sector_forward() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(2, 64);
        let mut c = chain(&map, &allocator, &buffers);

        c.create_if_necessary().unwrap();
        let first = c.tail();
        c.grow_tail().unwrap();
        let second = c.tail();
        assert_ne!(first, second);

        c.back_to_head();
        assert!(c.forward().unwrap());
        assert_eq!(c.sector(), first);
        assert!(c.forward().unwrap());
        assert_eq!(c.sector(), second);
        assert!(!c.forward().unwrap());
    }

    #[test]
    fn new_tail_header_is_durable_even_if_we_never_patch_the_old_one() {
        // Simulates a crash right after grow_tail's first flush: the new
        // tail's header is on flash, but the old tail's np patch never
        // happened. The new sector must still be self-describing.
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(2, 64);
        let mut c = chain(&map, &allocator, &buffers);
        c.create_if_necessary().unwrap();
        let allocated = allocator.allocate().unwrap();

        {
            let mut scratch = DelimitedBuffer::new(buffers.allocate().unwrap());
            DirectoryChainKind::write_header(&mut scratch, c.tail(), INVALID_SECTOR).unwrap();
            map.write(allocated, scratch.as_bytes()).unwrap();
        }

        let mut raw = vec![0u8; 64];
        map.read(allocated, &mut raw).unwrap();
        assert_eq!(raw[0], Tag::DirectorySector as u8);
    }
}
