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

//! Binds a [`DelimitedBuffer`] to whichever sector it currently mirrors.
//!
//! Every chain and tree keeps exactly one working buffer, and every sector
//! visit overwrites it: `forward()` loads the next sector over whatever the
//! previous one left behind, and a B+ tree descent overwrites it once per
//! level. [`PageLock::replace`] is the one place that happens, and it's the
//! reason tree code navigates by [`crate::entries::NodePtr`] (sector +
//! in-sector position) instead of holding a reference into the buffer
//! across a descent: the bytes a `NodePtr` pointed at are gone the moment
//! `replace` loads something else in their place.

use log::trace;
use phylum_ds::{SectorId, SectorMap, INVALID_SECTOR};
use phylum_err::Result;

use crate::delimited_buffer::DelimitedBuffer;

pub struct PageLock<'a> {
    sectors: &'a dyn SectorMap,
    buffer: DelimitedBuffer<'a>,
    sector: SectorId,
    dirty: bool,
}

impl<'a> PageLock<'a> {
    pub fn empty(sectors: &'a dyn SectorMap, buffer: DelimitedBuffer<'a>) -> Self {
        Self { sectors, buffer, sector: INVALID_SECTOR, dirty: false }
    }

    /// Loads `sector` read-only: the buffer mirrors its on-flash contents
    /// and no flush is implied if it's never marked dirty.
    pub fn reading(sectors: &'a dyn SectorMap, buffer: DelimitedBuffer<'a>, sector: SectorId) -> Result<Self> {
        let mut lock = Self::empty(sectors, buffer);
        lock.replace(sector)?;
        Ok(lock)
    }

    /// Loads `sector` for read-modify-write.
    pub fn writing(sectors: &'a dyn SectorMap, buffer: DelimitedBuffer<'a>, sector: SectorId) -> Result<Self> {
        Self::reading(sectors, buffer, sector)
    }

    /// Starts `sector` from scratch, without reading its prior contents.
    pub fn overwrite(sectors: &'a dyn SectorMap, buffer: DelimitedBuffer<'a>, sector: SectorId) -> Result<Self> {
        let mut lock = Self::empty(sectors, buffer);
        lock.replace_blank(sector)?;
        Ok(lock)
    }

    pub fn sector(&self) -> SectorId {
        self.sector
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn db(&self) -> &DelimitedBuffer<'a> {
        &self.buffer
    }

    pub fn db_mut(&mut self) -> &mut DelimitedBuffer<'a> {
        self.dirty = true;
        &mut self.buffer
    }

    /// Reads the buffer without implying it will be modified.
    pub fn db_ref(&self) -> &DelimitedBuffer<'a> {
        &self.buffer
    }

    /// Loads `sector`'s contents, replacing anything currently held. Flushes
    /// the outgoing sector first if it was dirty. Leaves the cursor at the
    /// start of the buffer; callers that know how their records are framed
    /// (delimited records vs. a raw payload) position it from there.
    pub fn replace(&mut self, sector: SectorId) -> Result<()> {
        self.flush()?;
        trace!("page-lock: reading sector={sector}");
        self.buffer.clear();
        self.sectors.read(sector, self.buffer.as_bytes_mut())?;
        self.buffer.rewind();
        self.sector = sector;
        self.dirty = false;
        Ok(())
    }

    /// Forgets the currently loaded sector without flushing it, so a chain
    /// can re-walk itself from the head. Callers must not still hold
    /// unflushed writes when calling this.
    pub fn unload(&mut self) {
        self.sector = INVALID_SECTOR;
        self.dirty = false;
        self.buffer.rewind();
    }

    /// Starts a brand-new sector with no on-flash contents yet: the buffer
    /// is cleared but nothing is read, since there's nothing there.
    pub fn replace_blank(&mut self, sector: SectorId) -> Result<()> {
        self.flush()?;
        self.buffer.clear();
        self.sector = sector;
        self.dirty = true;
        Ok(())
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty || self.sector == INVALID_SECTOR {
            return Ok(());
        }
        trace!("page-lock: flush sector={}", self.sector);
        self.sectors.write(self.sector, self.buffer.as_bytes())?;
        self.dirty = false;
        Ok(())
    }
}

impl<'a> Drop for PageLock<'a> {
    /// Dropping a page-lock with unflushed writes still pending is a logic
    /// error in the caller, not something to silently paper over.
    fn drop(&mut self) {
        debug_assert!(!self.dirty, "page-lock dropped with unflushed writes to sector={}", self.sector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_buffers::WorkingBuffers;
    use phylum_ds_std::MemorySectorMap;

    #[test]
    fn replace_flushes_the_outgoing_sector_first() {
        let map = MemorySectorMap::new(32);
        let buffers = WorkingBuffers::new(1, 32);
        let mut lock = PageLock::empty(&map, DelimitedBuffer::new(buffers.allocate().unwrap()));

        lock.replace_blank(0).unwrap();
        lock.db_mut().append(b"hello").unwrap();
        lock.replace(1).unwrap();

        let mut raw = vec![0u8; 32];
        map.read(0, &mut raw).unwrap();
        assert_eq!(&raw[..6], [5, b'h', b'e', b'l', b'l', b'o']);
    }
}
