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

//! A [`SectorChain`] whose payload isn't record-framed: each sector's
//! header carries a `bytes` count, and everything from one byte past the
//! header's terminator up to that count is raw file content. The one byte
//! immediately after the header is always skipped, by both the write and
//! the read path, so a sector that has never had anything written to it
//! still reads back as zero live bytes regardless of what garbage (or a
//! leftover terminator) sits there.

use phylum_ds::{HeadTail, SectorId, SectorMap};
use phylum_err::{FsError, Result};

use crate::delimited_buffer::DelimitedBuffer;
use crate::entries::{DataChainHeader, Tag};
use crate::sector_allocator::SectorAllocator;
use crate::sector_chain::{ChainKind, SectorChain};
use crate::working_buffers::WorkingBuffers;

pub struct DataChainKind;

impl ChainKind for DataChainKind {
    const TAG: Tag = Tag::DataSector;

    fn write_header(db: &mut DelimitedBuffer, pp: SectorId, np: SectorId) -> Result<()> {
        db.append_record(&DataChainHeader::new(pp, np, 0))?;
        db.terminate()
    }

    fn patch_np(db: &mut DelimitedBuffer, np: SectorId) -> Result<()> {
        db.write_header_with::<DataChainHeader, _>(|header| header.np = np.into())
    }

    fn next_pointer(db: &DelimitedBuffer) -> Option<SectorId> {
        db.header::<DataChainHeader>().map(|header| header.np.get())
    }

    fn seek_end_of_buffer(db: &mut DelimitedBuffer) {
        db.seek_end();
        db.skip(1);
    }
}

pub struct DataChain<'a> {
    chain: SectorChain<'a, DataChainKind>,
    /// Whether the cursor is currently positioned for `read()` to continue
    /// from. Cleared by `write()`, which leaves the cursor past whatever it
    /// just appended rather than where a reader would want to resume.
    reading: bool,
}

impl<'a> DataChain<'a> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        chain: HeadTail,
    ) -> Result<Self> {
        let buffer = DelimitedBuffer::new(buffers.allocate()?);
        Ok(Self { chain: SectorChain::new(sectors, allocator, buffer, chain), reading: false })
    }

    pub fn chain(&self) -> HeadTail {
        self.chain.chain()
    }

    fn current_header(&self) -> Result<DataChainHeader> {
        self.chain.db_ref().header::<DataChainHeader>().ok_or(FsError::LogicError("data chain sector missing header").into())
    }

    /// Positions the current sector's cursor to read exactly its live
    /// payload: `available()` after this call is that sector's `bytes`.
    fn constrain_to_header(&mut self) -> Result<()> {
        let bytes = self.current_header()?.bytes.get();
        self.chain.db_mut().constrain(bytes as usize);
        Ok(())
    }

    /// Walks to the tail, positioning the cursor at the first free byte so
    /// appends continue where a previous session left off. Creates the
    /// chain's first sector if it has none yet.
    fn ensure_appendable(&mut self) -> Result<()> {
        if self.chain.appendable() {
            return Ok(());
        }

        if !self.chain.valid() {
            self.chain.create_if_necessary()?;
            return Ok(());
        }

        self.chain.back_to_head();
        self.chain.seek_end_of_chain()?;
        let bytes = self.current_header()?.bytes.get();
        self.chain.db_mut().skip(bytes as usize);
        Ok(())
    }

    /// Copies `data` into the chain, growing the tail as sectors fill.
    /// Returns the number of bytes written (always `data.len()` absent an
    /// error).
    pub fn write(&mut self, mut data: &[u8]) -> Result<usize> {
        self.ensure_appendable()?;
        self.reading = false;

        let mut written = 0usize;
        while !data.is_empty() {
            let copied = self.chain.db_mut().write_raw(data);
            if copied > 0 {
                self.chain.db_mut().write_header_with::<DataChainHeader, _>(|header| {
                    header.bytes = (header.bytes.get() + copied as u16).into();
                })?;
                data = &data[copied..];
                written += copied;
            }

            if !data.is_empty() {
                self.chain.grow_tail()?;
            }
        }

        self.chain.flush()?;
        Ok(written)
    }

    /// Copies up to `out.len()` bytes from the chain into `out`, advancing
    /// across sectors as needed. Returns the number of bytes copied, which
    /// is less than `out.len()` only once the chain's content is exhausted.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.chain.valid() {
            return Ok(0);
        }

        if !self.reading {
            self.chain.back_to_head();
            if !self.chain.forward()? {
                return Ok(0);
            }
            self.constrain_to_header()?;
            self.reading = true;
        }

        let mut total = 0usize;
        while total < out.len() {
            if self.chain.db_ref().available() == 0 {
                if !self.chain.forward()? {
                    break;
                }
                self.constrain_to_header()?;
                continue;
            }
            let n = self.chain.db_mut().read_raw(&mut out[total..]);
            total += n;
        }
        Ok(total)
    }

    /// Sum of every sector's `bytes` header field across the whole chain.
    pub fn total_bytes(&mut self) -> Result<u32> {
        if !self.chain.valid() {
            return Ok(0);
        }
        self.reading = false;
        self.chain.back_to_head();
        let mut total = 0u32;
        while self.chain.forward()? {
            total += self.current_header()?.bytes.get() as u32;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylum_ds_std::MemorySectorMap;

    #[test]
    fn write_then_read_round_trips_within_one_sector() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);
        let mut dc = DataChain::new(&map, &allocator, &buffers, HeadTail::INVALID).unwrap();

        dc.write(b"hello world").unwrap();
        assert_eq!(dc.total_bytes().unwrap(), 11);

        let mut out = [0u8; 11];
        assert_eq!(dc.read(&mut out).unwrap(), 11);
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn write_spans_sectors_when_payload_exceeds_one() {
        let map = MemorySectorMap::new(32);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 32);
        let mut dc = DataChain::new(&map, &allocator, &buffers, HeadTail::INVALID).unwrap();

        let payload: Vec<u8> = (0u8..100).collect();
        dc.write(&payload).unwrap();
        assert_eq!(dc.total_bytes().unwrap(), 100);
        assert!(dc.chain().tail != dc.chain().head);

        let mut out = vec![0u8; 100];
        assert_eq!(dc.read(&mut out).unwrap(), 100);
        assert_eq!(out, payload);
    }

    #[test]
    fn appendable_resume_continues_after_close_and_reopen() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);

        let chain = {
            let mut dc = DataChain::new(&map, &allocator, &buffers, HeadTail::INVALID).unwrap();
            dc.write(b"abc").unwrap();
            dc.chain()
        };

        let mut dc = DataChain::new(&map, &allocator, &buffers, chain).unwrap();
        dc.write(b"def").unwrap();
        assert_eq!(dc.total_bytes().unwrap(), 6);

        let mut out = [0u8; 6];
        assert_eq!(dc.read(&mut out).unwrap(), 6);
        assert_eq!(&out, b"abcdef");
    }
}
