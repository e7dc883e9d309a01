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

//! Buffers writes in a scratch area the size of one sector and decides,
//! on each flush, which of a file's three storage states it belongs in:
//! small enough to stay inline in the directory chain, already promoted
//! to its own [`DataChain`], or crossing the inline threshold right now
//! and needing to be promoted.

use phylum_ds::{HeadTail, SectorMap};
use phylum_err::Result;

use crate::data_chain::DataChain;
use crate::directory_chain::{AttributeSlot, DirectoryChain, FoundFile};
use crate::entries::FileId;
use crate::sector_allocator::SectorAllocator;
use crate::working_buffers::WorkingBuffers;

struct Attribute {
    attribute_type: u8,
    value: [u8; 4],
    dirty: bool,
}

/// Writes new content for one open file, promoting it from an inline
/// directory record to a [`DataChain`] once it outgrows half a sector.
pub struct FileAppender<'a, 'd> {
    sectors: &'a dyn SectorMap,
    allocator: &'a SectorAllocator,
    buffers: &'a WorkingBuffers,
    directory: &'d mut DirectoryChain<'a>,
    id: FileId,
    chain: HeadTail,
    scratch: Vec<u8>,
    attributes: Vec<Attribute>,
}

impl<'a, 'd> FileAppender<'a, 'd> {
    /// `found` is the result of the caller's own `directory.find(name, ..)`;
    /// `attributes` is whatever attribute values that same lookup already
    /// read out, so `u32`/`set_u32` can work against a live cache instead of
    /// re-walking the directory on every access.
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        directory: &'d mut DirectoryChain<'a>,
        found: FoundFile,
        attributes: &[(u8, [u8; 4])],
    ) -> Self {
        Self {
            sectors,
            allocator,
            buffers,
            directory,
            id: found.id,
            chain: found.chain,
            scratch: Vec::with_capacity(buffers.buffer_size()),
            attributes: attributes
                .iter()
                .map(|&(attribute_type, value)| Attribute { attribute_type, value, dirty: false })
                .collect(),
        }
    }

    fn half_sector(&self) -> usize {
        self.buffers.buffer_size() / 2
    }

    /// Copies `data` into the scratch buffer, flushing whenever it fills.
    pub fn write(&mut self, mut data: &[u8]) -> Result<usize> {
        let mut written = 0usize;
        while !data.is_empty() {
            let room = self.buffers.buffer_size() - self.scratch.len();
            let n = room.min(data.len());
            self.scratch.extend_from_slice(&data[..n]);
            data = &data[n..];
            written += n;

            if self.scratch.len() == self.buffers.buffer_size() {
                self.flush()?;
            }
        }
        Ok(written)
    }

    /// Commits whatever is in the scratch buffer, choosing among the three
    /// promotion states described in the module doc.
    pub fn flush(&mut self) -> Result<()> {
        if self.scratch.is_empty() {
            return Ok(());
        }

        if self.chain.valid() {
            let mut data_chain = DataChain::new(self.sectors, self.allocator, self.buffers, self.chain)?;
            data_chain.write(&self.scratch)?;
            self.chain = data_chain.chain();
            self.directory.file_chain(self.id, self.chain)?;
        } else if self.scratch.len() < self.half_sector() {
            self.directory.file_data(self.id, &self.scratch)?;
        } else {
            self.promote()?;
        }

        self.scratch.clear();
        Ok(())
    }

    /// Moves every inline `FileData` byte written so far plus the pending
    /// scratch buffer into a freshly created data chain.
    fn promote(&mut self) -> Result<()> {
        let mut data_chain = DataChain::new(self.sectors, self.allocator, self.buffers, HeadTail::INVALID)?;

        let mut prior = Vec::new();
        self.directory.read(self.id, |bytes| {
            prior.extend_from_slice(bytes);
            Ok(())
        })?;
        if !prior.is_empty() {
            data_chain.write(&prior)?;
        }
        data_chain.write(&self.scratch)?;

        self.chain = data_chain.chain();
        self.directory.file_chain(self.id, self.chain)
    }

    fn find_attribute(&mut self, attribute_type: u8) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.attribute_type == attribute_type)
    }

    /// Reads a cached 4-byte attribute as a little-endian `u32`, if present.
    pub fn u32(&mut self, attribute_type: u8) -> Option<u32> {
        self.find_attribute(attribute_type).map(|a| u32::from_le_bytes(a.value))
    }

    /// Writes a 4-byte attribute, marking it dirty so [`Self::close`] emits
    /// it. Adds a new slot if this type hasn't been seen before.
    pub fn set_u32(&mut self, attribute_type: u8, value: u32) {
        if let Some(attr) = self.find_attribute(attribute_type) {
            attr.value = value.to_le_bytes();
            attr.dirty = true;
        } else {
            self.attributes.push(Attribute { attribute_type, value: value.to_le_bytes(), dirty: true });
        }
    }

    /// Flushes pending data, then writes every dirty attribute through
    /// [`DirectoryChain::file_attributes`] — data always lands before the
    /// attributes that might describe it.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;

        let FileAppender { directory, id, attributes, .. } = &mut self;
        let mut slots: Vec<AttributeSlot<'_>> = attributes
            .iter_mut()
            .map(|a| AttributeSlot { attribute_type: a.attribute_type, bytes: &mut a.value, dirty: a.dirty })
            .collect();
        directory.file_attributes(*id, &mut slots)?;
        drop(slots);

        for attr in attributes.iter_mut() {
            attr.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector_allocator::SectorAllocator;
    use phylum_ds_std::MemorySectorMap;

    fn opened_directory<'a>(
        map: &'a MemorySectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
    ) -> DirectoryChain<'a> {
        let mut dir = DirectoryChain::new(map, allocator, buffers, 0).unwrap();
        dir.format().unwrap();
        dir
    }

    #[test]
    fn small_write_stays_inline() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        dir.touch("small.txt").unwrap();
        dir.find("small.txt", &mut []).unwrap();
        let found = dir.open().unwrap();

        let mut appender = FileAppender::new(&map, &allocator, &buffers, &mut dir, found, &[]);
        appender.write(b"hello").unwrap();
        appender.close().unwrap();

        dir.find("small.txt", &mut []).unwrap();
        assert_eq!(dir.found().size, 5);
        assert!(!dir.found().chain.valid());
    }

    #[test]
    fn large_write_promotes_to_a_data_chain() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        dir.touch("big.bin").unwrap();
        dir.find("big.bin", &mut []).unwrap();
        let found = dir.open().unwrap();

        let payload = vec![0xabu8; 200];
        let mut appender = FileAppender::new(&map, &allocator, &buffers, &mut dir, found, &[]);
        appender.write(&payload).unwrap();
        appender.close().unwrap();

        dir.find("big.bin", &mut []).unwrap();
        assert!(dir.found().chain.valid());
    }

    #[test]
    fn prior_inline_bytes_survive_promotion() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        dir.touch("grows.bin").unwrap();
        dir.find("grows.bin", &mut []).unwrap();
        let found = dir.open().unwrap();
        let mut appender = FileAppender::new(&map, &allocator, &buffers, &mut dir, found, &[]);
        appender.write(b"abc").unwrap();
        appender.close().unwrap();

        dir.find("grows.bin", &mut []).unwrap();
        let found = dir.open().unwrap();
        let mut appender = FileAppender::new(&map, &allocator, &buffers, &mut dir, found, &[]);
        appender.write(&vec![0x11u8; 200]).unwrap();
        appender.close().unwrap();

        dir.find("grows.bin", &mut []).unwrap();
        assert!(dir.found().chain.valid());
        let mut data_chain =
            DataChain::new(&map, &allocator, &buffers, dir.found().chain).unwrap();
        assert_eq!(data_chain.total_bytes().unwrap(), 203);
    }

    #[test]
    fn dirty_attributes_are_emitted_on_close() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        dir.touch("attrs.txt").unwrap();
        dir.find("attrs.txt", &mut []).unwrap();
        let found = dir.open().unwrap();

        let mut appender = FileAppender::new(&map, &allocator, &buffers, &mut dir, found, &[]);
        appender.set_u32(9, 42);
        assert_eq!(appender.u32(9), Some(42));
        appender.close().unwrap();

        let mut out = [0u8; 4];
        let mut slots = [AttributeSlot { attribute_type: 9, bytes: &mut out, dirty: false }];
        assert!(dir.find("attrs.txt", &mut slots).unwrap());
        assert_eq!(u32::from_le_bytes(out), 42);
    }
}
