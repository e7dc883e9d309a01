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

//! A directory implemented as a flat, append-only [`SectorChain`] of
//! `FileEntry`/`FileData`/`FileAttribute` records. Finding a file is a
//! linear scan of the whole chain; nothing is indexed. [`crate::directory_tree`]
//! is the tree-backed alternative for directories too large for that to
//! stay cheap.

use phylum_ds::{HeadTail, SectorId, SectorMap, INVALID_SECTOR};
use phylum_err::{FsError, Result};

use crate::delimited_buffer::read_prefix;
use crate::entries::{file_id, pack_name, FileAttribute, FileData, FileEntry, FileId, Tag};
use crate::sector_allocator::SectorAllocator;
use crate::sector_chain::{DirectoryChainKind, SectorChain};
use crate::varint;
use crate::working_buffers::WorkingBuffers;

/// One attribute slot a caller wants filled in or written out by
/// [`DirectoryChain::find`] / [`DirectoryChain::file_attributes`].
pub struct AttributeSlot<'a> {
    pub attribute_type: u8,
    pub bytes: &'a mut [u8],
    pub dirty: bool,
}

/// The result of [`DirectoryChain::find`]: which file was found, how big
/// it is (inline) or where its data chain lives, and whichever attribute
/// slots matched during the same walk.
#[derive(Clone, Copy, Debug)]
pub struct FoundFile {
    pub id: FileId,
    pub size: u32,
    pub chain: HeadTail,
}

impl FoundFile {
    pub const NONE: FoundFile = FoundFile { id: FileId::MAX, size: u32::MAX, chain: HeadTail::INVALID };

    pub fn is_found(&self) -> bool {
        self.id != FileId::MAX
    }
}

impl Default for FoundFile {
    fn default() -> Self {
        Self::NONE
    }
}

pub struct DirectoryChain<'a> {
    chain: SectorChain<'a, DirectoryChainKind>,
    found: FoundFile,
}

impl<'a> DirectoryChain<'a> {
    /// `head` is the directory's preassigned root sector (typically `0`);
    /// unlike [`crate::free_sectors_chain::FreeSectorsChain`] it is never
    /// allocated dynamically.
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        head: SectorId,
    ) -> Result<Self> {
        let buffer = crate::delimited_buffer::DelimitedBuffer::new(buffers.allocate()?);
        let chain = SectorChain::new(sectors, allocator, buffer, HeadTail::new(head, INVALID_SECTOR));
        Ok(Self { chain, found: FoundFile::NONE })
    }

    pub fn mount(&mut self) -> Result<()> {
        self.chain.mount()
    }

    pub fn format(&mut self) -> Result<()> {
        self.chain.format()
    }

    pub fn found(&self) -> FoundFile {
        self.found
    }

    fn grow_if_necessary(&mut self, required: usize) -> Result<()> {
        let total_required = varint::encoded_len(required as u32) as usize + required;
        if self.chain.db_ref().room_for(total_required) {
            return Ok(());
        }
        self.chain.grow_tail()
    }

    fn prepare(&mut self, required: usize) -> Result<()> {
        if !self.chain.appendable() {
            self.chain.seek_end_of_chain()?;
        }
        self.grow_if_necessary(required)
    }

    /// Appends `FileEntry{id=crc32(name), name}` and flushes.
    pub fn touch(&mut self, name: &str) -> Result<FileId> {
        let entry = FileEntry::new(name, 0);
        self.prepare(std::mem::size_of::<FileEntry>())?;
        self.chain.db_mut().append_record(&entry)?;
        self.chain.flush()?;
        Ok(file_id(name))
    }

    /// Linear walk of every record, matching `name`. Populates
    /// [`Self::found`] with the matched file's id, inline size/chain, and
    /// fills any attribute slot whose type matches a `FileAttribute`
    /// belonging to the same file. Returns whether a file was found.
    pub fn find(&mut self, name: &str, attributes: &mut [AttributeSlot<'_>]) -> Result<bool> {
        for slot in attributes.iter_mut() {
            slot.bytes.fill(0);
        }

        let mut found = FoundFile::NONE;
        let packed_name = pack_name(name);

        self.chain.back_to_head();
        while self.chain.forward()? {
            for record in self.chain.db_ref().iter() {
                match record.tag() {
                    Some(Tag::FileEntry) => {
                        if let Some(entry) = read_prefix::<FileEntry>(record.bytes) {
                            if entry.name == packed_name {
                                found.id = entry.id.get();
                                found.size = 0;
                            }
                        }
                    }
                    Some(Tag::FileData) => {
                        if let Some(data) = read_prefix::<FileData>(record.bytes) {
                            if data.id.get() == found.id && found.is_found() {
                                if data.chain.valid() {
                                    found.size = 0;
                                    found.chain = data.chain.to_phylum_ds();
                                } else {
                                    found.size = found.size.wrapping_add(data.size.get());
                                }
                            }
                        }
                    }
                    Some(Tag::FileAttribute) => {
                        if let Some(attr) = read_prefix::<FileAttribute>(record.bytes) {
                            if attr.id.get() == found.id && found.is_found() {
                                let header_len = std::mem::size_of::<FileAttribute>();
                                let payload = &record.bytes[header_len..];
                                for slot in attributes.iter_mut() {
                                    if slot.attribute_type == attr.attribute_type {
                                        let n = slot.bytes.len().min(payload.len());
                                        slot.bytes[..n].copy_from_slice(&payload[..n]);
                                    }
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if found.size == u32::MAX {
            found.size = 0;
        }

        self.found = found;
        Ok(found.is_found())
    }

    pub fn open(&self) -> Result<FoundFile> {
        if !self.found.is_found() {
            return Err(FsError::NameNotFound.into());
        }
        Ok(self.found)
    }

    /// Appends an inline `FileData(size=n)` record.
    pub fn file_data(&mut self, id: FileId, buffer: &[u8]) -> Result<()> {
        let record = FileData::inline(id, buffer.len() as u32);
        let total = std::mem::size_of::<FileData>() + buffer.len();
        self.prepare(total)?;
        self.chain.db_mut().append(&concat_record(&record, buffer))?;
        self.chain.flush()
    }

    /// Appends a `FileData` record recording this file's out-of-line chain.
    pub fn file_chain(&mut self, id: FileId, chain: HeadTail) -> Result<()> {
        let record = FileData::chained(id, chain);
        self.prepare(std::mem::size_of::<FileData>())?;
        self.chain.db_mut().append_record(&record)?;
        self.chain.flush()
    }

    /// Appends a `FileAttribute` record for every dirty slot, flushing once.
    pub fn file_attributes(&mut self, id: FileId, attributes: &mut [AttributeSlot<'_>]) -> Result<()> {
        for slot in attributes.iter_mut() {
            if !slot.dirty {
                continue;
            }
            let record = FileAttribute::new(id, slot.attribute_type, slot.bytes.len() as u8);
            let total = std::mem::size_of::<FileAttribute>() + slot.bytes.len();
            self.prepare(total)?;
            self.chain.db_mut().append(&concat_record(&record, slot.bytes))?;
            slot.dirty = false;
        }
        self.chain.flush()
    }

    /// Walks the whole chain, invoking `data_fn` for every inline
    /// `FileData` record belonging to `id`, in chain order.
    pub fn read(&mut self, id: FileId, mut data_fn: impl FnMut(&[u8]) -> Result<()>) -> Result<u32> {
        let mut copied = 0u32;
        self.chain.back_to_head();
        while self.chain.forward()? {
            for record in self.chain.db_ref().iter() {
                if record.tag() == Some(Tag::FileData) {
                    if let Some(data) = read_prefix::<FileData>(record.bytes) {
                        if data.id.get() == id && data.is_inline() {
                            let header_len = std::mem::size_of::<FileData>();
                            let payload = &record.bytes[header_len..header_len + data.size.get() as usize];
                            data_fn(payload)?;
                            copied += data.size.get();
                        }
                    }
                }
            }
        }
        Ok(copied)
    }
}

fn concat_record<T: zerocopy::IntoBytes + zerocopy::Immutable>(header: &T, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of::<T>() + payload.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}
