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

//! A directory backed by a [`TreeSector`] instead of a linear scan: `find`
//! is a B+ tree lookup keyed by `file_id(name)` rather than a walk of every
//! record in [`crate::directory_chain::DirectoryChain`]. The tradeoff is the
//! inline payload each entry can carry directly in its tree node is fixed
//! and small ([`INLINE_CAPACITY`]); anything bigger promotes to an
//! out-of-line [`crate::data_chain::DataChain`] the same way a flat
//! directory's `FileData` record does.

use zerocopy::{FromBytes, IntoBytes};

use phylum_ds::{HeadTail as DsHeadTail, SectorId, SectorMap};
use phylum_err::{FsError, Result};

use crate::directory_chain::AttributeSlot;
use crate::entries::{file_id, FileId, FsFileEntry, HeadTail};
use crate::sector_allocator::SectorAllocator;
use crate::tree_sector::{TreeSector, TreeValue};
use crate::working_buffers::WorkingBuffers;

/// A directory entry marked deleted is left in the tree (tombstoned)
/// rather than removed, the same tradeoff B+ tree deletion usually makes
/// to avoid rebalancing on every unlink.
pub const DELETED_FLAG: u16 = 0x0001;

/// How many bytes of small-file content a single tree node can hold inline
/// before [`DirectoryTree::file_chain`] must promote it to a data chain.
pub const INLINE_CAPACITY: usize = 157;

/// How many [`FileAttribute`](crate::entries::FileAttribute)-equivalent
/// slots one tree value carries. Unlike [`crate::directory_chain::DirectoryChain`],
/// which appends a fresh record per write and lets later ones shadow
/// earlier ones during a scan, a tree value has no append log to scan, so
/// each attribute type gets a fixed slot that is simply overwritten —
/// "last write wins" falls out of that for free.
pub const MAX_ATTRIBUTES: usize = 4;

const ATTRIBUTE_VALUE_LEN: usize = 4;
const ATTRIBUTE_RECORD_LEN: usize = 2 + ATTRIBUTE_VALUE_LEN;

#[derive(Clone, Copy, Debug, Default)]
struct InlineAttribute {
    attribute_type: u8,
    present: bool,
    value: [u8; ATTRIBUTE_VALUE_LEN],
}

/// A directory entry's tree-node payload: [`FsFileEntry`]'s bookkeeping
/// plus its inline bytes and attribute slots, if any.
#[derive(Clone, Copy, Debug)]
pub struct DirTreeValue {
    pub entry: FsFileEntry,
    pub data: [u8; INLINE_CAPACITY],
    attributes: [InlineAttribute; MAX_ATTRIBUTES],
}

impl Default for DirTreeValue {
    fn default() -> Self {
        Self {
            entry: FsFileEntry::new("", 0),
            data: [0u8; INLINE_CAPACITY],
            attributes: [InlineAttribute::default(); MAX_ATTRIBUTES],
        }
    }
}

impl TreeValue for DirTreeValue {
    const ENCODED_LEN: usize =
        std::mem::size_of::<FsFileEntry>() + INLINE_CAPACITY + MAX_ATTRIBUTES * ATTRIBUTE_RECORD_LEN;

    fn encode(&self, out: &mut [u8]) {
        let header_len = std::mem::size_of::<FsFileEntry>();
        out[..header_len].copy_from_slice(self.entry.as_bytes());

        let mut offset = header_len;
        out[offset..offset + INLINE_CAPACITY].copy_from_slice(&self.data);
        offset += INLINE_CAPACITY;

        for attr in &self.attributes {
            out[offset] = attr.attribute_type;
            out[offset + 1] = attr.present as u8;
            out[offset + 2..offset + 2 + ATTRIBUTE_VALUE_LEN].copy_from_slice(&attr.value);
            offset += ATTRIBUTE_RECORD_LEN;
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        let header_len = std::mem::size_of::<FsFileEntry>();
        let entry = FsFileEntry::read_from_bytes(&bytes[..header_len]).expect("fixed-size tree value header");

        let mut offset = header_len;
        let mut data = [0u8; INLINE_CAPACITY];
        data.copy_from_slice(&bytes[offset..offset + INLINE_CAPACITY]);
        offset += INLINE_CAPACITY;

        let mut attributes = [InlineAttribute::default(); MAX_ATTRIBUTES];
        for attr in attributes.iter_mut() {
            attr.attribute_type = bytes[offset];
            attr.present = bytes[offset + 1] != 0;
            attr.value.copy_from_slice(&bytes[offset + 2..offset + 2 + ATTRIBUTE_VALUE_LEN]);
            offset += ATTRIBUTE_RECORD_LEN;
        }

        Self { entry, data, attributes }
    }
}

/// Result of [`DirectoryTree::find`]: mirrors
/// [`crate::directory_chain::FoundFile`] so callers (the file appender/
/// reader) don't need to know which directory implementation is mounted.
#[derive(Clone, Copy, Debug)]
pub struct FoundFile {
    pub id: FileId,
    pub size: u32,
    pub chain: DsHeadTail,
}

impl FoundFile {
    pub const NONE: FoundFile = FoundFile { id: FileId::MAX, size: 0, chain: DsHeadTail::INVALID };

    pub fn is_found(&self) -> bool {
        self.id != FileId::MAX
    }
}

pub struct DirectoryTree<'a> {
    tree: TreeSector<'a, FileId, DirTreeValue>,
    id: FileId,
    node: DirTreeValue,
    found: FoundFile,
}

impl<'a> DirectoryTree<'a> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        root: SectorId,
    ) -> Self {
        Self { tree: TreeSector::new(sectors, allocator, buffers, 4, root), id: FileId::MAX, node: DirTreeValue::default(), found: FoundFile::NONE }
    }

    pub fn mount(&mut self) -> Result<()> {
        if !self.tree.exists()? {
            return Err(FsError::NotFound { sector: self.tree.root() }.into());
        }
        Ok(())
    }

    pub fn format(&mut self) -> Result<()> {
        self.tree.create()
    }

    pub fn found(&self) -> FoundFile {
        self.found
    }

    /// Adds a fresh, empty entry for `name`. An existing live entry with
    /// the same id is simply overwritten, matching [`TreeSector::add`]'s
    /// upsert semantics.
    pub fn touch(&mut self, name: &str) -> Result<FileId> {
        let id = file_id(name);
        let node = DirTreeValue {
            entry: FsFileEntry::new(name, 0),
            data: [0u8; INLINE_CAPACITY],
            attributes: [InlineAttribute::default(); MAX_ATTRIBUTES],
        };
        self.tree.add(id, node)?;
        self.id = id;
        self.node = node;
        Ok(id)
    }

    /// Tombstones `name`'s entry in place rather than removing it from the
    /// tree, since `TreeSector` never deletes keys.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let id = file_id(name);
        let node = DirTreeValue {
            entry: FsFileEntry::new(name, DELETED_FLAG),
            data: [0u8; INLINE_CAPACITY],
            attributes: [InlineAttribute::default(); MAX_ATTRIBUTES],
        };
        self.tree.add(id, node)?;
        self.id = FileId::MAX;
        Ok(())
    }

    pub fn find(&mut self, name: &str, attributes: &mut [AttributeSlot<'_>]) -> Result<bool> {
        for slot in attributes.iter_mut() {
            slot.bytes.fill(0);
        }

        let id = file_id(name);
        self.found = FoundFile::NONE;

        let Some(node) = self.tree.find(id)? else {
            return Ok(false);
        };

        if node.entry.flags.get() & DELETED_FLAG != 0 {
            return Ok(false);
        }

        self.node = node;
        self.id = id;

        for slot in attributes.iter_mut() {
            if let Some(attr) = node.attributes.iter().find(|a| a.present && a.attribute_type == slot.attribute_type) {
                let n = slot.bytes.len().min(attr.value.len());
                slot.bytes[..n].copy_from_slice(&attr.value[..n]);
            }
        }

        self.found = if !node.entry.chain.valid() {
            FoundFile { id, size: node.entry.directory_size.get(), chain: DsHeadTail::INVALID }
        } else {
            FoundFile { id, size: 0, chain: node.entry.chain.to_phylum_ds() }
        };

        Ok(true)
    }

    pub fn open(&self) -> Result<FoundFile> {
        if !self.found.is_found() {
            return Err(FsError::NameNotFound.into());
        }
        Ok(self.found)
    }

    fn flush(&mut self) -> Result<()> {
        if self.id == FileId::MAX {
            return Err(FsError::LogicError("no directory-tree entry is open").into());
        }
        self.tree.add(self.id, self.node)
    }

    /// Overwrites this entry's inline bytes starting at `position`. Errors
    /// if the write would exceed [`INLINE_CAPACITY`]; the caller is
    /// expected to have already promoted to [`Self::file_chain`] by then.
    pub fn file_data(&mut self, id: FileId, position: u32, buffer: &[u8]) -> Result<usize> {
        if self.id != id {
            return Err(FsError::LogicError("file_data called for an entry that isn't open").into());
        }
        let end = position as usize + buffer.len();
        if end > INLINE_CAPACITY {
            return Err(FsError::LogicError("inline directory-tree payload exceeds its capacity").into());
        }
        self.node.data[position as usize..end].copy_from_slice(buffer);
        self.node.entry.directory_size = (end as u32).into();
        self.flush()?;
        Ok(buffer.len())
    }

    /// Records that `id`'s content moved out of line into `chain`.
    pub fn file_chain(&mut self, id: FileId, chain: DsHeadTail) -> Result<()> {
        if self.id != id {
            return Err(FsError::LogicError("file_chain called for an entry that isn't open").into());
        }
        self.node.entry.directory_size = 0u32.into();
        self.node.entry.chain = HeadTail::from_phylum_ds(chain);
        self.flush()
    }

    /// Writes every dirty attribute slot into this entry's fixed attribute
    /// array, overwriting any earlier value of the same type — last write
    /// wins falls out of there being exactly one slot per type rather than
    /// an appended log.
    pub fn file_attributes(&mut self, id: FileId, slots: &mut [AttributeSlot<'_>]) -> Result<()> {
        if self.id != id {
            return Err(FsError::LogicError("file_attributes called for an entry that isn't open").into());
        }

        for slot in slots.iter_mut() {
            if !slot.dirty {
                continue;
            }
            let target = self
                .node
                .attributes
                .iter_mut()
                .find(|a| a.present && a.attribute_type == slot.attribute_type)
                .or_else(|| self.node.attributes.iter_mut().find(|a| !a.present))
                .ok_or(FsError::LogicError("directory-tree entry has no free attribute slot"))?;
            target.attribute_type = slot.attribute_type;
            target.present = true;
            let n = target.value.len().min(slot.bytes.len());
            target.value[..n].copy_from_slice(&slot.bytes[..n]);
            slot.dirty = false;
        }

        self.flush()
    }

    /// Records the sector roots of this file's own position/record index
    /// trees (§4.8's random-access index), once built.
    pub fn file_trees(&mut self, id: FileId, position_index: SectorId, record_index: SectorId) -> Result<()> {
        if self.id != id {
            return Err(FsError::LogicError("file_trees called for an entry that isn't open").into());
        }
        self.node.entry.position_index = position_index.into();
        self.node.entry.record_index = record_index.into();
        self.flush()
    }

    /// Copies this entry's inline bytes out, if any.
    pub fn read(&mut self, id: FileId, mut data_fn: impl FnMut(&[u8]) -> Result<()>) -> Result<u32> {
        if self.id != id {
            return Err(FsError::LogicError("read called for an entry that isn't open").into());
        }
        let size = self.node.entry.directory_size.get();
        if size == 0 {
            return Ok(0);
        }
        data_fn(&self.node.data[..size as usize])?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylum_ds_std::MemorySectorMap;

    fn opened<'a>(
        map: &'a MemorySectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
    ) -> DirectoryTree<'a> {
        let mut dir = DirectoryTree::new(map, allocator, buffers, 0);
        dir.format().unwrap();
        dir
    }

    #[test]
    fn touch_then_find_locates_the_file() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened(&map, &allocator, &buffers);

        dir.touch("test.logs").unwrap();
        assert!(dir.find("test.logs", &mut []).unwrap());
        assert!(!dir.find("nope.logs", &mut []).unwrap());
    }

    #[test]
    fn unlinked_files_are_not_found() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened(&map, &allocator, &buffers);

        dir.touch("gone.txt").unwrap();
        dir.unlink("gone.txt").unwrap();
        assert!(!dir.find("gone.txt", &mut []).unwrap());
    }

    #[test]
    fn inline_data_round_trips() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened(&map, &allocator, &buffers);

        let id = dir.touch("small.bin").unwrap();
        dir.file_data(id, 0, b"hello").unwrap();

        assert!(dir.find("small.bin", &mut []).unwrap());
        let mut out = Vec::new();
        let n = dir.read(id, |bytes| {
            out.extend_from_slice(bytes);
            Ok(())
        }).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn many_files_survive_tree_growth() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened(&map, &allocator, &buffers);

        for i in 0..100 {
            dir.touch(&format!("file-{i}.txt")).unwrap();
        }
        for i in 0..100 {
            assert!(dir.find(&format!("file-{i}.txt"), &mut []).unwrap(), "missing file-{i}.txt");
        }
    }
}
