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

//! Where reclaimed sectors go to wait for reuse. A `FreeSectorsChain` is
//! itself a [`SectorChain`] of `FreeSectors` slots; each slot names either a
//! sub-chain of raw freed sectors (`tree_size == 0`) or the root of a small
//! tree of freed sectors (`tree_size > 0`), the two ways a larger structure
//! hands back the sectors it no longer needs. [`FreeSectorsChain::dequeue`]
//! pulls one sector back out, descending into whichever shape the matching
//! slot holds.

use std::mem::size_of;

use zerocopy::{FromBytes, IntoBytes};

use phylum_ds::{HeadTail, SectorId, SectorMap, INVALID_SECTOR};
use phylum_err::{FsError, Result};

use crate::delimited_buffer::{read_prefix, DelimitedBuffer};
use crate::entries::{FreeSectors, NodePtr, Tag, TreeNodeHeader};
use crate::page_lock::PageLock;
use crate::sector_allocator::SectorAllocator;
use crate::sector_chain::{FreeSectorsChainKind, SectorChain};
use crate::varint;
use crate::working_buffers::WorkingBuffers;

/// Every `FreeSectors`-tagged record in a sector, with the byte offset
/// [`crate::delimited_buffer::DelimitedBuffer::record_mut`] needs to patch
/// it in place.
fn free_sectors_records(bytes: &[u8]) -> Vec<(usize, FreeSectors)> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let Some((length, header_len)) = varint::decode(&bytes[offset..]) else { break };
        if length == 0 {
            break;
        }
        let start = offset + header_len;
        let end = start + length as usize;
        if end > bytes.len() {
            break;
        }
        let record = &bytes[start..end];
        if record.first().copied() == Some(Tag::FreeSectors as u8) {
            if let Some(fs) = read_prefix::<FreeSectors>(record) {
                out.push((start, fs));
            }
        }
        offset = end;
    }
    out
}

pub struct FreeSectorsChain<'a> {
    sectors: &'a dyn SectorMap,
    allocator: &'a SectorAllocator,
    buffers: &'a WorkingBuffers,
    chain: SectorChain<'a, FreeSectorsChainKind>,
}

impl<'a> FreeSectorsChain<'a> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        chain: HeadTail,
    ) -> Result<Self> {
        let buffer = DelimitedBuffer::new(buffers.allocate()?);
        Ok(Self { sectors, allocator, buffers, chain: SectorChain::new(sectors, allocator, buffer, chain) })
    }

    pub fn chain(&self) -> HeadTail {
        self.chain.chain()
    }

    pub fn mount(&mut self) -> Result<()> {
        self.chain.mount()
    }

    pub fn format(&mut self) -> Result<()> {
        self.chain.format()
    }

    fn prepare(&mut self, required: usize) -> Result<()> {
        if !self.chain.appendable() {
            self.chain.seek_end_of_chain()?;
        }
        let total_required = varint::encoded_len(required as u32) as usize + required;
        if !self.chain.db_ref().room_for(total_required) {
            self.chain.grow_tail()?;
        }
        Ok(())
    }

    /// Writes `record` into the first empty slot found anywhere in the
    /// chain, or appends a new one if every existing slot is occupied.
    fn add_free_sectors(&mut self, record: FreeSectors) -> Result<()> {
        self.chain.create_if_necessary()?;
        self.chain.back_to_head();

        while self.chain.forward()? {
            let slots = free_sectors_records(self.chain.db_ref().as_bytes());
            if let Some((offset, _)) = slots.into_iter().find(|(_, fs)| fs.is_empty_slot()) {
                let slot = self.chain.db_mut().record_mut(offset).ok_or(FsError::LogicError("free-sectors slot vanished"))?;
                slot.copy_from_slice(record.as_bytes());
                return self.chain.flush();
            }
        }

        self.prepare(size_of::<FreeSectors>())?;
        self.chain.db_mut().append_record(&record)?;
        self.chain.flush()
    }

    /// Hands a sub-chain of raw freed sectors, rooted at `head`, back to the
    /// pool as one slot.
    pub fn add_chain(&mut self, head: SectorId) -> Result<()> {
        self.add_free_sectors(FreeSectors::chain(head))
    }

    /// Hands a small tree of freed sectors, rooted at `root`, back to the
    /// pool as one slot. `tree_size` is advisory bookkeeping only; dequeuing
    /// never consults it beyond telling a tree slot apart from a chain one.
    pub fn add_tree(&mut self, root: SectorId, tree_size: u32) -> Result<()> {
        self.add_free_sectors(FreeSectors::tree(root, tree_size))
    }

    /// Reclaims one sector from whichever occupied slot is found first,
    /// descending into its sub-chain or sub-tree as needed. Patches the
    /// slot's `head` in place if reclaiming changed it, and leaves a slot
    /// that has run dry as an empty one ready for [`Self::add_chain`]/
    /// [`Self::add_tree`] to reuse.
    pub fn dequeue(&mut self) -> Result<Option<SectorId>> {
        self.chain.back_to_head();

        while self.chain.forward()? {
            for (offset, fs) in free_sectors_records(self.chain.db_ref().as_bytes()) {
                if fs.is_empty_slot() {
                    continue;
                }

                let (dequeued, new_head) = if fs.is_tree() {
                    let mut tree = FreeSectorsTree::new(self.sectors, self.buffers, fs.head.get());
                    let dequeued = tree.dequeue_sector()?;
                    (dequeued, tree.root)
                } else {
                    let buffer = DelimitedBuffer::new(self.buffers.allocate()?);
                    let mut sub =
                        SectorChain::<FreeSectorsChainKind>::new(self.sectors, self.allocator, buffer, HeadTail::new(fs.head.get(), INVALID_SECTOR));
                    let dequeued = sub.pop_head()?;
                    (dequeued, sub.head())
                };

                let Some(sector) = dequeued else { continue };

                if new_head != fs.head.get() {
                    let record =
                        if fs.is_tree() { FreeSectors::tree(new_head, fs.tree_size.get()) } else { FreeSectors::chain(new_head) };
                    let slot = self.chain.db_mut().record_mut(offset).ok_or(FsError::LogicError("free-sectors slot vanished"))?;
                    slot.copy_from_slice(record.as_bytes());
                    self.chain.flush()?;
                }

                return Ok(Some(sector));
            }
        }

        Ok(None)
    }
}

/// A tree of sectors holding no keys or values, only child pointers: its
/// leaves are the sectors still available for reuse, encoded with the same
/// `TreeNodeHeader`/`NodePtr` layout a [`crate::tree_sector::TreeSector`]
/// node uses. Reclaiming one sector means finding a leaf, detaching it from
/// its parent, and handing it back.
struct FreeSectorsTree<'a> {
    sectors: &'a dyn SectorMap,
    buffers: &'a WorkingBuffers,
    root: SectorId,
}

impl<'a> FreeSectorsTree<'a> {
    fn new(sectors: &'a dyn SectorMap, buffers: &'a WorkingBuffers, root: SectorId) -> Self {
        Self { sectors, buffers, root }
    }

    fn dequeue_sector(&mut self) -> Result<Option<SectorId>> {
        let buffer = DelimitedBuffer::new(self.buffers.allocate()?);
        let mut lock = PageLock::writing(self.sectors, buffer, self.root)?;
        let mut dequeued = None;
        let root = self.root;
        self.dequeue_leaf(&mut lock, root, &mut dequeued)?;
        Ok(dequeued)
    }

    /// Descends every live child of `sector`, clearing any pointer that
    /// names the sector this call (or one nested inside it) already
    /// reclaimed, then reclaims `sector` itself once it turns out to have
    /// no live children of its own.
    fn dequeue_leaf(&mut self, lock: &mut PageLock<'a>, sector: SectorId, dequeued: &mut Option<SectorId>) -> Result<()> {
        let mut leaf = true;

        lock.replace(sector)?;
        let children = read_children(lock.db_ref())?;

        for child in &children {
            if child.is_valid() && child.sector.get() != sector {
                leaf = false;
                lock.flush()?;
                self.dequeue_leaf(lock, child.sector.get(), dequeued)?;
                lock.replace(sector)?;
            }
        }

        let cleared: Vec<bool> =
            children.iter().map(|child| dequeued.is_some_and(|found| child.sector.get() == found)).collect();
        if cleared.iter().any(|&c| c) {
            write_children(lock, &cleared)?;
        }

        lock.flush()?;

        if leaf && dequeued.is_none() {
            *dequeued = Some(sector);
            if self.root == sector {
                self.root = INVALID_SECTOR;
            }
        }

        Ok(())
    }
}

fn first_node_record_start(bytes: &[u8]) -> Result<usize> {
    let (length, header_len) = varint::decode(bytes).ok_or(FsError::LogicError("free-sectors tree sector has no node record"))?;
    if length == 0 {
        return Err(FsError::LogicError("free-sectors tree sector has no node record").into());
    }
    Ok(header_len)
}

fn read_children(db: &DelimitedBuffer) -> Result<Vec<NodePtr>> {
    let start = first_node_record_start(db.as_bytes())?;
    let bytes = db.as_bytes();
    let header = read_prefix::<TreeNodeHeader>(&bytes[start..])
        .ok_or(FsError::LogicError("free-sectors tree sector has a malformed node header"))?;

    let header_len = size_of::<TreeNodeHeader>();
    let ptr_len = size_of::<NodePtr>();
    let count = header.number_keys.get() as usize + 1;

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let from = start + header_len + i * ptr_len;
        let to = from + ptr_len;
        let slice = bytes.get(from..to).ok_or(FsError::LogicError("free-sectors tree sector truncates a child pointer"))?;
        out.push(NodePtr::read_from_bytes(slice).map_err(|_| FsError::LogicError("free-sectors tree child pointer is misaligned"))?);
    }
    Ok(out)
}

fn write_children(lock: &mut PageLock, cleared: &[bool]) -> Result<()> {
    let start = first_node_record_start(lock.db_ref().as_bytes())?;
    let header_len = size_of::<TreeNodeHeader>();
    let ptr_len = size_of::<NodePtr>();

    let record = lock.db_mut().record_mut(start).ok_or(FsError::LogicError("free-sectors tree node record vanished"))?;
    for (i, &is_cleared) in cleared.iter().enumerate() {
        if is_cleared {
            let offset = header_len + i * ptr_len;
            record[offset..offset + ptr_len].copy_from_slice(NodePtr::default().as_bytes());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylum_ds_std::MemorySectorMap;

    fn opened<'a>(
        map: &'a MemorySectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
    ) -> FreeSectorsChain<'a> {
        let mut chain = FreeSectorsChain::new(map, allocator, buffers, HeadTail::new(0, INVALID_SECTOR)).unwrap();
        chain.format().unwrap();
        chain
    }

    /// A sector handed to `add_chain` is always one that was live before
    /// being freed, so it already carries a header on flash; `mark_free`
    /// stands in for whatever structure last owned it.
    fn mark_free(map: &MemorySectorMap, buffers: &WorkingBuffers, sector: SectorId) {
        let buffer = DelimitedBuffer::new(buffers.allocate().unwrap());
        let mut lock = PageLock::overwrite(map, buffer, sector).unwrap();
        lock.db_mut().append_record(&crate::entries::SectorChainHeader::new(Tag::FreeSectorsChain, INVALID_SECTOR, INVALID_SECTOR)).unwrap();
        lock.flush().unwrap();
    }

    #[test]
    fn add_chain_then_dequeue_returns_the_same_sector() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);
        let mut fc = opened(&map, &allocator, &buffers);

        mark_free(&map, &buffers, 5);
        fc.add_chain(5).unwrap();
        assert_eq!(fc.dequeue().unwrap(), Some(5));
        assert_eq!(fc.dequeue().unwrap(), None);
    }

    #[test]
    fn dequeued_slot_is_reused_by_a_later_add() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);
        let mut fc = opened(&map, &allocator, &buffers);

        mark_free(&map, &buffers, 5);
        fc.add_chain(5).unwrap();
        assert_eq!(fc.dequeue().unwrap(), Some(5));

        mark_free(&map, &buffers, 9);
        fc.add_chain(9).unwrap();
        assert_eq!(fc.chain().head, fc.chain().tail);
        assert_eq!(fc.dequeue().unwrap(), Some(9));
    }

    #[test]
    fn add_tree_dequeues_every_leaf_of_a_single_node_tree() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);

        // A one-node tree with two leaf children is its own degenerate
        // case: the root itself carries no live children once both of its
        // pointers get cleared, so it is reclaimed last.
        let leaf_a = allocator.allocate().unwrap();
        let leaf_b = allocator.allocate().unwrap();
        let root = allocator.allocate().unwrap();

        // A formatted leaf carries a node record too: no live children, just
        // a single invalid child slot, the same shape `TreeSector::create`
        // gives an empty B+ tree leaf.
        let write_node = |sector: SectorId, node_type: crate::entries::NodeType, children: &[NodePtr]| {
            let mut header = TreeNodeHeader::new(node_type, 0, 0);
            header.number_keys = (children.len() as u16 - 1).into();
            let mut record = Vec::new();
            record.extend_from_slice(header.as_bytes());
            for child in children {
                record.extend_from_slice(child.as_bytes());
            }

            let buffer = DelimitedBuffer::new(buffers.allocate().unwrap());
            let mut lock = PageLock::overwrite(&map, buffer, sector).unwrap();
            lock.db_mut().append(&record).unwrap();
            lock.flush().unwrap();
        };

        write_node(leaf_a, crate::entries::NodeType::Leaf, &[NodePtr::default()]);
        write_node(leaf_b, crate::entries::NodeType::Leaf, &[NodePtr::default()]);
        write_node(root, crate::entries::NodeType::Inner, &[NodePtr::new(leaf_a, 0), NodePtr::new(leaf_b, 0)]);

        let mut fc = opened(&map, &allocator, &buffers);
        fc.add_tree(root, 3).unwrap();

        let mut seen = Vec::new();
        while let Some(sector) = fc.dequeue().unwrap() {
            seen.push(sector);
        }
        seen.sort();
        let mut expected = vec![leaf_a, leaf_b, root];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
