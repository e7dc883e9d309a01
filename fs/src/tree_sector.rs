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

//! A B+ tree packed into sectors via [`DelimitedBuffer`] instead of a single
//! contiguous array. Every sector that belongs to one tree carries a
//! [`TreeSectorHeader`] (just a `tail` pointer threading the tree's sectors
//! into a reclaimable list, unlike the two-way chains elsewhere in this
//! crate) followed by zero or more [`TreeNodeHeader`]-tagged node records.
//! The node of greatest depth in a given sector is that sector's "root" for
//! whatever subtree lives there; the tree's own root is whichever sector
//! `root_` currently names.
//!
//! Node storage mirrors the original's C union of `VALUE[N]` / `node_ptr_t
//! [N+1]`: every node record reserves `union_len()` bytes after its keys,
//! sized to the larger of a full leaf's values or a full inner node's
//! children, and only interprets the bytes its `node_type` claims.

use log::{debug, trace};
use phylum_ds::{SectorId, SectorMap, INVALID_SECTOR};
use phylum_err::{FsError, Result};

use crate::delimited_buffer::DelimitedBuffer;
use crate::entries::{NodePtr, NodeType, Tag, TreeNodeHeader, TreeSectorHeader};
use crate::page_lock::PageLock;
use crate::sector_allocator::SectorAllocator;
use crate::varint;
use crate::working_buffers::WorkingBuffers;

/// A fixed-width scalar that can be packed into a tree node record and
/// ordered for B+ tree comparisons.
pub trait TreeKey: Copy + Ord + Default {
    const ENCODED_LEN: usize;
    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

/// A fixed-width payload stored at tree leaves.
pub trait TreeValue: Copy + Default {
    const ENCODED_LEN: usize;
    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_tree_scalar {
    ($t:ty) => {
        impl TreeKey for $t {
            const ENCODED_LEN: usize = std::mem::size_of::<$t>();
            fn encode(&self, out: &mut [u8]) {
                out[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
            }
            fn decode(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::ENCODED_LEN]);
                <$t>::from_le_bytes(buf)
            }
        }
        impl TreeValue for $t {
            const ENCODED_LEN: usize = std::mem::size_of::<$t>();
            fn encode(&self, out: &mut [u8]) {
                out[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
            }
            fn decode(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::ENCODED_LEN]);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

impl_tree_scalar!(u32);
impl_tree_scalar!(u64);

impl TreeValue for NodePtr {
    const ENCODED_LEN: usize = 6;
    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.sector.get().to_le_bytes());
        out[4..6].copy_from_slice(&self.position.get().to_le_bytes());
    }
    fn decode(bytes: &[u8]) -> Self {
        let sector = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let position = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        NodePtr::new(sector, position)
    }
}

/// An in-memory decoding of one tree node record. Only one of `values` /
/// `children` is meaningful, per `header.node_type()`; both are always
/// populated to `order` / `order + 1` entries (padded with defaults) so
/// encode/decode don't need to special-case a partially-filled node.
struct Node<K, V> {
    header: TreeNodeHeader,
    keys: Vec<K>,
    values: Vec<V>,
    children: Vec<NodePtr>,
}

impl<K: TreeKey, V: TreeValue> Node<K, V> {
    fn new_leaf(file_id: u32, order: usize) -> Self {
        Self {
            header: TreeNodeHeader::new(NodeType::Leaf, file_id, 0),
            keys: vec![K::default(); order],
            values: vec![V::default(); order],
            children: vec![NodePtr::default(); order + 1],
        }
    }

    fn number_keys(&self) -> usize {
        self.header.number_keys.get() as usize
    }

    fn set_number_keys(&mut self, n: usize) {
        self.header.number_keys = (n as u16).into();
    }

    fn is_leaf(&self) -> bool {
        self.header.node_type() == NodeType::Leaf
    }

    fn depth(&self) -> u8 {
        self.header.depth
    }
}

/// A position where `key` should land among a node's first `number_keys`
/// sorted entries.
fn leaf_position_for<K: TreeKey>(key: K, keys: &[K], number_keys: usize) -> usize {
    let mut k = 0;
    while k < number_keys && keys[k] < key {
        k += 1;
    }
    k
}

/// Like [`leaf_position_for`] but treats an exact match as "belongs after
/// this key", matching the original's `<=` comparison for descending inner
/// nodes (the child at that index covers keys greater than or equal to it).
fn inner_position_for<K: TreeKey>(key: K, keys: &[K], number_keys: usize) -> usize {
    let mut k = 0;
    while k < number_keys && keys[k] <= key {
        k += 1;
    }
    k
}

/// A node split bubbled up to the caller: `key` separates `left` from
/// `right`, both now live nodes the parent must link in.
struct Insertion<K> {
    key: K,
    left: NodePtr,
    right: NodePtr,
}

/// A B+ tree of order `order`, generic over key and value type, packed into
/// sectors shared with nothing else.
pub struct TreeSector<'a, K, V> {
    sectors: &'a dyn SectorMap,
    allocator: &'a SectorAllocator,
    buffers: &'a WorkingBuffers,
    order: usize,
    file_id: u32,
    root: SectorId,
    tail: SectorId,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<'a, K: TreeKey, V: TreeValue> TreeSector<'a, K, V> {
    pub fn new(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        order: usize,
        root: SectorId,
    ) -> Self {
        Self { sectors, allocator, buffers, order, file_id: 0, root, tail: INVALID_SECTOR, _marker: std::marker::PhantomData }
    }

    pub fn with_file_id(mut self, file_id: u32) -> Self {
        self.file_id = file_id;
        self
    }

    pub fn root(&self) -> SectorId {
        self.root
    }

    pub fn tail(&self) -> SectorId {
        self.tail
    }

    /// Bytes after the keys every node record reserves: enough for a full
    /// leaf's values, or a full inner node's children, whichever is larger.
    fn union_len(&self) -> usize {
        (self.order * V::ENCODED_LEN).max((self.order + 1) * NodePtr::ENCODED_LEN)
    }

    fn node_record_len(&self) -> usize {
        std::mem::size_of::<TreeNodeHeader>() + self.order * K::ENCODED_LEN + self.union_len()
    }

    fn encode_node(&self, node: &Node<K, V>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.node_record_len());
        bytes.extend_from_slice(zerocopy::IntoBytes::as_bytes(&node.header));

        let mut key_bytes = vec![0u8; K::ENCODED_LEN];
        for i in 0..self.order {
            node.keys[i].encode(&mut key_bytes);
            bytes.extend_from_slice(&key_bytes);
        }

        let union_len = self.union_len();
        let mut union_bytes = vec![0u8; union_len];
        if node.is_leaf() {
            let mut value_bytes = vec![0u8; V::ENCODED_LEN];
            for i in 0..self.order {
                node.values[i].encode(&mut value_bytes);
                union_bytes[i * V::ENCODED_LEN..(i + 1) * V::ENCODED_LEN].copy_from_slice(&value_bytes);
            }
        } else {
            let mut child_bytes = vec![0u8; NodePtr::ENCODED_LEN];
            for i in 0..=self.order {
                node.children[i].encode(&mut child_bytes);
                union_bytes[i * NodePtr::ENCODED_LEN..(i + 1) * NodePtr::ENCODED_LEN].copy_from_slice(&child_bytes);
            }
        }
        bytes.extend_from_slice(&union_bytes);
        bytes
    }

    fn decode_node(&self, bytes: &[u8]) -> Result<Node<K, V>> {
        let header_len = std::mem::size_of::<TreeNodeHeader>();
        let header: TreeNodeHeader = zerocopy::FromBytes::read_from_bytes(&bytes[..header_len])
            .map_err(|_| FsError::LogicError("tree node header does not match expected layout"))?;

        let mut offset = header_len;
        let mut keys = Vec::with_capacity(self.order);
        for _ in 0..self.order {
            keys.push(K::decode(&bytes[offset..offset + K::ENCODED_LEN]));
            offset += K::ENCODED_LEN;
        }

        let mut values = vec![V::default(); self.order];
        let mut children = vec![NodePtr::default(); self.order + 1];
        if header.node_type() == NodeType::Leaf {
            for (i, slot) in values.iter_mut().enumerate() {
                *slot = V::decode(&bytes[offset + i * V::ENCODED_LEN..offset + (i + 1) * V::ENCODED_LEN]);
            }
        } else {
            for (i, slot) in children.iter_mut().enumerate() {
                *slot = NodePtr::decode(&bytes[offset + i * NodePtr::ENCODED_LEN..offset + (i + 1) * NodePtr::ENCODED_LEN]);
            }
        }

        Ok(Node { header, keys, values, children })
    }

    fn buffer(&self) -> Result<DelimitedBuffer<'a>> {
        Ok(DelimitedBuffer::new(self.buffers.allocate()?))
    }

    /// Finds the node of greatest depth (this sector's local root) among the
    /// node records already loaded into `lock`'s buffer, plus the byte
    /// offset of its record body (a [`NodePtr::position`]).
    fn find_sector_root(&self, sector: SectorId, lock: &PageLock<'a>) -> Result<(Node<K, V>, NodePtr)> {
        let mut best: Option<(Node<K, V>, NodePtr)> = None;
        for (start, bytes) in sector_node_records(lock.db_ref().as_bytes()) {
            if bytes.first().copied().and_then(Tag::from_u8) != Some(Tag::TreeNode) {
                continue;
            }
            let node = self.decode_node(bytes)?;
            let better = match &best {
                None => true,
                Some((b, _)) => b.depth() < node.depth(),
            };
            if better {
                best = Some((node, NodePtr::new(sector, start as u16)));
            }
        }
        best.ok_or(FsError::Corrupt(phylum_err::CorruptReason::RecordOverrun { sector, position: 0 }).into())
    }

    fn find_node_in_sector(&self, lock: &PageLock<'a>, ptr: NodePtr) -> Result<Node<K, V>> {
        let target = ptr.position.get() as usize;
        for (start, bytes) in sector_node_records(lock.db_ref().as_bytes()) {
            if start == target {
                return self.decode_node(bytes);
            }
        }
        Err(FsError::LogicError("tree node not found at its recorded position after a sector swap").into())
    }

    /// Creates a brand-new one-node tree: sector `self.root` becomes a
    /// [`TreeSectorHeader`] holding a single empty leaf.
    pub fn create(&mut self) -> Result<()> {
        let mut lock = PageLock::overwrite(self.sectors, self.buffer()?, self.root)?;
        lock.db_mut().append_record(&TreeSectorHeader::new(INVALID_SECTOR))?;
        let leaf = Node::<K, V>::new_leaf(self.file_id, self.order);
        let bytes = self.encode_node(&leaf);
        lock.db_mut().append(&bytes)?;
        lock.flush()?;
        self.tail = self.root;
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        self.sectors.find(self.root)
    }

    fn back_to_root(&self, lock: &mut PageLock<'a>) -> Result<()> {
        lock.replace(self.root)
    }

    /// Allocates space for a new node record: in the current sector if a
    /// fixed-size record still fits, else in a freshly allocated sector
    /// threaded onto the tree's sector list via its [`TreeSectorHeader`].
    fn allocate_node(&mut self, lock: &mut PageLock<'a>, node: &Node<K, V>) -> Result<NodePtr> {
        let bytes = self.encode_node(node);

        if lock.db_ref().room_for(bytes.len()) {
            let position = lock.db_mut().append(&bytes)?;
            trace!("tree-sector: appended node sector={} position={position}", lock.sector());
            return Ok(NodePtr::new(lock.sector(), position as u16));
        }

        let allocated = self.allocator.allocate()?;
        debug!("tree-sector: sector full, growing to {allocated}");
        let mut new_lock = PageLock::overwrite(self.sectors, self.buffer()?, allocated)?;
        new_lock.db_mut().append_record(&TreeSectorHeader::new(self.tail))?;
        self.tail = allocated;
        let position = new_lock.db_mut().append(&bytes)?;
        new_lock.flush()?;

        Ok(NodePtr::new(allocated, position as u16))
    }

    /// Moves `lock` to `ptr.sector` if it isn't already there, flushing any
    /// pending writes to the sector being left behind first.
    fn follow(&self, lock: &mut PageLock<'a>, ptr: NodePtr) -> Result<Node<K, V>> {
        if ptr.sector.get() != lock.sector() {
            lock.replace(ptr.sector.get())?;
        }
        self.find_node_in_sector(lock, ptr)
    }

    fn leaf_insert_nonfull(&mut self, lock: &mut PageLock<'a>, node_ptr: NodePtr, mut node: Node<K, V>, key: K, value: V) -> Result<()> {
        let number_keys = node.number_keys();
        let index = leaf_position_for(key, &node.keys, number_keys);

        if index < number_keys && node.keys[index] == key {
            node.values[index] = value;
        } else {
            for i in (index..number_keys).rev() {
                node.keys[i + 1] = node.keys[i];
                node.values[i + 1] = node.values[i];
            }
            node.keys[index] = key;
            node.values[index] = value;
            node.set_number_keys(number_keys + 1);
        }

        self.rewrite_node_at(lock, node_ptr, &node)
    }

    /// Rewrites the record at `ptr`'s position in the currently loaded
    /// sector. The node record's encoded length never changes (it always
    /// reserves `order` keys and a full union), so this is always an
    /// in-place overwrite, never a grow.
    fn rewrite_node_at(&self, lock: &mut PageLock<'a>, ptr: NodePtr, node: &Node<K, V>) -> Result<()> {
        let bytes = self.encode_node(node);
        let slot = lock
            .db_mut()
            .record_mut(ptr.position.get() as usize)
            .ok_or(FsError::LogicError("tree node position no longer resolves to a record"))?;
        slot.copy_from_slice(&bytes);
        Ok(())
    }

    fn leaf_node_insert(&mut self, lock: &mut PageLock<'a>, node_ptr: NodePtr, node: Node<K, V>, key: K, value: V) -> Result<Option<Insertion<K>>> {
        let number_keys = node.number_keys();
        if number_keys < self.order {
            self.leaf_insert_nonfull(lock, node_ptr, node, key, value)?;
            return Ok(None);
        }

        trace!("tree-sector: leaf full at {node_ptr:?}, splitting");

        let threshold = (self.order + 1) / 2;
        let mut node = node;
        let mut sibling = Node::<K, V>::new_leaf(self.file_id, self.order);
        let moved = number_keys - threshold;
        for j in 0..moved {
            sibling.keys[j] = node.keys[threshold + j];
            sibling.values[j] = node.values[threshold + j];
        }
        sibling.set_number_keys(moved);
        node.set_number_keys(threshold);

        let index = leaf_position_for(key, &node.keys, threshold);
        let sibling_ptr = self.allocate_node(lock, &sibling)?;

        if index < threshold {
            self.leaf_insert_nonfull(lock, node_ptr, node, key, value)?;
        } else {
            // The sibling may now live in a different sector than `node_ptr`.
            let sibling = self.follow(lock, sibling_ptr)?;
            self.leaf_insert_nonfull(lock, sibling_ptr, sibling, key, value)?;
        }

        let separator = self.follow(lock, sibling_ptr)?.keys[0];
        Ok(Some(Insertion { key: separator, left: node_ptr, right: sibling_ptr }))
    }

    fn inner_insert_nonfull(&mut self, lock: &mut PageLock<'a>, depth: u8, node_ptr: NodePtr, node: Node<K, V>, key: K, value: V) -> Result<Option<Insertion<K>>> {
        let left = lock.sector();
        let number_keys = node.number_keys();
        let index = inner_position_for(key, &node.keys, number_keys);
        let child_ptr = node.children[index];

        let child = self.follow(lock, child_ptr)?;
        let insertion = if depth - 1 == 0 {
            self.leaf_node_insert(lock, child_ptr, child, key, value)?
        } else {
            self.inner_node_insert(lock, depth - 1, child_ptr, child, key, value)?
        };

        if left != lock.sector() {
            lock.replace(left)?;
        }
        let mut node = self.find_node_in_sector(lock, node_ptr)?;

        if let Some(insertion) = insertion {
            let number_keys = node.number_keys();
            if index == number_keys {
                node.keys[index] = insertion.key;
                node.children[index] = insertion.left;
                node.children[index + 1] = insertion.right;
            } else {
                node.children[number_keys + 1] = node.children[number_keys];
                for i in (index + 1..=number_keys).rev() {
                    node.children[i] = node.children[i - 1];
                    node.keys[i] = node.keys[i - 1];
                }
                node.children[index] = insertion.left;
                node.children[index + 1] = insertion.right;
                node.keys[index] = insertion.key;
            }
            node.set_number_keys(number_keys + 1);
            self.rewrite_node_at(lock, node_ptr, &node)?;
        }

        Ok(None)
    }

    fn inner_node_insert(&mut self, lock: &mut PageLock<'a>, depth: u8, node_ptr: NodePtr, node: Node<K, V>, key: K, value: V) -> Result<Option<Insertion<K>>> {
        let number_keys = node.number_keys();
        if number_keys < self.order {
            return self.inner_insert_nonfull(lock, depth, node_ptr, node, key, value);
        }

        trace!("tree-sector: inner node full at {node_ptr:?}, splitting (simpler-than-canonical proactive split)");

        let threshold = (self.order + 1) / 2;
        let mut node = node;
        let mut sibling_header = Node::<K, V> {
            header: TreeNodeHeader::new(NodeType::Inner, self.file_id, depth),
            keys: vec![K::default(); self.order],
            values: vec![V::default(); self.order],
            children: vec![NodePtr::default(); self.order + 1],
        };
        let moved = number_keys - threshold;
        for i in 0..moved {
            sibling_header.keys[i] = node.keys[threshold + i];
            sibling_header.children[i] = node.children[threshold + i];
        }
        sibling_header.children[moved] = node.children[number_keys];
        sibling_header.set_number_keys(moved);

        let separator = node.keys[threshold - 1];
        node.set_number_keys(threshold - 1);

        let sibling_ptr = self.allocate_node(lock, &sibling_header)?;

        if key < separator {
            self.inner_insert_nonfull(lock, depth, node_ptr, node, key, value)?;
        } else {
            if lock.sector() != node_ptr.sector.get() {
                lock.replace(node_ptr.sector.get())?;
            }
            self.rewrite_node_at(lock, node_ptr, &node)?;

            let sibling = self.follow(lock, sibling_ptr)?;
            self.inner_insert_nonfull(lock, depth, sibling_ptr, sibling, key, value)?;
        }

        Ok(Some(Insertion { key: separator, left: node_ptr, right: sibling_ptr }))
    }

    /// Inserts `key`/`value`, creating a new root one level deeper if the
    /// old root split.
    pub fn add(&mut self, key: K, value: V) -> Result<()> {
        let mut lock = PageLock::reading(self.sectors, self.buffer()?, self.root)?;
        self.back_to_root(&mut lock)?;

        let (root_node, root_ptr) = self.find_sector_root(lock.sector(), &lock)?;
        let depth = root_node.depth();

        let insertion = if depth == 0 {
            self.leaf_node_insert(&mut lock, root_ptr, root_node, key, value)?
        } else {
            self.inner_node_insert(&mut lock, depth, root_ptr, root_node, key, value)?
        };

        if let Some(insertion) = insertion {
            debug!("tree-sector: root split, growing to depth {}", depth + 1);
            let mut new_root = Node::<K, V> {
                header: TreeNodeHeader::new(NodeType::Inner, self.file_id, depth + 1),
                keys: vec![K::default(); self.order],
                values: vec![V::default(); self.order],
                children: vec![NodePtr::default(); self.order + 1],
            };
            new_root.keys[0] = insertion.key;
            new_root.children[0] = insertion.left;
            new_root.children[1] = insertion.right;
            new_root.set_number_keys(1);

            if lock.sector() != self.root {
                lock.replace(self.root)?;
            }
            let ptr = self.allocate_node(&mut lock, &new_root)?;
            self.root = ptr.sector.get();
        }

        lock.flush()
    }

    pub fn find(&self, key: K) -> Result<Option<V>> {
        let mut lock = PageLock::reading(self.sectors, self.buffer()?, self.root)?;
        self.back_to_root(&mut lock)?;

        let (mut node, _) = self.find_sector_root(lock.sector(), &lock)?;
        let mut depth = node.depth();
        while depth > 0 {
            let index = inner_position_for(key, &node.keys, node.number_keys());
            let child_ptr = node.children[index];
            node = self.follow(&mut lock, child_ptr)?;
            depth -= 1;
        }

        let index = leaf_position_for(key, &node.keys, node.number_keys());
        if index < node.number_keys() && node.keys[index] == key {
            Ok(Some(node.values[index]))
        } else {
            Ok(None)
        }
    }

    /// Largest entry strictly less than `key`.
    pub fn find_last_less_than(&self, key: K) -> Result<Option<(K, V)>> {
        let mut lock = PageLock::reading(self.sectors, self.buffer()?, self.root)?;
        self.back_to_root(&mut lock)?;

        let (mut node, _) = self.find_sector_root(lock.sector(), &lock)?;
        let mut depth = node.depth();
        while depth > 0 {
            let mut index = inner_position_for(key, &node.keys, node.number_keys());
            if index > 0 && node.keys[index - 1] == key {
                index -= 1;
            }
            let child_ptr = node.children[index];
            node = self.follow(&mut lock, child_ptr)?;
            depth -= 1;
        }

        let number_keys = node.number_keys();
        let mut index = leaf_position_for(key, &node.keys, number_keys);
        if index == 0 {
            return Ok(None);
        }
        index -= 1;
        if index < number_keys && node.keys[index] == key {
            if index == 0 {
                return Ok(None);
            }
            index -= 1;
        }
        if index < number_keys {
            Ok(Some((node.keys[index], node.values[index])))
        } else {
            Ok(None)
        }
    }
}

/// Walks a sector buffer's delimited records like [`DelimitedBuffer::iter`],
/// but also yields each record's starting byte offset, needed to build a
/// [`NodePtr`] out of an iteration result.
fn sector_node_records(bytes: &[u8]) -> Vec<(usize, &[u8])> {
    let mut out = Vec::new();
    let mut offset = 0usize;
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
        out.push((start, &bytes[start..end]));
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylum_ds_std::MemorySectorMap;

    fn tree<'a>(map: &'a MemorySectorMap, allocator: &'a SectorAllocator, buffers: &'a WorkingBuffers) -> TreeSector<'a, u32, u32> {
        let mut t = TreeSector::<u32, u32>::new(map, allocator, buffers, 6, 0);
        t.create().unwrap();
        t
    }

    #[test]
    fn add_then_find_round_trips_a_single_entry() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut t = tree(&map, &allocator, &buffers);

        t.add(42, 100).unwrap();
        assert_eq!(t.find(42).unwrap(), Some(100));
        assert_eq!(t.find(7).unwrap(), None);
    }

    #[test]
    fn keys_one_to_many_all_resolve_after_splits() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(8, 256);
        let mut t = tree(&map, &allocator, &buffers);

        const COUNT: u32 = 200;
        for i in 1..=COUNT {
            t.add(i, i).unwrap();
            assert_eq!(t.find(1).unwrap(), Some(1), "lost key 1 after inserting {i}");
        }

        for i in 1..=COUNT {
            assert_eq!(t.find(i).unwrap(), Some(i), "missing key {i}");
        }
        assert_eq!(t.find(COUNT + 1).unwrap(), None);
    }

    #[test]
    fn find_last_less_than_returns_the_nearest_smaller_key() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(8, 256);
        let mut t = tree(&map, &allocator, &buffers);

        for i in [10u32, 20, 30, 40] {
            t.add(i, i * 10).unwrap();
        }

        assert_eq!(t.find_last_less_than(25).unwrap(), Some((20, 200)));
        assert_eq!(t.find_last_less_than(10).unwrap(), None);
        assert_eq!(t.find_last_less_than(11).unwrap(), Some((10, 100)));
    }
}
