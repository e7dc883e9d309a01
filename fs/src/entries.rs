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

//! On-flash record layouts. Every record starts with a one-byte [`Tag`] so a
//! reader walking a sector's delimited buffer can tell what it's looking at
//! without external bookkeeping.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use phylum_ds::SectorId;

pub const MAX_NAME: usize = 64;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    None = 0,
    SuperBlock = 1,
    DataSector = 2,
    DirectorySector = 3,
    FileEntry = 4,
    FsDirectoryEntry = 5,
    FileData = 6,
    TreeNode = 7,
    FileAttribute = 8,
    FsFileEntry = 9,
    FreeSectors = 10,
    /// Sector-chain header for a [`crate::free_sectors_chain::FreeSectorsChain`];
    /// distinct from the `FreeSectors` record tag carried inside it, the way
    /// `DirectorySector`'s header tag differs from the `FileEntry` records
    /// it holds.
    FreeSectorsChain = 11,
    TreeSector = 12,
}

impl Tag {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Tag::*;
        Some(match value {
            0 => None,
            1 => SuperBlock,
            2 => DataSector,
            3 => DirectorySector,
            4 => FileEntry,
            5 => FsDirectoryEntry,
            6 => FileData,
            7 => TreeNode,
            8 => FileAttribute,
            9 => FsFileEntry,
            10 => FreeSectors,
            11 => FreeSectorsChain,
            12 => TreeSector,
            _ => return Option::None,
        })
    }
}

pub const INVALID_SECTOR: u32 = u32::MAX;

/// Written at the front of every record: just the tag byte, so callers can
/// peek at `bytes[0]` before committing to a concrete record type.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EntryHeader {
    pub tag: u8,
}

/// Header shared by every sector that belongs to a chain: previous/next
/// sector pointers plus the tag identifying what kind of chain it is.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SectorChainHeader {
    pub tag: u8,
    pub pp: U32,
    pub np: U32,
}

impl SectorChainHeader {
    pub fn new(tag: Tag, pp: SectorId, np: SectorId) -> Self {
        Self { tag: tag as u8, pp: pp.into(), np: np.into() }
    }

    pub fn pp(&self) -> SectorId {
        self.pp.get()
    }

    pub fn np(&self) -> SectorId {
        self.np.get()
    }
}

/// Header of a data chain sector; `bytes` is how much of this sector's
/// buffer actually holds file bytes (the rest may be stale from reuse).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DataChainHeader {
    pub tag: u8,
    pub pp: U32,
    pub np: U32,
    pub bytes: U16,
}

impl DataChainHeader {
    pub fn new(pp: SectorId, np: SectorId, bytes: u16) -> Self {
        Self { tag: Tag::DataSector as u8, pp: pp.into(), np: np.into(), bytes: bytes.into() }
    }
}

/// First record of sector zero; identifies the volume as a Phylum one.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SuperBlock {
    pub tag: u8,
    pub version: U32,
}

impl SuperBlock {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(version: u32) -> Self {
        Self { tag: Tag::SuperBlock as u8, version: version.into() }
    }
}

/// `crc32(name)`; stable identity for a file across directory moves.
pub type FileId = u32;

pub fn file_id(name: &str) -> FileId {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(name.as_bytes())
}

pub fn pack_name(name: &str) -> [u8; MAX_NAME] {
    let mut out = [0u8; MAX_NAME];
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_NAME);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

pub fn unpack_name(bytes: &[u8; MAX_NAME]) -> &str {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}

/// A file entry inside a flat, chain-based directory (the original,
/// non-tree directory implementation).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FileEntry {
    pub tag: u8,
    pub id: U32,
    pub flags: U16,
    pub name: [u8; MAX_NAME],
}

impl FileEntry {
    pub fn new(name: &str, flags: u16) -> Self {
        Self { tag: Tag::FileEntry as u8, id: file_id(name).into(), flags: flags.into(), name: pack_name(name) }
    }

    pub fn name(&self) -> &str {
        unpack_name(&self.name)
    }
}

/// Head/tail sector pair, stored inline wherever a record names a chain.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct HeadTail {
    pub head: U32,
    pub tail: U32,
}

impl HeadTail {
    pub fn invalid() -> HeadTail {
        HeadTail::new(INVALID_SECTOR, INVALID_SECTOR)
    }

    pub fn new(head: SectorId, tail: SectorId) -> Self {
        Self { head: head.into(), tail: tail.into() }
    }

    pub fn valid(&self) -> bool {
        self.head.get() != INVALID_SECTOR
    }

    pub fn to_phylum_ds(self) -> phylum_ds::HeadTail {
        phylum_ds::HeadTail::new(self.head.get(), self.tail.get())
    }

    pub fn from_phylum_ds(ht: phylum_ds::HeadTail) -> Self {
        Self::new(ht.head, ht.tail)
    }
}

/// Points a file entry at its bytes: inline (`size` bytes follow in the
/// same record) or out of line in a data chain (`chain`).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FileData {
    pub tag: u8,
    pub id: U32,
    pub size: U32,
    pub chain: HeadTail,
    pub attributes: U32,
}

impl FileData {
    pub fn inline(id: FileId, size: u32) -> Self {
        Self { tag: Tag::FileData as u8, id: id.into(), size: size.into(), chain: HeadTail::invalid(), attributes: INVALID_SECTOR.into() }
    }

    pub fn chained(id: FileId, chain: phylum_ds::HeadTail) -> Self {
        Self {
            tag: Tag::FileData as u8,
            id: id.into(),
            size: 0u32.into(),
            chain: HeadTail::from_phylum_ds(chain),
            attributes: INVALID_SECTOR.into(),
        }
    }

    pub fn is_inline(&self) -> bool {
        !self.chain.valid()
    }
}

/// A single named attribute (`type` picks its meaning, `size` its length);
/// the bytes themselves follow this header in the same record.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FileAttribute {
    pub tag: u8,
    pub id: U32,
    pub attribute_type: u8,
    pub size: u8,
}

impl FileAttribute {
    pub fn new(id: FileId, attribute_type: u8, size: u8) -> Self {
        Self { tag: Tag::FileAttribute as u8, id: id.into(), attribute_type, size }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Leaf = 0,
    Inner = 1,
}

/// A position inside a B+ tree: which sector its node lives in, and the
/// record's byte offset within that sector's buffer. Used instead of a raw
/// pointer since a page-lock replace can move a node's storage around.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct NodePtr {
    pub sector: U32,
    pub position: U16,
}

impl NodePtr {
    pub fn new(sector: SectorId, position: u16) -> Self {
        Self { sector: sector.into(), position: position.into() }
    }

    pub fn is_valid(&self) -> bool {
        self.sector.get() != INVALID_SECTOR
    }
}

impl Default for NodePtr {
    fn default() -> Self {
        Self { sector: INVALID_SECTOR.into(), position: 0u16.into() }
    }
}

/// Fixed part of a tree node record; the generic, order-sized key/value
/// payload follows immediately after in the same delimited record.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TreeNodeHeader {
    pub tag: u8,
    pub file_id: U32,
    pub depth: u8,
    pub number_keys: U16,
    pub node_type: u8,
    pub parent: NodePtr,
}

impl TreeNodeHeader {
    pub fn new(node_type: NodeType, file_id: FileId, depth: u8) -> Self {
        Self {
            tag: Tag::TreeNode as u8,
            file_id: file_id.into(),
            depth,
            number_keys: 0u16.into(),
            node_type: node_type as u8,
            parent: NodePtr::default(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        if self.node_type == NodeType::Inner as u8 {
            NodeType::Inner
        } else {
            NodeType::Leaf
        }
    }
}

/// Header of a sector belonging to a B+ tree's sector-linked-list: `tail`
/// is the previous sector allocated for this tree, so the whole tree's
/// storage can be walked and reclaimed without consulting anything else.
/// Distinct from [`TreeNodeHeader`], which headers the node records this
/// sector holds.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TreeSectorHeader {
    pub tag: u8,
    pub tail: U32,
}

impl TreeSectorHeader {
    pub fn new(tail: SectorId) -> Self {
        Self { tag: Tag::TreeSector as u8, tail: tail.into() }
    }

    pub fn tail(&self) -> SectorId {
        self.tail.get()
    }
}

/// A directory entry inside the tree-backed directory implementation
/// (`DirectoryTree`); `name`/`flags` are common to files and directories.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FsDirectoryEntry {
    pub tag: u8,
    pub name: [u8; MAX_NAME],
    pub flags: U16,
    pub attributes: U32,
    pub children: U32,
}

impl FsDirectoryEntry {
    pub fn new(name: &str, flags: u16) -> Self {
        Self {
            tag: Tag::FsDirectoryEntry as u8,
            name: pack_name(name),
            flags: flags.into(),
            attributes: INVALID_SECTOR.into(),
            children: INVALID_SECTOR.into(),
        }
    }

    pub fn name(&self) -> &str {
        unpack_name(&self.name)
    }
}

/// A file entry inside the tree-backed directory implementation; carries
/// its own position/record tree pointers in addition to its data chain.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FsFileEntry {
    pub tag: u8,
    pub name: [u8; MAX_NAME],
    pub flags: U16,
    pub directory_size: U32,
    pub chain: HeadTail,
    pub attributes: U32,
    pub position_index: U32,
    pub record_index: U32,
}

impl FsFileEntry {
    pub fn new(name: &str, flags: u16) -> Self {
        Self {
            tag: Tag::FsFileEntry as u8,
            name: pack_name(name),
            flags: flags.into(),
            directory_size: 0u32.into(),
            chain: HeadTail::invalid(),
            attributes: INVALID_SECTOR.into(),
            position_index: INVALID_SECTOR.into(),
            record_index: INVALID_SECTOR.into(),
        }
    }

    pub fn name(&self) -> &str {
        unpack_name(&self.name)
    }
}

/// One slot of a [`crate::free_sectors_chain::FreeSectorsChain`]: either the
/// head of a sub-chain of free sectors (`tree_size == 0`) or the root of a
/// free-sectors tree holding `tree_size` nodes worth of reclaimable sectors.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FreeSectors {
    pub tag: u8,
    pub head: U32,
    pub tree_size: U32,
}

impl FreeSectors {
    pub fn chain(head: SectorId) -> Self {
        Self { tag: Tag::FreeSectors as u8, head: head.into(), tree_size: 0u32.into() }
    }

    pub fn tree(root: SectorId, tree_size: u32) -> Self {
        Self { tag: Tag::FreeSectors as u8, head: root.into(), tree_size: tree_size.into() }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.head.get() == INVALID_SECTOR
    }

    pub fn is_tree(&self) -> bool {
        self.tree_size.get() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_stable_for_a_given_name() {
        assert_eq!(file_id("readme.txt"), file_id("readme.txt"));
        assert_ne!(file_id("readme.txt"), file_id("readme.md"));
    }

    #[test]
    fn names_round_trip_through_the_fixed_width_field() {
        let entry = FileEntry::new("log.bin", 0);
        assert_eq!(entry.name(), "log.bin");
    }

    #[test]
    fn tag_round_trips_through_u8() {
        for tag in [Tag::SuperBlock, Tag::FileData, Tag::TreeNode, Tag::FreeSectors] {
            assert_eq!(Tag::from_u8(tag as u8), Some(tag));
        }
    }
}
