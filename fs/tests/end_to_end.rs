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

//! End-to-end scenarios against a 256-byte in-memory sector map, exercising
//! the directory chain, data chain, and B+ tree directly rather than
//! through the `Phylum` facade, matching how each was originally walked.

use phylum::data_chain::DataChain;
use phylum::directory_chain::DirectoryChain;
use phylum::entries::Tag;
use phylum::sector_allocator::SectorAllocator;
use phylum::tree_sector::TreeSector;
use phylum::working_buffers::WorkingBuffers;
use phylum::HeadTail;
use phylum_ds::SectorMap;
use phylum_ds_std::MemorySectorMap;

const S: usize = 256;

#[test]
fn e1_format_then_mount() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);

    {
        let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
        dir.format().unwrap();
    }

    let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
    dir.mount().unwrap();

    let mut raw = vec![0u8; S];
    map.read(0, &mut raw).unwrap();
    assert_eq!(raw[1], Tag::DirectorySector as u8);
}

#[test]
fn e2_touch_and_find() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);
    let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
    dir.format().unwrap();

    dir.touch("test.logs").unwrap();
    assert!(dir.find("test.logs", &mut []).unwrap());
    assert!(!dir.find("nope.logs", &mut []).unwrap());
}

#[test]
fn e3_seven_files_span_three_sectors() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);
    let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
    dir.format().unwrap();

    for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt", "f.txt", "g.txt"] {
        dir.touch(name).unwrap();
    }

    assert!(!dir.find("nope.txt", &mut []).unwrap());
    for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt", "f.txt", "g.txt"] {
        assert!(dir.find(name, &mut []).unwrap(), "missing {name}");
    }
}

#[test]
fn e4_inline_write_under_half_a_sector() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);
    let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
    dir.format().unwrap();

    let id = dir.touch("data.txt").unwrap();
    let payload = b"Hello, world! How are you!";
    assert_eq!(payload.len(), 26);
    for _ in 0..3 {
        dir.file_data(id, payload).unwrap();
    }

    assert!(dir.find("data.txt", &mut []).unwrap());
    assert_eq!(dir.found().size as usize, 26 * 3);
    assert!(!dir.found().chain.valid());
}

#[test]
fn e5_promotion_to_data_chain() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);
    let mut dir = DirectoryChain::new(&map, &allocator, &buffers, 0).unwrap();
    dir.format().unwrap();

    let id = dir.touch("data.txt").unwrap();
    let small = b"Hello, world! How are you!";
    for _ in 0..3 {
        dir.file_data(id, small).unwrap();
    }

    let mut prior = Vec::new();
    dir.read(id, |bytes| {
        prior.extend_from_slice(bytes);
        Ok(())
    })
    .unwrap();
    assert_eq!(prior.len(), 26 * 3);

    let big = vec![0x5au8; S / 2 + 8];
    let mut data_chain = DataChain::new(&map, &allocator, &buffers, HeadTail::INVALID).unwrap();
    data_chain.write(&prior).unwrap();
    data_chain.write(&big).unwrap();
    dir.file_chain(id, data_chain.chain()).unwrap();

    assert!(dir.find("data.txt", &mut []).unwrap());
    assert!(dir.found().chain.valid());
    assert_eq!(data_chain.total_bytes().unwrap() as usize, 26 * 3 + big.len());
}

#[test]
fn e6_data_chain_spans_two_sectors() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(4, S);

    let mut data_chain = DataChain::new(&map, &allocator, &buffers, HeadTail::INVALID).unwrap();
    let first = vec![0x11u8; S / 2 + 8 + 26 * 3];
    data_chain.write(&first).unwrap();

    let second = vec![0x22u8; S];
    data_chain.write(&second).unwrap();

    assert_ne!(data_chain.chain().head, data_chain.chain().tail);
    assert_eq!(data_chain.total_bytes().unwrap() as usize, first.len() + second.len());

    let mut out = vec![0u8; first.len() + second.len()];
    let mut fresh = DataChain::new(&map, &allocator, &buffers, data_chain.chain()).unwrap();
    let n = fresh.read(&mut out).unwrap();
    assert_eq!(n, out.len());
    let expected: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
    assert_eq!(out, expected);
}

#[test]
fn e7_tree_at_scale() {
    let map = MemorySectorMap::new(S);
    let allocator = SectorAllocator::new(&map);
    let buffers = WorkingBuffers::new(8, S);
    let mut tree = TreeSector::<u32, u32>::new(&map, &allocator, &buffers, 6, 0);
    tree.create().unwrap();

    for i in 1u32..1024 {
        tree.add(i, i).unwrap();
        assert_eq!(tree.find(1).unwrap(), Some(1));
    }

    for i in 1u32..1024 {
        assert_eq!(tree.find(i).unwrap(), Some(i), "missing {i}");
    }
    assert_eq!(tree.find(1025).unwrap(), None);
}
