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

//! A read-only byte-stream facade over an open file, hiding whether its
//! content lives inline in the directory chain or out-of-line in a
//! [`DataChain`].

use phylum_ds::SectorMap;
use phylum_err::Result;

use crate::data_chain::DataChain;
use crate::directory_chain::{DirectoryChain, FoundFile};
use crate::sector_allocator::SectorAllocator;
use crate::working_buffers::WorkingBuffers;

enum Source<'a> {
    Chain(DataChain<'a>),
    Inline(Vec<u8>),
}

/// Where a subsequent [`FileReader::seek`] should be measured from. Kept
/// for API completeness even though neither backing store supports random
/// access yet — see [`FileReader::seek`].
pub enum SeekReference {
    Start,
    End,
}

pub struct FileReader<'a> {
    source: Source<'a>,
    position: u64,
}

impl<'a> FileReader<'a> {
    /// `found` is the result of the caller's own `directory.find(name, ..)`.
    /// A valid chain pointer means the data lives in a [`DataChain`];
    /// otherwise it's read out of the directory's inline storage up front.
    pub fn open(
        sectors: &'a dyn SectorMap,
        allocator: &'a SectorAllocator,
        buffers: &'a WorkingBuffers,
        directory: &mut DirectoryChain<'a>,
        found: FoundFile,
    ) -> Result<Self> {
        let source = if found.chain.valid() {
            Source::Chain(DataChain::new(sectors, allocator, buffers, found.chain)?)
        } else {
            let mut bytes = Vec::new();
            directory.read(found.id, |chunk| {
                bytes.extend_from_slice(chunk);
                Ok(())
            })?;
            Source::Inline(bytes)
        };
        Ok(Self { source, position: 0 })
    }

    /// Copies up to `out.len()` bytes starting at the current position.
    /// Returns the number of bytes copied, less than `out.len()` only once
    /// the file's content is exhausted.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let n = match &mut self.source {
            Source::Chain(chain) => chain.read(out)?,
            Source::Inline(bytes) => {
                let start = (self.position as usize).min(bytes.len());
                let remaining = &bytes[start..];
                let n = remaining.len().min(out.len());
                out[..n].copy_from_slice(&remaining[..n]);
                n
            }
        };
        self.position += n as u64;
        Ok(n)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// No-op beyond reporting the current position: a data chain can only
    /// be walked forward from its head, and an inline buffer has no
    /// persisted cursor of its own, so there is nowhere for either backing
    /// store to seek *to*.
    pub fn seek(&mut self, _reference: SeekReference, _offset: i64) -> Result<u64> {
        Ok(self.position)
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_chain::DirectoryChain;
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
    fn reads_inline_content() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        let id = dir.touch("f.txt").unwrap();
        dir.file_data(id, b"hello, inline").unwrap();
        dir.find("f.txt", &mut []).unwrap();
        let found = dir.open().unwrap();

        let mut reader = FileReader::open(&map, &allocator, &buffers, &mut dir, found).unwrap();
        let mut out = [0u8; 13];
        assert_eq!(reader.read(&mut out).unwrap(), 13);
        assert_eq!(&out, b"hello, inline");
        assert_eq!(reader.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn reads_chained_content_in_pieces() {
        let map = MemorySectorMap::new(64);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 64);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        let id = dir.touch("big.bin").unwrap();
        let payload: Vec<u8> = (0u8..100).collect();
        let mut data_chain = DataChain::new(&map, &allocator, &buffers, phylum_ds::HeadTail::INVALID).unwrap();
        data_chain.write(&payload).unwrap();
        dir.file_chain(id, data_chain.chain()).unwrap();

        dir.find("big.bin", &mut []).unwrap();
        let found = dir.open().unwrap();
        let mut reader = FileReader::open(&map, &allocator, &buffers, &mut dir, found).unwrap();

        let mut first = [0u8; 40];
        assert_eq!(reader.read(&mut first).unwrap(), 40);
        assert_eq!(first.as_slice(), &payload[..40]);

        let mut rest = [0u8; 60];
        assert_eq!(reader.read(&mut rest).unwrap(), 60);
        assert_eq!(rest.as_slice(), &payload[40..]);
    }

    #[test]
    fn seek_is_a_no_op_that_reports_position() {
        let map = MemorySectorMap::new(256);
        let allocator = SectorAllocator::new(&map);
        let buffers = WorkingBuffers::new(4, 256);
        let mut dir = opened_directory(&map, &allocator, &buffers);

        let id = dir.touch("f.txt").unwrap();
        dir.file_data(id, b"abcd").unwrap();
        dir.find("f.txt", &mut []).unwrap();
        let found = dir.open().unwrap();

        let mut reader = FileReader::open(&map, &allocator, &buffers, &mut dir, found).unwrap();
        let mut out = [0u8; 2];
        reader.read(&mut out).unwrap();
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.seek(SeekReference::Start, 0).unwrap(), 2);
    }
}
