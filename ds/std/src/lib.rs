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

//! Hosted `SectorMap` backends: a `std::fs::File` one for running against a
//! real file standing in for a flash device, and an in-memory one for tests.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use log::{debug, error};
use phylum_ds::{IoError, Result, SectorId, SectorMap};

/// A `SectorMap` backed by a single file, addressed at `sector * sector_size`.
///
/// Grows the file lazily: `size()` reflects how many sectors have been
/// written at least once, matching `SectorAllocator`'s use of `size()` to
/// seed its counter rather than the file's preallocated capacity.
pub struct FileSectorMap {
    file: File,
    sector_size: usize,
}

impl FileSectorMap {
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, sector_size })
    }
}

impl SectorMap for FileSectorMap {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn size(&self) -> SectorId {
        let len = self.file.metadata().map(|meta| meta.len()).unwrap_or(0);
        (len / self.sector_size as u64) as SectorId
    }

    fn read(&self, sector: SectorId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.sector_size);
        let offset = sector as u64 * self.sector_size as u64;
        self.file.read_exact_at(buf, offset).map_err(|e| {
            error!("read sector {sector} failed: {e}");
            IoError::ReadFailed { sector }.into()
        })
    }

    fn write(&self, sector: SectorId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.sector_size);
        let offset = sector as u64 * self.sector_size as u64;
        self.file.write_all_at(buf, offset).map_err(|e| {
            error!("write sector {sector} failed: {e}");
            IoError::WriteFailed { sector }.into()
        })
    }

    fn clear(&self) -> Result<()> {
        self.file.set_len(0).map_err(|_| IoError::ClearFailed)?;
        debug!("cleared file-backed sector map");
        Ok(())
    }

    fn find(&self, sector: SectorId) -> Result<bool> {
        Ok(sector < self.size())
    }
}

/// A `SectorMap` over plain heap memory, used by the test suite and any
/// host tool that wants a disposable volume.
pub struct MemorySectorMap {
    sector_size: usize,
    sectors: Mutex<Vec<Vec<u8>>>,
}

impl MemorySectorMap {
    pub fn new(sector_size: usize) -> Self {
        Self { sector_size, sectors: Mutex::new(Vec::new()) }
    }
}

impl SectorMap for MemorySectorMap {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn size(&self) -> SectorId {
        self.sectors.lock().unwrap().len() as SectorId
    }

    fn read(&self, sector: SectorId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.sector_size);
        let sectors = self.sectors.lock().unwrap();
        match sectors.get(sector as usize) {
            Some(data) => {
                buf.copy_from_slice(data);
                Ok(())
            }
            None => Err(IoError::ReadFailed { sector }.into()),
        }
    }

    fn write(&self, sector: SectorId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.sector_size);
        let mut sectors = self.sectors.lock().unwrap();
        if sectors.len() <= sector as usize {
            sectors.resize(sector as usize + 1, vec![0xff; self.sector_size]);
        }
        sectors[sector as usize].copy_from_slice(buf);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.sectors.lock().unwrap().clear();
        Ok(())
    }

    fn find(&self, sector: SectorId) -> Result<bool> {
        Ok((sector as usize) < self.sectors.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_map_round_trips_a_sector() {
        let map = MemorySectorMap::new(256);
        let mut written = vec![0u8; 256];
        written[0] = 0xab;
        map.write(3, &written).unwrap();

        let mut read_back = vec![0u8; 256];
        map.read(3, &mut read_back).unwrap();
        assert_eq!(written, read_back);
        assert_eq!(map.size(), 4);
    }

    #[test]
    fn memory_map_fills_gaps_with_erased_value() {
        let map = MemorySectorMap::new(16);
        map.write(2, &[1; 16]).unwrap();

        let mut gap = vec![0u8; 16];
        map.read(0, &mut gap).unwrap();
        assert_eq!(gap, vec![0xff; 16]);
    }

    #[test]
    fn file_map_round_trips_and_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.bin");
        let map = FileSectorMap::open(&path, 128).unwrap();

        map.write(0, &[7; 128]).unwrap();
        map.write(5, &[9; 128]).unwrap();
        assert_eq!(map.size(), 6);

        let mut buf = vec![0u8; 128];
        map.read(5, &mut buf).unwrap();
        assert_eq!(buf, vec![9; 128]);
    }
}
