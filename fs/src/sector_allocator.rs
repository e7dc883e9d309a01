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

//! Hands out never-before-used sector numbers.
//!
//! This does not reclaim anything on its own; freed sectors go through
//! [`crate::free_sectors_chain::FreeSectorsChain`] instead, which is a
//! separate, optional layer a caller can consult before falling back to
//! this allocator.

use std::sync::atomic::{AtomicU32, Ordering};

use phylum_ds::{SectorId, SectorMap};
use phylum_err::{FsError, Result};

pub struct SectorAllocator {
    counter: AtomicU32,
}

impl SectorAllocator {
    /// Seeds the counter from `sectors.size() + 1`, so a freshly mounted
    /// volume never hands out a sector number that might already be in use
    /// by something the map considers live.
    pub fn new(sectors: &dyn SectorMap) -> Self {
        Self { counter: AtomicU32::new(sectors.size() + 1) }
    }

    pub fn from_next(next: SectorId) -> Self {
        Self { counter: AtomicU32::new(next) }
    }

    pub fn allocate(&self) -> Result<SectorId> {
        let sector = self.counter.fetch_add(1, Ordering::Relaxed);
        if sector == SectorId::MAX {
            return Err(FsError::Exhausted { next: sector }.into());
        }
        Ok(sector)
    }

    pub fn next(&self) -> SectorId {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMap(SectorId);

    impl SectorMap for FakeMap {
        fn sector_size(&self) -> usize {
            64
        }
        fn size(&self) -> SectorId {
            self.0
        }
        fn read(&self, _: SectorId, _: &mut [u8]) -> Result<()> {
            unimplemented!()
        }
        fn write(&self, _: SectorId, _: &[u8]) -> Result<()> {
            unimplemented!()
        }
        fn clear(&self) -> Result<()> {
            unimplemented!()
        }
        fn find(&self, _: SectorId) -> Result<bool> {
            unimplemented!()
        }
    }

    #[test]
    fn seeds_from_map_size_plus_one() {
        let allocator = SectorAllocator::new(&FakeMap(10));
        assert_eq!(allocator.allocate().unwrap(), 11);
        assert_eq!(allocator.allocate().unwrap(), 12);
    }

    #[test]
    fn exhaustion_is_reported_rather_than_wrapping() {
        let allocator = SectorAllocator::from_next(SectorId::MAX);
        assert!(allocator.allocate().is_err());
    }
}
