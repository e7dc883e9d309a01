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

//! A small fixed-capacity pool of sector-sized scratch buffers.
//!
//! Every chain and tree object that needs a sector's worth of scratch space
//! borrows one from here instead of allocating its own, so the high-water
//! mark of concurrently open chains is bounded and visible (`high_water()`)
//! rather than left to the allocator. Exhausting the pool is a programmer
//! error (too many chains opened at once for the configured capacity), so
//! [`WorkingBuffers::allocate`] returns [`phylum_err::FsError::LogicError`]
//! rather than growing silently.

use std::sync::Mutex;

use log::trace;
use phylum_err::{FsError, Result};

struct Pool {
    slots: Vec<Option<Box<[u8]>>>,
    high_water: usize,
}

/// Pool of `capacity` buffers, each `buffer_size` bytes.
pub struct WorkingBuffers {
    buffer_size: usize,
    pool: Mutex<Pool>,
}

impl WorkingBuffers {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let slots = (0..capacity).map(|_| Some(vec![0u8; buffer_size].into_boxed_slice())).collect();
        Self { buffer_size, pool: Mutex::new(Pool { slots, high_water: 0 }) }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.pool.lock().unwrap().slots.len()
    }

    /// Buffers concurrently on loan at the busiest point so far; useful for
    /// sizing `capacity` in a real deployment.
    pub fn high_water(&self) -> usize {
        self.pool.lock().unwrap().high_water
    }

    /// Checks out a buffer, clearing it to the erased-flash value.
    pub fn allocate(&self) -> Result<LentBuffer<'_>> {
        let mut pool = self.pool.lock().unwrap();
        let slot = pool
            .slots
            .iter()
            .position(|slot| slot.is_some())
            .ok_or(FsError::LogicError("working buffer pool exhausted"))?;
        let mut bytes = pool.slots[slot].take().unwrap();
        bytes.fill(0xff);
        let taken = pool.slots.iter().filter(|s| s.is_none()).count();
        if taken > pool.high_water {
            pool.high_water = taken;
        }
        trace!("working-buffers: allocate slot={slot} in-use={taken}");
        Ok(LentBuffer { pool: self, slot, bytes: Some(bytes) })
    }
}

/// RAII handle to a checked-out buffer; returns it to the pool on drop.
pub struct LentBuffer<'a> {
    pool: &'a WorkingBuffers,
    slot: usize,
    bytes: Option<Box<[u8]>>,
}

impl<'a> std::ops::Deref for LentBuffer<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes.as_deref().expect("buffer taken")
    }
}

impl<'a> std::ops::DerefMut for LentBuffer<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes.as_deref_mut().expect("buffer taken")
    }
}

impl<'a> Drop for LentBuffer<'a> {
    fn drop(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            let mut pool = self.pool.pool.lock().unwrap();
            trace!("working-buffers: free slot={}", self.slot);
            pool.slots[self.slot] = Some(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_clears_to_erased_value() {
        let buffers = WorkingBuffers::new(2, 16);
        let mut buf = buffers.allocate().unwrap();
        assert_eq!(&*buf, &[0xff; 16][..]);
        buf[0] = 1;
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn exhausting_the_pool_is_a_logic_error() {
        let buffers = WorkingBuffers::new(1, 16);
        let _first = buffers.allocate().unwrap();
        assert!(buffers.allocate().is_err());
    }

    #[test]
    fn dropping_a_loan_makes_it_available_again() {
        let buffers = WorkingBuffers::new(1, 16);
        {
            let _first = buffers.allocate().unwrap();
            assert!(buffers.allocate().is_err());
        }
        assert!(buffers.allocate().is_ok());
        assert_eq!(buffers.high_water(), 1);
    }
}
