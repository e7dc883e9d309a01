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

//! A sector-sized buffer holding a sequence of varint-length-delimited
//! records, back to back, with no other framing. A record length of zero
//! (or simply running out of room) marks the end of the written records.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use phylum_err::{FsError, Result};

use crate::entries::Tag;
use crate::varint;
use crate::working_buffers::LentBuffer;

pub struct DelimitedBuffer<'a> {
    buffer: LentBuffer<'a>,
    position: usize,
    /// Set by [`DelimitedBuffer::constrain`] to stop raw reads at the end of
    /// one data sector's live payload rather than the whole sector.
    limit: Option<usize>,
}

/// A record as found during iteration: its tag and the bytes that follow
/// the length delimiter (header struct plus any trailing payload).
pub struct Record<'b> {
    pub bytes: &'b [u8],
}

impl<'b> Record<'b> {
    pub fn tag(&self) -> Option<Tag> {
        self.bytes.first().copied().and_then(Tag::from_u8)
    }
}

impl<'a> DelimitedBuffer<'a> {
    pub fn new(buffer: LentBuffer<'a>) -> Self {
        Self { buffer, position: 0, limit: None }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        debug_assert!(position <= self.size());
        self.position = position;
    }

    /// End of the readable/writable region: the constrained limit if one is
    /// in effect (see [`Self::constrain`]), else the whole sector.
    fn effective_len(&self) -> usize {
        self.limit.unwrap_or(self.size())
    }

    pub fn available(&self) -> usize {
        self.effective_len() - self.position
    }

    pub fn rewind(&mut self) {
        self.position = 0;
        self.limit = None;
    }

    /// Clears the whole buffer to the erased-flash value and rewinds.
    pub fn clear(&mut self) {
        self.buffer.fill(0xff);
        self.position = 0;
        self.limit = None;
    }

    /// Limits `available()`/raw reads to `n` bytes past the current
    /// position, so a data sector's payload read can't run into whatever
    /// garbage (or the next sector's worth of stale bytes) follows it.
    pub fn constrain(&mut self, n: usize) {
        self.limit = Some((self.position + n).min(self.size()));
    }

    pub fn clear_constraint(&mut self) {
        self.limit = None;
    }

    /// Moves the cursor forward by `n` bytes without interpreting them as a
    /// record; used to resume a data chain write/read mid-sector.
    pub fn skip(&mut self, n: usize) {
        self.position = (self.position + n).min(self.effective_len());
    }

    /// Copies up to `out.len()` raw bytes starting at the cursor, advancing
    /// it. Used for data-chain payloads, which are not record-delimited.
    pub fn read_raw(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        n
    }

    /// Copies up to `data.len()` raw bytes into the free area starting at
    /// the cursor, advancing it and returning how many bytes fit.
    pub fn write_raw(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.available());
        self.buffer[self.position..self.position + n].copy_from_slice(&data[..n]);
        self.position += n;
        n
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Whether a record of `length` bytes would fit starting at the current
    /// position, including its length delimiter.
    pub fn room_for(&self, length: usize) -> bool {
        varint::encoded_len(length as u32) as usize + length <= self.available()
    }

    /// Appends a record and returns the offset of its first byte (tag byte)
    /// within the buffer, so the caller can immediately reinterpret it.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        let length = bytes.len();
        if !self.room_for(length) {
            return Err(FsError::BufferFull {
                required: varint::encoded_len(length as u32) + length,
                available: self.available(),
            }
            .into());
        }

        let mut header = [0u8; 5];
        let header_len = varint::encode(length as u32, &mut header);

        let start = self.position;
        let record_start = start + header_len;
        self.buffer[start..record_start].copy_from_slice(&header[..header_len]);
        self.buffer[record_start..record_start + length].copy_from_slice(bytes);
        self.position = record_start + length;

        Ok(record_start)
    }

    /// Writes a zero-length terminator at the current position without
    /// advancing it, marking "no more records" for a future reader.
    pub fn terminate(&mut self) -> Result<()> {
        if !self.room_for(0) {
            return Err(FsError::BufferFull { required: 1, available: self.available() }.into());
        }
        let mut header = [0u8; 5];
        let header_len = varint::encode(0, &mut header);
        self.buffer[self.position..self.position + header_len].copy_from_slice(&header[..header_len]);
        Ok(())
    }

    /// Appends a fixed-layout record, reinterpreting it as bytes via
    /// `zerocopy` rather than requiring the caller to slice it up first.
    pub fn append_record<T: IntoBytes + Immutable>(&mut self, record: &T) -> Result<usize> {
        self.append(record.as_bytes())
    }

    /// Interprets the first record in the buffer as `T`. Used for sector
    /// headers, which are always the first thing written to a sector.
    pub fn header<T: FromBytes + KnownLayout + Immutable + Copy>(&self) -> Option<T> {
        let record = self.iter().next()?;
        T::read_from_bytes(record.bytes).ok()
    }

    /// Mutates the first record in place via `f`, then writes it back.
    /// Used to patch a chain header's `np` or a data sector's byte count
    /// without rewriting the whole buffer.
    pub fn write_header_with<T, F>(&mut self, f: F) -> Result<()>
    where
        T: FromBytes + IntoBytes + KnownLayout + Immutable + Copy,
        F: FnOnce(&mut T),
    {
        let (length, header_len) =
            varint::decode(&self.buffer).ok_or(FsError::LogicError("no header record to rewrite"))?;
        let start = header_len;
        let end = start + length as usize;
        let mut value = T::read_from_bytes(&self.buffer[start..end])
            .map_err(|_| FsError::LogicError("header record does not match the expected layout"))?;
        f(&mut value);
        self.buffer[start..end].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Mutable byte slice of the record whose body starts at `record_start`
    /// (the offset [`Self::append`] returned). Used by the B+ tree to edit
    /// an already-written node in place and by the free-sectors chain to
    /// edit an already-written record in place.
    pub fn record_mut(&mut self, record_start: usize) -> Option<&mut [u8]> {
        let mut offset = 0;
        loop {
            if offset >= self.buffer.len() {
                return None;
            }
            let (length, header_len) = varint::decode(&self.buffer[offset..])?;
            if length == 0 {
                return None;
            }
            let start = offset + header_len;
            let end = start + length as usize;
            if start == record_start {
                return Some(&mut self.buffer[start..end]);
            }
            offset = end;
        }
    }

    /// Reads the record whose body starts at `record_start` as `T`.
    pub fn record_at<T: FromBytes + KnownLayout + Immutable + Copy>(&self, record_start: usize) -> Option<T> {
        let mut offset = 0;
        loop {
            if offset >= self.buffer.len() {
                return None;
            }
            let (length, header_len) = varint::decode(&self.buffer[offset..])?;
            if length == 0 {
                return None;
            }
            let start = offset + header_len;
            let end = start + length as usize;
            if start == record_start {
                return T::read_from_bytes(&self.buffer[start..end]).ok();
            }
            offset = end;
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { bytes: &self.buffer, offset: 0 }
    }

    /// Advances `position` past the last well-formed record, leaving room
    /// for the next `append`. Called after loading a sector from storage,
    /// since the in-memory position always starts at zero.
    pub fn seek_end(&mut self) {
        let mut offset = 0;
        for record in self.iter() {
            offset += varint::encoded_len(record.bytes.len() as u32) + record.bytes.len();
        }
        self.position = offset;
    }
}

/// Reads `T` from the first `size_of::<T>()` bytes of `bytes`, ignoring any
/// trailing payload. Used for records that carry a fixed header followed by
/// variable-length data (`FileData`'s inline bytes, `FileAttribute`'s
/// payload) where [`DelimitedBuffer::header`]'s exact-size match doesn't
/// apply.
pub fn read_prefix<T: FromBytes + KnownLayout + Immutable + Copy>(bytes: &[u8]) -> Option<T> {
    T::read_from_prefix(bytes).ok().map(|(value, _)| value)
}

pub struct Iter<'b> {
    bytes: &'b [u8],
    offset: usize,
}

impl<'b> Iterator for Iter<'b> {
    type Item = Record<'b>;

    fn next(&mut self) -> Option<Record<'b>> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let (length, header_len) = varint::decode(&self.bytes[self.offset..])?;
        if length == 0 {
            return None;
        }
        let start = self.offset + header_len;
        let end = start + length as usize;
        if end > self.bytes.len() {
            return None;
        }
        self.offset = end;
        Some(Record { bytes: &self.bytes[start..end] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_buffers::WorkingBuffers;

    fn buffer(buffers: &WorkingBuffers) -> DelimitedBuffer<'_> {
        DelimitedBuffer::new(buffers.allocate().unwrap())
    }

    #[test]
    fn appended_records_round_trip_through_iteration() {
        let buffers = WorkingBuffers::new(1, 64);
        let mut db = buffer(&buffers);

        db.append(b"hello").unwrap();
        db.append(b"world!").unwrap();
        db.terminate().unwrap();

        let records: Vec<&[u8]> = db.iter().map(|r| r.bytes).collect();
        assert_eq!(records, vec![b"hello".as_slice(), b"world!".as_slice()]);
    }

    #[test]
    fn seek_end_lands_after_the_last_record() {
        let buffers = WorkingBuffers::new(1, 64);
        let mut db = buffer(&buffers);
        db.append(b"abc").unwrap();
        db.append(b"de").unwrap();
        let written_to = db.position();

        db.set_position(0);
        db.seek_end();
        assert_eq!(db.position(), written_to);
    }

    #[test]
    fn room_for_accounts_for_the_delimiter_overhead() {
        let buffers = WorkingBuffers::new(1, 8);
        let db = buffer(&buffers);
        assert!(db.room_for(7));
        assert!(!db.room_for(8));
    }

    #[test]
    fn append_past_capacity_is_a_buffer_full_error() {
        let buffers = WorkingBuffers::new(1, 8);
        let mut db = buffer(&buffers);
        assert!(db.append(&[0u8; 8]).is_err());
    }
}
