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

//! Error types shared by every crate in the Phylum workspace.

use std::fmt;

/// A sector id, printed in errors without needing the `phylum-ds` crate
/// as a dependency.
pub type SectorId = u32;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] IoError),
    #[error("fs: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("read of sector {sector} failed")]
    ReadFailed { sector: SectorId },
    #[error("write of sector {sector} failed")]
    WriteFailed { sector: SectorId },
    #[error("clear of sector map failed")]
    ClearFailed,
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("sector {sector} not found")]
    NotFound { sector: SectorId },
    #[error("name not found")]
    NameNotFound,
    #[error("key not found")]
    KeyNotFound,
    #[error("corrupt: {0}")]
    Corrupt(CorruptReason),
    #[error("record of {required} bytes does not fit in {available} available")]
    BufferFull { required: usize, available: usize },
    #[error("sector allocator exhausted at sector {next}")]
    Exhausted { next: SectorId },
    #[error("logic error: {0}")]
    LogicError(&'static str),
}

/// Detail for [`FsError::Corrupt`]; kept as its own type so call sites can
/// match on *why* something was corrupt without parsing the message.
#[derive(Debug)]
pub enum CorruptReason {
    /// The first record of a sector did not carry the tag its chain kind
    /// expects (§7 "header tag mismatch").
    HeaderTagMismatch { sector: SectorId, expected: u8, found: u8 },
    /// `pp`/`np` at one end of a chain did not point where `mount()`
    /// expects (§4.5 invariant 1).
    LinkageMismatch { sector: SectorId },
    /// A record claimed a length that runs past the end of the sector.
    RecordOverrun { sector: SectorId, position: usize },
    /// The `Geometry` a caller mounted with disagrees with either the
    /// `SectorMap`'s own sector size or the working-buffer pool's.
    SectorSizeMismatch { expected: usize, found: usize },
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::HeaderTagMismatch { sector, expected, found } => write!(
                f,
                "sector {sector} header tag {found} does not match expected {expected}"
            ),
            CorruptReason::LinkageMismatch { sector } => {
                write!(f, "sector {sector} chain linkage is inconsistent")
            }
            CorruptReason::RecordOverrun { sector, position } => {
                write!(f, "sector {sector} record at {position} runs past sector end")
            }
            CorruptReason::SectorSizeMismatch { expected, found } => {
                write!(f, "geometry sector size {expected} does not match {found}")
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
