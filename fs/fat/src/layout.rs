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

//! On-disk geometry and struct layout for the fat16 image.
//!
//! One "copy" of the image is `IMAGE_SIZE` bytes: a header, a boot sector, a
//! one-sector FAT slot, the root directory, and the data area, in that order.
//! Two copies are concatenated back to back in the backing store so the
//! journal in `image.rs` always has an inactive copy to commit into.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const SECTOR_SIZE: usize = 512;
pub const CLUSTER_SIZE: usize = 4 * 1024;
pub const NUM_CLUSTERS: usize = 125;
pub const ROOT_ENTRIES: usize = 256;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES_PER_CLUSTER: usize = CLUSTER_SIZE / DIR_ENTRY_SIZE;
pub const MAX_OPEN_FILES: usize = 16;
pub const MAX_OPEN_DIRS: usize = 16;
pub const MAX_DEPTH: usize = 4;
pub const MAX_NAME_LEN: usize = 11;
pub const HEADER_SIZE: usize = 512;
pub const MAGIC: u32 = 0xF416;

/// First cluster index that can hold data; 0 and 1 are reserved, matching
/// `fat[0]`/`fat[1]` never being handed out by the allocator.
pub const FIRST_DATA_CLUSTER: u16 = 2;
pub const END_OF_CHAIN: u16 = 0xFFFF;
pub const FAT_FREE: u16 = 0;

pub const BOOT_SECTOR_OFFSET: usize = HEADER_SIZE;
pub const FAT_OFFSET: usize = BOOT_SECTOR_OFFSET + SECTOR_SIZE;
pub const ROOT_DIR_OFFSET: usize = FAT_OFFSET + SECTOR_SIZE;
pub const ROOT_DIR_SIZE: usize = ROOT_ENTRIES * DIR_ENTRY_SIZE;
pub const DATA_OFFSET: usize = ROOT_DIR_OFFSET + ROOT_DIR_SIZE;
pub const DATA_SIZE: usize = NUM_CLUSTERS * CLUSTER_SIZE;

/// Size of one image copy, payload only (everything the header's CRC
/// covers). The reference flash image reserves a fixed `IMAGE_SIZE` per
/// copy that is larger than what layout actually uses; the remainder is
/// zero-filled slack carried along for byte-for-byte fidelity.
pub const IMAGE_SIZE: u64 = 512 * 1024;
pub const PAYLOAD_SIZE: usize = IMAGE_SIZE as usize - HEADER_SIZE;

pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_REGULAR: u8 = 0x20;

pub const NAME_FREE: u8 = 0x00;
pub const NAME_DELETED: u8 = 0xE5;

/// The two-image superblock/journal header. `crc32` covers every byte of
/// the copy from `HEADER_SIZE` onward.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct HeaderRaw {
    pub magic: U32,
    pub crc32: U32,
    pub sequence: U64,
    pub active: u8,
    _reserved: [u8; HEADER_SIZE - 4 - 4 - 8 - 1],
}

impl HeaderRaw {
    pub fn new(crc32: u32, sequence: u64) -> Self {
        Self {
            magic: MAGIC.into(),
            crc32: crc32.into(),
            sequence: sequence.into(),
            active: 1,
            _reserved: [0; HEADER_SIZE - 4 - 4 - 8 - 1],
        }
    }
}

const _: () = assert!(core::mem::size_of::<HeaderRaw>() == HEADER_SIZE);

/// Static geometry recorded for self-description; never consulted to
/// reconfigure the running core, which always assumes the constants above.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BootSectorRaw {
    pub bytes_per_sector: U16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: U16,
    pub num_fats: u8,
    pub root_entry_count: U16,
    pub total_sectors: U32,
    _reserved: [u8; SECTOR_SIZE - 2 - 1 - 2 - 1 - 2 - 4],
}

impl Default for BootSectorRaw {
    fn default() -> Self {
        Self {
            bytes_per_sector: (SECTOR_SIZE as u16).into(),
            sectors_per_cluster: (CLUSTER_SIZE / SECTOR_SIZE) as u8,
            reserved_sectors: 1u16.into(),
            num_fats: 1,
            root_entry_count: (ROOT_ENTRIES as u16).into(),
            total_sectors: ((IMAGE_SIZE as u32) / SECTOR_SIZE as u32).into(),
            _reserved: [0; SECTOR_SIZE - 2 - 1 - 2 - 1 - 2 - 4],
        }
    }
}

const _: () = assert!(core::mem::size_of::<BootSectorRaw>() == SECTOR_SIZE);

/// One fixed 32-byte directory slot, in root or in a sub-directory cluster.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntryRaw {
    pub name: [u8; MAX_NAME_LEN],
    pub attributes: u8,
    _reserved: [u8; 10],
    pub time: U16,
    pub date: U16,
    pub first_cluster: U16,
    pub size: U32,
}

const _: () = assert!(core::mem::size_of::<DirEntryRaw>() == DIR_ENTRY_SIZE);

impl DirEntryRaw {
    pub const EMPTY: Self = Self {
        name: [0; MAX_NAME_LEN],
        attributes: 0,
        _reserved: [0; 10],
        time: U16::ZERO,
        date: U16::ZERO,
        first_cluster: U16::ZERO,
        size: U32::ZERO,
    };

    pub fn is_free(&self) -> bool {
        matches!(self.name[0], NAME_FREE | NAME_DELETED)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn name_matches(&self, packed: &[u8; MAX_NAME_LEN]) -> bool {
        !self.is_free() && &self.name == packed
    }
}
