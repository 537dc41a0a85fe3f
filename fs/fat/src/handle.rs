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

//! Open-handle tables (spec 4.7, 4.8): fixed-size arrays indexed by plain
//! `usize` descriptors, not pointers. A [`FileDesc`] remembers its owning
//! directory slot directly (`parent`/`slot`) rather than re-resolving a
//! path string on every write, the way the reference implementation does.

use fat16_err::{Error, Result};

use crate::image::DirLocation;
use crate::layout::{MAX_OPEN_DIRS, MAX_OPEN_FILES};

/// The access mode a file was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// An open file: its cluster chain head, declared size, byte offset, and
/// the directory slot that owns it.
#[derive(Debug, Clone, Copy)]
pub struct FileDesc {
    pub parent: DirLocation,
    pub slot: usize,
    pub first_cluster: u16,
    pub size: u32,
    pub offset: u64,
    pub mode: OpenMode,
}

/// An open directory cursor.
#[derive(Debug, Clone, Copy)]
pub struct DirHandle {
    pub loc: DirLocation,
    pub next_slot: usize,
}

/// A fixed-capacity table of open handles, indexed by the lowest free slot.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
}

impl<T: Copy> HandleTable<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn allocate(&mut self, value: T) -> Result<usize> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::TooManyOpen)?;
        self.slots[slot] = Some(value);
        Ok(slot)
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        self.slots
            .get(index)
            .and_then(|s| s.as_ref())
            .ok_or(Error::BadDescriptor)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        self.slots
            .get_mut(index)
            .and_then(|s| s.as_mut())
            .ok_or(Error::BadDescriptor)
    }

    pub fn close(&mut self, index: usize) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::BadDescriptor)?;
        if slot.take().is_none() {
            return Err(Error::BadDescriptor);
        }
        Ok(())
    }
}

pub type FileTable = HandleTable<FileDesc>;
pub type DirTable = HandleTable<DirHandle>;

impl FileTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_OPEN_FILES)
    }
}

impl DirTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_OPEN_DIRS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_one_handle_does_not_disturb_another() {
        let mut table = FileTable::new();
        let a = table
            .allocate(FileDesc {
                parent: DirLocation::Root,
                slot: 0,
                first_cluster: 0,
                size: 0,
                offset: 0,
                mode: OpenMode::Read,
            })
            .unwrap();
        let b = table
            .allocate(FileDesc {
                parent: DirLocation::Root,
                slot: 1,
                first_cluster: 0,
                size: 0,
                offset: 0,
                mode: OpenMode::Read,
            })
            .unwrap();
        table.close(a).unwrap();
        assert!(table.get(b).is_ok());
        assert_eq!(table.get(a).unwrap_err(), Error::BadDescriptor);
    }

    #[test]
    fn closing_unopened_descriptor_fails() {
        let mut table = FileTable::new();
        assert_eq!(table.close(3).unwrap_err(), Error::BadDescriptor);
    }

    #[test]
    fn exhausts_table_capacity() {
        let mut table = FileTable::new();
        for i in 0..MAX_OPEN_FILES {
            table
                .allocate(FileDesc {
                    parent: DirLocation::Root,
                    slot: i,
                    first_cluster: 0,
                    size: 0,
                    offset: 0,
                    mode: OpenMode::Read,
                })
                .unwrap();
        }
        assert_eq!(
            table
                .allocate(FileDesc {
                    parent: DirLocation::Root,
                    slot: 0,
                    first_cluster: 0,
                    size: 0,
                    offset: 0,
                    mode: OpenMode::Read,
                })
                .unwrap_err(),
            Error::TooManyOpen
        );
    }
}
