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

//! File-backed [`DataStorage`] for hosts with a real filesystem.
//!
//! The fat16 core treats its backing store as an opaque byte range; this
//! crate supplies that range from a regular file opened with `std::fs`,
//! using positioned reads/writes so no seek state is shared with callers.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use fat16_ds::{DataStorage, Error, Result};

pub struct FileStorage {
    file: File,
    size: u64,
}

impl FileStorage {
    /// Open (creating if necessary) a file of exactly `size` bytes to serve
    /// as the fat16 backing store.
    pub fn open(path: impl AsRef<Path>, size: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self { file, size })
    }
}

impl DataStorage for FileStorage {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buffer, offset).map_err(|e| {
            log::error!("short read at offset {offset}: {e}");
            Error::Io
        })
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.file.write_all_at(buffer, offset).map_err(|e| {
            log::error!("short write at offset {offset}: {e}");
            Error::Io
        })
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data().map_err(|e| {
            log::error!("fsync failed: {e}");
            Error::Io
        })
    }
}
