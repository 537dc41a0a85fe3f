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

//! Types shared between the fat16 core and its callers: the small vocabulary
//! of open modes, stat results, directory entries, and the injectable wall
//! clock. None of these types know anything about cluster chains or on-disk
//! layout - that lives in `fat16_fat`.

pub use fat16_err::{Error, Result};

use std::time::SystemTime;

/// What a live directory entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Regular,
}

/// Flags recognized by `open`, kept as plain booleans rather than a bitmask
/// so callers don't need to remember numeric mode bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub exclusive: bool,
}

impl OpenOptions {
    pub fn read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Result of `stat`.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub file_type: FileType,
    pub size: u64,
    pub mtime: SystemTime,
}

/// One entry returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub file_type: FileType,
}

/// A caller-supplied wall clock.
///
/// Injected so the core never calls `SystemTime::now()` directly, which lets
/// tests pin timestamps deterministically.
pub trait Clock {
    fn now(&self) -> SystemTime;
}

/// The obvious implementation, backed by the host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
