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

//! An in-memory FAT16-style flash filesystem with a POSIX-like file and
//! directory API, persisted crash-safely through a dual-buffer (A/B)
//! superblock journal protected by CRC32.
//!
//! [`Fat16Vfs`] is the facade: every public method takes the single
//! process-wide lock, validates its arguments, walks whatever path or
//! handle it was given, mutates the in-memory [`Image`], and releases the
//! lock before returning. Persistence only happens on an explicit
//! [`Fat16Vfs::flush`].

pub mod clock;
pub mod crc;
mod dir;
mod handle;
mod image;
pub mod layout;
mod path;

use std::io::SeekFrom;
use std::sync::Mutex;

pub use fat16_err::{Error, Result};
pub use fat16_fs::{Clock, DirEntryInfo, FileType, OpenOptions, Stat, SystemClock};

use fat16_ds::DataStorage;

use handle::{DirHandle, DirTable, FileDesc, FileTable, OpenMode};
use image::{DirLocation, Image};
use layout::{ATTR_DIRECTORY, ATTR_REGULAR, CLUSTER_SIZE};
use path::Resolved;

fn dir_location_cluster(loc: DirLocation) -> u16 {
    match loc {
        DirLocation::Root => 0,
        DirLocation::Cluster(c) => c,
    }
}

fn unpack_name(name: &[u8; layout::MAX_NAME_LEN]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    String::from_utf8_lossy(&name[..end]).into_owned()
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

struct Inner<DS, C> {
    image: Image,
    files: FileTable,
    dirs: DirTable,
    clock: C,
    storage: Option<DS>,
}

/// The facade type: a FAT16-style filesystem generic over its backing
/// [`DataStorage`] and its injected [`Clock`].
pub struct Fat16Vfs<DS: DataStorage, C: Clock = SystemClock> {
    inner: Mutex<Inner<DS, C>>,
}

impl<DS: DataStorage, C: Clock> Fat16Vfs<DS, C> {
    /// Builds a filesystem with a zeroed image, as if `init` had just run.
    /// No backing store is attached until [`Fat16Vfs::mount`] is called.
    pub fn new(clock: C) -> Self {
        Self {
            inner: Mutex::new(Inner {
                image: Image::fresh(),
                files: FileTable::new(),
                dirs: DirTable::new(),
                clock,
                storage: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<DS, C>> {
        self.inner.lock().expect("fat16 vfs mutex poisoned")
    }

    /// Zeroes the in-memory image and drops every open handle, without
    /// touching whatever backing store is currently mounted.
    pub fn init(&self) {
        let mut inner = self.lock();
        inner.image = Image::fresh();
        inner.files = FileTable::new();
        inner.dirs = DirTable::new();
    }

    /// Loads the active superblock copy from `storage` (spec 4.3),
    /// replacing the in-memory image and every open handle. Falls back to
    /// a fresh image if neither copy is valid.
    pub fn mount(&self, storage: DS) -> Result<()> {
        let mut inner = self.lock();
        let image = Image::mount(&storage)?;
        inner.image = image;
        inner.files = FileTable::new();
        inner.dirs = DirTable::new();
        inner.storage = Some(storage);
        Ok(())
    }

    /// Commits the image to the inactive copy of whatever store was passed
    /// to [`Fat16Vfs::mount`]. A no-op if nothing is mounted or the image
    /// isn't dirty.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(storage) = inner.storage.as_ref() else {
            return Ok(());
        };
        inner.image.flush(storage)
    }

    /// Opens `path`, creating it per `options` if requested. Returns the
    /// lowest free file descriptor.
    pub fn open(&self, path: &str, options: OpenOptions) -> Result<usize> {
        if !options.read && !options.write {
            return Err(Error::InvalidArgument);
        }
        let mut inner = self.lock();

        let (parent, slot, entry) = match path::resolve_entry(&inner.image, path) {
            Ok(Resolved::Root) => return Err(Error::IsADirectory),
            Ok(Resolved::Entry {
                parent,
                slot,
                entry,
            }) => {
                if options.create && options.exclusive {
                    return Err(Error::AlreadyExists);
                }
                (parent, slot, entry)
            }
            Err(Error::NotFound) if options.create => {
                let (parent, leaf) = path::resolve_parent(&inner.image, path)?;
                let (date, time) = clock::pack(inner.clock.now());
                let slot = inner
                    .image
                    .dir_create(parent, &leaf, ATTR_REGULAR, 0, date, time)?;
                let entry = inner.image.dir_slot(parent, slot);
                inner.image.mark_dirty();
                (parent, slot, entry)
            }
            Err(e) => return Err(e),
        };

        if entry.is_directory() {
            return Err(Error::IsADirectory);
        }

        let mode = match (options.read, options.write) {
            (true, true) => OpenMode::ReadWrite,
            (true, false) => OpenMode::Read,
            (false, true) => OpenMode::Write,
            (false, false) => unreachable!("checked above"),
        };

        inner.files.allocate(FileDesc {
            parent,
            slot,
            first_cluster: entry.first_cluster.get(),
            size: entry.size.get(),
            offset: 0,
            mode,
        })
    }

    /// Marks a file descriptor free. Pending writes are already in the
    /// in-memory image; durability requires a subsequent [`Fat16Vfs::flush`].
    pub fn close(&self, fd: usize) -> Result<()> {
        self.lock().files.close(fd)
    }

    /// Reads up to `buf.len()` bytes starting at the descriptor's current
    /// offset, clamped to the file's declared size. Returns 0 at EOF.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        let mut desc = *inner.files.get(fd)?;
        if !desc.mode.can_read() {
            return Err(Error::BadDescriptor);
        }
        if desc.offset >= desc.size as u64 {
            return Ok(0);
        }

        let remaining = desc.size as u64 - desc.offset;
        let want = buf.len().min(remaining as usize);
        let cluster_size = CLUSTER_SIZE as u64;

        let mut current = inner
            .image
            .traverse(desc.first_cluster, (desc.offset / cluster_size) as usize)?;
        let mut intra = (desc.offset % cluster_size) as usize;
        let mut done = 0usize;

        while done < want {
            let chunk = (CLUSTER_SIZE - intra).min(want - done);
            let bytes = inner.image.cluster_bytes(current);
            buf[done..done + chunk].copy_from_slice(&bytes[intra..intra + chunk]);
            done += chunk;
            intra += chunk;
            if intra >= CLUSTER_SIZE && done < want {
                current = inner.image.traverse(current, 1)?;
                intra = 0;
            }
        }

        desc.offset += done as u64;
        *inner.files.get_mut(fd)? = desc;
        Ok(done)
    }

    /// Writes `buf` starting at the descriptor's current offset, extending
    /// the file's cluster chain as needed. Updates the owning directory
    /// entry's size and timestamp when the write grows the file.
    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        let mut desc = *inner.files.get(fd)?;
        if !desc.mode.can_write() {
            return Err(Error::BadDescriptor);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let new_end = desc.offset + buf.len() as u64;
        let clusters_needed = ceil_div(new_end, CLUSTER_SIZE as u64) as usize;
        let clusters_current = ceil_div(desc.size as u64, CLUSTER_SIZE as u64) as usize;

        if clusters_needed > clusters_current {
            let to_add = clusters_needed - clusters_current;
            if inner.image.free_cluster_count() < to_add {
                return Err(Error::OutOfSpace);
            }
            let mut remaining = to_add;
            if desc.first_cluster == 0 {
                desc.first_cluster = inner.image.allocate_cluster()?;
                remaining -= 1;
            }
            for _ in 0..remaining {
                inner.image.extend_chain(desc.first_cluster)?;
            }
        }

        let cluster_size = CLUSTER_SIZE as u64;
        let mut current = inner
            .image
            .traverse(desc.first_cluster, (desc.offset / cluster_size) as usize)?;
        let mut intra = (desc.offset % cluster_size) as usize;
        let mut done = 0usize;

        while done < buf.len() {
            let chunk = (CLUSTER_SIZE - intra).min(buf.len() - done);
            let bytes = inner.image.cluster_bytes_mut(current);
            bytes[intra..intra + chunk].copy_from_slice(&buf[done..done + chunk]);
            done += chunk;
            intra += chunk;
            if intra >= CLUSTER_SIZE && done < buf.len() {
                current = inner.image.traverse(current, 1)?;
                intra = 0;
            }
        }

        desc.offset += done as u64;

        let mut entry = inner.image.dir_slot(desc.parent, desc.slot);
        entry.first_cluster = desc.first_cluster.into();
        if desc.offset > desc.size as u64 {
            desc.size = desc.offset as u32;
            entry.size = desc.size.into();
            let (date, time) = clock::pack(inner.clock.now());
            entry.date = date.into();
            entry.time = time.into();
        }
        inner.image.set_dir_slot(desc.parent, desc.slot, entry);
        inner.image.mark_dirty();

        *inner.files.get_mut(fd)? = desc;
        Ok(done)
    }

    /// Adjusts a file descriptor's offset; never touches the chain or the
    /// backing store.
    pub fn seek(&self, fd: usize, pos: SeekFrom) -> Result<u64> {
        let mut inner = self.lock();
        let mut desc = *inner.files.get(fd)?;
        let base = match pos {
            SeekFrom::Start(n) => {
                desc.offset = n;
                *inner.files.get_mut(fd)? = desc;
                return Ok(n);
            }
            SeekFrom::Current(delta) => desc.offset as i64 + delta,
            SeekFrom::End(delta) => desc.size as i64 + delta,
        };
        if base < 0 {
            return Err(Error::InvalidArgument);
        }
        desc.offset = base as u64;
        *inner.files.get_mut(fd)? = desc;
        Ok(desc.offset)
    }

    /// Removes a file. Rejects directories with `IsADirectory`.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        match path::resolve_entry(&inner.image, path)? {
            Resolved::Root => Err(Error::IsADirectory),
            Resolved::Entry {
                parent,
                slot,
                entry,
            } => {
                if entry.is_directory() {
                    return Err(Error::IsADirectory);
                }
                inner.image.free_chain(entry.first_cluster.get());
                inner.image.dir_delete(parent, slot);
                inner.image.mark_dirty();
                Ok(())
            }
        }
    }

    /// Creates a directory, allocating its backing cluster and writing
    /// `.`/`..`.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        let (parent, leaf) = path::resolve_parent(&inner.image, path)?;

        if inner.image.dir_find(parent, &leaf).is_some() {
            return Err(Error::AlreadyExists);
        }
        if inner.image.dir_find_free_slot(parent).is_none() {
            return Err(Error::OutOfSpace);
        }

        let cluster = inner.image.allocate_cluster()?;
        let (date, time) = clock::pack(inner.clock.now());
        inner
            .image
            .dir_create(parent, &leaf, ATTR_DIRECTORY, cluster, date, time)?;
        inner
            .image
            .dir_init_subdirectory(cluster, dir_location_cluster(parent), date, time);
        inner.image.mark_dirty();
        Ok(())
    }

    /// Removes an empty, non-root directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        if path == "/" {
            return Err(Error::Busy);
        }
        match path::resolve_entry(&inner.image, path)? {
            Resolved::Root => Err(Error::Busy),
            Resolved::Entry {
                parent,
                slot,
                entry,
            } => {
                if !entry.is_directory() {
                    return Err(Error::NotADirectory);
                }
                let child = DirLocation::Cluster(entry.first_cluster.get());
                if !inner.image.dir_is_empty(child) {
                    return Err(Error::NotEmpty);
                }
                inner.image.free_chain(entry.first_cluster.get());
                inner.image.dir_delete(parent, slot);
                inner.image.mark_dirty();
                Ok(())
            }
        }
    }

    /// Opens a directory cursor. Iteration starts at slot 0 for the root
    /// (which has no `.`/`..`) and slot 2 for sub-directories.
    pub fn opendir(&self, path: &str) -> Result<usize> {
        let mut inner = self.lock();
        let loc = match path::resolve_entry(&inner.image, path)? {
            Resolved::Root => DirLocation::Root,
            Resolved::Entry { entry, .. } if entry.is_directory() => {
                DirLocation::Cluster(entry.first_cluster.get())
            }
            Resolved::Entry { .. } => return Err(Error::NotADirectory),
        };
        let next_slot = match loc {
            DirLocation::Root => 0,
            DirLocation::Cluster(_) => 2,
        };
        inner.dirs.allocate(DirHandle { loc, next_slot })
    }

    /// Returns the next live entry, or `None` at the end of the directory.
    pub fn readdir(&self, handle: usize) -> Result<Option<DirEntryInfo>> {
        let mut inner = self.lock();
        let mut cursor = *inner.dirs.get(handle)?;
        let count = Image::dir_slot_count(cursor.loc);

        while cursor.next_slot < count {
            let slot = cursor.next_slot;
            cursor.next_slot += 1;
            let entry = inner.image.dir_slot(cursor.loc, slot);
            if !entry.is_free() {
                *inner.dirs.get_mut(handle)? = cursor;
                return Ok(Some(DirEntryInfo {
                    name: unpack_name(&entry.name),
                    file_type: if entry.is_directory() {
                        FileType::Directory
                    } else {
                        FileType::Regular
                    },
                }));
            }
        }

        *inner.dirs.get_mut(handle)? = cursor;
        Ok(None)
    }

    /// Marks a directory handle free.
    pub fn closedir(&self, handle: usize) -> Result<()> {
        self.lock().dirs.close(handle)
    }

    /// Returns the type, size, and modification time of `path`. `"/"`
    /// synthesizes a directory entry with the current wall-clock time.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let mut inner = self.lock();
        match path::resolve_entry(&inner.image, path)? {
            Resolved::Root => Ok(Stat {
                file_type: FileType::Directory,
                size: 0,
                mtime: inner.clock.now(),
            }),
            Resolved::Entry { entry, .. } => Ok(Stat {
                file_type: if entry.is_directory() {
                    FileType::Directory
                } else {
                    FileType::Regular
                },
                size: entry.size.get() as u64,
                mtime: clock::unpack(entry.date.get(), entry.time.get()),
            }),
        }
    }
}

impl<DS: DataStorage> Default for Fat16Vfs<DS, SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}
