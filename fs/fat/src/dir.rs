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

//! Fixed-slot directory operations (spec 4.5): linear scan, free-slot
//! search, create, delete. A directory is either the 256-slot root table
//! or the first `DIR_ENTRIES_PER_CLUSTER` slots of a sub-directory's
//! single backing cluster - [`DirLocation`] hides that distinction from
//! everything above this module.

use fat16_err::{Error, Result};

use crate::image::{DirLocation, Image};
use crate::layout::{DirEntryRaw, MAX_NAME_LEN};

/// An 8.3-style name, zero-padded (not space-padded) to 11 bytes - the
/// same representation `strncpy(entry.name, name, 11)` leaves behind in
/// the reference implementation.
pub type PackedName = [u8; MAX_NAME_LEN];

impl Image {
    /// Linear scan for a live slot whose name matches `name`.
    pub fn dir_find(&self, loc: DirLocation, name: &PackedName) -> Option<(usize, DirEntryRaw)> {
        let count = Image::dir_slot_count(loc);
        for idx in 0..count {
            let entry = self.dir_slot(loc, idx);
            if entry.name_matches(name) {
                return Some((idx, entry));
            }
        }
        None
    }

    /// First slot whose name byte marks it free or deleted.
    pub fn dir_find_free_slot(&self, loc: DirLocation) -> Option<usize> {
        let count = Image::dir_slot_count(loc);
        (0..count).find(|&idx| self.dir_slot(loc, idx).is_free())
    }

    /// Creates a new live entry for `name`, rejecting a clash with an
    /// existing live entry and failing `OutOfSpace` when the directory has
    /// no free slot. Timestamps are written from the caller's clock
    /// reading; the caller owns deciding what that reading is.
    pub fn dir_create(
        &mut self,
        loc: DirLocation,
        name: &PackedName,
        attributes: u8,
        first_cluster: u16,
        date: u16,
        time: u16,
    ) -> Result<usize> {
        if self.dir_find(loc, name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let slot = self.dir_find_free_slot(loc).ok_or(Error::OutOfSpace)?;
        let mut entry = DirEntryRaw::EMPTY;
        entry.name = *name;
        entry.attributes = attributes;
        entry.first_cluster = first_cluster.into();
        entry.date = date.into();
        entry.time = time.into();
        self.set_dir_slot(loc, slot, entry);
        Ok(slot)
    }

    /// Marks a slot deleted. The caller is responsible for freeing the
    /// entry's cluster chain in the same critical section.
    pub fn dir_delete(&mut self, loc: DirLocation, slot: usize) {
        let mut entry = self.dir_slot(loc, slot);
        entry.name[0] = crate::layout::NAME_DELETED;
        self.set_dir_slot(loc, slot, entry);
    }

    /// True if every slot beyond `.`/`..` (or beyond nothing, for root) is
    /// free or deleted.
    pub fn dir_is_empty(&self, loc: DirLocation) -> bool {
        let start = match loc {
            DirLocation::Root => 0,
            DirLocation::Cluster(_) => 2,
        };
        let count = Image::dir_slot_count(loc);
        (start..count).all(|idx| self.dir_slot(loc, idx).is_free())
    }

    /// Initializes a freshly allocated sub-directory cluster: zeroes every
    /// slot, then writes `.` and `..` into slots 0 and 1.
    pub fn dir_init_subdirectory(&mut self, cluster: u16, parent_cluster: u16, date: u16, time: u16) {
        self.cluster_bytes_mut(cluster).fill(0);
        let loc = DirLocation::Cluster(cluster);

        let mut dot = DirEntryRaw::EMPTY;
        dot.name = pack_name(b".");
        dot.attributes = crate::layout::ATTR_DIRECTORY;
        dot.first_cluster = cluster.into();
        dot.date = date.into();
        dot.time = time.into();
        self.set_dir_slot(loc, 0, dot);

        let mut dotdot = DirEntryRaw::EMPTY;
        dotdot.name = pack_name(b"..");
        dotdot.attributes = crate::layout::ATTR_DIRECTORY;
        dotdot.first_cluster = parent_cluster.into();
        dotdot.date = date.into();
        dotdot.time = time.into();
        self.set_dir_slot(loc, 1, dotdot);
    }
}

/// Zero-pads `name` to [`MAX_NAME_LEN`] bytes. Callers are expected to have
/// already checked `name.len() <= MAX_NAME_LEN`.
pub fn pack_name(name: &[u8]) -> PackedName {
    let mut packed = [0u8; MAX_NAME_LEN];
    packed[..name.len()].copy_from_slice(name);
    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ATTR_REGULAR;

    #[test]
    fn create_then_find_round_trips() {
        let mut image = Image::fresh();
        let name = pack_name(b"FILE.TXT");
        let slot = image
            .dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0)
            .unwrap();
        let (found_slot, entry) = image.dir_find(DirLocation::Root, &name).unwrap();
        assert_eq!(found_slot, slot);
        assert_eq!(entry.attributes, ATTR_REGULAR);
    }

    #[test]
    fn create_duplicate_name_fails() {
        let mut image = Image::fresh();
        let name = pack_name(b"FILE.TXT");
        image
            .dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0)
            .unwrap();
        assert_eq!(
            image.dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0),
            Err(Error::AlreadyExists)
        );
    }

    #[test]
    fn delete_then_create_reuses_slot() {
        let mut image = Image::fresh();
        let name = pack_name(b"FILE.TXT");
        let slot = image
            .dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0)
            .unwrap();
        image.dir_delete(DirLocation::Root, slot);
        assert!(image.dir_find(DirLocation::Root, &name).is_none());
        let reused = image
            .dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0)
            .unwrap();
        assert_eq!(reused, slot);
    }

    #[test]
    fn directory_full_fails_out_of_space() {
        let mut image = Image::fresh();
        for i in 0..crate::layout::ROOT_ENTRIES {
            let name = pack_name(format!("F{i}").as_bytes());
            image
                .dir_create(DirLocation::Root, &name, ATTR_REGULAR, 0, 0, 0)
                .unwrap();
        }
        let overflow = pack_name(b"OVERFLOW");
        assert_eq!(
            image.dir_create(DirLocation::Root, &overflow, ATTR_REGULAR, 0, 0, 0),
            Err(Error::OutOfSpace)
        );
    }

    #[test]
    fn subdirectory_dot_entries() {
        let mut image = Image::fresh();
        let cluster = image.allocate_cluster().unwrap();
        image.dir_init_subdirectory(cluster, 0, 0, 0);
        let loc = DirLocation::Cluster(cluster);
        let dot = image.dir_slot(loc, 0);
        let dotdot = image.dir_slot(loc, 1);
        assert_eq!(dot.name, pack_name(b"."));
        assert_eq!(dot.first_cluster.get(), cluster);
        assert_eq!(dotdot.name, pack_name(b".."));
        assert_eq!(dotdot.first_cluster.get(), 0);
        assert!(image.dir_is_empty(loc));
    }
}
