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

//! The in-memory image: boot sector, FAT, root directory, and data area,
//! plus the two-copy journal that makes flushing it to a [`DataStorage`]
//! crash-safe. Everything that isn't path resolution or handle bookkeeping
//! lives here - this is the only module that touches the raw byte layout.

use std::mem::size_of;

use fat16_ds::DataStorage;
use fat16_err::{Error, Result};
use log::{debug, error, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::layout::{
    BootSectorRaw, DirEntryRaw, HeaderRaw, ATTR_DIRECTORY, DATA_OFFSET, DATA_SIZE, END_OF_CHAIN,
    FAT_FREE, FAT_OFFSET, FIRST_DATA_CLUSTER, HEADER_SIZE, IMAGE_SIZE, MAGIC, NUM_CLUSTERS,
    PAYLOAD_SIZE, ROOT_DIR_OFFSET, ROOT_ENTRIES,
};

/// Which directory a slot index is relative to. The root table lives
/// outside the cluster heap as a fixed 256-slot array; a sub-directory's
/// slots are the first `DIR_ENTRIES_PER_CLUSTER` entries of its single
/// backing cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLocation {
    Root,
    Cluster(u16),
}

pub struct Image {
    pub(crate) boot_sector: BootSectorRaw,
    pub(crate) fat: [u16; NUM_CLUSTERS],
    pub(crate) root: Box<[DirEntryRaw; ROOT_ENTRIES]>,
    pub(crate) data: Box<[u8; DATA_SIZE]>,
    pub(crate) dirty: bool,
    sequence: u64,
    active_copy: u8,
}

impl Image {
    /// A zeroed image with a freshly-installed default boot sector, as if
    /// `init` had just run. Not yet written to any backing store.
    pub fn fresh() -> Self {
        Self {
            boot_sector: BootSectorRaw::default(),
            fat: [0u16; NUM_CLUSTERS],
            root: Box::new([DirEntryRaw::EMPTY; ROOT_ENTRIES]),
            data: vec![0u8; DATA_SIZE].into_boxed_slice().try_into().unwrap(),
            dirty: false,
            sequence: 0,
            active_copy: 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Loads the active copy from `storage` per the mount algorithm in the
    /// superblock spec: prefer the higher-sequence valid copy, fall back to
    /// whichever one copy is valid, and start fresh if neither is.
    pub fn mount<DS: DataStorage>(storage: &DS) -> Result<Self> {
        let mut headers = [None::<HeaderRaw>, None::<HeaderRaw>];
        for (copy, header) in headers.iter_mut().enumerate() {
            let mut bytes = [0u8; HEADER_SIZE];
            if storage
                .read(copy as u64 * IMAGE_SIZE, &mut bytes)
                .is_err()
            {
                continue;
            }
            if let Ok(raw) = HeaderRaw::read_from_bytes(&bytes) {
                if raw.magic.get() == MAGIC {
                    *header = Some(raw);
                }
            }
        }

        let order: [usize; 2] = match (&headers[0], &headers[1]) {
            (Some(a), Some(b)) => {
                if b.sequence.get() > a.sequence.get() {
                    [1, 0]
                } else {
                    [0, 1]
                }
            }
            (Some(_), None) => [0, 1],
            (None, Some(_)) => [1, 0],
            (None, None) => {
                debug!("no valid superblock copy found, starting fresh image");
                return Ok(Self::fresh());
            }
        };

        for &copy in &order {
            let Some(header) = &headers[copy] else {
                continue;
            };
            let mut payload = vec![0u8; PAYLOAD_SIZE];
            if storage
                .read(copy as u64 * IMAGE_SIZE + HEADER_SIZE as u64, &mut payload)
                .is_err()
            {
                continue;
            }
            if crate::crc::crc32(&payload) != header.crc32.get() {
                warn!("superblock copy {copy} failed CRC check");
                continue;
            }
            let mut image = Self::parse_payload(&payload)?;
            image.sequence = header.sequence.get();
            image.active_copy = copy as u8;
            image.dirty = false;
            debug!(
                "mounted superblock copy {copy}, sequence {}",
                image.sequence
            );
            return Ok(image);
        }

        warn!("both superblock copies invalid, starting fresh image");
        Ok(Self::fresh())
    }

    /// Commits the image to the inactive copy, verifying the write by
    /// reading it back before switching `active_copy`. A no-op when the
    /// image isn't dirty.
    pub fn flush<DS: DataStorage>(&mut self, storage: &DS) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let target = if self.active_copy == 0 { 1 } else { 0 };
        let payload = self.serialize_payload();
        let crc = crate::crc::crc32(&payload);
        let next_sequence = self.sequence + 1;
        let header = HeaderRaw::new(crc, next_sequence);

        let base = target as u64 * IMAGE_SIZE;
        storage.write(base, header.as_bytes())?;
        storage.write(base + HEADER_SIZE as u64, &payload)?;
        storage.sync()?;

        let mut verify = vec![0u8; PAYLOAD_SIZE];
        storage.read(base + HEADER_SIZE as u64, &mut verify)?;
        if crate::crc::crc32(&verify) != crc {
            error!("post-commit CRC verification failed for copy {target}");
            return Err(Error::Io);
        }

        self.active_copy = target;
        self.sequence = next_sequence;
        self.dirty = false;
        Ok(())
    }

    fn serialize_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAYLOAD_SIZE];
        let boot_off = crate::layout::BOOT_SECTOR_OFFSET - HEADER_SIZE;
        buf[boot_off..boot_off + size_of::<BootSectorRaw>()].copy_from_slice(self.boot_sector.as_bytes());

        let fat_off = FAT_OFFSET - HEADER_SIZE;
        for (i, cell) in self.fat.iter().enumerate() {
            buf[fat_off + i * 2..fat_off + i * 2 + 2].copy_from_slice(&cell.to_le_bytes());
        }

        let root_off = ROOT_DIR_OFFSET - HEADER_SIZE;
        buf[root_off..root_off + self.root.as_bytes().len()].copy_from_slice(self.root.as_bytes());

        let data_off = DATA_OFFSET - HEADER_SIZE;
        buf[data_off..data_off + DATA_SIZE].copy_from_slice(self.data.as_ref());

        buf
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        let boot_off = crate::layout::BOOT_SECTOR_OFFSET - HEADER_SIZE;
        let boot_sector = BootSectorRaw::read_from_bytes(
            &payload[boot_off..boot_off + size_of::<BootSectorRaw>()],
        )
        .map_err(|_| Error::Io)?;

        let fat_off = FAT_OFFSET - HEADER_SIZE;
        let mut fat = [0u16; NUM_CLUSTERS];
        for (i, cell) in fat.iter_mut().enumerate() {
            let bytes = &payload[fat_off + i * 2..fat_off + i * 2 + 2];
            *cell = u16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let root_off = ROOT_DIR_OFFSET - HEADER_SIZE;
        let root_bytes = &payload[root_off..root_off + ROOT_ENTRIES * size_of::<DirEntryRaw>()];
        let root_slice =
            <[DirEntryRaw]>::ref_from_bytes(root_bytes).map_err(|_| Error::Io)?;
        let mut root = Box::new([DirEntryRaw::EMPTY; ROOT_ENTRIES]);
        root.copy_from_slice(root_slice);

        let data_off = DATA_OFFSET - HEADER_SIZE;
        let data: Box<[u8; DATA_SIZE]> = payload[data_off..data_off + DATA_SIZE]
            .to_vec()
            .into_boxed_slice()
            .try_into()
            .map_err(|_| Error::Io)?;

        Ok(Self {
            boot_sector,
            fat,
            root,
            data,
            dirty: false,
            sequence: 0,
            active_copy: 0,
        })
    }

    // --- FAT allocation table primitives (spec 4.4) ---

    /// First-fit ascending scan of `[2, NUM_CLUSTERS)` for a free cell.
    pub fn allocate_cluster(&mut self) -> Result<u16> {
        for i in FIRST_DATA_CLUSTER as usize..NUM_CLUSTERS {
            if self.fat[i] == FAT_FREE {
                self.fat[i] = END_OF_CHAIN;
                return Ok(i as u16);
            }
        }
        Err(Error::OutOfSpace)
    }

    /// Count of free (unallocated) clusters, for pre-flight checks that keep
    /// a multi-cluster allocation from partially succeeding.
    pub fn free_cluster_count(&self) -> usize {
        self.fat[FIRST_DATA_CLUSTER as usize..NUM_CLUSTERS]
            .iter()
            .filter(|&&cell| cell == FAT_FREE)
            .count()
    }

    /// Appends one freshly allocated cluster to the end of the chain
    /// starting at `head`. `head` must already be a valid, non-zero chain.
    pub fn extend_chain(&mut self, head: u16) -> Result<u16> {
        let tail = self.chain_tail(head)?;
        let new_cluster = self.allocate_cluster()?;
        self.fat[tail as usize] = new_cluster;
        Ok(new_cluster)
    }

    fn chain_tail(&self, head: u16) -> Result<u16> {
        let mut current = head;
        let mut hops = 0;
        loop {
            self.validate_cluster(current)?;
            let next = self.fat[current as usize];
            if next == END_OF_CHAIN {
                return Ok(current);
            }
            current = next;
            hops += 1;
            if hops > NUM_CLUSTERS {
                error!("FAT chain starting at {head} did not terminate");
                return Err(Error::Io);
            }
        }
    }

    /// Returns the cluster reached after `n` hops from `head` (0 = `head`
    /// itself). Fails if the chain ends before `n` hops.
    pub fn traverse(&self, head: u16, n: usize) -> Result<u16> {
        let mut current = head;
        self.validate_cluster(current)?;
        for _ in 0..n {
            let next = self.fat[current as usize];
            if next == END_OF_CHAIN {
                return Err(Error::Io);
            }
            current = next;
            self.validate_cluster(current)?;
        }
        Ok(current)
    }

    /// Frees every cluster in the chain starting at `head`, zeroing both
    /// the FAT cells and the freed clusters' data bytes. A no-op for
    /// `head == 0` (an empty, never-written file).
    pub fn free_chain(&mut self, head: u16) {
        if head == 0 {
            return;
        }
        let mut current = head;
        loop {
            if self.validate_cluster(current).is_err() {
                return;
            }
            let next = self.fat[current as usize];
            self.fat[current as usize] = FAT_FREE;
            self.clear_cluster(current);
            if next == END_OF_CHAIN {
                return;
            }
            current = next;
        }
    }

    fn validate_cluster(&self, cluster: u16) -> Result<()> {
        if (FIRST_DATA_CLUSTER..NUM_CLUSTERS as u16).contains(&cluster) {
            Ok(())
        } else {
            error!("cluster index {cluster} out of range");
            Err(Error::Io)
        }
    }

    fn clear_cluster(&mut self, cluster: u16) {
        let bytes = self.cluster_bytes_mut(cluster);
        bytes.fill(0);
    }

    pub fn cluster_bytes(&self, cluster: u16) -> &[u8] {
        let off = (cluster - FIRST_DATA_CLUSTER) as usize * crate::layout::CLUSTER_SIZE;
        &self.data[off..off + crate::layout::CLUSTER_SIZE]
    }

    pub fn cluster_bytes_mut(&mut self, cluster: u16) -> &mut [u8] {
        let off = (cluster - FIRST_DATA_CLUSTER) as usize * crate::layout::CLUSTER_SIZE;
        &mut self.data[off..off + crate::layout::CLUSTER_SIZE]
    }

    // --- Directory slot access (used by dir.rs) ---

    pub fn dir_slot_count(loc: DirLocation) -> usize {
        match loc {
            DirLocation::Root => ROOT_ENTRIES,
            DirLocation::Cluster(_) => crate::layout::DIR_ENTRIES_PER_CLUSTER,
        }
    }

    pub fn dir_slot(&self, loc: DirLocation, idx: usize) -> DirEntryRaw {
        match loc {
            DirLocation::Root => self.root[idx],
            DirLocation::Cluster(c) => {
                let bytes = self.cluster_bytes(c);
                let off = idx * size_of::<DirEntryRaw>();
                DirEntryRaw::read_from_bytes(&bytes[off..off + size_of::<DirEntryRaw>()])
                    .expect("directory slot is exactly DIR_ENTRY_SIZE bytes")
            }
        }
    }

    pub fn set_dir_slot(&mut self, loc: DirLocation, idx: usize, entry: DirEntryRaw) {
        match loc {
            DirLocation::Root => self.root[idx] = entry,
            DirLocation::Cluster(c) => {
                let bytes = self.cluster_bytes_mut(c);
                let off = idx * size_of::<DirEntryRaw>();
                bytes[off..off + size_of::<DirEntryRaw>()].copy_from_slice(entry.as_bytes());
            }
        }
    }

    pub fn dir_attributes(loc: DirLocation) -> u8 {
        match loc {
            DirLocation::Root => 0,
            DirLocation::Cluster(_) => ATTR_DIRECTORY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fat16_ds::DataStorage;
    use std::cell::RefCell;

    struct MemStorage {
        bytes: RefCell<Vec<u8>>,
    }

    impl MemStorage {
        fn new(size: u64) -> Self {
            Self {
                bytes: RefCell::new(vec![0u8; size as usize]),
            }
        }
    }

    impl DataStorage for MemStorage {
        fn size(&self) -> u64 {
            self.bytes.borrow().len() as u64
        }

        fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
            let bytes = self.bytes.borrow();
            let offset = offset as usize;
            if offset + buffer.len() > bytes.len() {
                return Err(Error::Io);
            }
            buffer.copy_from_slice(&bytes[offset..offset + buffer.len()]);
            Ok(())
        }

        fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
            let mut bytes = self.bytes.borrow_mut();
            let offset = offset as usize;
            if offset + buffer.len() > bytes.len() {
                return Err(Error::Io);
            }
            bytes[offset..offset + buffer.len()].copy_from_slice(buffer);
            Ok(())
        }
    }

    #[test]
    fn fresh_mount_on_zeroed_store_is_empty() {
        let storage = MemStorage::new(2 * IMAGE_SIZE);
        let image = Image::mount(&storage).unwrap();
        assert_eq!(image.sequence(), 0);
        assert!(!image.is_dirty());
    }

    #[test]
    fn flush_then_mount_round_trips() {
        let storage = MemStorage::new(2 * IMAGE_SIZE);
        let mut image = Image::mount(&storage).unwrap();
        let cluster = image.allocate_cluster().unwrap();
        image.cluster_bytes_mut(cluster)[0] = 0x42;
        image.mark_dirty();
        image.flush(&storage).unwrap();

        let reloaded = Image::mount(&storage).unwrap();
        assert_eq!(reloaded.sequence(), 1);
        assert_eq!(reloaded.fat[cluster as usize], END_OF_CHAIN);
        assert_eq!(reloaded.cluster_bytes(cluster)[0], 0x42);
    }

    #[test]
    fn idempotent_flush() {
        let storage = MemStorage::new(2 * IMAGE_SIZE);
        let mut image = Image::mount(&storage).unwrap();
        image.mark_dirty();
        image.flush(&storage).unwrap();
        let sequence_after_first = image.sequence();
        // Not dirty anymore; a second flush must be a pure no-op.
        image.flush(&storage).unwrap();
        assert_eq!(image.sequence(), sequence_after_first);
    }

    #[test]
    fn exhausts_cluster_allocation() {
        let mut image = Image::fresh();
        for _ in FIRST_DATA_CLUSTER as usize..NUM_CLUSTERS {
            image.allocate_cluster().unwrap();
        }
        assert_eq!(image.allocate_cluster(), Err(Error::OutOfSpace));
    }

    #[test]
    fn free_chain_zeros_cells_and_data() {
        let mut image = Image::fresh();
        let a = image.allocate_cluster().unwrap();
        let b = image.extend_chain(a).unwrap();
        image.cluster_bytes_mut(a)[0] = 9;
        image.cluster_bytes_mut(b)[0] = 9;
        image.free_chain(a);
        assert_eq!(image.fat[a as usize], FAT_FREE);
        assert_eq!(image.fat[b as usize], FAT_FREE);
        assert_eq!(image.cluster_bytes(a)[0], 0);
        assert_eq!(image.cluster_bytes(b)[0], 0);
    }

    #[test]
    fn free_chain_head_zero_is_noop() {
        let mut image = Image::fresh();
        image.free_chain(0);
    }
}
