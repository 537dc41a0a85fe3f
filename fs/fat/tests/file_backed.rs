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

//! Exercises the facade against a real file on disk instead of the
//! in-memory test double, the way the three sample CLIs would open the
//! flash image.

use std::time::{Duration, SystemTime};

use fat16_fat::{layout, Clock, Fat16Vfs, OpenOptions};

struct FixedClock(SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

fn fixed_clock() -> FixedClock {
    FixedClock(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
}

#[test]
fn round_trips_through_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("flash.img");

    {
        let storage = fat16_ds_std::FileStorage::open(&image_path, 2 * layout::IMAGE_SIZE).unwrap();
        let vfs = Fat16Vfs::new(fixed_clock());
        vfs.mount(storage).unwrap();

        vfs.mkdir("/dir1").unwrap();
        let fd = vfs
            .open("/dir1/file.txt", OpenOptions::write().create())
            .unwrap();
        assert_eq!(vfs.write(fd, b"Hello, world!").unwrap(), 13);
        vfs.close(fd).unwrap();
        vfs.flush().unwrap();
    }

    // Re-open the same path as a fresh file handle, simulating a process
    // restart against the same flash image.
    let storage = fat16_ds_std::FileStorage::open(&image_path, 2 * layout::IMAGE_SIZE).unwrap();
    let reloaded = Fat16Vfs::new(fixed_clock());
    reloaded.mount(storage).unwrap();

    assert_eq!(reloaded.stat("/dir1/file.txt").unwrap().size, 13);
    let fd = reloaded.open("/dir1/file.txt", OpenOptions::read()).unwrap();
    let mut buf = [0u8; 100];
    let n = reloaded.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Hello, world!");
}
