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

//! Path resolution (spec 4.6): splitting an absolute path into at most
//! [`MAX_DEPTH`] components and walking directories from the root.
//!
//! The reference implementation resolves both "give me this entry" and
//! "give me this entry's parent, for creation" through one function
//! overloaded on a boolean, and its own source is garbled at the two call
//! sites that matter most. This splits that into [`resolve_entry`] and
//! [`resolve_parent`], each with one unambiguous contract.

use fat16_err::{Error, Result};

use crate::dir::{pack_name, PackedName};
use crate::image::{DirLocation, Image};
use crate::layout::{DirEntryRaw, MAX_DEPTH, MAX_NAME_LEN};

/// Result of resolving a path to its final entry.
pub enum Resolved {
    /// The path was `"/"` itself.
    Root,
    /// The path named a live entry `entry` at `slot` within `parent`.
    Entry {
        parent: DirLocation,
        slot: usize,
        entry: DirEntryRaw,
    },
}

/// Splits `path` into at most [`MAX_DEPTH`] packed 8.3-style components.
///
/// `"/"` yields an empty vector. A single trailing slash on an otherwise
/// non-root path is stripped before splitting; any other empty interior
/// component (`"//"`, `"/a//b"`) is rejected.
fn split_components(path: &str) -> Result<Vec<PackedName>> {
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument);
    }
    if path == "/" {
        return Ok(Vec::new());
    }

    let mut rest = &path[1..];
    if let Some(stripped) = rest.strip_suffix('/') {
        if stripped.is_empty() {
            return Err(Error::InvalidArgument);
        }
        rest = stripped;
    }

    let mut components = Vec::new();
    for segment in rest.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if segment.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        components.push(pack_name(segment.as_bytes()));
    }
    if components.len() > MAX_DEPTH {
        return Err(Error::InvalidArgument);
    }
    Ok(components)
}

/// Walks `components` as a sequence of directory names starting from the
/// root, returning the location of the directory they resolve to.
fn walk_directories(image: &Image, components: &[PackedName]) -> Result<DirLocation> {
    let mut loc = DirLocation::Root;
    for name in components {
        match image.dir_find(loc, name) {
            Some((_, entry)) if entry.is_directory() => {
                loc = DirLocation::Cluster(entry.first_cluster.get());
            }
            Some(_) => return Err(Error::NotADirectory),
            None => return Err(Error::NotFound),
        }
    }
    Ok(loc)
}

/// Resolves `path` to its final live entry, or [`Resolved::Root`] for
/// `"/"`. Fails `NotFound` if any component (including the last) is
/// missing, `NotADirectory` if an intermediate component isn't a
/// directory.
pub fn resolve_entry(image: &Image, path: &str) -> Result<Resolved> {
    let components = split_components(path)?;
    if components.is_empty() {
        return Ok(Resolved::Root);
    }
    let (dirs, leaf) = components.split_at(components.len() - 1);
    let parent = walk_directories(image, dirs)?;
    match image.dir_find(parent, &leaf[0]) {
        Some((slot, entry)) => Ok(Resolved::Entry {
            parent,
            slot,
            entry,
        }),
        None => Err(Error::NotFound),
    }
}

/// Resolves `path`'s parent directory for a creation operation, returning
/// the parent's location and the final path component's packed name. The
/// final component itself is never looked up. Fails `InvalidArgument` for
/// `"/"`, which has no name to create.
pub fn resolve_parent(image: &Image, path: &str) -> Result<(DirLocation, PackedName)> {
    let components = split_components(path)?;
    let Some((leaf, dirs)) = components.split_last() else {
        return Err(Error::InvalidArgument);
    };
    let parent = walk_directories(image, dirs)?;
    Ok((parent, *leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ATTR_DIRECTORY, ATTR_REGULAR};

    fn mkdir(image: &mut Image, loc: DirLocation, name: &str) -> DirLocation {
        let cluster = image.allocate_cluster().unwrap();
        image
            .dir_create(loc, &pack_name(name.as_bytes()), ATTR_DIRECTORY, cluster, 0, 0)
            .unwrap();
        image.dir_init_subdirectory(cluster, 0, 0, 0);
        DirLocation::Cluster(cluster)
    }

    #[test]
    fn root_resolves_without_entry() {
        let image = Image::fresh();
        assert!(matches!(resolve_entry(&image, "/").unwrap(), Resolved::Root));
    }

    #[test]
    fn rejects_relative_path() {
        let image = Image::fresh();
        assert_eq!(resolve_entry(&image, "rel").unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn rejects_double_slash() {
        let image = Image::fresh();
        assert_eq!(
            resolve_entry(&image, "/a//b").unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(resolve_entry(&image, "//").unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn strips_single_trailing_slash() {
        let mut image = Image::fresh();
        mkdir(&mut image, DirLocation::Root, "DIR1");
        assert!(matches!(
            resolve_entry(&image, "/DIR1/").unwrap(),
            Resolved::Entry { .. }
        ));
    }

    #[test]
    fn name_too_long_is_rejected() {
        let image = Image::fresh();
        assert_eq!(
            resolve_entry(&image, "/ABIGNAMETOOLONG").unwrap_err(),
            Error::NameTooLong
        );
    }

    #[test]
    fn too_deep_is_rejected() {
        let image = Image::fresh();
        assert_eq!(
            resolve_entry(&image, "/a/b/c/d/e").unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn intermediate_non_directory_fails() {
        let mut image = Image::fresh();
        image
            .dir_create(
                DirLocation::Root,
                &pack_name(b"FILE"),
                ATTR_REGULAR,
                0,
                0,
                0,
            )
            .unwrap();
        assert_eq!(
            resolve_entry(&image, "/FILE/CHILD").unwrap_err(),
            Error::NotADirectory
        );
    }

    #[test]
    fn resolve_parent_of_root_is_invalid() {
        let image = Image::fresh();
        assert_eq!(
            resolve_parent(&image, "/").unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn resolve_parent_missing_directory_is_not_found() {
        let image = Image::fresh();
        assert_eq!(
            resolve_parent(&image, "/missing/file.txt").unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn nested_resolution() {
        let mut image = Image::fresh();
        let dir1 = mkdir(&mut image, DirLocation::Root, "DIR1");
        image
            .dir_create(dir1, &pack_name(b"FILE.TXT"), ATTR_REGULAR, 0, 0, 0)
            .unwrap();
        assert!(matches!(
            resolve_entry(&image, "/DIR1/FILE.TXT").unwrap(),
            Resolved::Entry { .. }
        ));
        let (parent, leaf) = resolve_parent(&image, "/DIR1/FILE.TXT").unwrap();
        assert_eq!(parent, dir1);
        assert_eq!(leaf, pack_name(b"FILE.TXT"));
    }
}
