// Copyright 2020 <盏一 w@hidva.com>
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resolves client-supplied names to canonical absolute paths and makes
//! sure a backing file exists for them. Stateless; kept as a unit struct
//! only so the [MODULE] boundary from the design has a name in the code.

use crate::cache::error::CacheError;
use crate::FILE_SIZE;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) struct PathResolver;

impl PathResolver {
    /// Resolves symlinks and relative components against the process
    /// working directory. A not-yet-existing file is not an error: only
    /// its parent directory needs to exist for the absolute name to be
    /// computable, matching the behavior `realpath(3)` gave the original
    /// C implementation.
    pub fn canonicalize(name: &str) -> anyhow::Result<PathBuf> {
        let path = Path::new(name);
        match fs::canonicalize(path) {
            Ok(abs) => Ok(abs),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::canonicalize_missing(path),
            Err(e) => Err(CacheError::Canonicalize(e).into()),
        }
    }

    fn canonicalize_missing(path: &Path) -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir().map_err(CacheError::Canonicalize)?;
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        let file_name = abs.file_name().ok_or_else(|| {
            CacheError::Canonicalize(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name component",
            ))
        })?;
        let parent = abs
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .unwrap_or_else(|| Path::new("."));
        let parent = fs::canonicalize(parent).map_err(CacheError::Canonicalize)?;
        Ok(parent.join(file_name))
    }

    /// If `path` doesn't exist, creates it and fills it with `FILE_SIZE`
    /// bytes of the ASCII character `'0'` (0x30, not NUL — the original
    /// contract). Returns a read/write descriptor positioned at offset 0.
    pub fn ensure_exists(path: &Path) -> anyhow::Result<File> {
        if !path.exists() {
            log::debug!("creating zero-filled backing file {:?}", path);
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(CacheError::Canonicalize)?;
            let zeros = vec![b'0'; FILE_SIZE];
            f.write_all(&zeros).map_err(|_| CacheError::ShortWrite)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(CacheError::Canonicalize)?;
        let len = file.metadata().map_err(CacheError::Canonicalize)?.len();
        if (len as usize) < FILE_SIZE {
            anyhow::bail!(CacheError::ShortRead);
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_exists_zero_fills_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        PathResolver::ensure_exists(&path).unwrap();
        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), FILE_SIZE);
        assert!(data.iter().all(|&b| b == b'0'));
    }

    #[test]
    fn ensure_exists_leaves_an_existing_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        let mut contents = vec![b'0'; FILE_SIZE];
        contents[0] = b'X';
        fs::write(&path, &contents).unwrap();
        PathResolver::ensure_exists(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), contents);
    }

    #[test]
    fn canonicalize_computes_an_absolute_path_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("missing").to_string_lossy().into_owned();
        let canon = PathResolver::canonicalize(&name).unwrap();
        assert!(canon.is_absolute());
        assert_eq!(canon.file_name().unwrap(), "missing");
    }
}
