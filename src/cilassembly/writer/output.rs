//! Memory mapped output file for a finished image.
//!
//! The file is created at its final path, sized up front and mapped. Until [`Output::finalize`]
//! succeeds the file is considered incomplete: dropping the `Output` on any error path unmaps it
//! and removes the file, so a failed write never leaves a truncated image behind.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A mapped file being written
pub struct Output {
    mmap: MmapMut,
    target_path: PathBuf,
    finalized: bool,
}

impl Output {
    /// Create `target_path` with `size` bytes and map it
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can't be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        if size == 0 {
            return Err(Error::Empty);
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)?;

        let mapped = file
            .set_len(size)
            .and_then(|()| unsafe { MmapOptions::new().map_mut(&file) });
        let mmap = match mapped {
            Ok(mmap) => mmap,
            Err(error) => {
                drop(file);
                let _ = std::fs::remove_file(&target_path);
                return Err(Error::FileError(error));
            }
        };

        Ok(Output {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Copy `data` to `offset`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` doesn't fit.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| Error::OutOfBounds)?;
        let end = start.checked_add(data.len()).ok_or(Error::OutOfBounds)?;

        let target = self.mmap.get_mut(start..end).ok_or(Error::OutOfBounds)?;
        target.copy_from_slice(data);
        Ok(())
    }

    /// Size of the mapped file
    #[must_use]
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Flush the mapping to disk and keep the file
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if flushing fails, the file is removed in that case.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap.flush()?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalized_file_stays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut output = Output::create(&path, 8).unwrap();
        output.write_at(2, &[1, 2, 3]).unwrap();
        assert!(output.write_at(6, &[1, 2, 3]).is_err());
        output.finalize().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn dropped_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let output = Output::create(&path, 16).unwrap();
        assert_eq!(output.size(), 16);
        drop(output);

        assert!(!path.exists());
    }
}
