//! Read-only memory-mapped firmware images

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::ImageError;

/// A firmware image mapped private and read-only
///
/// The mapping is released when the value is dropped.
pub struct MappedImage {
    ptr: NonNull<c_void>,
    len: usize,
    path: PathBuf,
}

impl MappedImage {
    /// Map the file at `path`
    ///
    /// Open, size and map failures are reported as distinct [`ImageError`]
    /// variants carrying the OS error. Empty files cannot be mapped.
    pub fn open_read_only(path: &Path) -> Result<Self, ImageError> {
        let file = File::open(path).map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let size = file
            .metadata()
            .and_then(|meta| {
                usize::try_from(meta.len())
                    .map_err(|_| std::io::Error::from(Errno::EFBIG))
            })
            .map_err(|source| ImageError::Size {
                path: path.to_path_buf(),
                source,
            })?;

        let len = NonZeroUsize::new(size).ok_or_else(|| ImageError::Map {
            path: path.to_path_buf(),
            source: std::io::Error::from(Errno::EINVAL),
        })?;

        // SAFETY: a fresh private read-only mapping of a file we hold open;
        // the kernel picks the address, so no existing memory is affected.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                &file,
                0,
            )
        }
        .map_err(|errno| ImageError::Map {
            path: path.to_path_buf(),
            source: std::io::Error::from(errno),
        })?;

        log::debug!("Mapped {} ({} bytes)", path.display(), size);

        Ok(Self {
            ptr,
            len: size,
            path: path.to_path_buf(),
        })
    }

    /// The mapped bytes
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live PROT_READ mapping owned by self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// File the image was mapped from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<[u8]> for MappedImage {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for MappedImage {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in open_read_only and is unmapped
        // exactly once, here
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            log::warn!("Failed to unmap {}: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for MappedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedImage")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}
