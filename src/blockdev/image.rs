//! Memory-mapped file backing for [`BlockDevice`] (component N).
//!
//! Falls back to plain seek/read/write when mapping fails or the file is
//! opened read-only, so a zero-length image or an unmappable filesystem
//! still opens successfully.

use super::{BlockDevice, BlockDeviceError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::RwLock;

const DEFAULT_SECTOR_SIZE: u32 = 512;

pub struct ImageFile {
    file: RwLock<File>,
    mmap: Option<MmapMut>,
    size: u64,
    read_only: bool,
}

fn try_map(file: &File, size: u64) -> Option<MmapMut> {
    if size == 0 {
        return None;
    }
    unsafe { MmapOptions::new().map_mut(file) }.ok()
}

impl ImageFile {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path.as_ref())?;
        let size = file.metadata()?.len();
        let mmap = if read_only { None } else { try_map(&file, size) };

        Ok(Self {
            file: RwLock::new(file),
            mmap,
            size,
            read_only,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(size)?;
        let mmap = try_map(&file, size);

        Ok(Self {
            file: RwLock::new(file),
            mmap,
            size,
            read_only: false,
        })
    }
}

impl BlockDevice for ImageFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn sector_size(&self) -> u32 {
        DEFAULT_SECTOR_SIZE
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Err(BlockDeviceError::InvalidOffset {
                offset,
                size: self.size,
            });
        }
        let n = std::cmp::min(buf.len() as u64, self.size - offset) as usize;

        if let Some(ref mmap) = self.mmap {
            buf[..n].copy_from_slice(&mmap[offset as usize..offset as usize + n]);
            return Ok(n);
        }

        let mut file = self.file.write().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(&mut buf[..n])?)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(BlockDeviceError::ReadOnly);
        }
        if offset >= self.size {
            return Err(BlockDeviceError::InvalidOffset {
                offset,
                size: self.size,
            });
        }
        let n = std::cmp::min(buf.len() as u64, self.size - offset) as usize;

        // mmap is not behind the RwLock, so writes always go through the file
        // even when a read-side mapping exists.
        let mut file = self.file.write().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.write(&buf[..n])?)
    }

    fn flush_device(&self) -> Result<()> {
        self.file.write().unwrap().flush()?;
        Ok(())
    }
}

unsafe impl Send for ImageFile {}
unsafe impl Sync for ImageFile {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn create_then_read_back_written_bytes() {
        let temp = NamedTempFile::new().unwrap();
        let img = ImageFile::create(temp.path(), 1024 * 1024).unwrap();
        assert_eq!(img.size(), 1024 * 1024);
        assert!(!img.is_read_only());

        let data = b"node bytes";
        img.write_at(0x100, data).unwrap();
        let mut buf = vec![0u8; data.len()];
        img.read_at(0x100, &mut buf).unwrap();
        assert_eq!(&buf, data);
    }

    #[test]
    fn read_only_open_rejects_writes() {
        let temp = NamedTempFile::new().unwrap();
        ImageFile::create(temp.path(), 1024).unwrap();

        let img = ImageFile::open(temp.path(), true).unwrap();
        assert!(img.is_read_only());
        assert!(img.write_at(0, b"test").is_err());
    }

    #[test]
    fn read_past_end_of_file_is_an_error() {
        let temp = NamedTempFile::new().unwrap();
        let img = ImageFile::create(temp.path(), 16).unwrap();
        let mut buf = [0u8; 4];
        assert!(img.read_at(100, &mut buf).is_err());
    }

    #[test]
    fn zero_length_image_opens_without_a_mapping() {
        let temp = NamedTempFile::new().unwrap();
        let img = ImageFile::create(temp.path(), 0).unwrap();
        assert_eq!(img.size(), 0);
        assert!(img.mmap.is_none());
    }
}
