//! Raw device layer (component N).
//!
//! Wraps a single-device `BlockDevice`/`ImageFile` pair behind the
//! `NodeSource` seam the node engine and walker read through, backed by
//! any number of registered devices via the volume mapper (component D).
//! Raw physical-drive opening is out of scope; an image file (or a block
//! device node under Linux, which opens the same way) is the only
//! supported backing store.

pub mod image;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

pub use image::ImageFile;

use crate::addr::{DeviceId, LogicalAddr, QualifiedPhysical};
use crate::node::NodeSource;
use crate::superblock::Superblock;
use crate::volume::{self, Volume};

/// Errors that can occur during block device operations.
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Invalid offset: {offset} (device size: {size})")]
    InvalidOffset { offset: u64, size: u64 },

    #[error("Read beyond end of device")]
    ReadBeyondEnd,

    #[error("Device is read-only")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, BlockDeviceError>;

/// Trait for block device access.
pub trait BlockDevice: Send + Sync {
    fn size(&self) -> u64;
    fn sector_size(&self) -> u32;
    fn is_read_only(&self) -> bool;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    fn flush_device(&self) -> Result<()>;
}

/// Opens an image file at `path`.
pub fn open(path: &str, read_only: bool) -> Result<ImageFile> {
    ImageFile::open(path, read_only)
}

/// A volume backed by one or more registered devices, implementing
/// [`NodeSource`] by resolving each read through the volume mapper.
///
/// Devices are registered with [`register_device`](Self::register_device)
/// before chunk mappings referencing them are added to `volume`.
pub struct MultiDeviceImage {
    devices: RwLock<HashMap<DeviceId, Box<dyn BlockDevice>>>,
    volume: Volume,
    superblock: Superblock,
}

impl MultiDeviceImage {
    pub fn new(superblock: Superblock, volume: Volume) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            volume,
            superblock,
        }
    }

    pub fn register_device(&self, id: DeviceId, device: Box<dyn BlockDevice>) {
        self.devices.write().unwrap().insert(id, device);
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    fn read_stripe(&self, stripe: QualifiedPhysical, buf: &mut [u8]) -> std::io::Result<()> {
        let devices = self.devices.read().unwrap();
        let device = devices.get(&stripe.device).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no device registered for {}", stripe.device),
            )
        })?;
        let offset = stripe.addr.as_i64() as u64;
        let n = device
            .read_at(offset, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        if n != buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read from backing device",
            ));
        }
        Ok(())
    }
}

impl NodeSource for MultiDeviceImage {
    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn read_at(&self, addr: LogicalAddr, buf: &mut [u8]) -> std::io::Result<()> {
        volume::read_at(&self.volume, &|stripe, b| self.read_stripe(stripe, b), addr, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}
