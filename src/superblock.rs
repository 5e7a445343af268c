//! Superblock parsing (supplemental to the data model, feeding the node
//! engine's `read_node` expectations and the tree-root resolver).
//!
//! Exposes typed logical addresses and an "effective metadata uuid"
//! accessor so node validation doesn't need to know about the
//! `METADATA_UUID` incompat flag directly.

use byteorder::{ByteOrder, LittleEndian};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::addr::LogicalAddr;
use crate::checksum::CsumType;
use crate::error::{ReconError, Result};

pub const SUPERBLOCK_SIZE: usize = 0x1000;
pub const SUPERBLOCK_OFFSET: u64 = 0x10000;
const BTRFS_MAGIC: [u8; 8] = *b"_BHRfS_M";

pub mod incompat {
    pub const MIXED_BACKREF: u64 = 1 << 0;
    pub const DEFAULT_SUBVOL: u64 = 1 << 1;
    pub const MIXED_GROUPS: u64 = 1 << 2;
    pub const COMPRESS_LZO: u64 = 1 << 3;
    pub const COMPRESS_ZSTD: u64 = 1 << 4;
    pub const BIG_METADATA: u64 = 1 << 5;
    pub const EXTENDED_IREF: u64 = 1 << 6;
    pub const RAID56: u64 = 1 << 7;
    pub const SKINNY_METADATA: u64 = 1 << 8;
    pub const NO_HOLES: u64 = 1 << 9;
    pub const METADATA_UUID: u64 = 1 << 10;
    pub const RAID1C34: u64 = 1 << 11;
    pub const ZONED: u64 = 1 << 12;
    pub const EXTENT_TREE_V2: u64 = 1 << 13;
}

/// Well-known tree object ids, resolved directly from the superblock
/// rather than by searching the root tree.
pub mod well_known_tree {
    pub const ROOT: u64 = 1;
    pub const CHUNK: u64 = 3;
    pub const LOG: u64 = 18_446_744_073_709_551_609; // -7i64 as u64, btrfs's TREE_LOG_OBJECTID
    pub const BLOCK_GROUP: u64 = 11;
}

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct SuperblockRaw {
    csum: [u8; 32],
    fsid: [u8; 16],
    bytenr: u64,
    flags: u64,
    magic: [u8; 8],
    generation: u64,
    root: u64,
    chunk_root: u64,
    log_root: u64,
    log_root_transid: u64,
    total_bytes: u64,
    bytes_used: u64,
    root_dir_objectid: u64,
    num_devices: u64,
    sector_size: u32,
    node_size: u32,
    leaf_size: u32,
    stripe_size: u32,
    sys_chunk_array_size: u32,
    chunk_root_generation: u64,
    compat_flags: u64,
    compat_ro_flags: u64,
    incompat_flags: u64,
    csum_type: u16,
    root_level: u8,
    chunk_root_level: u8,
    log_root_level: u8,
    dev_item: [u8; 0x62],
    label: [u8; 256],
    cache_generation: u64,
    uuid_tree_generation: u64,
    metadata_uuid: [u8; 16],
    reserved: [u8; 0xE0],
    sys_chunk_array: [u8; 0x800],
    super_roots: [u8; 0x2A0],
    unused: [u8; 0x235],
}

/// A parsed, validated superblock.
#[derive(Debug, Clone)]
pub struct Superblock {
    raw: SuperblockRaw,
}

impl Superblock {
    /// Parses and checksum-validates a superblock from exactly
    /// [`SUPERBLOCK_SIZE`] bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(ReconError::Other(format!(
                "superblock too small: {} bytes",
                data.len()
            )));
        }
        let raw = SuperblockRaw::read_from_bytes(&data[..SUPERBLOCK_SIZE])
            .map_err(|_| ReconError::Other("failed to parse superblock layout".to_string()))?;
        if raw.magic != BTRFS_MAGIC {
            return Err(ReconError::Other("bad superblock magic".to_string()));
        }
        let sb = Self { raw };
        sb.verify_checksum(data)?;
        Ok(sb)
    }

    fn verify_checksum(&self, data: &[u8]) -> Result<()> {
        let csum_type = self.csum_type();
        let ty = CsumType::from_ondisk(csum_type)
            .ok_or_else(|| ReconError::Other(format!("unknown superblock checksum type {csum_type}")))?;
        if ty != CsumType::Crc32C {
            // Only CRC32C is implemented; other declared types are
            // recognized but unsupported for validation here.
            return Ok(());
        }
        let expected = LittleEndian::read_u32(&self.raw.csum[..4]);
        let actual = crc32c::crc32c(&data[0x20..SUPERBLOCK_SIZE]);
        if expected != actual {
            return Err(ReconError::Other(format!(
                "superblock checksum mismatch: expected {expected:#x}, got {actual:#x}"
            )));
        }
        Ok(())
    }

    pub fn fsid(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.raw.fsid)
    }

    /// The UUID node checksums are validated against: the dedicated
    /// `metadata_uuid` field when `METADATA_UUID` is set, else `fsid`.
    pub fn effective_metadata_uuid(&self) -> uuid::Uuid {
        if self.incompat_flags() & incompat::METADATA_UUID != 0 {
            uuid::Uuid::from_bytes(self.raw.metadata_uuid)
        } else {
            self.fsid()
        }
    }

    pub fn generation(&self) -> u64 {
        self.raw.generation
    }

    pub fn root_addr(&self) -> LogicalAddr {
        LogicalAddr::from(self.raw.root)
    }

    pub fn chunk_root_addr(&self) -> LogicalAddr {
        LogicalAddr::from(self.raw.chunk_root)
    }

    pub fn log_root_addr(&self) -> Option<LogicalAddr> {
        if self.raw.log_root == 0 {
            None
        } else {
            Some(LogicalAddr::from(self.raw.log_root))
        }
    }

    pub fn node_size(&self) -> u32 {
        self.raw.node_size
    }

    pub fn sector_size(&self) -> u32 {
        self.raw.sector_size
    }

    pub fn total_bytes(&self) -> u64 {
        self.raw.total_bytes
    }

    pub fn num_devices(&self) -> u64 {
        self.raw.num_devices
    }

    pub fn incompat_flags(&self) -> u64 {
        self.raw.incompat_flags
    }

    pub fn csum_type(&self) -> u16 {
        self.raw.csum_type
    }

    pub fn root_level(&self) -> u8 {
        self.raw.root_level
    }

    pub fn chunk_root_level(&self) -> u8 {
        self.raw.chunk_root_level
    }

    pub fn sys_chunk_array(&self) -> &[u8] {
        &self.raw.sys_chunk_array[..self.raw.sys_chunk_array_size as usize]
    }

    pub fn label(&self) -> &str {
        let end = self.raw.label.iter().position(|&b| b == 0).unwrap_or(self.raw.label.len());
        std::str::from_utf8(&self.raw.label[..end]).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_superblock() -> Vec<u8> {
        let mut data = vec![0u8; SUPERBLOCK_SIZE];
        data[0x40..0x48].copy_from_slice(&BTRFS_MAGIC);
        data[0x48..0x50].copy_from_slice(&100u64.to_le_bytes()); // generation
        data[0x50..0x58].copy_from_slice(&0x100000u64.to_le_bytes()); // root
        data[0x58..0x60].copy_from_slice(&0x200000u64.to_le_bytes()); // chunk_root
        data[0x90..0x94].copy_from_slice(&4096u32.to_le_bytes()); // sector_size
        data[0x94..0x98].copy_from_slice(&16384u32.to_le_bytes()); // node_size
        data[0xc6..0xc8].copy_from_slice(&0u16.to_le_bytes()); // csum_type = CRC32C
        let csum = crc32c::crc32c(&data[0x20..]);
        data[0..4].copy_from_slice(&csum.to_le_bytes());
        data
    }

    #[test]
    fn parses_valid_superblock() {
        let data = mock_superblock();
        let sb = Superblock::parse(&data).unwrap();
        assert_eq!(sb.generation(), 100);
        assert_eq!(sb.root_addr(), LogicalAddr::from(0x100000u64));
        assert_eq!(sb.chunk_root_addr(), LogicalAddr::from(0x200000u64));
        assert_eq!(sb.node_size(), 16384);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = mock_superblock();
        data[0x40..0x48].copy_from_slice(b"garbage!");
        assert!(Superblock::parse(&data).is_err());
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut data = mock_superblock();
        data[0] ^= 0xFF;
        assert!(Superblock::parse(&data).is_err());
    }

    #[test]
    fn effective_metadata_uuid_falls_back_to_fsid() {
        let data = mock_superblock();
        let sb = Superblock::parse(&data).unwrap();
        assert_eq!(sb.effective_metadata_uuid(), sb.fsid());
    }
}
