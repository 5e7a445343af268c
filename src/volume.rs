//! Logical volume mapper (component D).
//!
//! A bidirectional, overlap-merging map across any number of registered
//! devices, covering RAID0/RAID1/DUP stripe arithmetic.

use crate::addr::{AddrDelta, DeviceId, LogicalAddr, PhysicalAddr, QualifiedPhysical};
use crate::containers::OrderedMap;
use crate::error::{ReconError, Result};

/// Chunk (block group) type flags, as declared in the superblock/chunk item.
pub mod flags {
    pub const DATA: u64 = 1 << 0;
    pub const SYSTEM: u64 = 1 << 1;
    pub const METADATA: u64 = 1 << 2;
    pub const RAID0: u64 = 1 << 3;
    pub const RAID1: u64 = 1 << 4;
    pub const DUP: u64 = 1 << 5;
    pub const RAID10: u64 = 1 << 6;
    pub const RAID5: u64 = 1 << 7;
    pub const RAID6: u64 = 1 << 8;
    pub const RAID1C3: u64 = 1 << 9;
    pub const RAID1C4: u64 = 1 << 10;

    const PROFILE_MASK: u64 =
        RAID0 | RAID1 | DUP | RAID10 | RAID5 | RAID6 | RAID1C3 | RAID1C4;

    /// Two flag sets are compatible if they agree on which RAID profile
    /// bits are set (the block-group-type bits may simply accumulate).
    pub fn compatible(a: u64, b: u64) -> bool {
        a & PROFILE_MASK == b & PROFILE_MASK
    }
}

/// A logical chunk: one or more physical stripes backing a logical range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub l_addr: LogicalAddr,
    pub size: u64,
    pub size_locked: bool,
    pub stripe_len: u64,
    pub flags: u64,
    pub stripes: Vec<QualifiedPhysical>,
}

impl Chunk {
    pub fn end_address(&self) -> LogicalAddr {
        self.l_addr + AddrDelta::new(self.size as i64)
    }

    fn overlaps(&self, start: LogicalAddr, size: u64) -> bool {
        ranges_overlap(self.l_addr.as_i64(), self.size, start.as_i64(), size)
    }
}

/// The inverse view of a chunk from one device's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Devext {
    pub p_addr: PhysicalAddr,
    pub l_addr: LogicalAddr,
    pub size: u64,
    pub size_locked: bool,
    pub flags: u64,
}

impl Devext {
    pub fn end_address(&self) -> PhysicalAddr {
        self.p_addr + AddrDelta::new(self.size as i64)
    }

    fn overlaps(&self, start: PhysicalAddr, size: u64) -> bool {
        ranges_overlap(self.p_addr.as_i64(), self.size, start.as_i64(), size)
    }

    /// The logical address implied at `p_addr` by this devext's mapping.
    fn implied_logical(&self, p_addr: PhysicalAddr) -> LogicalAddr {
        self.l_addr + (p_addr - self.p_addr)
    }
}

fn ranges_overlap(a_start: i64, a_len: u64, b_start: i64, b_len: u64) -> bool {
    let a_end = a_start as i128 + a_len as i128;
    let b_end = b_start as i128 + b_len as i128;
    (a_start as i128) < b_end && (b_start as i128) < a_end
}

/// Everything `resolve` needs to read a logical range: every stripe that
/// backs it, and how many bytes remain contiguous from that offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub stripes: Vec<QualifiedPhysical>,
    pub run_length: u64,
}

/// The bidirectional logical/physical address map (§4.D).
pub struct Volume {
    chunks: OrderedMap<LogicalAddr, Chunk>,
    devexts: OrderedMap<DeviceId, OrderedMap<PhysicalAddr, Devext>>,
    debug_cross_check: bool,
}

impl Volume {
    pub fn new() -> Self {
        Self {
            chunks: OrderedMap::new(),
            devexts: OrderedMap::new(),
            debug_cross_check: false,
        }
    }

    pub fn with_debug_cross_check(mut self, on: bool) -> Self {
        self.debug_cross_check = on;
        self
    }

    /// Builds a volume with `debug_cross_check` taken from `tunable`,
    /// rather than set explicitly by the caller.
    pub fn from_tunable(tunable: &crate::config::Tunable) -> Self {
        Self::new().with_debug_cross_check(tunable.debug_cross_check)
    }

    fn overlapping_chunks(&self, l_addr: LogicalAddr, size: u64) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.overlaps(l_addr, size))
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn overlapping_devexts(&self, device: DeviceId, p_addr: PhysicalAddr, size: u64) -> Vec<Devext> {
        self.devexts
            .lookup(&device)
            .map(|m| {
                m.iter()
                    .filter(|(_, d)| d.overlaps(p_addr, size))
                    .map(|(_, d)| d.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Adds a mapping `(l_addr, p_addr, size)`, merging with any existing
    /// overlap per the union rules in §3.
    pub fn add_mapping(
        &mut self,
        l_addr: LogicalAddr,
        p: QualifiedPhysical,
        size: u64,
        size_locked: bool,
        flags: u64,
    ) -> Result<()> {
        let overlapping_chunks = self.overlapping_chunks(l_addr, size);

        let mut merged_start = l_addr;
        let mut merged_end = l_addr + AddrDelta::new(size as i64);
        let mut merged_locked = size_locked;
        let mut merged_flags = flags;
        let mut merged_stripe_len = size;
        let mut merged_stripes = vec![p];

        for c in &overlapping_chunks {
            if merged_locked && c.size_locked && c.size != size {
                return Err(ReconError::ConflictingLockedSize(l_addr));
            }
            if !flags::compatible(merged_flags, c.flags) {
                return Err(ReconError::IncompatibleFlags(l_addr));
            }
            merged_locked = merged_locked || c.size_locked;
            merged_flags |= c.flags;
            merged_start = merged_start.min(c.l_addr);
            merged_end = merged_end.max(c.end_address());
            if c.stripe_len != 0 {
                merged_stripe_len = c.stripe_len;
            }
            for s in &c.stripes {
                if !merged_stripes.contains(s) {
                    merged_stripes.push(*s);
                }
            }
        }
        let merged_size = (merged_end - merged_start).0 as u64;

        let overlapping_devexts = self.overlapping_devexts(p.device, p.addr, size);
        let mut devext_start = p.addr;
        let mut devext_end = p.addr + AddrDelta::new(size as i64);
        let mut devext_locked = size_locked;
        let mut devext_flags = flags;
        for d in &overlapping_devexts {
            let implied = d.implied_logical(p.addr);
            if implied != l_addr {
                return Err(ReconError::DevextMismatch(p.addr));
            }
            devext_locked = devext_locked || d.size_locked;
            devext_flags |= d.flags;
            devext_start = devext_start.min(d.p_addr);
            devext_end = devext_end.max(d.end_address());
        }
        let devext_size = (devext_end - devext_start).0 as u64;

        let nothing_new = overlapping_chunks.len() == 1
            && overlapping_devexts.len() == 1
            && overlapping_chunks[0].l_addr == merged_start
            && overlapping_chunks[0].size == merged_size
            && overlapping_chunks[0].stripes.len() == merged_stripes.len()
            && overlapping_devexts[0].p_addr == devext_start
            && overlapping_devexts[0].size == devext_size;
        if nothing_new {
            return Ok(());
        }

        for c in &overlapping_chunks {
            self.chunks.delete(&c.l_addr);
        }
        for d in &overlapping_devexts {
            if let Some(m) = self.devexts.lookup(&p.device).cloned() {
                let mut m = m;
                m.delete(&d.p_addr);
                self.devexts.insert(p.device, m);
            }
        }

        self.chunks.insert(
            merged_start,
            Chunk {
                l_addr: merged_start,
                size: merged_size,
                size_locked: merged_locked,
                stripe_len: merged_stripe_len,
                flags: merged_flags,
                stripes: merged_stripes,
            },
        );

        let mut dev_map = self.devexts.lookup(&p.device).cloned().unwrap_or_else(OrderedMap::new);
        dev_map.insert(
            devext_start,
            Devext {
                p_addr: devext_start,
                l_addr: merged_start,
                size: devext_size,
                size_locked: devext_locked,
                flags: devext_flags,
            },
        );
        self.devexts.insert(p.device, dev_map);

        if self.debug_cross_check {
            self.cross_check()?;
        }
        Ok(())
    }

    fn find_chunk(&self, l_addr: LogicalAddr) -> Option<&Chunk> {
        self.chunks
            .iter()
            .find(|(_, c)| l_addr >= c.l_addr && l_addr < c.end_address())
            .map(|(_, c)| c)
    }

    /// Every stripe backing `l_addr`, and how far the mapping runs
    /// contiguously from there.
    pub fn resolve(&self, l_addr: LogicalAddr) -> Result<Resolution> {
        let chunk = self
            .find_chunk(l_addr)
            .ok_or(ReconError::CouldNotMap(l_addr))?;
        let offset = (l_addr - chunk.l_addr).0 as u64;
        let run_length = chunk.size - offset;

        let stripes = if chunk.flags & flags::RAID0 != 0 && chunk.stripe_len > 0 {
            let stripe_len = chunk.stripe_len;
            let n = chunk.stripes.len() as u64;
            let stripe_nr = offset / stripe_len;
            let stripe_off = offset % stripe_len;
            let idx = (stripe_nr % n) as usize;
            let within = (stripe_nr / n) * stripe_len + stripe_off;
            vec![QualifiedPhysical::new(
                chunk.stripes[idx].device,
                chunk.stripes[idx].addr + AddrDelta::new(within as i64),
            )]
        } else {
            chunk
                .stripes
                .iter()
                .map(|s| QualifiedPhysical::new(s.device, s.addr + AddrDelta::new(offset as i64)))
                .collect()
        };

        Ok(Resolution { stripes, run_length })
    }

    /// The logical address implied by a physical point, if any devext covers it.
    pub fn un_resolve(&self, device: DeviceId, p_addr: PhysicalAddr) -> Option<LogicalAddr> {
        self.devexts.lookup(&device).and_then(|m| {
            m.iter()
                .find(|(_, d)| p_addr >= d.p_addr && p_addr < d.end_address())
                .map(|(_, d)| d.implied_logical(p_addr))
        })
    }

    /// Any one stripe backing any chunk overlapping `[l_addr, l_addr+size)`.
    pub fn resolve_any(&self, l_addr: LogicalAddr, size: u64) -> Result<(LogicalAddr, QualifiedPhysical)> {
        let chunk = self
            .chunks
            .iter()
            .find(|(_, c)| c.overlaps(l_addr, size))
            .map(|(_, c)| c.clone())
            .ok_or(ReconError::CouldNotMap(l_addr))?;
        let stripe = *chunk
            .stripes
            .first()
            .ok_or(ReconError::CouldNotMap(l_addr))?;
        Ok((chunk.l_addr.max(l_addr), stripe))
    }

    /// Whole-map cross-check: every stripe implies a devext, and the
    /// reverse map agrees.
    fn cross_check(&self) -> Result<()> {
        for (_, chunk) in self.chunks.iter() {
            for stripe in &chunk.stripes {
                let rebuilt = self.un_resolve(stripe.device, stripe.addr);
                if rebuilt != Some(chunk.l_addr) {
                    return Err(ReconError::Other(format!(
                        "cross-check failed: chunk@{} stripe {} does not round-trip",
                        chunk.l_addr, stripe
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `buf.len()` bytes starting at `l_addr`, looping over resolved
/// stripes and cross-checking redundant copies agree.
pub fn read_at(
    volume: &Volume,
    reader: &dyn Fn(QualifiedPhysical, &mut [u8]) -> std::io::Result<()>,
    l_addr: LogicalAddr,
    buf: &mut [u8],
) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let here = l_addr + AddrDelta::new(done as i64);
        let resolution = volume.resolve(here)?;
        let chunk_len = (resolution.run_length as usize).min(buf.len() - done);

        let mut reference: Option<Vec<u8>> = None;
        for stripe in &resolution.stripes {
            let mut tmp = vec![0u8; chunk_len];
            reader(*stripe, &mut tmp).map_err(ReconError::Io)?;
            match &reference {
                None => reference = Some(tmp),
                Some(r) if r != &tmp => {
                    return Err(ReconError::InconsistentStripes {
                        laddr: here,
                        len: chunk_len as u64,
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(r) = reference {
            buf[done..done + chunk_len].copy_from_slice(&r);
        }
        done += chunk_len;
    }
    Ok(())
}

/// Writes `buf` starting at `l_addr`, looping over resolved stripes and
/// writing every redundant copy.
pub fn write_at(
    volume: &Volume,
    writer: &dyn Fn(QualifiedPhysical, &[u8]) -> std::io::Result<()>,
    l_addr: LogicalAddr,
    buf: &[u8],
) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let here = l_addr + AddrDelta::new(done as i64);
        let resolution = volume.resolve(here)?;
        let chunk_len = (resolution.run_length as usize).min(buf.len() - done);
        for stripe in &resolution.stripes {
            writer(*stripe, &buf[done..done + chunk_len]).map_err(ReconError::Io)?;
        }
        done += chunk_len;
    }
    Ok(())
}
