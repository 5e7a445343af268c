//! Block-checksum runs and runs-with-gaps (component E).

use serde::{Deserialize, Serialize};

use crate::addr::{AddrDelta, LogicalAddr};
use crate::checksum::{chunked_hex_decode, chunked_hex_encode, ShortSum};

/// Block size over which sum-run checksums are computed.
pub const BLOCK_SIZE: u64 = 4096;

/// Checksums of `N` consecutive fixed-size blocks starting at `base_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumRun {
    pub checksum_size: usize,
    pub base_address: LogicalAddr,
    /// Concatenation of `N * checksum_size` bytes.
    pub sums: Vec<u8>,
}

impl SumRun {
    pub fn new(checksum_size: usize, base_address: LogicalAddr, sums: Vec<u8>) -> Self {
        Self {
            checksum_size,
            base_address,
            sums,
        }
    }

    pub fn block_count(&self) -> usize {
        if self.checksum_size == 0 {
            0
        } else {
            self.sums.len() / self.checksum_size
        }
    }

    pub fn end_address(&self) -> LogicalAddr {
        self.base_address + AddrDelta::new((self.block_count() as u64 * BLOCK_SIZE) as i64)
    }

    pub fn get(&self, idx: usize) -> Option<ShortSum> {
        let start = idx.checked_mul(self.checksum_size)?;
        let end = start.checked_add(self.checksum_size)?;
        self.sums.get(start..end).map(|s| ShortSum(s.to_vec()))
    }

    /// Returns the short sum covering `addr`, or `None` if `addr` is
    /// outside this run's range.
    pub fn sum_for_addr(&self, addr: LogicalAddr) -> Option<ShortSum> {
        if addr < self.base_address || addr >= self.end_address() {
            return None;
        }
        let blocks = (addr - self.base_address).0 as u64 / BLOCK_SIZE;
        self.get(blocks as usize)
    }

    pub fn walk(&self, mut f: impl FnMut(LogicalAddr, ShortSum)) {
        for i in 0..self.block_count() {
            let addr = self.base_address + AddrDelta::new((i as u64 * BLOCK_SIZE) as i64);
            if let Some(s) = self.get(i) {
                f(addr, s);
            }
        }
    }
}

impl Serialize for SumRun {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("ChecksumSize", &self.checksum_size)?;
        map.serialize_entry("Addr", &self.base_address.as_u64())?;
        map.serialize_entry("Sums", &chunked_hex_encode(&self.sums))?;
        map.end()
    }
}

#[derive(Deserialize)]
struct SumRunWire {
    #[serde(rename = "ChecksumSize")]
    checksum_size: usize,
    #[serde(rename = "Addr")]
    addr: u64,
    #[serde(rename = "Sums")]
    sums: serde_json::Value,
}

impl<'de> Deserialize<'de> for SumRun {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SumRunWire::deserialize(deserializer)?;
        let sums = chunked_hex_decode(&wire.sums).map_err(serde::de::Error::custom)?;
        if sums.is_empty() {
            return Err(serde::de::Error::custom("sum run has no sums"));
        }
        Ok(SumRun {
            checksum_size: wire.checksum_size,
            base_address: LogicalAddr::from(wire.addr),
            sums,
        })
    }
}

/// The outcome of looking a logical address up in a [`SumRunWithGaps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLookup<'a> {
    /// `addr` is covered by this run.
    Covered(&'a SumRun),
    /// `addr` falls between runs; the gap ends at `next_gap_addr`
    /// (the address of the next run, or the end of the whole range).
    Gap { next_gap_addr: LogicalAddr },
    /// `addr` is past the end of the whole range.
    EndOfStream,
}

/// A sequence of [`SumRun`]s over `[start, start + size)` with explicit
/// gaps where no run covers a sub-range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumRunWithGaps {
    pub start: LogicalAddr,
    pub size: u64,
    pub runs: Vec<SumRun>,
}

impl SumRunWithGaps {
    pub fn new(start: LogicalAddr, size: u64, mut runs: Vec<SumRun>) -> Self {
        runs.sort_by_key(|r| r.base_address);
        Self { start, size, runs }
    }

    pub fn end_address(&self) -> LogicalAddr {
        self.start + AddrDelta::new(self.size as i64)
    }

    pub fn run_for_addr(&self, addr: LogicalAddr) -> RunLookup<'_> {
        if addr < self.start || addr >= self.end_address() {
            return RunLookup::EndOfStream;
        }
        for run in &self.runs {
            if addr < run.base_address {
                return RunLookup::Gap {
                    next_gap_addr: run.base_address,
                };
            }
            if addr < run.end_address() {
                return RunLookup::Covered(run);
            }
        }
        RunLookup::Gap {
            next_gap_addr: self.end_address(),
        }
    }

    pub fn sum_for_addr(&self, addr: LogicalAddr) -> Option<ShortSum> {
        match self.run_for_addr(addr) {
            RunLookup::Covered(run) => run.sum_for_addr(addr),
            _ => None,
        }
    }

    /// Walks every block in `[start, start+size)`, invoking `f` with
    /// either a resolved short sum or an explicit gap marker so callers
    /// can distinguish "unknown sum" from "no such address".
    pub fn walk(&self, mut f: impl FnMut(LogicalAddr, Option<ShortSum>)) {
        let mut addr = self.start;
        while addr < self.end_address() {
            match self.run_for_addr(addr) {
                RunLookup::Covered(run) => {
                    let sum = run.sum_for_addr(addr);
                    f(addr, sum);
                    addr = addr + AddrDelta::new(BLOCK_SIZE as i64);
                }
                RunLookup::Gap { next_gap_addr } => {
                    f(addr, None);
                    addr = next_gap_addr;
                }
                RunLookup::EndOfStream => break,
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RunOrGap {
    Gap { #[serde(rename = "Gap")] gap: u64 },
    Run(SumRun),
}

impl Serialize for SumRunWithGaps {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut entries = Vec::new();
        let mut cursor = self.start;
        for run in &self.runs {
            if run.base_address < cursor {
                return Err(serde::ser::Error::custom(format!(
                    "address went backwards: run at {} precedes cursor {}",
                    run.base_address, cursor
                )));
            }
            if run.base_address > cursor {
                entries.push(RunOrGap::Gap {
                    gap: (run.base_address - cursor).0 as u64,
                });
            }
            entries.push(RunOrGap::Run(run.clone()));
            cursor = run.end_address();
        }
        let end = self.end_address();
        if end > cursor {
            entries.push(RunOrGap::Gap {
                gap: (end - cursor).0 as u64,
            });
        } else if end < cursor {
            return Err(serde::ser::Error::custom(
                "address went backwards: runs overrun the declared size",
            ));
        }

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("Addr", &self.start.as_u64())?;
        map.serialize_entry("Size", &self.size)?;
        map.serialize_entry("Runs", &entries)?;
        map.end()
    }
}

#[derive(Deserialize)]
struct GapsWire {
    #[serde(rename = "Addr")]
    addr: u64,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "Runs")]
    runs: Vec<RunOrGap>,
}

impl<'de> Deserialize<'de> for SumRunWithGaps {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = GapsWire::deserialize(deserializer)?;
        let mut runs = Vec::new();
        for entry in wire.runs {
            if let RunOrGap::Run(r) = entry {
                runs.push(r);
            }
        }
        Ok(SumRunWithGaps {
            start: LogicalAddr::from(wire.addr),
            size: wire.size,
            runs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(base: u64, sums: &[u8]) -> SumRun {
        SumRun::new(4, LogicalAddr::from(base), sums.to_vec())
    }

    #[test]
    fn last_block_is_covered_then_lookup_past_end_is_none() {
        let r = run(0x1000, &[1, 2, 3, 4]);
        assert_eq!(r.sum_for_addr(LogicalAddr::from(0x1000u64)).unwrap().0, vec![1, 2, 3, 4]);
        assert_eq!(r.sum_for_addr(LogicalAddr::from(0x1000u64 + BLOCK_SIZE)), None);
    }

    #[test]
    fn get_by_index() {
        let r = run(0x1000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.get(0).unwrap().0, vec![1, 2, 3, 4]);
        assert_eq!(r.get(1).unwrap().0, vec![5, 6, 7, 8]);
        assert_eq!(r.get(2), None);
    }

    #[test]
    fn gapped_sum_run_json_form() {
        let inner = run(0x2000, &[0xAA, 0xBB, 0xCC, 0xDD]);
        let gapped = SumRunWithGaps::new(LogicalAddr::from(0x1000u64), 0x3000, vec![inner]);
        let value = serde_json::to_value(&gapped).unwrap();

        assert_eq!(value["Addr"], serde_json::json!(4096));
        assert_eq!(value["Size"], serde_json::json!(12288));
        let runs = value["Runs"].as_array().unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0]["Gap"], serde_json::json!(4096));
        assert_eq!(runs[2]["Gap"], serde_json::json!(4096));
    }

    #[test]
    fn run_for_addr_distinguishes_gap_from_end_of_stream() {
        let inner = run(0x2000, &[1, 2, 3, 4]);
        let gapped = SumRunWithGaps::new(LogicalAddr::from(0x1000u64), 0x3000, vec![inner]);

        assert!(matches!(
            gapped.run_for_addr(LogicalAddr::from(0x1000u64)),
            RunLookup::Gap { .. }
        ));
        assert!(matches!(
            gapped.run_for_addr(LogicalAddr::from(0x2000u64)),
            RunLookup::Covered(_)
        ));
        assert!(matches!(
            gapped.run_for_addr(LogicalAddr::from(0x5000u64)),
            RunLookup::EndOfStream
        ));
    }

    #[test]
    fn walk_surfaces_gaps_to_caller() {
        let inner = run(0x2000, &[1, 2, 3, 4]);
        let gapped = SumRunWithGaps::new(LogicalAddr::from(0x1000u64), 0x3000, vec![inner]);

        let mut saw_gap = false;
        let mut saw_sum = false;
        gapped.walk(|_addr, sum| match sum {
            None => saw_gap = true,
            Some(_) => saw_sum = true,
        });
        assert!(saw_gap);
        assert!(saw_sum);
    }
}
