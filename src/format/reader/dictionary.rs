// Copyright 2023 Greptime Team
//
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

use bytes::Bytes;
use snafu::ensure;

use crate::error::{CorruptedSnafu, Result};

/// Read-only view over the sorted composite-key dictionary region.
///
/// Entries are unique, byte-lexicographically sorted strings of the form
/// `key` (sentinel) or `key \0 value`, addressed through an offset table.
/// Sort order is the sole means of lookup; every operation is a binary
/// search over the offset table.
pub struct StringDictionary {
    /// `num_entries + 1` big-endian `u32` offsets into `entry_bytes`.
    offsets: Bytes,
    entry_bytes: Bytes,
    num_entries: u32,
}

impl StringDictionary {
    pub fn new(region: Bytes) -> Result<StringDictionary> {
        ensure!(
            region.len() >= 4,
            CorruptedSnafu {
                reason: format!("dictionary region too short: {} bytes", region.len()),
            }
        );
        let num_entries = u32::from_be_bytes([region[0], region[1], region[2], region[3]]);
        let table_len = (num_entries as usize + 1) * 4;
        ensure!(
            region.len() >= 4 + table_len,
            CorruptedSnafu {
                reason: format!(
                    "dictionary offset table needs {} bytes, region holds {}",
                    4 + table_len,
                    region.len()
                ),
            }
        );
        let offsets = region.slice(4..4 + table_len);
        let entry_bytes = region.slice(4 + table_len..);
        Ok(StringDictionary {
            offsets,
            entry_bytes,
            num_entries,
        })
    }

    pub fn len(&self) -> u32 {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    fn offset(&self, index: u32) -> Result<usize> {
        let pos = index as usize * 4;
        let offset =
            u32::from_be_bytes([
                self.offsets[pos],
                self.offsets[pos + 1],
                self.offsets[pos + 2],
                self.offsets[pos + 3],
            ]) as usize;
        ensure!(
            offset <= self.entry_bytes.len(),
            CorruptedSnafu {
                reason: format!(
                    "dictionary offset {} exceeds entry area of {} bytes",
                    offset,
                    self.entry_bytes.len()
                ),
            }
        );
        Ok(offset)
    }

    /// Returns the raw bytes of entry `id`.
    pub fn entry(&self, id: u32) -> Result<&[u8]> {
        ensure!(
            id < self.num_entries,
            CorruptedSnafu {
                reason: format!("dictionary id {} out of {} entries", id, self.num_entries),
            }
        );
        let start = self.offset(id)?;
        let end = self.offset(id + 1)?;
        ensure!(
            start <= end,
            CorruptedSnafu {
                reason: format!("dictionary offsets not monotonic at id {id}"),
            }
        );
        Ok(&self.entry_bytes[start..end])
    }

    /// Binary search for `target`. `Ok(id)` on an exact hit, `Err(insertion
    /// point)` otherwise, mirroring `slice::binary_search`.
    pub fn binary_search(&self, target: &[u8]) -> Result<std::result::Result<u32, u32>> {
        let mut lo = 0;
        let mut hi = self.num_entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entry(mid)?.cmp(target) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    /// Returns the id of `target`, or `None` if absent.
    pub fn index_of(&self, target: &[u8]) -> Result<Option<u32>> {
        Ok(self.binary_search(target)?.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn build_region(entries: &[&[u8]]) -> Bytes {
        let mut region = Vec::new();
        region.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        let mut offset = 0u32;
        for entry in entries {
            region.extend_from_slice(&offset.to_be_bytes());
            offset += entry.len() as u32;
        }
        region.extend_from_slice(&offset.to_be_bytes());
        for entry in entries {
            region.extend_from_slice(entry);
        }
        Bytes::from(region)
    }

    #[test]
    fn test_entry_access() {
        let dict = StringDictionary::new(build_region(&[b"a", b"a\0x", b"b"])).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.entry(0).unwrap(), b"a");
        assert_eq!(dict.entry(1).unwrap(), b"a\0x");
        assert_eq!(dict.entry(2).unwrap(), b"b");
        assert!(matches!(dict.entry(3), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_binary_search() {
        let dict = StringDictionary::new(build_region(&[b"a", b"a\0x", b"a\0y", b"b"])).unwrap();
        assert_eq!(dict.binary_search(b"a").unwrap(), Ok(0));
        assert_eq!(dict.binary_search(b"a\0y").unwrap(), Ok(2));
        assert_eq!(dict.binary_search(b"a\0z").unwrap(), Err(3));
        assert_eq!(dict.binary_search(b"a\x01").unwrap(), Err(3));
        assert_eq!(dict.binary_search(b"c").unwrap(), Err(4));
        assert_eq!(dict.index_of(b"b").unwrap(), Some(3));
        assert_eq!(dict.index_of(b"missing").unwrap(), None);
    }

    #[test]
    fn test_truncated_region() {
        assert!(matches!(
            StringDictionary::new(Bytes::from_static(&[0, 0])),
            Err(Error::Corrupted { .. })
        ));
        // claims 4 entries but has no offset table
        assert!(matches!(
            StringDictionary::new(Bytes::from_static(&[0, 0, 0, 4])),
            Err(Error::Corrupted { .. })
        ));
    }
}
