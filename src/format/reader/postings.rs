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
use roaring::RoaringBitmap;
use snafu::{ensure, ResultExt};

use crate::error::{CorruptedSnafu, DeserializeBitmapSnafu, Result};

/// Read-only view over the posting-store region: one roaring-serialized
/// bitmap of flattened doc ids per dictionary id, addressed through an
/// offset table.
pub struct PostingStore {
    /// `num_bitmaps + 1` big-endian `u32` offsets into `bitmap_bytes`.
    offsets: Bytes,
    bitmap_bytes: Bytes,
    num_bitmaps: u32,
}

impl PostingStore {
    pub fn new(region: Bytes) -> Result<PostingStore> {
        ensure!(
            region.len() >= 4,
            CorruptedSnafu {
                reason: format!("posting-store region too short: {} bytes", region.len()),
            }
        );
        let num_bitmaps = u32::from_be_bytes([region[0], region[1], region[2], region[3]]);
        let table_len = (num_bitmaps as usize + 1) * 4;
        ensure!(
            region.len() >= 4 + table_len,
            CorruptedSnafu {
                reason: format!(
                    "posting-store offset table needs {} bytes, region holds {}",
                    4 + table_len,
                    region.len()
                ),
            }
        );
        let offsets = region.slice(4..4 + table_len);
        let bitmap_bytes = region.slice(4 + table_len..);
        Ok(PostingStore {
            offsets,
            bitmap_bytes,
            num_bitmaps,
        })
    }

    pub fn len(&self) -> u32 {
        self.num_bitmaps
    }

    pub fn is_empty(&self) -> bool {
        self.num_bitmaps == 0
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
            offset <= self.bitmap_bytes.len(),
            CorruptedSnafu {
                reason: format!(
                    "posting offset {} exceeds bitmap area of {} bytes",
                    offset,
                    self.bitmap_bytes.len()
                ),
            }
        );
        Ok(offset)
    }

    /// Deserializes the posting bitmap of dictionary id `id`.
    pub fn postings(&self, id: u32) -> Result<RoaringBitmap> {
        ensure!(
            id < self.num_bitmaps,
            CorruptedSnafu {
                reason: format!("posting id {} out of {} bitmaps", id, self.num_bitmaps),
            }
        );
        let start = self.offset(id)?;
        let end = self.offset(id + 1)?;
        ensure!(
            start <= end,
            CorruptedSnafu {
                reason: format!("posting offsets not monotonic at id {id}"),
            }
        );
        RoaringBitmap::deserialize_from(&self.bitmap_bytes[start..end])
            .context(DeserializeBitmapSnafu)
    }
}
