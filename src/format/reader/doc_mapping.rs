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

/// Read-only view over the doc-id-mapping region: a little-endian `u32`
/// array indexed by flattened doc id, giving the originating original doc
/// id. Several flattened docs may map to the same original doc.
pub struct DocIdMapping {
    data: Bytes,
}

impl DocIdMapping {
    pub fn new(region: Bytes) -> Result<DocIdMapping> {
        ensure!(
            region.len() % 4 == 0,
            CorruptedSnafu {
                reason: format!("doc-id-mapping length {} not a multiple of 4", region.len()),
            }
        );
        Ok(DocIdMapping { data: region })
    }

    pub fn num_flattened_docs(&self) -> u32 {
        (self.data.len() / 4) as u32
    }

    /// Returns the original doc id for `flattened_doc_id`.
    pub fn doc_id(&self, flattened_doc_id: u32) -> Result<u32> {
        let pos = flattened_doc_id as usize * 4;
        ensure!(
            pos + 4 <= self.data.len(),
            CorruptedSnafu {
                reason: format!(
                    "flattened doc id {} out of {} mapped docs",
                    flattened_doc_id,
                    self.num_flattened_docs()
                ),
            }
        );
        Ok(u32::from_le_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]))
    }
}
