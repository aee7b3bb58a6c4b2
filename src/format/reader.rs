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

pub mod dictionary;
pub mod doc_mapping;
pub mod postings;

use std::ops::Range;

use bytes::Bytes;
use roaring::RoaringBitmap;
use snafu::{ensure, OptionExt};

use crate::error::{CorruptedSnafu, Result};
use crate::format::reader::dictionary::StringDictionary;
use crate::format::reader::doc_mapping::DocIdMapping;
use crate::format::reader::postings::PostingStore;
use crate::format::{FormatVersion, HEADER_LENGTH, KEY_VALUE_SEPARATOR_NEXT};

/// Reader over an immutable json index blob.
///
/// Opening is O(1): the header is parsed, the version validated, and three
/// read-only sub-views are sliced out of the shared buffer. Region contents
/// are never scanned or copied at open time. The blob's lifetime belongs to
/// the caller; dropping the reader never invalidates the backing buffer.
///
/// The reader is immutable after construction, so concurrent evaluations
/// may share it freely without locking.
pub struct JsonIndexReader {
    version: FormatVersion,
    num_docs: u32,
    max_entry_len: u32,
    dictionary: StringDictionary,
    postings: PostingStore,
    doc_mapping: DocIdMapping,
}

impl JsonIndexReader {
    /// Opens a reader over `blob`, an index over `num_docs` original docs.
    pub fn new(blob: Bytes, num_docs: u32) -> Result<JsonIndexReader> {
        ensure!(
            blob.len() >= HEADER_LENGTH,
            CorruptedSnafu {
                reason: format!(
                    "blob of {} bytes is shorter than the {HEADER_LENGTH}-byte header",
                    blob.len()
                ),
            }
        );
        let version_tag = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]);
        let version = FormatVersion::from_tag(version_tag)?;
        let max_entry_len = u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]);
        let dictionary_len = read_u64_be(&blob, 8)?;
        let postings_len = read_u64_be(&blob, 16)?;
        let doc_mapping_len = read_u64_be(&blob, 24)?;

        let dictionary_end = HEADER_LENGTH + dictionary_len;
        let postings_end = dictionary_end + postings_len;
        let doc_mapping_end = postings_end + doc_mapping_len;
        ensure!(
            doc_mapping_end <= blob.len(),
            CorruptedSnafu {
                reason: format!(
                    "regions end at byte {doc_mapping_end} but blob holds {} bytes",
                    blob.len()
                ),
            }
        );

        let dictionary = StringDictionary::new(blob.slice(HEADER_LENGTH..dictionary_end))?;
        let postings = PostingStore::new(blob.slice(dictionary_end..postings_end))?;
        let doc_mapping = DocIdMapping::new(blob.slice(postings_end..doc_mapping_end))?;
        ensure!(
            dictionary.len() == postings.len(),
            CorruptedSnafu {
                reason: format!(
                    "dictionary has {} entries but posting store has {} bitmaps",
                    dictionary.len(),
                    postings.len()
                ),
            }
        );

        Ok(JsonIndexReader {
            version,
            num_docs,
            max_entry_len,
            dictionary,
            postings,
            doc_mapping,
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn num_flattened_docs(&self) -> u32 {
        self.doc_mapping.num_flattened_docs()
    }

    /// Length in bytes of the longest dictionary entry.
    ///
    /// This reader decodes entries zero-copy and never needs it; the field
    /// is carried for consumers that copy entries into fixed scratch
    /// buffers, which must size them from the header before reading.
    pub fn max_entry_len(&self) -> u32 {
        self.max_entry_len
    }

    pub fn dictionary(&self) -> &StringDictionary {
        &self.dictionary
    }

    pub fn postings(&self) -> &PostingStore {
        &self.postings
    }

    /// Returns the original doc id of `flattened_doc_id`.
    pub fn doc_id(&self, flattened_doc_id: u32) -> Result<u32> {
        self.doc_mapping.doc_id(flattened_doc_id)
    }

    /// Projects a set of flattened doc ids to the (possibly smaller) set of
    /// original doc ids.
    pub fn to_original_ids(&self, flattened: &RoaringBitmap) -> Result<RoaringBitmap> {
        let mut doc_ids = RoaringBitmap::new();
        for flattened_doc_id in flattened {
            doc_ids.insert(self.doc_mapping.doc_id(flattened_doc_id)?);
        }
        Ok(doc_ids)
    }

    /// Returns the dictionary id range spanning every value of `key`, or
    /// `None` if the key is absent.
    ///
    /// Two binary searches: the bare key sentinel marks the start (offset by
    /// one to skip the sentinel itself), and `key \x01`, the smallest string
    /// greater than every `key \0 value`, marks the exclusive end.
    pub fn dict_id_range_for_key(&self, key: &[u8]) -> Result<Option<Range<u32>>> {
        let Some(key_id) = self.dictionary.index_of(key)? else {
            return Ok(None);
        };
        let mut upper = Vec::with_capacity(key.len() + 1);
        upper.extend_from_slice(key);
        upper.push(KEY_VALUE_SEPARATOR_NEXT);
        let end = match self.dictionary.binary_search(&upper)? {
            Ok(id) => id,
            Err(insertion) => insertion,
        };
        Ok(Some(key_id + 1..end))
    }
}

fn read_u64_be(blob: &Bytes, offset: usize) -> Result<usize> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&blob[offset..offset + 8]);
    let value = u64::from_be_bytes(raw);
    usize::try_from(value).ok().with_context(|| CorruptedSnafu {
        reason: format!("region length {value} at header offset {offset} overflows usize"),
    })
}
