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

pub mod flatten;

use std::collections::BTreeMap;

use bytes::Bytes;
use roaring::RoaringBitmap;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{Result, SerializeBitmapSnafu};
use crate::format::{FormatVersion, KEY_VALUE_SEPARATOR};

/// Writer producing an immutable json index blob in the format documented
/// in [`crate::format`].
///
/// Documents are flattened under the version's key grammar; each flattened
/// doc gets the next flattened doc id, an entry in the doc-id mapping, and
/// a posting under both the bare-key sentinel and the `key \0 value` entry
/// for every leaf it carries. A `BTreeMap` accumulator keeps the dictionary
/// sorted and the postings in id order for free.
pub struct JsonIndexWriter {
    version: FormatVersion,
    postings: BTreeMap<Vec<u8>, RoaringBitmap>,
    doc_id_mapping: Vec<u32>,
    next_doc_id: u32,
    max_entry_len: u32,
}

impl JsonIndexWriter {
    pub fn new(version: FormatVersion) -> JsonIndexWriter {
        JsonIndexWriter {
            version,
            postings: BTreeMap::new(),
            doc_id_mapping: Vec::new(),
            next_doc_id: 0,
            max_entry_len: 0,
        }
    }

    /// Flattens `doc` and indexes its leaves under the next original doc id.
    pub fn add_document(&mut self, doc: &Value) -> Result<()> {
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;

        for record in flatten::flatten(doc, self.version) {
            let flattened_doc_id = self.doc_id_mapping.len() as u32;
            self.doc_id_mapping.push(doc_id);
            for (key, value) in record {
                let mut entry = key.into_bytes();
                self.add_posting(entry.clone(), flattened_doc_id);
                entry.push(KEY_VALUE_SEPARATOR);
                entry.extend_from_slice(value.as_bytes());
                self.add_posting(entry, flattened_doc_id);
            }
        }
        Ok(())
    }

    fn add_posting(&mut self, entry: Vec<u8>, flattened_doc_id: u32) {
        self.max_entry_len = self.max_entry_len.max(entry.len() as u32);
        self.postings
            .entry(entry)
            .or_default()
            .insert(flattened_doc_id);
    }

    /// Number of original documents added so far.
    pub fn num_docs(&self) -> u32 {
        self.next_doc_id
    }

    /// Serializes the accumulated index into a blob.
    pub fn finish(self) -> Result<Bytes> {
        let num_entries = self.postings.len() as u32;

        let mut dict_offsets = Vec::with_capacity(self.postings.len() + 1);
        let mut dict_bytes = Vec::new();
        let mut posting_offsets = Vec::with_capacity(self.postings.len() + 1);
        let mut posting_bytes = Vec::new();
        dict_offsets.push(0u32);
        posting_offsets.push(0u32);
        for (entry, bitmap) in &self.postings {
            dict_bytes.extend_from_slice(entry);
            dict_offsets.push(dict_bytes.len() as u32);
            bitmap
                .serialize_into(&mut posting_bytes)
                .context(SerializeBitmapSnafu)?;
            posting_offsets.push(posting_bytes.len() as u32);
        }

        let dictionary_len = 4 + dict_offsets.len() * 4 + dict_bytes.len();
        let postings_len = 4 + posting_offsets.len() * 4 + posting_bytes.len();
        let doc_mapping_len = self.doc_id_mapping.len() * 4;

        let mut blob =
            Vec::with_capacity(crate::format::HEADER_LENGTH + dictionary_len + postings_len + doc_mapping_len);
        blob.extend_from_slice(&self.version.tag().to_be_bytes());
        blob.extend_from_slice(&self.max_entry_len.to_be_bytes());
        blob.extend_from_slice(&(dictionary_len as u64).to_be_bytes());
        blob.extend_from_slice(&(postings_len as u64).to_be_bytes());
        blob.extend_from_slice(&(doc_mapping_len as u64).to_be_bytes());

        blob.extend_from_slice(&num_entries.to_be_bytes());
        for offset in &dict_offsets {
            blob.extend_from_slice(&offset.to_be_bytes());
        }
        blob.extend_from_slice(&dict_bytes);

        blob.extend_from_slice(&num_entries.to_be_bytes());
        for offset in &posting_offsets {
            blob.extend_from_slice(&offset.to_be_bytes());
        }
        blob.extend_from_slice(&posting_bytes);

        for doc_id in &self.doc_id_mapping {
            blob.extend_from_slice(&doc_id.to_le_bytes());
        }

        Ok(Bytes::from(blob))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::format::reader::JsonIndexReader;

    #[test]
    fn test_write_then_read_back() {
        let mut writer = JsonIndexWriter::new(FormatVersion::V2);
        writer.add_document(&json!({"a": "x", "b": 1})).unwrap();
        writer.add_document(&json!({"a": "y"})).unwrap();
        assert_eq!(writer.num_docs(), 2);
        let blob = writer.finish().unwrap();

        let reader = JsonIndexReader::new(blob, 2).unwrap();
        assert_eq!(reader.num_flattened_docs(), 2);

        // sentinel + one entry per distinct value, for both keys
        let dict = reader.dictionary();
        assert_eq!(dict.index_of(b".a").unwrap(), Some(0));
        assert_eq!(dict.index_of(b".a\0x").unwrap(), Some(1));
        assert_eq!(dict.index_of(b".a\0y").unwrap(), Some(2));
        assert_eq!(dict.index_of(b".b").unwrap(), Some(3));
        assert_eq!(dict.index_of(b".b\x001").unwrap(), Some(4));
        assert_eq!(dict.len(), 5);

        // sentinel postings are the union over the key's values
        let all_a = reader.postings().postings(0).unwrap();
        assert_eq!(all_a, [0u32, 1].into_iter().collect());
        let a_x = reader.postings().postings(1).unwrap();
        assert_eq!(a_x, [0u32].into_iter().collect());
    }

    #[test]
    fn test_max_entry_len_recorded() {
        let mut writer = JsonIndexWriter::new(FormatVersion::V2);
        writer.add_document(&json!({"key": "0123456789"})).unwrap();
        let blob = writer.finish().unwrap();
        let reader = JsonIndexReader::new(blob, 1).unwrap();
        // ".key" + '\0' + "0123456789"
        assert_eq!(reader.max_entry_len(), 15);
    }

    #[test]
    fn test_doc_with_no_indexable_leaves() {
        let mut writer = JsonIndexWriter::new(FormatVersion::V2);
        writer.add_document(&json!({"a": null})).unwrap();
        writer.add_document(&json!({"a": 1})).unwrap();
        let blob = writer.finish().unwrap();
        let reader = JsonIndexReader::new(blob, 2).unwrap();
        // the null-only doc expands to one flattened doc with no postings
        assert_eq!(reader.num_flattened_docs(), 2);
        assert_eq!(reader.doc_id(0).unwrap(), 0);
        assert_eq!(reader.doc_id(1).unwrap(), 1);
    }
}
