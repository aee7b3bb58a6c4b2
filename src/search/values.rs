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

//! Projection of indexed key contents back to per-document values.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::error::Result;
use crate::search::evaluator::FilterEvaluator;
use crate::search::path::{normalize_key, resolve_array_indices};
use crate::search::predicate::FilterNode;

impl FilterEvaluator<'_> {
    /// For every value of `json_path`, returns the flattened doc ids
    /// carrying it, optionally restricted by `filter` (evaluated in
    /// flattened id space, with exclusive-at-root complement semantics)
    /// and by any concrete array indices in the path.
    pub fn matching_values_map(
        &self,
        json_path: &str,
        filter: Option<&FilterNode>,
    ) -> Result<HashMap<String, RoaringBitmap>> {
        let index = self.index();
        let filter_doc_ids = filter
            .map(|filter| self.matching_flattened_doc_ids(filter))
            .transpose()?;

        let mut result = HashMap::new();
        let key = normalize_key(json_path, index.version());
        let resolved = resolve_array_indices(index, key)?;
        if let Some(constraint) = &resolved.constraint {
            if constraint.is_empty() {
                return Ok(result);
            }
        }
        let Some(key) = resolved.key else {
            return Ok(result);
        };
        let Some(dict_ids) = index.dict_id_range_for_key(key.as_bytes())? else {
            return Ok(result);
        };

        let suffix_start = key.len() + 1;
        for (scanned, dict_id) in dict_ids.enumerate() {
            self.check_cancellation(scanned)?;
            let mut doc_ids = index.postings().postings(dict_id)?;
            if let Some(filter_doc_ids) = &filter_doc_ids {
                doc_ids &= filter_doc_ids;
            }
            if let Some(constraint) = &resolved.constraint {
                doc_ids &= constraint.as_bitmap();
            }
            if !doc_ids.is_empty() {
                let entry = index.dictionary().entry(dict_id)?;
                let value = String::from_utf8_lossy(&entry[suffix_start..]).into_owned();
                result.insert(value, doc_ids);
            }
        }
        Ok(result)
    }

    /// Projects each bitmap of a value map from flattened to original doc
    /// ids, dropping values whose projection is empty.
    pub fn to_original_values_map(
        &self,
        value_map: HashMap<String, RoaringBitmap>,
    ) -> Result<HashMap<String, RoaringBitmap>> {
        let index = self.index();
        let mut result = HashMap::with_capacity(value_map.len());
        for (value, flattened) in value_map {
            let doc_ids = index.to_original_ids(&flattened)?;
            if !doc_ids.is_empty() {
                result.insert(value, doc_ids);
            }
        }
        Ok(result)
    }

    /// Multi-valued extraction: for each requested original doc id, every
    /// value of the key present in that doc, ordered by flattened doc id
    /// (document order).
    pub fn values_mv(
        &self,
        doc_ids: &[u32],
        value_map: &HashMap<String, RoaringBitmap>,
    ) -> Result<Vec<Vec<String>>> {
        let index = self.index();
        let position_of: HashMap<u32, usize> = doc_ids
            .iter()
            .enumerate()
            .map(|(position, doc_id)| (*doc_id, position))
            .collect();

        let mut collected: Vec<Vec<(u32, &str)>> = vec![Vec::new(); doc_ids.len()];
        for (value, flattened) in value_map {
            for flattened_doc_id in flattened {
                let doc_id = index.doc_id(flattened_doc_id)?;
                if let Some(position) = position_of.get(&doc_id) {
                    collected[*position].push((flattened_doc_id, value.as_str()));
                }
            }
        }

        Ok(collected
            .into_iter()
            .map(|mut values| {
                values.sort_unstable_by_key(|(flattened_doc_id, _)| *flattened_doc_id);
                values
                    .into_iter()
                    .map(|(_, value)| value.to_string())
                    .collect()
            })
            .collect())
    }

    /// Single-valued extraction: for each requested original doc id, one
    /// value of the key, or `None` when the doc has none.
    ///
    /// When a doc carries several matching values, the tie-break is
    /// deterministic: with flattened-id bitmaps the value on the lowest
    /// flattened doc id wins; with original-id bitmaps the
    /// lexicographically smallest value wins.
    pub fn values_sv(
        &self,
        doc_ids: &[u32],
        value_map: &HashMap<String, RoaringBitmap>,
        flattened: bool,
    ) -> Result<Vec<Option<String>>> {
        let index = self.index();
        let mask: RoaringBitmap = doc_ids.iter().copied().collect();
        // (tie-break rank, value) per doc id
        let mut chosen: HashMap<u32, (u32, &str)> = HashMap::with_capacity(doc_ids.len());

        let mut values: Vec<&String> = value_map.keys().collect();
        values.sort_unstable();
        for (rank, value) in values.into_iter().enumerate() {
            let matching = &value_map[value];
            if flattened {
                for flattened_doc_id in matching {
                    let doc_id = index.doc_id(flattened_doc_id)?;
                    if !mask.contains(doc_id) {
                        continue;
                    }
                    match chosen.get(&doc_id) {
                        Some((lowest, _)) if *lowest <= flattened_doc_id => {}
                        _ => {
                            chosen.insert(doc_id, (flattened_doc_id, value.as_str()));
                        }
                    }
                }
            } else {
                let intersection = matching & &mask;
                for doc_id in intersection {
                    // values iterated in sorted order, first one wins
                    chosen.entry(doc_id).or_insert((rank as u32, value.as_str()));
                }
            }
        }

        Ok(doc_ids
            .iter()
            .map(|doc_id| chosen.get(doc_id).map(|(_, value)| value.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::format::reader::JsonIndexReader;
    use crate::format::writer::JsonIndexWriter;
    use crate::format::FormatVersion;

    // doc0 flattens to f0 (b=1) and f1 (b=2), doc1 to f2 (b=2), doc2 to
    // f3 (b=3, under the object path ".a.b" rather than ".a..b")
    fn sample_index() -> JsonIndexReader {
        let docs = [
            json!({"a": [{"b": 1}, {"b": 2}]}),
            json!({"a": [{"b": 2}]}),
            json!({"a": {"b": 3}}),
        ];
        let mut writer = JsonIndexWriter::new(FormatVersion::V2);
        for doc in &docs {
            writer.add_document(doc).unwrap();
        }
        let blob = writer.finish().unwrap();
        JsonIndexReader::new(blob, docs.len() as u32).unwrap()
    }

    fn bitmap_of(values: &[u32]) -> RoaringBitmap {
        values.iter().copied().collect()
    }

    #[test]
    fn test_matching_values_map() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let map = evaluator.matching_values_map("a[*].b", None).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"], bitmap_of(&[0]));
        assert_eq!(map["2"], bitmap_of(&[1, 2]));

        assert!(evaluator.matching_values_map("$.nope", None).unwrap().is_empty());
    }

    #[test]
    fn test_matching_values_map_with_filter() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let filter = FilterNode::eq("a[*].b", "2");
        let map = evaluator
            .matching_values_map("a[*].b", Some(&filter))
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["2"], bitmap_of(&[1, 2]));
    }

    #[test]
    fn test_matching_values_map_with_index_constraint() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        // first array element of each doc: f0 and f2
        let map = evaluator.matching_values_map("a[0].b", None).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"], bitmap_of(&[0]));
        assert_eq!(map["2"], bitmap_of(&[2]));
    }

    #[test]
    fn test_matching_values_map_with_exclusive_filter() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        // no doc carries the key, so the complement covers every flattened
        // doc and the map equals the unfiltered one
        let filter = FilterNode::is_null("$.missing");
        let filtered = evaluator
            .matching_values_map("a[*].b", Some(&filter))
            .unwrap();
        let unfiltered = evaluator.matching_values_map("a[*].b", None).unwrap();
        assert_eq!(filtered, unfiltered);
    }

    #[test]
    fn test_to_original_values_map() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let map = evaluator.matching_values_map("a[*].b", None).unwrap();
        let map = evaluator.to_original_values_map(map).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"], bitmap_of(&[0]));
        assert_eq!(map["2"], bitmap_of(&[0, 1]));
    }

    #[test]
    fn test_values_mv_preserves_document_order() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let map = evaluator.matching_values_map("a[*].b", None).unwrap();
        let values = evaluator.values_mv(&[0, 1, 2], &map).unwrap();
        assert_eq!(
            values,
            vec![
                vec!["1".to_string(), "2".to_string()],
                vec!["2".to_string()],
                vec![],
            ]
        );
        // requested order is honored, not doc id order
        let values = evaluator.values_mv(&[1, 0], &map).unwrap();
        assert_eq!(
            values,
            vec![
                vec!["2".to_string()],
                vec!["1".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_values_sv_flattened_lowest_id_wins() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let map = evaluator.matching_values_map("a[*].b", None).unwrap();
        let values = evaluator.values_sv(&[0, 1, 2], &map, true).unwrap();
        // doc0 has both "1" (f0) and "2" (f1); f0 wins
        assert_eq!(
            values,
            vec![Some("1".to_string()), Some("2".to_string()), None]
        );
    }

    #[test]
    fn test_values_sv_original_smallest_value_wins() {
        let index = sample_index();
        let evaluator = FilterEvaluator::new(&index);
        let map = evaluator.matching_values_map("a[*].b", None).unwrap();
        let map = evaluator.to_original_values_map(map).unwrap();
        let values = evaluator.values_sv(&[0, 1, 2], &map, false).unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), Some("2".to_string()), None]
        );
    }
}
