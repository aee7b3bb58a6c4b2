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

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use roaring::RoaringBitmap;
use snafu::{ensure, ResultExt};
use tracing::debug;

use crate::bitmap::Bitmap;
use crate::error::{CancelledSnafu, InvalidFilterSnafu, ParseRegexSnafu, Result};
use crate::format::reader::JsonIndexReader;
use crate::format::KEY_VALUE_SEPARATOR;
use crate::search::path::{normalize_key, resolve_array_indices};
use crate::search::predicate::{
    Bound, FilterNode, Predicate, PredicateKind, RangePredicate, RangeValueType,
};

/// Cooperative cancellation signal shared with the host query engine.
/// Linear dictionary scans poll it periodically and abort cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> CancellationFlag {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How many scan candidates are processed between cancellation polls.
const CANCELLATION_CHECK_INTERVAL: usize = 1024;

/// Evaluates filter trees against a [`JsonIndexReader`].
///
/// Evaluation is a pure recursive walk over AND/OR/predicate nodes,
/// computing a flattened-doc-id bitmap and projecting it to original doc
/// ids at the root. All intermediate bitmaps are owned by the single
/// evaluation call that created them.
pub struct FilterEvaluator<'a> {
    index: &'a JsonIndexReader,
    cancellation: Option<CancellationFlag>,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(index: &'a JsonIndexReader) -> FilterEvaluator<'a> {
        FilterEvaluator {
            index,
            cancellation: None,
        }
    }

    pub fn with_cancellation(
        index: &'a JsonIndexReader,
        cancellation: CancellationFlag,
    ) -> FilterEvaluator<'a> {
        FilterEvaluator {
            index,
            cancellation: Some(cancellation),
        }
    }

    pub fn index(&self) -> &'a JsonIndexReader {
        self.index
    }

    /// Returns the original doc ids matching `filter`.
    ///
    /// An exclusive predicate (IS_NULL) is only legal at the root: its
    /// inclusive form is evaluated, projected to original ids, and
    /// complemented against `[0, num_docs)`.
    pub fn matching_doc_ids(&self, filter: &FilterNode) -> Result<RoaringBitmap> {
        match filter {
            FilterNode::Predicate(predicate) if predicate.kind.is_exclusive() => {
                let flattened = self.predicate_flattened_doc_ids(predicate)?;
                let matched = self.index.to_original_ids(flattened.as_bitmap())?;
                let mut result = RoaringBitmap::new();
                result.insert_range(0..self.index.num_docs());
                result -= &matched;
                Ok(result)
            }
            _ => {
                let flattened = self.flattened_doc_ids(filter)?;
                self.index.to_original_ids(flattened.as_bitmap())
            }
        }
    }

    /// Returns the matching flattened doc ids, handling an exclusive root
    /// predicate by complementing over `[0, num_flattened_docs)`. Used by
    /// value extraction, where results stay in flattened id space.
    pub(crate) fn matching_flattened_doc_ids(&self, filter: &FilterNode) -> Result<RoaringBitmap> {
        match filter {
            FilterNode::Predicate(predicate) if predicate.kind.is_exclusive() => {
                let flattened = self.predicate_flattened_doc_ids(predicate)?;
                let mut result = RoaringBitmap::new();
                result.insert_range(0..self.index.num_flattened_docs());
                result -= flattened.as_bitmap();
                Ok(result)
            }
            _ => Ok(self.flattened_doc_ids(filter)?.into_owned()),
        }
    }

    /// Recursive AND/OR/predicate walk over flattened doc ids.
    fn flattened_doc_ids(&self, filter: &FilterNode) -> Result<Bitmap<'static>> {
        match filter {
            FilterNode::And(children) => {
                ensure!(
                    !children.is_empty(),
                    InvalidFilterSnafu {
                        reason: "AND filter without children",
                    }
                );
                let mut matching = self.flattened_doc_ids(&children[0])?;
                for child in &children[1..] {
                    // nothing left to intersect away
                    if matching.is_empty() {
                        break;
                    }
                    let child_docs = self.flattened_doc_ids(child)?;
                    if child_docs.is_empty() {
                        // return the empty child directly instead of
                        // materializing the accumulator as mutable
                        return Ok(child_docs);
                    }
                    matching.and(child_docs.as_bitmap());
                }
                Ok(matching)
            }
            FilterNode::Or(children) => {
                ensure!(
                    !children.is_empty(),
                    InvalidFilterSnafu {
                        reason: "OR filter without children",
                    }
                );
                let mut matching = self.flattened_doc_ids(&children[0])?;
                for child in &children[1..] {
                    let child_docs = self.flattened_doc_ids(child)?;
                    // skip without forcing the accumulator mutable
                    if child_docs.is_empty() {
                        continue;
                    }
                    matching.or(child_docs.as_bitmap());
                }
                Ok(matching)
            }
            FilterNode::Predicate(predicate) => {
                ensure!(
                    !predicate.kind.is_exclusive(),
                    InvalidFilterSnafu {
                        reason: format!(
                            "exclusive predicate on key {:?} cannot be nested",
                            predicate.key
                        ),
                    }
                );
                self.predicate_flattened_doc_ids(predicate)
            }
            FilterNode::Constant(value) => InvalidFilterSnafu {
                reason: format!("constant filter: {value}"),
            }
            .fail(),
        }
    }

    /// Evaluates one predicate to a flattened-doc-id bitmap.
    ///
    /// An exclusive predicate is evaluated in its inclusive form; the
    /// caller complements the projected result.
    fn predicate_flattened_doc_ids(&self, predicate: &Predicate) -> Result<Bitmap<'static>> {
        let key = normalize_key(&predicate.key, self.index.version());
        let resolved = resolve_array_indices(self.index, key)?;
        if let Some(constraint) = &resolved.constraint {
            if constraint.is_empty() {
                return Ok(Bitmap::empty());
            }
        }
        let Some(key) = resolved.key else {
            return Ok(Bitmap::empty());
        };

        let result = match &predicate.kind {
            PredicateKind::Eq { value } => self.eval_eq(&key, value)?,
            PredicateKind::NotEq { value } => self.eval_not_eq(&key, value)?,
            PredicateKind::In { values } => self.eval_in(&key, values)?,
            PredicateKind::NotIn { values } => self.eval_not_in(&key, values)?,
            PredicateKind::IsNull | PredicateKind::IsNotNull => self.eval_key_exists(&key)?,
            PredicateKind::RegexMatch { pattern } => self.eval_regex(&key, pattern)?,
            PredicateKind::Range(range) => self.eval_range(&key, range)?,
        };

        Ok(apply_constraint(result, resolved.constraint))
    }

    fn eval_eq(&self, key: &str, value: &str) -> Result<Option<Bitmap<'static>>> {
        match self.index.dictionary().index_of(&entry_of(key, value))? {
            Some(dict_id) => Ok(Some(self.index.postings().postings(dict_id)?.into())),
            None => Ok(None),
        }
    }

    fn eval_not_eq(&self, key: &str, value: &str) -> Result<Option<Bitmap<'static>>> {
        // every flattened doc holds exactly one value per key, so the
        // per-value posting sets are disjoint and the sentinel bitmap minus
        // the excluded value's bitmap is exact
        let Some(all_values_id) = self.index.dictionary().index_of(key.as_bytes())? else {
            // nothing to be "not equal" to
            return Ok(None);
        };
        let all_values = self.index.postings().postings(all_values_id)?;
        if all_values.is_empty() {
            return Ok(None);
        }
        match self.index.dictionary().index_of(&entry_of(key, value))? {
            Some(excluded_id) => {
                let excluded = self.index.postings().postings(excluded_id)?;
                if excluded.is_empty() {
                    Ok(Some(all_values.into()))
                } else {
                    let mut result = Bitmap::Owned(all_values);
                    result.and_not(&excluded);
                    Ok(Some(result))
                }
            }
            None => Ok(Some(all_values.into())),
        }
    }

    fn eval_in(&self, key: &str, values: &[String]) -> Result<Option<Bitmap<'static>>> {
        let mut result: Option<Bitmap<'static>> = None;
        for value in values {
            let Some(dict_id) = self.index.dictionary().index_of(&entry_of(key, value))? else {
                continue;
            };
            let doc_ids = self.index.postings().postings(dict_id)?;
            match &mut result {
                None => result = Some(doc_ids.into()),
                Some(matching) => matching.or(&doc_ids),
            }
        }
        Ok(result)
    }

    fn eval_not_in(&self, key: &str, values: &[String]) -> Result<Option<Bitmap<'static>>> {
        let Some(dict_ids) = self.index.dict_id_range_for_key(key.as_bytes())? else {
            return Ok(None);
        };
        let value_count = dict_ids.len();

        if values.len() < value_count / 2 {
            // few exclusions: start from the all-values sentinel and
            // subtract each excluded value's postings
            let Some(all_values_id) = self.index.dictionary().index_of(key.as_bytes())? else {
                return Ok(None);
            };
            let all_values = self.index.postings().postings(all_values_id)?;
            if all_values.is_empty() {
                return Ok(None);
            }
            let mut result = Bitmap::Owned(all_values);
            for value in values {
                if let Some(dict_id) = self.index.dictionary().index_of(&entry_of(key, value))? {
                    result.and_not(&self.index.postings().postings(dict_id)?);
                }
            }
            Ok(Some(result))
        } else {
            // many exclusions: union every non-excluded id in the key's
            // range; excluded values are resolved to ids once up front
            let mut excluded_ids = HashSet::with_capacity(values.len());
            for value in values {
                if let Some(dict_id) = self.index.dictionary().index_of(&entry_of(key, value))? {
                    excluded_ids.insert(dict_id);
                }
            }
            let mut result: Option<Bitmap<'static>> = None;
            for (scanned, dict_id) in dict_ids.enumerate() {
                self.check_cancellation(scanned)?;
                if excluded_ids.contains(&dict_id) {
                    continue;
                }
                let doc_ids = self.index.postings().postings(dict_id)?;
                match &mut result {
                    None => result = Some(doc_ids.into()),
                    Some(matching) => matching.or(&doc_ids),
                }
            }
            Ok(result)
        }
    }

    fn eval_key_exists(&self, key: &str) -> Result<Option<Bitmap<'static>>> {
        match self.index.dictionary().index_of(key.as_bytes())? {
            Some(dict_id) => Ok(Some(self.index.postings().postings(dict_id)?.into())),
            None => Ok(None),
        }
    }

    fn eval_regex(&self, key: &str, pattern: &str) -> Result<Option<Bitmap<'static>>> {
        let Some(dict_ids) = self.index.dict_id_range_for_key(key.as_bytes())? else {
            return Ok(None);
        };
        // full-match semantics, compiled once for the whole scan
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .with_context(|_| ParseRegexSnafu { pattern })?;
        debug!(key, candidates = dict_ids.len(), "regex scan over dictionary range");

        let suffix_start = key.len() + 1;
        let mut result: Option<Bitmap<'static>> = None;
        for (scanned, dict_id) in dict_ids.enumerate() {
            self.check_cancellation(scanned)?;
            let entry = self.index.dictionary().entry(dict_id)?;
            let matched = std::str::from_utf8(&entry[suffix_start..])
                .map(|value| regex.is_match(value))
                .unwrap_or(false);
            if matched {
                let doc_ids = self.index.postings().postings(dict_id)?;
                match &mut result {
                    None => result = Some(doc_ids.into()),
                    Some(matching) => matching.or(&doc_ids),
                }
            }
        }
        Ok(result)
    }

    fn eval_range(&self, key: &str, range: &RangePredicate) -> Result<Option<Bitmap<'static>>> {
        let Some(dict_ids) = self.index.dict_id_range_for_key(key.as_bytes())? else {
            return Ok(None);
        };
        let comparator = RangeComparator::compile(range)?;
        debug!(key, candidates = dict_ids.len(), "range scan over dictionary range");

        let suffix_start = key.len() + 1;
        let mut result: Option<Bitmap<'static>> = None;
        for (scanned, dict_id) in dict_ids.enumerate() {
            self.check_cancellation(scanned)?;
            let entry = self.index.dictionary().entry(dict_id)?;
            let matched = std::str::from_utf8(&entry[suffix_start..])
                .map(|value| comparator.contains(value))
                .unwrap_or(false);
            if matched {
                let doc_ids = self.index.postings().postings(dict_id)?;
                match &mut result {
                    None => result = Some(doc_ids.into()),
                    Some(matching) => matching.or(&doc_ids),
                }
            }
        }
        Ok(result)
    }

    pub(crate) fn check_cancellation(&self, scanned: usize) -> Result<()> {
        if scanned % CANCELLATION_CHECK_INTERVAL == 0 {
            if let Some(flag) = &self.cancellation {
                ensure!(!flag.is_cancelled(), CancelledSnafu);
            }
        }
        Ok(())
    }
}

/// Builds the dictionary entry `key \0 value`.
pub(crate) fn entry_of(key: &str, value: &str) -> Vec<u8> {
    let mut entry = Vec::with_capacity(key.len() + 1 + value.len());
    entry.extend_from_slice(key.as_bytes());
    entry.push(KEY_VALUE_SEPARATOR);
    entry.extend_from_slice(value.as_bytes());
    entry
}

/// Combines a predicate result with the array-index constraint. A missing
/// result is the shared empty bitmap; a missing constraint passes the
/// result through unchanged.
fn apply_constraint(
    result: Option<Bitmap<'static>>,
    constraint: Option<Bitmap<'static>>,
) -> Bitmap<'static> {
    match (result, constraint) {
        (None, _) => Bitmap::empty(),
        (Some(result), None) => result,
        (Some(result), Some(mut constraint)) => {
            constraint.and(result.as_bitmap());
            constraint
        }
    }
}

/// Range bounds compiled to their effective comparison domain.
enum RangeComparator {
    Numeric {
        lower: Option<(f64, bool)>,
        upper: Option<(f64, bool)>,
    },
    String {
        lower: Option<(String, bool)>,
        upper: Option<(String, bool)>,
    },
}

impl RangeComparator {
    fn compile(range: &RangePredicate) -> Result<RangeComparator> {
        match range.value_type {
            RangeValueType::Numeric => Ok(RangeComparator::Numeric {
                lower: numeric_bound(range.lower.as_ref())?,
                upper: numeric_bound(range.upper.as_ref())?,
            }),
            RangeValueType::String => Ok(RangeComparator::String {
                lower: range
                    .lower
                    .as_ref()
                    .map(|bound| (bound.value.clone(), bound.inclusive)),
                upper: range
                    .upper
                    .as_ref()
                    .map(|bound| (bound.value.clone(), bound.inclusive)),
            }),
        }
    }

    fn contains(&self, value: &str) -> bool {
        match self {
            RangeComparator::Numeric { lower, upper } => {
                // a stored value that is not numeric simply does not match
                let Ok(value) = value.parse::<f64>() else {
                    return false;
                };
                let lower_ok = match lower {
                    Some((bound, true)) => value >= *bound,
                    Some((bound, false)) => value > *bound,
                    None => true,
                };
                let upper_ok = match upper {
                    Some((bound, true)) => value <= *bound,
                    Some((bound, false)) => value < *bound,
                    None => true,
                };
                lower_ok && upper_ok
            }
            RangeComparator::String { lower, upper } => {
                let lower_ok = match lower {
                    Some((bound, true)) => value >= bound.as_str(),
                    Some((bound, false)) => value > bound.as_str(),
                    None => true,
                };
                let upper_ok = match upper {
                    Some((bound, true)) => value <= bound.as_str(),
                    Some((bound, false)) => value < bound.as_str(),
                    None => true,
                };
                lower_ok && upper_ok
            }
        }
    }
}

fn numeric_bound(bound: Option<&Bound>) -> Result<Option<(f64, bool)>> {
    bound
        .map(|bound| {
            let value = bound.value.parse::<f64>().map_err(|_| {
                InvalidFilterSnafu {
                    reason: format!("non-numeric range bound: {:?}", bound.value),
                }
                .build()
            })?;
            Ok((value, bound.inclusive))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::format::writer::JsonIndexWriter;
    use crate::format::FormatVersion;

    fn build_index(version: FormatVersion, docs: &[serde_json::Value]) -> JsonIndexReader {
        let mut writer = JsonIndexWriter::new(version);
        for doc in docs {
            writer.add_document(doc).unwrap();
        }
        let blob = writer.finish().unwrap();
        JsonIndexReader::new(blob, docs.len() as u32).unwrap()
    }

    fn doc_ids(index: &JsonIndexReader, filter: &FilterNode) -> RoaringBitmap {
        FilterEvaluator::new(index).matching_doc_ids(filter).unwrap()
    }

    fn bitmap_of(values: &[u32]) -> RoaringBitmap {
        values.iter().copied().collect()
    }

    fn array_corpus() -> Vec<serde_json::Value> {
        vec![
            json!({"a": [{"b": 1}, {"b": 2}]}),
            json!({"a": [{"b": 2}]}),
            json!({"a": {"b": 3}}),
        ]
    }

    #[test]
    fn test_eq_with_concrete_array_index() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        assert_eq!(doc_ids(&index, &FilterNode::eq("a[1].b", "2")), bitmap_of(&[0]));
        assert_eq!(doc_ids(&index, &FilterNode::eq("a[0].b", "2")), bitmap_of(&[1]));
        assert_eq!(doc_ids(&index, &FilterNode::eq("a[0].b", "1")), bitmap_of(&[0]));
    }

    #[test]
    fn test_eq_with_wildcard() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        assert_eq!(doc_ids(&index, &FilterNode::eq("a[*].b", "2")), bitmap_of(&[0, 1]));
        assert_eq!(doc_ids(&index, &FilterNode::eq("$.a.b", "3")), bitmap_of(&[2]));
        assert_eq!(doc_ids(&index, &FilterNode::eq("a[*].b", "3")), bitmap_of(&[]));
    }

    #[test]
    fn test_is_null_at_missing_array_index_matches_everything() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        assert_eq!(
            doc_ids(&index, &FilterNode::is_null("a[5].b")),
            bitmap_of(&[0, 1, 2])
        );
    }

    #[test]
    fn test_is_null_and_is_not_null() {
        let docs = vec![
            json!({"k": "x"}),
            json!({"k": null}),
            json!({"other": 1}),
        ];
        let index = build_index(FormatVersion::V2, &docs);
        assert_eq!(doc_ids(&index, &FilterNode::is_not_null("$.k")), bitmap_of(&[0]));
        // null leaves and missing keys are both "null"
        assert_eq!(doc_ids(&index, &FilterNode::is_null("$.k")), bitmap_of(&[1, 2]));
    }

    #[test]
    fn test_numeric_range_inclusive() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        let range = RangePredicate::between(RangeValueType::Numeric, "2", true, "3", true);
        // the wildcard key only reaches array-nested values; doc2's 3 sits
        // under the object path "a.b"
        assert_eq!(
            doc_ids(&index, &FilterNode::range("a[*].b", range.clone())),
            bitmap_of(&[0, 1])
        );
        assert_eq!(
            doc_ids(&index, &FilterNode::range("$.a.b", range)),
            bitmap_of(&[2])
        );
    }

    #[test]
    fn test_numeric_range_bounds() {
        let docs = vec![
            json!({"v": 1}),
            json!({"v": 2.5}),
            json!({"v": 10}),
            json!({"v": "not-a-number"}),
        ];
        let index = build_index(FormatVersion::V2, &docs);
        let half_open = RangePredicate {
            value_type: RangeValueType::Numeric,
            lower: Some(Bound { value: "1".to_string(), inclusive: false }),
            upper: None,
        };
        assert_eq!(
            doc_ids(&index, &FilterNode::range("$.v", half_open)),
            bitmap_of(&[1, 2])
        );
        let unbounded = RangePredicate { value_type: RangeValueType::Numeric, lower: None, upper: None };
        assert_eq!(
            doc_ids(&index, &FilterNode::range("$.v", unbounded)),
            bitmap_of(&[0, 1, 2])
        );
        let bad_bound = RangePredicate {
            value_type: RangeValueType::Numeric,
            lower: Some(Bound { value: "abc".to_string(), inclusive: true }),
            upper: None,
        };
        let result = FilterEvaluator::new(&index)
            .matching_doc_ids(&FilterNode::range("$.v", bad_bound));
        assert!(matches!(result, Err(Error::InvalidFilter { .. })));
    }

    #[test]
    fn test_string_range() {
        let docs = vec![json!({"s": "apple"}), json!({"s": "banana"}), json!({"s": "cherry"})];
        let index = build_index(FormatVersion::V2, &docs);
        let range = RangePredicate::between(RangeValueType::String, "apple", false, "cherry", false);
        assert_eq!(doc_ids(&index, &FilterNode::range("$.s", range)), bitmap_of(&[1]));
    }

    #[test]
    fn test_regex_full_match() {
        let docs = vec![json!({"s": "foo"}), json!({"s": "bar"}), json!({"s": "foobar"})];
        let index = build_index(FormatVersion::V2, &docs);
        assert_eq!(
            doc_ids(&index, &FilterNode::regex_match("$.s", "foo.*")),
            bitmap_of(&[0, 2])
        );
        // partial matches do not count
        assert_eq!(
            doc_ids(&index, &FilterNode::regex_match("$.s", "oo")),
            bitmap_of(&[])
        );
        let result = FilterEvaluator::new(&index)
            .matching_doc_ids(&FilterNode::regex_match("$.s", "*invalid"));
        assert!(matches!(result, Err(Error::ParseRegex { .. })));
    }

    #[test]
    fn test_in_equals_union_of_eq() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        let values = vec!["1".to_string(), "2".to_string(), "9".to_string()];
        let in_result = doc_ids(&index, &FilterNode::is_in("a[*].b", values.clone()));
        let mut union = RoaringBitmap::new();
        for value in &values {
            union |= doc_ids(&index, &FilterNode::eq("a[*].b", value.clone()));
        }
        assert_eq!(in_result, union);
        assert_eq!(in_result, bitmap_of(&[0, 1]));
    }

    fn value_corpus() -> Vec<serde_json::Value> {
        (0..6).map(|v| json!({"k": format!("v{v}")})).collect()
    }

    #[test]
    fn test_not_in_both_strategies_agree() {
        let index = build_index(FormatVersion::V2, &value_corpus());
        let universe = doc_ids(&index, &FilterNode::is_not_null("$.k"));

        // one exclusion out of six distinct values: subtract-from-all path
        let few = vec!["v0".to_string()];
        // five exclusions: union-of-non-excluded path
        let many = vec!["v0", "v1", "v2", "v3", "v4"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        for excluded in [few, many] {
            let not_in = doc_ids(&index, &FilterNode::not_in("$.k", excluded.clone()));
            let is_in = doc_ids(&index, &FilterNode::is_in("$.k", excluded));
            assert_eq!(not_in.clone() | is_in.clone(), universe);
            assert!((not_in & is_in).is_empty());
        }
    }

    #[test]
    fn test_not_in_missing_key_is_empty() {
        let index = build_index(FormatVersion::V2, &value_corpus());
        assert_eq!(
            doc_ids(&index, &FilterNode::not_in("$.missing", vec!["v0".to_string()])),
            bitmap_of(&[])
        );
        assert_eq!(
            doc_ids(&index, &FilterNode::not_eq("$.missing", "v0")),
            bitmap_of(&[])
        );
    }

    #[test]
    fn test_eq_not_eq_missing_key_partition_universe() {
        let docs = vec![
            json!({"k": "a"}),
            json!({"k": "b"}),
            json!({"other": 1}),
        ];
        let index = build_index(FormatVersion::V2, &docs);
        let eq = doc_ids(&index, &FilterNode::eq("$.k", "a"));
        let not_eq = doc_ids(&index, &FilterNode::not_eq("$.k", "a"));
        let missing = doc_ids(&index, &FilterNode::is_null("$.k"));
        assert!((eq.clone() & not_eq.clone()).is_empty());
        assert!((eq.clone() & missing.clone()).is_empty());
        assert!((not_eq.clone() & missing.clone()).is_empty());
        assert_eq!(eq | not_eq | missing, bitmap_of(&[0, 1, 2]));
    }

    #[test]
    fn test_and_or_composition() {
        let docs = vec![
            json!({"x": 1, "y": 1}),
            json!({"x": 1, "y": 2}),
            json!({"x": 2, "y": 1}),
        ];
        let index = build_index(FormatVersion::V2, &docs);
        let filter = FilterNode::and(vec![
            FilterNode::eq("$.x", "1"),
            FilterNode::eq("$.y", "2"),
        ]);
        assert_eq!(doc_ids(&index, &filter), bitmap_of(&[1]));

        let filter = FilterNode::or(vec![
            FilterNode::eq("$.x", "2"),
            FilterNode::eq("$.y", "2"),
        ]);
        assert_eq!(doc_ids(&index, &filter), bitmap_of(&[1, 2]));

        // AND short-circuit across an empty child
        let filter = FilterNode::and(vec![
            FilterNode::eq("$.x", "99"),
            FilterNode::eq("$.y", "1"),
        ]);
        assert_eq!(doc_ids(&index, &filter), bitmap_of(&[]));
    }

    #[test]
    fn test_exclusive_predicate_cannot_be_nested() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        let filter = FilterNode::and(vec![
            FilterNode::is_null("$.a.b"),
            FilterNode::eq("$.a.b", "3"),
        ]);
        let result = FilterEvaluator::new(&index).matching_doc_ids(&filter);
        assert!(matches!(result, Err(Error::InvalidFilter { .. })));
    }

    #[test]
    fn test_invalid_filters_rejected() {
        let index = build_index(FormatVersion::V2, &array_corpus());
        let evaluator = FilterEvaluator::new(&index);
        assert!(matches!(
            evaluator.matching_doc_ids(&FilterNode::Constant(true)),
            Err(Error::InvalidFilter { .. })
        ));
        assert!(matches!(
            evaluator.matching_doc_ids(&FilterNode::And(vec![])),
            Err(Error::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_cancellation_aborts_scans() {
        let index = build_index(FormatVersion::V2, &value_corpus());
        let flag = CancellationFlag::new();
        flag.cancel();
        let evaluator = FilterEvaluator::with_cancellation(&index, flag);
        let result = evaluator.matching_doc_ids(&FilterNode::regex_match("$.k", "v.*"));
        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }

    #[test]
    fn test_v1_and_v2_resolve_equivalent_paths() {
        let docs = vec![
            json!({"a": [{"b": 1}, {"b": 2}]}),
            json!({"a": [{"b": 2}]}),
        ];
        let v1 = build_index(FormatVersion::V1, &docs);
        let v2 = build_index(FormatVersion::V2, &docs);
        for (legacy, jsonpath) in [
            ("a[0].b", "$.a[0].b"),
            ("a[1].b", "$.a[1].b"),
            ("a[*].b", "$.a[*].b"),
        ] {
            for value in ["1", "2"] {
                assert_eq!(
                    doc_ids(&v1, &FilterNode::eq(legacy, value)),
                    doc_ids(&v2, &FilterNode::eq(jsonpath, value)),
                    "diverged on {legacy} = {value}"
                );
            }
        }
    }

    #[test]
    fn test_matches_direct_json_evaluation() {
        let docs = array_corpus();
        let index = build_index(FormatVersion::V2, &docs);
        for value in 0..4i64 {
            // ground truth: any element of array "a" whose "b" equals value
            let expected = docs
                .iter()
                .enumerate()
                .filter(|(_, doc)| {
                    doc["a"]
                        .as_array()
                        .map(|items| items.iter().any(|item| item["b"] == json!(value)))
                        .unwrap_or(false)
                })
                .map(|(doc_id, _)| doc_id as u32)
                .collect::<RoaringBitmap>();
            let actual = doc_ids(&index, &FilterNode::eq("a[*].b", value.to_string()));
            assert_eq!(actual, expected, "diverged on value {value}");
        }
    }

    fn random_tree(rng: &mut StdRng, depth: usize) -> FilterNode {
        if depth == 0 || rng.gen_bool(0.3) {
            let key = if rng.gen_bool(0.5) { "$.x" } else { "$.y" };
            let value = rng.gen_range(0..4).to_string();
            return match rng.gen_range(0..3) {
                0 => FilterNode::eq(key, value),
                1 => FilterNode::not_eq(key, value),
                _ => FilterNode::is_in(key, vec![value, rng.gen_range(0..4).to_string()]),
            };
        }
        let children = (0..rng.gen_range(2..4))
            .map(|_| random_tree(rng, depth - 1))
            .collect();
        if rng.gen_bool(0.5) {
            FilterNode::And(children)
        } else {
            FilterNode::Or(children)
        }
    }

    /// Direct set-algebra reference over flattened doc ids.
    fn reference_flattened(evaluator: &FilterEvaluator<'_>, filter: &FilterNode) -> RoaringBitmap {
        match filter {
            FilterNode::And(children) => children
                .iter()
                .map(|child| reference_flattened(evaluator, child))
                .reduce(|a, b| a & b)
                .unwrap(),
            FilterNode::Or(children) => children
                .iter()
                .map(|child| reference_flattened(evaluator, child))
                .reduce(|a, b| a | b)
                .unwrap(),
            _ => evaluator.matching_flattened_doc_ids(filter).unwrap(),
        }
    }

    #[test]
    fn test_random_trees_match_set_algebra() {
        let docs = (0..16)
            .map(|i| json!({"x": i % 4, "y": i / 4}))
            .collect::<Vec<_>>();
        let index = build_index(FormatVersion::V2, &docs);
        let evaluator = FilterEvaluator::new(&index);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..64 {
            let tree = random_tree(&mut rng, 4);
            let expected = reference_flattened(&evaluator, &tree);
            let actual = evaluator.matching_flattened_doc_ids(&tree).unwrap();
            assert_eq!(actual, expected, "diverged on {tree:?}");
        }
    }
}
