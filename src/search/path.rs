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

use crate::bitmap::Bitmap;
use crate::error::{InvalidFilterSnafu, Result};
use crate::format::reader::JsonIndexReader;
use crate::format::{FormatVersion, ARRAY_INDEX_KEY, KEY_VALUE_SEPARATOR, WILDCARD};

/// Outcome of resolving a user path against the index.
///
/// `key` is the flattened dictionary key with all array selectors consumed.
/// `constraint`, when present, must be ANDed into every predicate bitmap
/// computed for that key. The unsatisfiable sentinel (a concrete array
/// index that matched no data) is `key: None` with an empty constraint, so
/// callers short-circuit without further dictionary probes.
pub struct ResolvedPath {
    pub key: Option<String>,
    pub constraint: Option<Bitmap<'static>>,
}

/// Normalizes a user path to the version's key grammar.
///
/// V2 accepts both JSONPath form (`$.a[1].b`, `$[0]`, `$`) and the bare
/// form (`a[1].b`); V1 only strips a literal `$.` prefix.
pub fn normalize_key(key: &str, version: FormatVersion) -> String {
    match version {
        FormatVersion::V2 => match key.strip_prefix('$') {
            Some(stripped) => stripped.to_string(),
            None => format!(".{key}"),
        },
        FormatVersion::V1 => key.strip_prefix("$.").unwrap_or(key).to_string(),
    }
}

/// Consumes `[n]`/`[*]` selectors left to right, rewriting the key and
/// intersecting the array-index postings of every concrete selector.
///
/// E.g. under V2, `.foo[0].bar` resolves to key `.foo..bar` constrained by
/// the postings of `.foo.$index \0 0`.
pub fn resolve_array_indices(index: &JsonIndexReader, mut key: String) -> Result<ResolvedPath> {
    let version = index.version();
    let mut constraint: Option<Bitmap<'static>> = None;

    loop {
        let left = match (version, key.find('[')) {
            (FormatVersion::V2, Some(pos)) => pos,
            // V1 compatibility quirk: a bracket at position 0 is key text,
            // not an array selector
            (FormatVersion::V1, Some(pos)) if pos > 0 => pos,
            _ => break,
        };
        // the matching bracket is searched past the first index char; a
        // selector truncated before that point has no right bracket either
        let Some(right) = key
            .get(left + 2..)
            .and_then(|rest| rest.find(']'))
            .map(|offset| left + 2 + offset)
        else {
            return InvalidFilterSnafu {
                reason: format!("missing right bracket in key: {key}"),
            }
            .fail();
        };

        let left_part = &key[..left];
        let array_index = &key[left + 1..right];
        let right_part = &key[right + 1..];

        if array_index != WILDCARD {
            let mut search_key = Vec::with_capacity(
                left_part.len() + ARRAY_INDEX_KEY.len() + 1 + array_index.len(),
            );
            search_key.extend_from_slice(left_part.as_bytes());
            search_key.extend_from_slice(ARRAY_INDEX_KEY.as_bytes());
            search_key.push(KEY_VALUE_SEPARATOR);
            search_key.extend_from_slice(array_index.as_bytes());

            match index.dictionary().index_of(&search_key)? {
                Some(dict_id) => {
                    let doc_ids = index.postings().postings(dict_id)?;
                    match &mut constraint {
                        None => constraint = Some(Bitmap::Owned(doc_ids)),
                        Some(accumulated) => accumulated.and(&doc_ids),
                    }
                }
                // no flattened doc sits at this concrete index; the whole
                // path is unsatisfiable
                None => {
                    return Ok(ResolvedPath {
                        key: None,
                        constraint: Some(Bitmap::empty()),
                    });
                }
            }
        }

        key = match version {
            FormatVersion::V2 => format!("{left_part}.{right_part}"),
            FormatVersion::V1 => format!("{left_part}{right_part}"),
        };
    }

    Ok(ResolvedPath {
        key: Some(key),
        constraint,
    })
}
