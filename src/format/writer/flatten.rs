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

use std::collections::BTreeMap;

use serde_json::Value;

use crate::format::{FormatVersion, ARRAY_INDEX_KEY, KEY_SEPARATOR};

/// One flattened doc: every leaf scalar reachable from the original
/// document for a fixed choice of array indices, keyed by flattened path,
/// plus one `<array path>.$index` entry per array on the way down.
pub type FlatRecord = BTreeMap<String, String>;

/// Flattens `doc` into its flattened docs under the given key grammar.
///
/// Array elements each produce their own flattened docs; sibling arrays
/// multiply. Null leaves, empty arrays and empty objects contribute no
/// entries, leaving their keys absent from the index.
pub fn flatten(doc: &Value, version: FormatVersion) -> Vec<FlatRecord> {
    flatten_value(doc, "", version)
}

fn flatten_value(value: &Value, prefix: &str, version: FormatVersion) -> Vec<FlatRecord> {
    match value {
        Value::Null => vec![],
        Value::Bool(v) => scalar(prefix, v.to_string()),
        Value::Number(v) => scalar(prefix, v.to_string()),
        Value::String(v) => scalar(prefix, v.clone()),
        Value::Array(items) => {
            let element_prefix = match version {
                // an array element contributes a bare separator segment
                FormatVersion::V2 => format!("{prefix}{KEY_SEPARATOR}"),
                FormatVersion::V1 => prefix.to_string(),
            };
            let index_key = format!("{prefix}{ARRAY_INDEX_KEY}");
            let mut records = Vec::new();
            for (index, item) in items.iter().enumerate() {
                for mut record in flatten_value(item, &element_prefix, version) {
                    record.insert(index_key.clone(), index.to_string());
                    records.push(record);
                }
            }
            records
        }
        Value::Object(fields) => {
            let mut records = vec![FlatRecord::new()];
            for (name, child) in fields {
                let child_prefix = match version {
                    FormatVersion::V2 => format!("{prefix}{KEY_SEPARATOR}{name}"),
                    FormatVersion::V1 if prefix.is_empty() => name.clone(),
                    FormatVersion::V1 => format!("{prefix}{KEY_SEPARATOR}{name}"),
                };
                let child_records = flatten_value(child, &child_prefix, version);
                if child_records.is_empty() {
                    continue;
                }
                // cartesian product with the records accumulated so far
                let mut merged = Vec::with_capacity(records.len() * child_records.len());
                for record in &records {
                    for child_record in &child_records {
                        let mut combined = record.clone();
                        combined.extend(child_record.clone());
                        merged.push(combined);
                    }
                }
                records = merged;
            }
            records
        }
    }
}

fn scalar(prefix: &str, text: String) -> Vec<FlatRecord> {
    vec![FlatRecord::from([(prefix.to_string(), text)])]
}
