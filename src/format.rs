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

//! # Json Index Format Specification
//!
//! ## Blob Structure
//!
//! A json index blob is a fixed-size header followed by three regions:
//!
//! `header dictionary posting_store doc_id_mapping`
//!
//! ## Header
//!
//! | offset | size | field                                      |
//! |--------|------|--------------------------------------------|
//! | 0      | 4    | format version, `u32` BE (1 or 2)          |
//! | 4      | 4    | max dictionary entry length, `u32` BE      |
//! | 8      | 8    | dictionary region length, `u64` BE         |
//! | 16     | 8    | posting-store region length, `u64` BE      |
//! | 24     | 8    | doc-id-mapping region length, `u64` BE     |
//!
//! Region boundaries are the running sum of the three lengths, starting at
//! the end of the header. The number of flattened documents is derived as
//! `doc_id_mapping_length / 4`.
//!
//! ## Dictionary
//!
//! A sorted, deduplicated sequence of byte strings addressed by an offset
//! table:
//!
//! `entry_count offset₀ offset₁ ... offsetₙ entry_bytes`
//!
//! - `entry_count`: `u32` BE.
//! - `offsetᵢ`: `u32` BE, position of entry `i` within `entry_bytes`; the
//!   table holds `entry_count + 1` offsets so entry `i` spans
//!   `[offsetᵢ, offsetᵢ₊₁)`.
//! - Each entry is either a bare flattened key (the "key exists" sentinel
//!   whose posting is the union over all of the key's values) or
//!   `key \0 value`. `\0` sorts below every other byte, so a key's sentinel
//!   immediately precedes its values and `key \x01` upper-bounds them,
//!   which is what makes prefix ranges two binary searches.
//!
//! ## Posting Store
//!
//! `bitmap_count offset₀ ... offsetₙ bitmap_bytes`
//!
//! Same offset-table addressing as the dictionary (`u32` BE). Bitmap `i` is
//! the roaring-serialized set of flattened doc ids containing dictionary
//! entry `i`.
//!
//! ## Doc Id Mapping
//!
//! A `u32` LE array indexed by flattened doc id, giving the original doc id
//! each flattened doc came from.
//!
//! ## Flattened Key Grammars
//!
//! The version tag selects between two key grammars:
//!
//! - **V2**: an object field `f` contributes `.f` to the key, an array
//!   element contributes `.`, the root contributes nothing. An array at
//!   flattened path `P` additionally records `P.$index \0 i` per element.
//!   E.g. `{"foo": [{"bar": "x"}]}` produces `.foo..bar` = `x` and
//!   `.foo.$index` = `0`.
//! - **V1** (legacy): no leading separator at the root and array elements
//!   contribute nothing to the key. The same document produces
//!   `foo.bar` = `x` and `foo.$index` = `0`.

pub mod reader;
pub mod writer;

use crate::error::{Result, UnsupportedVersionSnafu};

/// Length of the fixed blob header in bytes.
pub const HEADER_LENGTH: usize = 32;

/// Separator between the flattened key and the value in a dictionary entry.
pub const KEY_VALUE_SEPARATOR: u8 = 0x00;

/// Smallest byte greater than [`KEY_VALUE_SEPARATOR`]; `key \x01` is the
/// exclusive upper bound of all `key \0 value` entries.
pub const KEY_VALUE_SEPARATOR_NEXT: u8 = 0x01;

/// Separator joining flattened key segments.
pub const KEY_SEPARATOR: char = '.';

/// Suffix of the synthetic key recording which array index a flattened doc
/// occupies, e.g. `.foo.$index` = `2`.
pub const ARRAY_INDEX_KEY: &str = ".$index";

/// Array selector matching every index.
pub const WILDCARD: &str = "*";

/// On-disk format version, selecting the flattened key grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
}

impl FormatVersion {
    pub fn from_tag(tag: u32) -> Result<FormatVersion> {
        match tag {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            _ => UnsupportedVersionSnafu { version: tag }.fail(),
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }
}
