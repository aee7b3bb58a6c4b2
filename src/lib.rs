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

//! Flattened-JSON value index for a column store.
//!
//! Each JSON document is unnested into flattened docs (one per leaf-scalar
//! combination across arrays) whose `(path, value)` pairs are stored in a
//! sorted dictionary with roaring-bitmap postings, plus a mapping from
//! flattened doc ids back to original doc ids. The immutable on-disk blob
//! ([`format`]) answers "which documents satisfy predicate P over this JSON
//! column" ([`search`]) without deserializing any JSON at query time.

pub mod bitmap;
pub mod error;
pub mod format;
pub mod search;
