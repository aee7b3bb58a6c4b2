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

use std::sync::LazyLock;

use roaring::RoaringBitmap;

/// Process-wide empty bitmap, constructed once and never mutated. Empty
/// intermediate results borrow it instead of allocating.
static EMPTY_BITMAP: LazyLock<RoaringBitmap> = LazyLock::new(RoaringBitmap::new);

/// A bitmap that is either a borrowed read-only view or an owned set.
///
/// Set algebra during filter evaluation frequently produces results that are
/// never combined further (single-predicate filters, empty children). The
/// borrowed variant lets those flow through without a copy; conversion to the
/// owned variant happens lazily, only when a bitmap must actually be mutated.
#[derive(Debug)]
pub enum Bitmap<'a> {
    Borrowed(&'a RoaringBitmap),
    Owned(RoaringBitmap),
}

impl Bitmap<'static> {
    /// A borrowed view of the shared empty bitmap.
    pub fn empty() -> Self {
        Bitmap::Borrowed(&EMPTY_BITMAP)
    }
}

impl<'a> Bitmap<'a> {
    pub fn is_empty(&self) -> bool {
        self.as_bitmap().is_empty()
    }

    pub fn as_bitmap(&self) -> &RoaringBitmap {
        match self {
            Bitmap::Borrowed(bitmap) => bitmap,
            Bitmap::Owned(bitmap) => bitmap,
        }
    }

    /// Converts to the owned variant in place and returns a mutable handle.
    pub fn to_mut(&mut self) -> &mut RoaringBitmap {
        if let Bitmap::Borrowed(bitmap) = self {
            *self = Bitmap::Owned((*bitmap).clone());
        }
        match self {
            Bitmap::Owned(bitmap) => bitmap,
            Bitmap::Borrowed(_) => unreachable!(), // replaced above
        }
    }

    pub fn into_owned(self) -> RoaringBitmap {
        match self {
            Bitmap::Borrowed(bitmap) => bitmap.clone(),
            Bitmap::Owned(bitmap) => bitmap,
        }
    }

    pub fn and(&mut self, other: &RoaringBitmap) {
        *self.to_mut() &= other;
    }

    pub fn or(&mut self, other: &RoaringBitmap) {
        *self.to_mut() |= other;
    }

    pub fn and_not(&mut self, other: &RoaringBitmap) {
        *self.to_mut() -= other;
    }
}

impl From<RoaringBitmap> for Bitmap<'static> {
    fn from(bitmap: RoaringBitmap) -> Self {
        Bitmap::Owned(bitmap)
    }
}
