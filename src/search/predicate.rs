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

//! Typed filter tree over a json index. An external parser compiles filter
//! expressions down to this representation; the evaluator only ever sees
//! the typed form.

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Predicate(Predicate),
    /// A filter that reduced to a constant at compile time. Rejected by the
    /// evaluator; the parser should not have produced it.
    Constant(bool),
}

/// A leaf comparison over one flattened json path.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// User-supplied json path, e.g. `$.a[1].b` or legacy `a[1].b`.
    pub key: String,
    pub kind: PredicateKind,
}

/// The closed set of comparison kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    Eq { value: String },
    NotEq { value: String },
    In { values: Vec<String> },
    NotIn { values: Vec<String> },
    /// Exclusive: evaluated via complement over original doc ids, so it may
    /// only appear at the root of the filter tree.
    IsNull,
    IsNotNull,
    RegexMatch { pattern: String },
    Range(RangePredicate),
}

impl PredicateKind {
    /// Whether correct evaluation requires complementing the unflattened
    /// result, which cannot be composed under AND/OR.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, PredicateKind::IsNull)
    }
}

/// Bounds and comparison domain of a RANGE predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePredicate {
    pub value_type: RangeValueType,
    /// Unbounded side when `None`; that side's comparison always passes.
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

/// Effective comparison domain: every numeric type collapses to f64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeValueType {
    Numeric,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: String,
    pub inclusive: bool,
}

impl FilterNode {
    pub fn and(children: Vec<FilterNode>) -> FilterNode {
        FilterNode::And(children)
    }

    pub fn or(children: Vec<FilterNode>) -> FilterNode {
        FilterNode::Or(children)
    }

    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::Eq {
                value: value.into(),
            },
        })
    }

    pub fn not_eq(key: impl Into<String>, value: impl Into<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::NotEq {
                value: value.into(),
            },
        })
    }

    pub fn is_in(key: impl Into<String>, values: Vec<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::In { values },
        })
    }

    pub fn not_in(key: impl Into<String>, values: Vec<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::NotIn { values },
        })
    }

    pub fn is_null(key: impl Into<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::IsNull,
        })
    }

    pub fn is_not_null(key: impl Into<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::IsNotNull,
        })
    }

    pub fn regex_match(key: impl Into<String>, pattern: impl Into<String>) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::RegexMatch {
                pattern: pattern.into(),
            },
        })
    }

    pub fn range(key: impl Into<String>, range: RangePredicate) -> FilterNode {
        FilterNode::Predicate(Predicate {
            key: key.into(),
            kind: PredicateKind::Range(range),
        })
    }
}

impl RangePredicate {
    /// Both-sided range helper.
    pub fn between(
        value_type: RangeValueType,
        lower: impl Into<String>,
        lower_inclusive: bool,
        upper: impl Into<String>,
        upper_inclusive: bool,
    ) -> RangePredicate {
        RangePredicate {
            value_type,
            lower: Some(Bound {
                value: lower.into(),
                inclusive: lower_inclusive,
            }),
            upper: Some(Bound {
                value: upper.into(),
                inclusive: upper_inclusive,
            }),
        }
    }
}
