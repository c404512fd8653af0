//! Filter expression tree (§4.10(a)).
//!
//! **[ADDED — no teacher counterpart]**. Structurally grounded on the
//! teacher's `ast.rs`: `Expr::BinOp { lhs: Box<Expr>, op, rhs: Box<Expr> }`
//! is the same "boxed recursive node, plain enum for the operator"
//! shape used here for `Not(Box<Expr>)`, and the tagged `TypedValue`
//! union reuses `ast.rs`'s `enum_as_inner::EnumAsInner` derive (already
//! in the teacher's dependency stack) instead of hand-written
//! `as_int64()`/`as_utf8()` accessors.

use enum_as_inner::EnumAsInner;

/// Trees deeper than this fail compilation with `InvalidArgument`
/// (§4.10(a)).
pub const MAX_NESTING_DEPTH: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
    Contains,
    In,
    NotIn,
}

/// A predicate's comparison value. Never boxed: primitives and small
/// fixed-size data sit inline, `Utf8`/sets own their bytes directly
/// (§9 "Tagged unions").
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum TypedValue {
    Null,
    Int64(i64),
    Double(f64),
    /// A 128-bit fixed-point decimal, packed as a single `i128` (high
    /// 64 bits / low 64 bits split at merge time - see
    /// `schema::MergedColumn`).
    Decimal(i128),
    Utf8(String),
    /// Big-endian 16-byte GUID, split hi/lo at merge time.
    Guid([u8; 16]),
    Int64Set(Vec<i64>),
    Utf8Set(Vec<String>),
    Int64Range(i64, i64),
    DoubleRange(f64, f64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    Ordinal(usize),
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<usize> for ColumnRef {
    fn from(ordinal: usize) -> Self {
        ColumnRef::Ordinal(ordinal)
    }
}

/// The filter predicate tree (§4.10(a)): `And`/`Or`/`Not` combinators
/// over `Predicate` leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Predicate {
        column: ColumnRef,
        op: Op,
        value: TypedValue,
    },
}

impl Expr {
    pub fn predicate(column: impl Into<ColumnRef>, op: Op, value: TypedValue) -> Expr {
        Expr::Predicate {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Eq, value)
    }

    pub fn neq(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Neq, value)
    }

    pub fn lt(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Lt, value)
    }

    pub fn lte(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Lte, value)
    }

    pub fn gt(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Gt, value)
    }

    pub fn gte(column: impl Into<ColumnRef>, value: TypedValue) -> Expr {
        Self::predicate(column, Op::Gte, value)
    }

    pub fn between_int(column: impl Into<ColumnRef>, lo: i64, hi: i64) -> Expr {
        Self::predicate(column, Op::Between, TypedValue::Int64Range(lo, hi))
    }

    pub fn between_double(column: impl Into<ColumnRef>, lo: f64, hi: f64) -> Expr {
        Self::predicate(column, Op::Between, TypedValue::DoubleRange(lo, hi))
    }

    pub fn is_null(column: impl Into<ColumnRef>) -> Expr {
        Self::predicate(column, Op::IsNull, TypedValue::Null)
    }

    pub fn is_not_null(column: impl Into<ColumnRef>) -> Expr {
        Self::predicate(column, Op::IsNotNull, TypedValue::Null)
    }

    pub fn starts_with(column: impl Into<ColumnRef>, prefix: impl Into<String>) -> Expr {
        Self::predicate(column, Op::StartsWith, TypedValue::Utf8(prefix.into()))
    }

    pub fn ends_with(column: impl Into<ColumnRef>, suffix: impl Into<String>) -> Expr {
        Self::predicate(column, Op::EndsWith, TypedValue::Utf8(suffix.into()))
    }

    pub fn contains(column: impl Into<ColumnRef>, needle: impl Into<String>) -> Expr {
        Self::predicate(column, Op::Contains, TypedValue::Utf8(needle.into()))
    }

    pub fn in_int_set(column: impl Into<ColumnRef>, values: Vec<i64>) -> Expr {
        Self::predicate(column, Op::In, TypedValue::Int64Set(values))
    }

    pub fn not_in_int_set(column: impl Into<ColumnRef>, values: Vec<i64>) -> Expr {
        Self::predicate(column, Op::NotIn, TypedValue::Int64Set(values))
    }

    pub fn in_utf8_set(column: impl Into<ColumnRef>, values: Vec<String>) -> Expr {
        Self::predicate(column, Op::In, TypedValue::Utf8Set(values))
    }

    pub fn not_in_utf8_set(column: impl Into<ColumnRef>, values: Vec<String>) -> Expr {
        Self::predicate(column, Op::NotIn, TypedValue::Utf8Set(values))
    }

    /// Combines `self` with `other` under a single `And`, flattening
    /// when either side is already an `And` so repeated `.and(...)`
    /// calls don't build a deep right-leaning chain.
    pub fn and(self, other: Expr) -> Expr {
        match (self, other) {
            (Expr::And(mut a), Expr::And(b)) => {
                a.extend(b);
                Expr::And(a)
            }
            (Expr::And(mut a), other) => {
                a.push(other);
                Expr::And(a)
            }
            (me, Expr::And(mut b)) => {
                b.insert(0, me);
                Expr::And(b)
            }
            (me, other) => Expr::And(vec![me, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match (self, other) {
            (Expr::Or(mut a), Expr::Or(b)) => {
                a.extend(b);
                Expr::Or(a)
            }
            (Expr::Or(mut a), other) => {
                a.push(other);
                Expr::Or(a)
            }
            (me, Expr::Or(mut b)) => {
                b.insert(0, me);
                Expr::Or(b)
            }
            (me, other) => Expr::Or(vec![me, other]),
        }
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Depth of the deepest `And`/`Or`/`Not` nesting, used to enforce
    /// [`MAX_NESTING_DEPTH`] before compilation.
    pub fn depth(&self) -> u32 {
        match self {
            Expr::Predicate { .. } => 1,
            Expr::Not(inner) => 1 + inner.depth(),
            Expr::And(children) | Expr::Or(children) => {
                1 + children.iter().map(Expr::depth).max().unwrap_or(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_depth_is_one() {
        assert_eq!(Expr::eq("a", TypedValue::Int64(1)).depth(), 1);
    }

    #[test]
    fn and_flattens_repeated_combination() {
        let e = Expr::eq("a", TypedValue::Int64(1))
            .and(Expr::eq("b", TypedValue::Int64(2)))
            .and(Expr::eq("c", TypedValue::Int64(3)));
        match e {
            Expr::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("expected a flattened And"),
        }
    }

    #[test]
    fn deeply_nested_not_exceeds_budget() {
        let mut e = Expr::eq("a", TypedValue::Int64(1));
        for _ in 0..40 {
            e = e.negate();
        }
        assert!(e.depth() > MAX_NESTING_DEPTH);
    }

    #[test]
    fn column_ref_conversions() {
        let by_name: ColumnRef = "col".into();
        let by_ordinal: ColumnRef = 3usize.into();
        assert_eq!(by_name, ColumnRef::Name("col".to_string()));
        assert_eq!(by_ordinal, ColumnRef::Ordinal(3));
    }
}
