//! Typed row-wise expressions over field ids.
//!
//! The lineage builder composes [`Expr`] trees instead of templating strings.
//! The `Display` impl renders an expression as a BigML Flatline
//! s-expression, e.g. `(- (f "000005") (f "00000a"))`, which is what a hosted
//! engine expects in a `new_fields` request. Local engines evaluate the tree
//! directly.
use std::fmt;
use std::ops::{Add, Div, Sub};

use crate::engine::FieldId;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldId),
    Number(f64),
    Text(String),
    /// Variadic sum; an empty sum is `0`.
    Sum(Vec<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Exp(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn field(id: &FieldId) -> Self {
        Expr::Field(id.clone())
    }

    pub fn number(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Text(value.into())
    }

    pub fn sum<I: IntoIterator<Item = Expr>>(terms: I) -> Self {
        Expr::Sum(terms.into_iter().collect())
    }

    pub fn exp(self) -> Self {
        Expr::Exp(Box::new(self))
    }

    pub fn equals(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn at_least(self, other: Expr) -> Self {
        Expr::Ge(Box::new(self), Box::new(other))
    }

    pub fn all<I: IntoIterator<Item = Expr>>(conds: I) -> Self {
        Expr::And(conds.into_iter().collect())
    }

    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// `1.0` when `field` holds `category`, `0.0` otherwise.
    pub fn indicator(field: &FieldId, category: &str) -> Self {
        Expr::if_else(
            Expr::field(field).equals(Expr::text(category)),
            Expr::number(1.0),
            Expr::number(0.0),
        )
    }

    /// Field ids referenced anywhere in the tree, in first-seen order.
    pub fn referenced_fields(&self) -> Vec<&FieldId> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldId>) {
        match self {
            Expr::Field(id) => {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
            Expr::Number(_) | Expr::Text(_) => {}
            Expr::Sum(terms) | Expr::And(terms) => terms.iter().for_each(|t| t.collect_fields(out)),
            Expr::Sub(a, b) | Expr::Div(a, b) | Expr::Eq(a, b) | Expr::Ge(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            Expr::Exp(a) => a.collect_fields(out),
            Expr::If { cond, then, otherwise } => {
                cond.collect_fields(out);
                then.collect_fields(out);
                otherwise.collect_fields(out);
            }
        }
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        match self {
            Expr::Sum(mut terms) => {
                terms.push(rhs);
                Expr::Sum(terms)
            }
            lhs => Expr::Sum(vec![lhs, rhs]),
        }
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(id) => write!(f, "(f {})", quote(id.as_str())),
            Expr::Number(v) => write!(f, "{:?}", v),
            Expr::Text(s) => f.write_str(&quote(s)),
            Expr::Sum(terms) if terms.is_empty() => f.write_str("0"),
            Expr::Sum(terms) => {
                f.write_str("(+")?;
                for term in terms {
                    write!(f, " {}", term)?;
                }
                f.write_str(")")
            }
            Expr::Sub(a, b) => write!(f, "(- {} {})", a, b),
            Expr::Div(a, b) => write!(f, "(/ {} {})", a, b),
            Expr::Exp(a) => write!(f, "(exp {})", a),
            Expr::Eq(a, b) => write!(f, "(= {} {})", a, b),
            Expr::Ge(a, b) => write!(f, "(>= {} {})", a, b),
            Expr::And(conds) if conds.is_empty() => f.write_str("true"),
            Expr::And(conds) => {
                f.write_str("(and")?;
                for cond in conds {
                    write!(f, " {}", cond)?;
                }
                f.write_str(")")
            }
            Expr::If { cond, then, otherwise } => write!(f, "(if {} {} {})", cond, then, otherwise),
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
