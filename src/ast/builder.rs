//! Helpers for building expression trees in code
//!
//! ```
//! use fhirpath_engine::ast::builder::*;
//!
//! // Patient.name.given.first()
//! let expr = path("Patient.name.given").call("first", vec![]);
//! assert_eq!(expr.to_string(), "Patient.name.given.first()");
//! ```

use std::str::FromStr;

use rust_decimal::Decimal;

use super::expression::ExpressionNode;
use super::literal::LiteralValue;
use super::operator::{BinaryOperator, TypeOperator, UnaryOperator};
use crate::core::TypeSpecifier;

/// Dotted member path; each segment becomes an identifier invocation
pub fn path(dotted: &str) -> ExpressionNode {
    let mut segments = dotted.split('.');
    let first = ExpressionNode::identifier(segments.next().unwrap_or_default());
    segments.fold(first, |object, segment| {
        ExpressionNode::invocation(object, ExpressionNode::identifier(segment))
    })
}

pub fn ident(name: &str) -> ExpressionNode {
    ExpressionNode::identifier(name)
}

/// Function call with the input focus as receiver
pub fn func(name: &str, args: Vec<ExpressionNode>) -> ExpressionNode {
    ExpressionNode::function_call(name, args)
}

/// `%name`
pub fn var(name: &str) -> ExpressionNode {
    ExpressionNode::variable(name)
}

pub fn this() -> ExpressionNode {
    ExpressionNode::This
}

pub fn index() -> ExpressionNode {
    ExpressionNode::Index
}

pub fn total() -> ExpressionNode {
    ExpressionNode::Total
}

pub fn null() -> ExpressionNode {
    ExpressionNode::literal(LiteralValue::Null)
}

pub fn boolean(value: bool) -> ExpressionNode {
    ExpressionNode::literal(LiteralValue::Boolean(value))
}

pub fn string(value: &str) -> ExpressionNode {
    ExpressionNode::literal(LiteralValue::String(value.to_string()))
}

pub fn integer(value: i64) -> ExpressionNode {
    ExpressionNode::literal(LiteralValue::Integer(value))
}

/// Decimal literal from its written form, keeping trailing zeros
pub fn decimal(text: &str) -> ExpressionNode {
    let value = Decimal::from_str(text).unwrap_or_default();
    ExpressionNode::literal(LiteralValue::Decimal(value))
}

/// Quantity literal; `unit` is a UCUM code or calendar keyword
pub fn quantity(value: &str, unit: &str) -> ExpressionNode {
    let value = Decimal::from_str(value).unwrap_or_default();
    ExpressionNode::literal(LiteralValue::Quantity {
        value,
        unit: unit.to_string(),
    })
}

/// Date, date-time or time literal from its `@...` text; malformed text yields `{}`
pub fn temporal(text: &str) -> ExpressionNode {
    let parsed = if text.starts_with("@T") {
        LiteralValue::parse_time(text)
    } else if text.contains('T') {
        LiteralValue::parse_datetime(text)
    } else {
        LiteralValue::parse_date(text)
    };
    ExpressionNode::literal(parsed.unwrap_or(LiteralValue::Null))
}

pub fn binary(op: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> ExpressionNode {
    ExpressionNode::binary(op, left, right)
}

pub fn negate(operand: ExpressionNode) -> ExpressionNode {
    ExpressionNode::unary(UnaryOperator::Negate, operand)
}

pub fn union(left: ExpressionNode, right: ExpressionNode) -> ExpressionNode {
    ExpressionNode::binary(BinaryOperator::Union, left, right)
}

pub fn is_type(operand: ExpressionNode, type_name: &str) -> ExpressionNode {
    ExpressionNode::type_operation(TypeOperator::Is, operand, TypeSpecifier::parse(type_name))
}

pub fn as_type(operand: ExpressionNode, type_name: &str) -> ExpressionNode {
    ExpressionNode::type_operation(TypeOperator::As, operand, TypeSpecifier::parse(type_name))
}

pub fn paren(inner: ExpressionNode) -> ExpressionNode {
    ExpressionNode::parenthesized(inner)
}

/// Chaining helpers on an existing expression
pub trait ExpressionBuilderExt: Sized {
    /// `self.name(args)`
    fn call(self, name: &str, args: Vec<ExpressionNode>) -> ExpressionNode;
    /// `self.name`
    fn member(self, name: &str) -> ExpressionNode;
    /// `self[index]`
    fn at(self, index: i64) -> ExpressionNode;
}

impl ExpressionBuilderExt for ExpressionNode {
    fn call(self, name: &str, args: Vec<ExpressionNode>) -> ExpressionNode {
        ExpressionNode::invocation(self, func(name, args))
    }

    fn member(self, name: &str) -> ExpressionNode {
        ExpressionNode::invocation(self, ident(name))
    }

    fn at(self, position: i64) -> ExpressionNode {
        ExpressionNode::indexer(self, integer(position))
    }
}
