//! FHIRPath expression tree consumed by the evaluator
//!
//! One variant per node kind of the lowered parse tree. `Display` renders the
//! textual form of a sub-expression, which error messages quote.

use std::fmt;

use super::literal::LiteralValue;
use super::operator::{BinaryOperator, TypeOperator, UnaryOperator};
use crate::core::TypeSpecifier;

/// The main expression node representing any FHIRPath expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    /// Literal value (string, number, boolean, date, quantity, `{}`)
    Literal(LiteralValue),

    /// `$this`
    This,

    /// `$index`
    Index,

    /// `$total`
    Total,

    /// External constant (`%resource`, `%'vs-name'`)
    Variable(String),

    /// Member name at the start of a path (`Patient`, `name`)
    Identifier(String),

    /// Function invocation; the receiver is the enclosing invocation's object
    FunctionCall {
        name: String,
        args: Vec<ExpressionNode>,
    },

    /// `object.invocation`, where invocation is an identifier or function call
    Invocation {
        object: Box<ExpressionNode>,
        invocation: Box<ExpressionNode>,
    },

    /// `object[index]`
    Indexer {
        object: Box<ExpressionNode>,
        index: Box<ExpressionNode>,
    },

    /// Polarity (`-x`, `+x`)
    Unary {
        op: UnaryOperator,
        operand: Box<ExpressionNode>,
    },

    /// Binary operation, including union and membership
    Binary {
        op: BinaryOperator,
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
    },

    /// `operand is Type` / `operand as Type`
    TypeOperation {
        op: TypeOperator,
        operand: Box<ExpressionNode>,
        specifier: TypeSpecifier,
    },

    /// `( expression )`
    Parenthesized(Box<ExpressionNode>),
}

impl ExpressionNode {
    /// Create a literal expression
    pub fn literal(value: LiteralValue) -> Self {
        Self::Literal(value)
    }

    /// Create an identifier expression
    pub fn identifier(name: impl Into<String>) -> Self {
        Self::Identifier(name.into())
    }

    /// Create an external constant reference
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Create a function call expression
    pub fn function_call(name: impl Into<String>, args: Vec<ExpressionNode>) -> Self {
        Self::FunctionCall {
            name: name.into(),
            args,
        }
    }

    /// Create `object.invocation`
    pub fn invocation(object: ExpressionNode, invocation: ExpressionNode) -> Self {
        Self::Invocation {
            object: Box::new(object),
            invocation: Box::new(invocation),
        }
    }

    /// Create an indexer expression
    pub fn indexer(object: ExpressionNode, index: ExpressionNode) -> Self {
        Self::Indexer {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    /// Create a unary operation expression
    pub fn unary(op: UnaryOperator, operand: ExpressionNode) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Create a binary operation expression
    pub fn binary(op: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Create an `is`/`as` expression
    pub fn type_operation(op: TypeOperator, operand: ExpressionNode, specifier: TypeSpecifier) -> Self {
        Self::TypeOperation {
            op,
            operand: Box::new(operand),
            specifier,
        }
    }

    /// Create a parenthesized expression
    pub fn parenthesized(inner: ExpressionNode) -> Self {
        Self::Parenthesized(Box::new(inner))
    }

    /// Short label of the node kind for trace logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "Literal",
            Self::This => "This",
            Self::Index => "Index",
            Self::Total => "Total",
            Self::Variable(_) => "Variable",
            Self::Identifier(_) => "Identifier",
            Self::FunctionCall { .. } => "FunctionCall",
            Self::Invocation { .. } => "Invocation",
            Self::Indexer { .. } => "Indexer",
            Self::Unary { .. } => "Unary",
            Self::Binary { .. } => "Binary",
            Self::TypeOperation { .. } => "TypeOperation",
            Self::Parenthesized(_) => "Parenthesized",
        }
    }
}

fn write_identifier(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        f.write_str(name)
    } else {
        write!(f, "`{name}`")
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::This => f.write_str("$this"),
            Self::Index => f.write_str("$index"),
            Self::Total => f.write_str("$total"),
            Self::Variable(name) => {
                f.write_str("%")?;
                write_identifier(f, name)
            }
            Self::Identifier(name) => write_identifier(f, name),
            Self::FunctionCall { name, args } => {
                write_identifier(f, name)?;
                f.write_str("(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Invocation { object, invocation } => write!(f, "{object}.{invocation}"),
            Self::Indexer { object, index } => write!(f, "{object}[{index}]"),
            Self::Unary { op, operand } => write!(f, "{op}{operand}"),
            Self::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Self::TypeOperation {
                op,
                operand,
                specifier,
            } => write!(f, "{operand} {op} {specifier}"),
            Self::Parenthesized(inner) => write!(f, "({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;

    #[test]
    fn test_display_round_trips_textual_form() {
        let expr = path("Patient.name")
            .call("where", vec![binary(BinaryOperator::Equal, ident("use"), string("official"))])
            .call("first", vec![]);
        assert_eq!(expr.to_string(), "Patient.name.where(use = 'official').first()");

        let indexed = ExpressionNode::indexer(path("name.given"), integer(0));
        assert_eq!(indexed.to_string(), "name.given[0]");

        let quoted = ExpressionNode::variable("vs-observation-codes");
        assert_eq!(quoted.to_string(), "%`vs-observation-codes`");
    }
}
