//! Expression trees: the parser's wire shape and the evaluator's sum type

pub mod builder;
mod expression;
mod literal;
mod operator;
mod parse_tree;

pub use expression::ExpressionNode;
pub use literal::LiteralValue;
pub use operator::{BinaryOperator, TypeOperator, UnaryOperator};
pub use parse_tree::ParseNode;
