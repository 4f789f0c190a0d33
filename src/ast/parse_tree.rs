//! Wire shape of the externally produced parse tree and its lowering
//!
//! The parser collaborator emits nodes tagged with a grammar rule name
//! (`TermExpression`, `InvocationExpression`, `Functn`, ...), the matched
//! `text`, the rule's terminal tokens (operator symbols live there) and the
//! child nodes. [`ExpressionNode::try_from`] maps that closed set of rule
//! names onto the evaluator's sum type.

use serde::{Deserialize, Serialize};

use super::expression::ExpressionNode;
use super::literal::{LiteralValue, unescape};
use super::operator::{BinaryOperator, TypeOperator, UnaryOperator};
use crate::core::error_code::{FP0001, FP0002};
use crate::core::{FhirPathError, Result, SourceLocation, TypeSpecifier};

/// One node of the parser's output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminal_node_text: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParseNode>,
    /// Start position, when the parser reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<SourceLocation>,
}

impl ParseNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_terminal(mut self, terminal: impl Into<String>) -> Self {
        self.terminal_node_text.push(terminal.into());
        self
    }

    pub fn with_child(mut self, child: ParseNode) -> Self {
        self.children.push(child);
        self
    }

    fn error(&self, message: impl Into<String>) -> FhirPathError {
        FhirPathError::syntax_error(FP0001, message, self.start.clone())
    }

    fn child(&self, index: usize) -> Result<&ParseNode> {
        self.children.get(index).ok_or_else(|| {
            self.error(format!(
                "{} node is missing child {index}{}",
                self.node_type,
                self.text.as_deref().map(|t| format!(" near '{t}'")).unwrap_or_default()
            ))
        })
    }

    /// Matched text, falling back to the first terminal token
    fn raw_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or_else(|| self.terminal_node_text.first().map(String::as_str))
    }

    fn required_text(&self) -> Result<&str> {
        self.raw_text()
            .ok_or_else(|| self.error(format!("{} node carries no text", self.node_type)))
    }

    /// Identifier name with delimiting backticks resolved
    fn identifier_name(&self) -> Result<String> {
        if self.raw_text().is_none() {
            if let Some(child) = self.children.first() {
                return child.identifier_name();
            }
        }
        let text = self.required_text()?;
        Ok(match text.strip_prefix('`').and_then(|t| t.strip_suffix('`')) {
            Some(inner) => unescape(inner),
            None => text.to_string(),
        })
    }

    fn operator_symbol(&self) -> Option<&str> {
        self.terminal_node_text.first().map(|s| s.trim())
    }
}

impl TryFrom<&ParseNode> for ExpressionNode {
    type Error = FhirPathError;

    fn try_from(node: &ParseNode) -> Result<Self> {
        lower(node)
    }
}

impl TryFrom<ParseNode> for ExpressionNode {
    type Error = FhirPathError;

    fn try_from(node: ParseNode) -> Result<Self> {
        lower(&node)
    }
}

fn lower(node: &ParseNode) -> Result<ExpressionNode> {
    match node.node_type.as_str() {
        "EntireExpression" | "TermExpression" | "InvocationTerm" | "LiteralTerm"
        | "ExternalConstantTerm" | "FunctionInvocation" => lower(node.child(0)?),

        "ParenthesizedTerm" => Ok(ExpressionNode::parenthesized(lower(node.child(0)?)?)),

        "ExternalConstant" => {
            let name = match node.children.first() {
                Some(child) if child.node_type == "StringLiteral" => {
                    unescape(child.required_text()?.trim_matches('\''))
                }
                Some(child) => child.identifier_name()?,
                None => node.required_text()?.trim_start_matches('%').to_string(),
            };
            Ok(ExpressionNode::variable(name))
        }

        "InvocationExpression" => Ok(ExpressionNode::invocation(
            lower(node.child(0)?)?,
            lower(node.child(1)?)?,
        )),

        "IndexerExpression" => Ok(ExpressionNode::indexer(
            lower(node.child(0)?)?,
            lower(node.child(1)?)?,
        )),

        "MemberInvocation" | "Identifier" => Ok(ExpressionNode::identifier(node.identifier_name()?)),

        "Functn" => {
            let name = node.child(0)?.identifier_name()?;
            let args = match node.children.get(1) {
                Some(params) => params.children.iter().map(lower).collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(ExpressionNode::function_call(name, args))
        }

        "ParamList" => Err(node.error("ParamList outside of a function invocation")),

        "ThisInvocation" => Ok(ExpressionNode::This),
        "IndexInvocation" => Ok(ExpressionNode::Index),
        "TotalInvocation" => Ok(ExpressionNode::Total),

        "PolarityExpression" => {
            let symbol = node.operator_symbol().unwrap_or("-");
            let op = UnaryOperator::from_symbol(symbol)
                .ok_or_else(|| node.error(format!("Unknown polarity operator '{symbol}'")))?;
            Ok(ExpressionNode::unary(op, lower(node.child(0)?)?))
        }

        "MultiplicativeExpression" | "AdditiveExpression" | "UnionExpression"
        | "InequalityExpression" | "EqualityExpression" | "MembershipExpression"
        | "AndExpression" | "OrExpression" | "ImpliesExpression" => {
            let op = binary_operator(node)?;
            Ok(ExpressionNode::binary(
                op,
                lower(node.child(0)?)?,
                lower(node.child(1)?)?,
            ))
        }

        "TypeExpression" => {
            let symbol = node.operator_symbol().unwrap_or_default();
            let op = TypeOperator::from_symbol(symbol)
                .ok_or_else(|| node.error(format!("Unknown type operator '{symbol}'")))?;
            let specifier = type_specifier(node.child(1)?)?;
            Ok(ExpressionNode::type_operation(op, lower(node.child(0)?)?, specifier))
        }

        "NullLiteral" => Ok(ExpressionNode::literal(LiteralValue::Null)),
        "BooleanLiteral" => match node.required_text()? {
            "true" => Ok(ExpressionNode::literal(LiteralValue::Boolean(true))),
            "false" => Ok(ExpressionNode::literal(LiteralValue::Boolean(false))),
            other => Err(node.error(format!("Invalid boolean literal: {other}"))),
        },
        "StringLiteral" => literal(node, LiteralValue::parse_string),
        "NumberLiteral" => literal(node, LiteralValue::parse_number),
        "DateLiteral" => literal(node, LiteralValue::parse_date),
        "DateTimeLiteral" => literal(node, LiteralValue::parse_datetime),
        "TimeLiteral" => literal(node, LiteralValue::parse_time),
        "QuantityLiteral" => quantity_literal(node.children.first().unwrap_or(node)),
        "Quantity" => quantity_literal(node),

        other => Err(FhirPathError::syntax_error(
            FP0002,
            format!("Unknown parse tree node type '{other}'"),
            node.start.clone(),
        )),
    }
}

fn literal(node: &ParseNode, parse: fn(&str) -> Result<LiteralValue>) -> Result<ExpressionNode> {
    literal_from(node, parse(node.required_text()?))
}

fn binary_operator(node: &ParseNode) -> Result<BinaryOperator> {
    let default = match node.node_type.as_str() {
        "UnionExpression" => Some(BinaryOperator::Union),
        "ImpliesExpression" => Some(BinaryOperator::Implies),
        "AndExpression" => Some(BinaryOperator::And),
        _ => None,
    };
    match node.operator_symbol() {
        Some(symbol) => BinaryOperator::from_symbol(symbol)
            .ok_or_else(|| node.error(format!("Unknown operator '{symbol}' in {}", node.node_type))),
        None => default.ok_or_else(|| node.error(format!("{} node has no operator", node.node_type))),
    }
}

fn type_specifier(node: &ParseNode) -> Result<TypeSpecifier> {
    // Qualified identifiers arrive either as text or as Identifier children.
    let text = match node.raw_text() {
        Some(text) => text.to_string(),
        None => collect_identifiers(node)?.join("."),
    };
    if text.is_empty() {
        return Err(node.error("Empty type specifier"));
    }
    Ok(TypeSpecifier::parse(&text))
}

fn collect_identifiers(node: &ParseNode) -> Result<Vec<String>> {
    if node.node_type == "Identifier" {
        return Ok(vec![node.identifier_name()?]);
    }
    let mut names = Vec::new();
    for child in &node.children {
        names.extend(collect_identifiers(child)?);
    }
    Ok(names)
}

/// `Quantity` carries the number as its first terminal and a `Unit` child
fn quantity_literal(node: &ParseNode) -> Result<ExpressionNode> {
    let unit_node = node.children.iter().find(|c| c.node_type == "Unit");
    let (number, unit) = match (node.terminal_node_text.first(), unit_node) {
        (Some(number), Some(unit)) => (number.clone(), unit_text(unit)?),
        _ => split_quantity_text(node.required_text()?)
            .ok_or_else(|| node.error("Quantity literal without a unit"))?,
    };
    literal_from(node, LiteralValue::parse_quantity(&number, &unit))
}

fn unit_text(unit: &ParseNode) -> Result<String> {
    match unit.raw_text() {
        Some(text) => Ok(text.to_string()),
        None => unit.child(0)?.required_text().map(str::to_string),
    }
}

/// Split `3 'min'`, `3'min'` or `4days` into number and unit
fn split_quantity_text(text: &str) -> Option<(String, String)> {
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+'))
        .map(|(i, _)| i)?;
    let (number, unit) = text.split_at(end);
    let unit = unit.trim();
    if number.is_empty() || unit.is_empty() {
        return None;
    }
    Some((number.to_string(), unit.to_string()))
}

fn literal_from(node: &ParseNode, parsed: Result<LiteralValue>) -> Result<ExpressionNode> {
    parsed.map(ExpressionNode::literal).map_err(|err| match err {
        FhirPathError::SyntaxError {
            error_code,
            message,
            location: None,
        } => FhirPathError::syntax_error(error_code, message, node.start.clone()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn term(inner: ParseNode) -> ParseNode {
        ParseNode::new("TermExpression").with_child(ParseNode::new("InvocationTerm").with_child(inner))
    }

    fn member(name: &str) -> ParseNode {
        ParseNode::new("MemberInvocation").with_child(ParseNode::new("Identifier").with_text(name))
    }

    #[test]
    fn test_lower_invocation_chain() {
        // Patient.name.given
        let tree = ParseNode::new("EntireExpression").with_child(
            ParseNode::new("InvocationExpression")
                .with_child(
                    ParseNode::new("InvocationExpression")
                        .with_child(term(member("Patient")))
                        .with_child(member("name")),
                )
                .with_child(member("given")),
        );
        let expr = ExpressionNode::try_from(&tree).unwrap();
        assert_eq!(expr.to_string(), "Patient.name.given");
    }

    #[test]
    fn test_lower_from_json_wire_shape() {
        let tree: ParseNode = serde_json::from_value(json!({
            "type": "EqualityExpression",
            "terminalNodeText": ["="],
            "children": [
                {"type": "TermExpression", "children": [
                    {"type": "InvocationTerm", "children": [
                        {"type": "FunctionInvocation", "children": [
                            {"type": "Functn", "children": [
                                {"type": "Identifier", "text": "count"}
                            ]}
                        ]}
                    ]}
                ]},
                {"type": "TermExpression", "children": [
                    {"type": "LiteralTerm", "children": [
                        {"type": "NumberLiteral", "text": "2"}
                    ]}
                ]}
            ]
        }))
        .unwrap();
        let expr = ExpressionNode::try_from(&tree).unwrap();
        assert_eq!(expr.to_string(), "count() = 2");
    }

    #[test]
    fn test_lower_quantity_and_type_expression() {
        let quantity = ParseNode::new("QuantityLiteral").with_child(
            ParseNode::new("Quantity")
                .with_terminal("3")
                .with_child(ParseNode::new("Unit").with_text("'min'")),
        );
        assert_eq!(ExpressionNode::try_from(&quantity).unwrap().to_string(), "3 'min'");

        let typed = ParseNode::new("TypeExpression")
            .with_terminal("is")
            .with_child(term(member("value")))
            .with_child(ParseNode::new("TypeSpecifier").with_text("FHIR.Quantity"));
        assert_eq!(ExpressionNode::try_from(&typed).unwrap().to_string(), "value is FHIR.Quantity");
    }

    #[test]
    fn test_external_constant_forms() {
        let plain = ParseNode::new("ExternalConstantTerm").with_child(
            ParseNode::new("ExternalConstant").with_child(ParseNode::new("Identifier").with_text("resource")),
        );
        assert_eq!(ExpressionNode::try_from(&plain).unwrap(), ExpressionNode::variable("resource"));

        let quoted = ParseNode::new("ExternalConstant")
            .with_child(ParseNode::new("StringLiteral").with_text("'vs-obs'"));
        assert_eq!(ExpressionNode::try_from(&quoted).unwrap(), ExpressionNode::variable("vs-obs"));
    }

    #[test]
    fn test_unknown_node_reports_position() {
        let node = ParseNode {
            start: Some(SourceLocation::new(1, 7)),
            ..ParseNode::new("Bogus")
        };
        let err = ExpressionNode::try_from(&node).unwrap_err();
        assert_eq!(err.error_code(), FP0002);
        assert!(err.to_string().ends_with("at 1:7"));
    }
}
