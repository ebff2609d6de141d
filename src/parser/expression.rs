//=====================================================
// File: parser/expression.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript expression resolver
// Objective: Precedence-climbing expression parsing with type inference,
//            implicit widening casts and overload resolution for calls
//=====================================================

use super::{MAX_EXPRESSION_DEPTH, ParseError, ParseResult, Parser};
use crate::ast::{NodeId, NodeType};
use crate::symbol::OverloadResolution;
use crate::tokenizer::{Token, TokenKind};
use crate::types::{Datatype, Primitive};

//=====================================================
// Section 1.0 - Precedence Table
//=====================================================

/// Binding power of binary operators; higher binds tighter.
fn binary_precedence(kind: NodeType) -> u8 {
    match kind {
        NodeType::Multiply | NodeType::Divide | NodeType::Modulo => 10,
        NodeType::Add | NodeType::Subtract => 9,
        NodeType::ShiftLeft | NodeType::ShiftRight => 8,
        NodeType::Less | NodeType::Greater | NodeType::LessEqual | NodeType::GreaterEqual => 7,
        NodeType::Equal | NodeType::NotEqual => 6,
        NodeType::BitAnd => 5,
        NodeType::BitXor => 4,
        NodeType::BitOr => 3,
        NodeType::LogicalAnd => 2,
        NodeType::LogicalOr => 1,
        _ => 0,
    }
}

fn describe(types: &[Datatype]) -> String {
    let names: Vec<&str> = types.iter().map(Datatype::name).collect();
    format!("({})", names.join(", "))
}

impl Parser {
    //=====================================================
    // Section 2.0 - Entry Points
    //=====================================================

    fn enter_expression(&mut self) -> ParseResult<()> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            let token = self.peek().clone();
            self.expr_depth -= 1;
            return Err(self.syntax_error(&token, "expression nesting is too deep"));
        }
        Ok(())
    }

    fn exit_expression(&mut self) {
        self.expr_depth = self.expr_depth.saturating_sub(1);
    }

    //Function: parse_expression
    //Purpose: Parse and type one full expression
    //Inputs: self (cursor at the first token of the expression)
    //Returns: ParseResult<NodeId> whose node carries its inferred datatype
    pub(super) fn parse_expression(&mut self) -> ParseResult<NodeId> {
        self.enter_expression()?;
        let result = self.parse_ternary();
        self.exit_expression();
        result
    }

    fn parse_ternary(&mut self) -> ParseResult<NodeId> {
        let condition = self.parse_binary(1)?;
        if !self.check("?") {
            return Ok(condition);
        }
        let question = self.advance();
        let condition_type = self.type_of(condition);
        if condition_type != Datatype::BOOL {
            return Err(self.reject(
                &question,
                format!("ternary condition must be bool, found '{condition_type}'"),
            ));
        }
        let if_branch = self.parse_expression()?;
        self.expect(":", "in ternary expression")?;
        let else_branch = self.parse_expression()?;

        let if_type = self.type_of(if_branch);
        let else_type = self.type_of(else_branch);
        let (if_branch, else_branch, result) = if if_type == else_type && if_type.is_value_type() {
            (if_branch, else_branch, if_type)
        } else if if_type.is_numeric() && else_type.is_numeric() {
            let heavier = if_type.heavier(&else_type);
            (
                self.coerce(if_branch, &heavier, &question, "ternary branch")?,
                self.coerce(else_branch, &heavier, &question, "ternary branch")?,
                heavier,
            )
        } else {
            return Err(self.reject(
                &question,
                format!(
                    "ternary branches have different types: if-branch is '{if_type}', else-branch is '{else_type}'"
                ),
            ));
        };

        let node = self.ast.add_token(NodeType::Ternary, &question);
        self.ast.attach(node, condition);
        self.ast.attach(node, if_branch);
        self.ast.attach(node, else_branch);
        self.ast.set_datatype(node, result);
        Ok(node)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<NodeId> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = self.peek().clone();
            if operator.kind != TokenKind::Operator {
                break;
            }
            let Some(kind) = NodeType::from_binary_operator(&operator.text) else {
                break;
            };
            let precedence = binary_precedence(kind);
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = self.binary_node(kind, &operator, left, right)?;
        }
        Ok(left)
    }

    /// Build `left <op> right` after checking the operand types.
    pub(super) fn binary_node(
        &mut self,
        kind: NodeType,
        operator: &Token,
        left: NodeId,
        right: NodeId,
    ) -> ParseResult<NodeId> {
        let left_type = self.type_of(left);
        let right_type = self.type_of(right);
        let Some(result) = left_type.binary_result(kind, &right_type) else {
            return Err(self.reject(
                operator,
                format!(
                    "operator '{}' cannot be applied to '{left_type}' and '{right_type}'",
                    operator.text
                ),
            ));
        };
        let node = self.ast.add_token(kind, operator);
        self.ast.attach(node, left);
        self.ast.attach(node, right);
        self.ast.set_datatype(node, result);
        Ok(node)
    }

    fn parse_unary(&mut self) -> ParseResult<NodeId> {
        let token = self.peek().clone();
        // `-` directly on an integral literal folds into the literal so the
        // range check sees the signed value.
        if token.is("-")
            && matches!(
                self.peek_at(1).kind,
                TokenKind::IntLiteral | TokenKind::LongLiteral
            )
        {
            self.advance();
            let mut literal = self.advance();
            literal.text = format!("-{}", literal.text);
            literal.line = token.line;
            literal.column = token.column;
            literal.absolute_line = token.absolute_line;
            return self.literal_node(&literal);
        }
        let kind = if token.is("-") {
            Some(NodeType::Negate)
        } else if token.is("+") {
            Some(NodeType::Positive)
        } else if token.is("!") {
            Some(NodeType::Not)
        } else {
            None
        };
        if let Some(kind) = kind {
            self.advance();
            self.enter_expression()?;
            let operand = self.parse_unary();
            self.exit_expression();
            let operand = operand?;
            let operand_type = self.type_of(operand);
            let Some(result) = operand_type.unary_result(kind) else {
                return Err(self.reject(
                    &token,
                    format!("unary '{}' cannot be applied to '{operand_type}'", token.text),
                ));
            };
            let node = self.ast.add_token(kind, &token);
            self.ast.attach(node, operand);
            self.ast.set_datatype(node, result);
            return Ok(node);
        }

        if self.is_cast() {
            self.advance();
            let type_token = self.advance();
            self.advance();
            let target = Datatype::Primitive(
                Primitive::from_name(&type_token.text).ok_or_else(|| {
                    self.syntax_error(&type_token, format!("expected a type, found '{type_token}'"))
                })?,
            );
            self.enter_expression()?;
            let operand = self.parse_unary();
            self.exit_expression();
            let operand = operand?;
            let source = self.type_of(operand);
            if !source.can_cast_to(&target) {
                return Err(self.reject(
                    &type_token,
                    format!("cannot cast '{source}' to '{target}'"),
                ));
            }
            return Ok(self.cast_node(operand, &target, &type_token));
        }

        self.parse_primary()
    }

    /// `( <primitive type> )` followed by an operand.
    fn is_cast(&self) -> bool {
        if !self.check("(") {
            return false;
        }
        let inner = self.peek_at(1);
        inner.kind == TokenKind::Keyword
            && Primitive::from_name(&inner.text)
                .is_some_and(|primitive| primitive.weight().is_some())
            && self.peek_at(2).is(")")
    }

    //=====================================================
    // Section 3.0 - Primaries
    //=====================================================

    fn parse_primary(&mut self) -> ParseResult<NodeId> {
        let token = self.peek().clone();
        if token.kind.is_literal() {
            self.advance();
            return self.literal_node(&token);
        }
        if token.is("null") {
            self.advance();
            return Err(self.reject(&token, "'null' has no runtime value"));
        }
        if token.is("(") {
            self.advance();
            let inner = self.parse_expression()?;
            self.expect(")", "to close the parenthesized expression")?;
            return Ok(inner);
        }
        if token.is_identifier() {
            return self.parse_reference();
        }
        Err(self.syntax_error(&token, format!("expected an expression, found '{token}'")))
    }

    fn literal_node(&mut self, token: &Token) -> ParseResult<NodeId> {
        let valid = match token.kind {
            TokenKind::IntLiteral => token.text.parse::<i32>().is_ok(),
            TokenKind::LongLiteral => token.text.parse::<i64>().is_ok(),
            TokenKind::FloatLiteral => token.text.parse::<f32>().is_ok_and(f32::is_finite),
            TokenKind::DoubleLiteral => token.text.parse::<f64>().is_ok_and(f64::is_finite),
            _ => true,
        };
        let Some(kind) = NodeType::from_literal_token(token.kind) else {
            return Err(self.syntax_error(token, format!("unexpected literal '{token}'")));
        };
        if !valid {
            let datatype = kind.literal_type().unwrap_or(Datatype::VOID);
            let diagnostic = self.semantic_error(
                token,
                format!("literal '{}' is out of range for '{datatype}'", token.text),
            );
            if token.kind == TokenKind::IntLiteral {
                diagnostic.with_quick_fix("add an 'L' suffix to make it a long literal");
            }
            return Err(ParseError);
        }
        let node = self.ast.add_token(kind, token);
        if let Some(datatype) = kind.literal_type() {
            self.ast.set_datatype(node, datatype);
        }
        Ok(node)
    }

    /// Identifier, `Enum::Member` or call, all starting with a dotted path.
    fn parse_reference(&mut self) -> ParseResult<NodeId> {
        let (segments, first) = self.parse_path("identifier")?;
        if self.check("::") {
            return self.parse_enum_access(&segments, &first);
        }
        if self.check("(") {
            return self.parse_call(&segments, &first, false);
        }

        let path = segments.join(".");
        if segments.len() == 1 {
            if let Some(local) = self.scopes.lookup_local(&path).cloned() {
                if !local.initialized {
                    return Err(self.reject(
                        &first,
                        format!("variable '{path}' is used before it is assigned"),
                    ));
                }
                let node = self.ast.add_token(NodeType::Identifier, &first);
                self.ast.set_resolved(node, local.name);
                self.ast.set_datatype(node, local.datatype);
                return Ok(node);
            }
        }

        let global = self.resolve_global(&path, &first)?;
        let node = self.ast.add_token(NodeType::Identifier, &first);
        self.ast.set_resolved(node, global.qualified);
        self.ast.set_datatype(node, global.datatype);
        Ok(node)
    }

    fn parse_enum_access(&mut self, segments: &[String], first: &Token) -> ParseResult<NodeId> {
        self.advance();
        let member = self.expect_identifier("enum member")?;
        let path = segments.join(".");
        let found = self
            .candidate_paths(&path)
            .into_iter()
            .find_map(|candidate| self.modules.enum_type(&candidate).cloned());
        let Some(entry) = found else {
            return Err(self.reject(first, format!("unknown enum '{path}'")));
        };
        if !entry.is_public && !self.modules.is_within(self.module, entry.module) {
            return Err(self.reject(
                first,
                format!("enum '{}' is private to its module", entry.qualified),
            ));
        }
        if entry.ordinal(&member.text).is_none() {
            return Err(self.reject(
                &member,
                format!("enum '{}' has no member '{}'", entry.qualified, member.text),
            ));
        }
        let node = self.ast.add_token(NodeType::EnumAccess, &member);
        self.ast.set_resolved(node, entry.qualified.clone());
        self.ast.set_datatype(node, Datatype::Enum(entry.qualified));
        Ok(node)
    }

    //=====================================================
    // Section 4.0 - Calls
    //=====================================================

    //Function: parse_call
    //Purpose: Parse `path(args)` and bind it to one overload
    //Inputs: segments/first: callee path, allow_void: statement-level call
    //Returns: ParseResult<NodeId> with a FunctionCall node
    pub(super) fn parse_call(
        &mut self,
        segments: &[String],
        first: &Token,
        allow_void: bool,
    ) -> ParseResult<NodeId> {
        let open = self.expect("(", "before arguments")?;
        let close = self.matching_paren(&open)?;
        let ranges = self.split_arguments(close);

        let mut args = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            args.push(self.parse_argument(start, end)?);
        }
        self.current = close + 1;

        let arg_types: Vec<Datatype> = args.iter().map(|&arg| self.type_of(arg)).collect();
        let path = segments.join(".");
        let callee = self
            .candidate_paths(&path)
            .into_iter()
            .find(|candidate| self.modules.has_function(candidate));
        let Some(callee) = callee else {
            let suggestion = self.suggest(&path);
            self.semantic_error(
                first,
                format!(
                    "unknown function '{path}' called with argument types {}",
                    describe(&arg_types)
                ),
            )
            .with_suggestion(suggestion);
            return Err(ParseError);
        };

        let function = match self.modules.resolve_overload(&callee, &arg_types) {
            OverloadResolution::Found(function) => function,
            OverloadResolution::NoMatch { available } => {
                self.semantic_error(
                    first,
                    format!(
                        "no overload of '{callee}' accepts argument types {}",
                        describe(&arg_types)
                    ),
                )
                .with_quick_fix(format!("available: {}", available.join(", ")));
                return Err(ParseError);
            }
            OverloadResolution::Ambiguous { candidates } => {
                self.semantic_error(
                    first,
                    format!(
                        "ambiguous call to '{callee}' with argument types {}",
                        describe(&arg_types)
                    ),
                )
                .with_quick_fix(format!("candidates: {}", candidates.join(", ")));
                return Err(ParseError);
            }
            OverloadResolution::Missing => {
                return Err(self.reject(first, format!("unknown function '{path}'")));
            }
        };

        if !function.is_public && !self.modules.is_within(self.module, function.module) {
            return Err(self.reject(
                first,
                format!("function '{}' is private to its module", function.qualified),
            ));
        }
        if function.return_type.is_void() && !allow_void {
            return Err(self.reject(
                first,
                format!("void function '{}' cannot be used as a value", function.qualified),
            ));
        }

        let node = self.ast.add_token(NodeType::FunctionCall, first);
        for (arg, param) in args.into_iter().zip(&function.params) {
            let arg = self.coerce(arg, param, first, "argument")?;
            self.ast.attach(node, arg);
        }
        self.ast.set_resolved(node, function.signature);
        self.ast.set_datatype(node, function.return_type);
        Ok(node)
    }

    /// Index of the `)` closing the call opened just before the cursor.
    fn matching_paren(&mut self, open: &Token) -> ParseResult<usize> {
        let mut depth = 0usize;
        let mut index = self.current;
        while index < self.limit {
            let token = &self.tokens[index];
            if token.is("(") {
                depth += 1;
            } else if token.is(")") {
                if depth == 0 {
                    return Ok(index);
                }
                depth -= 1;
            } else if token.is(";") || token.is("{") || token.is("}") {
                break;
            }
            index += 1;
        }
        Err(self.syntax_error(open, "unclosed '(' in call"))
    }

    /// Split `[current, close)` into argument slices on top-level commas.
    fn split_arguments(&self, close: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        if self.current == close {
            return ranges;
        }
        let mut depth = 0usize;
        let mut start = self.current;
        for index in self.current..close {
            let token = &self.tokens[index];
            if token.is("(") {
                depth += 1;
            } else if token.is(")") {
                depth = depth.saturating_sub(1);
            } else if token.is(",") && depth == 0 {
                ranges.push((start, index));
                start = index + 1;
            }
        }
        ranges.push((start, close));
        ranges
    }

    /// Parse exactly the tokens of one argument slice.
    fn parse_argument(&mut self, start: usize, end: usize) -> ParseResult<NodeId> {
        let saved_limit = self.limit;
        let boundary = &self.tokens[end];
        let boundary = Token::new(
            "",
            TokenKind::Eof,
            boundary.line,
            boundary.column,
            boundary.absolute_line,
        );
        let saved_eof = std::mem::replace(&mut self.eof, boundary);
        self.current = start;
        self.limit = end;
        let result = if start == end {
            let token = self.peek().clone();
            Err(self.syntax_error(&token, "empty argument"))
        } else {
            self.parse_expression().and_then(|node| {
                if self.is_at_end() {
                    Ok(node)
                } else {
                    let stray = self.peek().clone();
                    Err(self.syntax_error(&stray, format!("unexpected '{stray}' in argument")))
                }
            })
        };
        self.limit = saved_limit;
        self.eof = saved_eof;
        result
    }

    //=====================================================
    // Section 5.0 - Coercion
    //=====================================================

    pub(super) fn type_of(&self, node: NodeId) -> Datatype {
        self.ast.datatype(node).cloned().unwrap_or(Datatype::VOID)
    }

    //Function: coerce
    //Purpose: Fit `value` into `target`, inserting a widening cast if needed
    //Inputs: value node, target type, anchor token, context label
    //Returns: ParseResult<NodeId> (the value or its cast wrapper)
    pub(super) fn coerce(
        &mut self,
        value: NodeId,
        target: &Datatype,
        anchor: &Token,
        context: &str,
    ) -> ParseResult<NodeId> {
        let found = self.type_of(value);
        if &found == target {
            return Ok(value);
        }
        if found.can_widen_to(target) {
            return Ok(self.cast_node(value, target, anchor));
        }
        Err(self.reject(
            anchor,
            format!("{context} expects '{target}', found '{found}'"),
        ))
    }

    fn cast_node(&mut self, value: NodeId, target: &Datatype, anchor: &Token) -> NodeId {
        let token = Token::synthetic(target.name(), TokenKind::Keyword, anchor);
        let node = self.ast.add_token(NodeType::Cast, &token);
        self.ast.attach(node, value);
        self.ast.set_datatype(node, target.clone());
        node
    }
}

//=====================================================
// End of file
//=====================================================
