//=====================================================
// File: parser/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript recursive descent parser
// Objective: Transform token streams into the AST while resolving scopes,
//            symbols and types, collecting every diagnostic along the way
//=====================================================

//=====================================================
// Section 1.0 - Imports & Parse Errors
//=====================================================

mod declarations;
mod expression;

use crate::ast::{Ast, NodeId, NodeType};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, closest_match};
use crate::scope::{LoopKind, ScopeError, ScopeId, ScopeKind, ScopeTree};
use crate::symbol::{GlobalVariable, ModuleId, ModuleTree};
use crate::tokenizer::{Token, TokenKind, TokenStream, is_keyword};
use crate::types::{Datatype, Primitive};

/// A diagnostic has already been registered; the caller should recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

pub type ParseResult<T> = Result<T, ParseError>;

/// Successful parse: the tree plus the symbols it references.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub ast: Ast,
    pub modules: ModuleTree,
    pub stdlib_finish_line: usize,
}

const MAX_EXPRESSION_DEPTH: usize = 256;

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=",
];

#[derive(Debug, Clone)]
struct FunctionContext {
    name: String,
    return_type: Datatype,
}

#[derive(Debug, Clone)]
struct ParameterSpec {
    token: Token,
    datatype: Datatype,
    is_mut: bool,
}

//=====================================================
// Section 2.0 - Parser State
//=====================================================

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Exclusive end of the slice currently being parsed.
    limit: usize,
    eof: Token,
    ast: Ast,
    modules: ModuleTree,
    scopes: ScopeTree,
    diagnostics: Diagnostics,
    module: ModuleId,
    function: Option<FunctionContext>,
    expr_depth: usize,
    stdlib_finish_line: usize,
    unreachable_reported: Vec<ScopeId>,
}

impl Parser {
    //Function: new
    //Purpose: Initialize the parser from a token stream, keeping its diagnostics
    //Inputs: stream: TokenStream
    //Returns: Self
    pub fn new(stream: TokenStream) -> Self {
        let eof = match stream.tokens.last() {
            Some(last) => Token::new(
                "",
                TokenKind::Eof,
                last.line,
                last.column + last.text.chars().count(),
                last.absolute_line,
            ),
            None => Token::new("", TokenKind::Eof, 1, 1, 1),
        };
        let limit = stream.tokens.len();
        Self {
            tokens: stream.tokens,
            current: 0,
            limit,
            eof,
            ast: Ast::new(),
            modules: ModuleTree::new(),
            scopes: ScopeTree::new(),
            diagnostics: stream.diagnostics,
            module: ModuleTree::ROOT,
            function: None,
            expr_depth: 0,
            stdlib_finish_line: stream.stdlib_finish_line,
            unreachable_reported: Vec::new(),
        }
    }

    //Function: parse
    //Purpose: Run the declaration pre-pass and the full statement parse
    //Inputs: self
    //Returns: Result<ParseOutput, Vec<Diagnostic>> (Err when any diagnostic exists)
    pub fn parse(mut self) -> Result<ParseOutput, Vec<Diagnostic>> {
        self.scopes.push(ScopeKind::Module);
        self.declare_items();

        while !self.is_at_end() {
            let token = self.peek().clone();
            let outcome = if token.kind == TokenKind::Sentinel {
                self.advance();
                Ok(())
            } else if token.is("module") {
                self.parse_module(Ast::ROOT)
            } else if token.is("using") {
                self.parse_using(Ast::ROOT)
            } else {
                Err(self.syntax_error(
                    &token,
                    format!("expected 'module' or 'using' at top level, found '{token}'"),
                ))
            };
            if outcome.is_err() {
                self.synchronize();
            }
        }
        self.scopes.pop();

        if self.diagnostics.has_errors() {
            tracing::debug!(diagnostics = self.diagnostics.len(), "parse failed");
            return Err(self.diagnostics.into_entries());
        }
        tracing::debug!(nodes = self.ast.len(), "parsed program");
        Ok(ParseOutput {
            ast: self.ast,
            modules: self.modules,
            stdlib_finish_line: self.stdlib_finish_line,
        })
    }

    //=====================================================
    // Section 3.0 - Module Members
    //=====================================================

    fn parse_module(&mut self, parent: NodeId) -> ParseResult<()> {
        self.advance();
        let (segments, first) = self.parse_path("module name")?;
        self.expect("{", "after module name")?;

        let previous = self.module;
        for segment in &segments {
            self.module = self.modules.ensure_child(self.module, segment);
        }
        let node = self.ast.add_token(NodeType::CreateModule, &first);
        self.ast
            .set_resolved(node, self.modules.module(self.module).qualified.clone());
        self.ast.attach(parent, node);

        self.scopes.push(ScopeKind::Module);
        while !self.check("}") && !self.is_at_end() {
            if self.parse_member(node).is_err() {
                self.synchronize();
            }
        }
        let closed = self.expect("}", "to close the module");
        self.scopes.pop();
        self.module = previous;
        closed.map(|_| ())
    }

    fn parse_member(&mut self, parent: NodeId) -> ParseResult<()> {
        let token = self.peek().clone();
        if token.is("module") {
            return self.parse_module(parent);
        }
        if token.is("using") {
            return self.parse_using(parent);
        }

        let is_pub = self.matches("pub");
        if self.check("enum") {
            return self.parse_enum(parent);
        }
        if self.check("struct") {
            return self.parse_struct(parent);
        }
        if self.check("native") {
            return self.parse_native_function(parent, is_pub);
        }

        let is_mut = self.matches("mut");
        let type_token = self.peek().clone();
        let datatype = self.parse_type(true)?;
        let name = self.expect_identifier("declaration name")?;
        if self.check("(") {
            if is_mut {
                return Err(self.reject(&type_token, "functions cannot be declared 'mut'"));
            }
            return self.parse_function(parent, is_pub, datatype, name);
        }
        self.parse_global(parent, is_pub, is_mut, datatype, &type_token, name)
    }

    fn parse_using(&mut self, parent: NodeId) -> ParseResult<()> {
        self.advance();
        let (segments, first) = self.parse_path("module path")?;
        self.expect(";", "after using path")?;
        let path = segments.join(".");

        let resolved = self
            .modules
            .ancestry(self.module)
            .into_iter()
            .map(|module| qualify_path(&self.modules.module(module).qualified, &path))
            .find(|candidate| self.modules.find_module(candidate).is_some());
        let Some(resolved) = resolved else {
            let modules: Vec<String> = self
                .modules
                .modules()
                .map(|module| module.qualified.clone())
                .collect();
            let suggestion = closest_match(&path, modules.iter().map(String::as_str));
            self.semantic_error(&first, format!("unknown module '{path}'"))
                .with_suggestion(suggestion);
            return Err(ParseError);
        };

        self.scopes.add_using(resolved.clone());
        let node = self.ast.add_token(NodeType::Using, &first);
        self.ast.set_resolved(node, resolved);
        self.ast.attach(parent, node);
        Ok(())
    }

    fn parse_enum(&mut self, parent: NodeId) -> ParseResult<()> {
        self.advance();
        let name = self.expect_identifier("enum name")?;
        self.expect("{", "after enum name")?;

        let node = self.ast.add_token(NodeType::EnumDefinition, &name);
        let qualified = self.modules.module(self.module).qualify(&name.text);
        self.ast.set_resolved(node, qualified.clone());
        self.ast.set_datatype(node, Datatype::Enum(qualified));

        self.scopes.push(ScopeKind::Enum);
        let members = self.parse_enum_members(node);
        let exit = self.scopes.pop();
        members?;
        if exit.is_some_and(|exit| exit.member_count == 0) {
            self.semantic_error(&name, format!("enum '{}' must declare at least one member", name.text))
                .with_quick_fix("add a member such as `enum Name { First }`");
        }
        self.ast.attach(parent, node);
        Ok(())
    }

    fn parse_enum_members(&mut self, node: NodeId) -> ParseResult<()> {
        while !self.check("}") {
            let member = self.expect_identifier("enum member")?;
            if let Err(err) = self.scopes.add_member(&member.text) {
                self.semantic_error(&member, err.to_string());
            } else {
                let child = self.ast.add_token(NodeType::EnumMember, &member);
                self.ast.attach(node, child);
            }
            if !self.matches(",") {
                break;
            }
        }
        self.expect("}", "to close the enum").map(|_| ())
    }

    fn parse_struct(&mut self, parent: NodeId) -> ParseResult<()> {
        self.advance();
        let name = self.expect_identifier("struct name")?;
        self.expect("{", "after struct name")?;

        let node = self.ast.add_token(NodeType::StructDefinition, &name);
        let qualified = self.modules.module(self.module).qualify(&name.text);
        self.ast.set_resolved(node, qualified);

        self.scopes.push(ScopeKind::Struct);
        let fields = self.parse_struct_fields(node);
        let exit = self.scopes.pop();
        let fields = fields?;
        if exit.is_some_and(|exit| exit.member_count == 0) {
            self.semantic_error(&name, format!("struct '{}' must declare at least one field", name.text));
        }
        self.modules.set_struct_fields(self.module, &name.text, fields);
        self.ast.attach(parent, node);
        Ok(())
    }

    fn parse_struct_fields(&mut self, node: NodeId) -> ParseResult<Vec<(String, Datatype)>> {
        let mut fields = Vec::new();
        while !self.check("}") && !self.is_at_end() {
            let datatype = self.parse_type(false)?;
            let field = self.expect_identifier("field name")?;
            self.expect(";", "after struct field")?;
            if let Err(err) = self.scopes.add_member(&field.text) {
                self.semantic_error(&field, err.to_string());
                continue;
            }
            let child = self.ast.add_token(NodeType::StructField, &field);
            self.ast.set_datatype(child, datatype.clone());
            self.ast.attach(node, child);
            fields.push((field.text.clone(), datatype));
        }
        self.expect("}", "to close the struct")?;
        Ok(fields)
    }

    fn parse_native_function(&mut self, parent: NodeId, is_pub: bool) -> ParseResult<()> {
        self.advance();
        self.expect("(", "after 'native'")?;
        let binding = self.advance();
        if binding.kind != TokenKind::StringLiteral {
            return Err(self.syntax_error(&binding, "expected a binding path string after 'native('"));
        }
        if !is_binding_path(&binding.text) {
            self.semantic_error(&binding, format!("invalid native binding path '{}'", binding.text))
                .with_quick_fix("use a dotted path such as \"mib.std.Console\"");
        }
        self.expect(")", "after binding path")?;

        let return_type = self.parse_type(true)?;
        let name = self.expect_identifier("native function name")?;
        let params = self.parse_parameters()?;
        self.expect(";", "after native function declaration")?;

        let types: Vec<Datatype> = params.iter().map(|param| param.datatype.clone()).collect();
        let signature = self.function_signature(&name, &types, &return_type, true, is_pub)?;

        let node = self.ast.add_token(NodeType::NativeFunctionDefinition, &name);
        self.ast.set_resolved(node, signature);
        self.ast.set_datatype(node, return_type);
        let path = self.ast.add_token(NodeType::StringLiteral, &binding);
        self.ast.set_datatype(path, Datatype::STRING);
        self.ast.attach(node, path);
        self.attach_parameters(node, &params);
        self.ast.attach(parent, node);
        Ok(())
    }

    fn parse_function(
        &mut self,
        parent: NodeId,
        is_pub: bool,
        return_type: Datatype,
        name: Token,
    ) -> ParseResult<()> {
        if !return_type.is_void() && !return_type.is_value_type() {
            return Err(self.reject(
                &name,
                format!("function '{}' cannot return struct type '{return_type}'", name.text),
            ));
        }
        let params = self.parse_parameters()?;
        let types: Vec<Datatype> = params.iter().map(|param| param.datatype.clone()).collect();
        let signature = self.function_signature(&name, &types, &return_type, false, is_pub)?;

        let node = self.ast.add_token(NodeType::FunctionDefinition, &name);
        self.ast.set_resolved(node, signature);
        self.ast.set_datatype(node, return_type.clone());
        self.attach_parameters(node, &params);

        self.function = Some(FunctionContext {
            name: name.text.clone(),
            return_type: return_type.clone(),
        });
        self.scopes.push(ScopeKind::Function);
        for param in &params {
            if let Err(err) =
                self.scopes
                    .declare_local(&param.token.text, param.datatype.clone(), !param.is_mut, true)
            {
                let message = match err {
                    ScopeError::Redefinition(param) => format!("parameter '{param}' is already defined"),
                    other => other.to_string(),
                };
                self.semantic_error(&param.token, message);
            }
        }
        let body = self.parse_braced_block(node);
        let exit = self.scopes.pop();
        self.function = None;
        body?;

        if !return_type.is_void() && !exit.is_some_and(|exit| exit.reached_end) {
            self.semantic_error(
                &name,
                format!("function '{}' does not return a value on every path", name.text),
            )
            .with_quick_fix(format!("end every path with `return <{return_type}>;`"));
        }
        self.ast.attach(parent, node);
        Ok(())
    }

    /// Signature registered by the pre-pass, or registered now when the
    /// pre-pass could not read the header.
    fn function_signature(
        &mut self,
        name: &Token,
        params: &[Datatype],
        return_type: &Datatype,
        is_native: bool,
        is_public: bool,
    ) -> ParseResult<String> {
        if let Some((_, definition)) = self.modules.find_definition(self.module, &name.text, params) {
            return Ok(definition.signature.clone());
        }
        self.modules
            .add_function(
                self.module,
                &name.text,
                return_type.clone(),
                params.to_vec(),
                is_native,
                is_public,
            )
            .map_err(|err| self.reject(name, err.to_string()))
    }

    fn parse_parameters(&mut self) -> ParseResult<Vec<ParameterSpec>> {
        self.expect("(", "before parameters")?;
        let mut params = Vec::new();
        if !self.check(")") {
            loop {
                let is_mut = self.matches("mut");
                let type_token = self.peek().clone();
                let datatype = self.parse_type(false)?;
                if !datatype.is_value_type() {
                    return Err(self.reject(
                        &type_token,
                        format!("struct type '{datatype}' cannot be used as a parameter"),
                    ));
                }
                let token = self.expect_identifier("parameter name")?;
                params.push(ParameterSpec {
                    token,
                    datatype,
                    is_mut,
                });
                if !self.matches(",") {
                    break;
                }
            }
        }
        self.expect(")", "after parameters")?;
        Ok(params)
    }

    fn attach_parameters(&mut self, node: NodeId, params: &[ParameterSpec]) {
        for param in params {
            let child = self.ast.add_token(NodeType::Parameter, &param.token);
            self.ast.set_datatype(child, param.datatype.clone());
            self.ast.set_resolved(child, param.token.text.clone());
            self.ast.attach(node, child);
        }
    }

    fn parse_global(
        &mut self,
        parent: NodeId,
        is_pub: bool,
        is_mut: bool,
        datatype: Datatype,
        type_token: &Token,
        name: Token,
    ) -> ParseResult<()> {
        if !datatype.is_value_type() {
            return Err(self.reject(
                type_token,
                format!("'{datatype}' is not a storable value type"),
            ));
        }
        let qualified = self.modules.module(self.module).qualify(&name.text);
        let node = if self.matches("=") {
            let value = self.parse_expression()?;
            let value = self.coerce(value, &datatype, &name, "initializer")?;
            let node = self.ast.add_token(NodeType::VariableDefinition, &name);
            self.ast.attach(node, value);
            node
        } else {
            if !is_mut {
                self.semantic_error(&name, format!("constant global '{}' must be initialized", name.text))
                    .with_quick_fix("add an initializer or declare it 'mut'");
            }
            self.ast.add_token(NodeType::VariableDeclaration, &name)
        };
        self.expect(";", "after global declaration")?;

        let registered = self.modules.add_global(GlobalVariable {
            name: name.text.clone(),
            qualified: qualified.clone(),
            datatype: datatype.clone(),
            is_constant: !is_mut,
            is_public: is_pub,
            module: self.module,
        });
        if let Err(err) = registered {
            self.semantic_error(&name, err.to_string());
        }
        self.ast.set_resolved(node, qualified);
        self.ast.set_datatype(node, datatype);
        self.ast.attach(parent, node);
        Ok(())
    }

    //=====================================================
    // Section 4.0 - Statements
    //=====================================================

    /// `{ stmt* }` into a fresh `Scope` node; the caller owns the scope push.
    fn parse_braced_block(&mut self, parent: NodeId) -> ParseResult<NodeId> {
        let open = self.expect("{", "to open a block")?;
        let block = self.ast.add(NodeType::Scope, None, open.line);
        self.ast.attach(parent, block);
        while !self.check("}") && !self.is_at_end() {
            if self.parse_statement(block).is_err() {
                self.synchronize();
            }
        }
        self.expect("}", "to close the block")?;
        Ok(block)
    }

    fn parse_statement(&mut self, parent: NodeId) -> ParseResult<()> {
        let token = self.peek().clone();
        if self.scopes.reached_end() {
            if let Some(scope) = self.scopes.current() {
                if !self.unreachable_reported.contains(&scope) {
                    self.unreachable_reported.push(scope);
                    self.semantic_error(&token, "unreachable statement after return")
                        .with_quick_fix("remove the statement or the earlier return");
                }
            }
        }

        if token.is("{") {
            self.scopes.push(ScopeKind::Block);
            let block = self.parse_braced_block(parent);
            self.scopes.pop();
            return block.map(|_| ());
        }
        if token.is("if") {
            return self.parse_if(parent);
        }
        if token.is("while") {
            return self.parse_while(parent);
        }
        if token.is("for") {
            return self.parse_for(parent);
        }
        if token.is("do") {
            return self.parse_do_while(parent);
        }
        if token.is("return") {
            return self.parse_return(parent);
        }
        if token.is("using") {
            return self.parse_using(parent);
        }
        if self.starts_declaration() {
            let node = self.parse_local_declaration()?;
            self.expect(";", "after variable declaration")?;
            self.ast.attach(parent, node);
            return Ok(());
        }
        if token.is_identifier() {
            let node = self.parse_simple_statement()?;
            self.expect(";", "after statement")?;
            self.ast.attach(parent, node);
            return Ok(());
        }
        Err(self.syntax_error(&token, format!("expected a statement, found '{token}'")))
    }

    /// Assignment or call, the forms usable in `for` headers too.
    fn parse_simple_statement(&mut self) -> ParseResult<NodeId> {
        let (segments, first) = self.parse_path("statement")?;
        let next = self.peek().clone();
        if next.is("(") {
            let call = self.parse_call(&segments, &first, true)?;
            let statement = self.ast.add_token(NodeType::Statement, &first);
            self.ast.attach(statement, call);
            return Ok(statement);
        }
        if ASSIGNMENT_OPERATORS.iter().any(|op| next.is(op)) {
            return self.parse_assignment(&segments, &first);
        }
        Err(self.syntax_error(
            &next,
            format!("expected an assignment or a call after '{}', found '{next}'", segments.join(".")),
        ))
    }

    fn starts_declaration(&self) -> bool {
        let token = self.peek();
        if token.is("mut") {
            return true;
        }
        if token.kind == TokenKind::Keyword {
            return Primitive::from_name(&token.text)
                .is_some_and(|primitive| !matches!(primitive, Primitive::Null));
        }
        if !token.is_identifier() {
            return false;
        }
        let mut index = self.current + 1;
        while index + 1 < self.limit && self.tokens[index].is(".") && self.tokens[index + 1].is_identifier() {
            index += 2;
        }
        index < self.limit && self.tokens[index].is_identifier()
    }

    fn parse_local_declaration(&mut self) -> ParseResult<NodeId> {
        let is_mut = self.matches("mut");
        let type_token = self.peek().clone();
        let datatype = self.parse_type(false)?;
        if !datatype.is_value_type() {
            return Err(self.reject(
                &type_token,
                format!("'{datatype}' is not a storable value type"),
            ));
        }
        let name = self.expect_identifier("variable name")?;

        let node = if self.matches("=") {
            let value = self.parse_expression()?;
            let value = self.coerce(value, &datatype, &name, "initializer")?;
            let node = self.ast.add_token(NodeType::VariableDefinition, &name);
            self.ast.attach(node, value);
            node
        } else {
            self.ast.add_token(NodeType::VariableDeclaration, &name)
        };
        let initialized = self.ast.kind(node) == NodeType::VariableDefinition;
        if let Err(err) = self
            .scopes
            .declare_local(&name.text, datatype.clone(), !is_mut, initialized)
        {
            self.semantic_error(&name, err.to_string());
        }
        self.ast.set_resolved(node, name.text.clone());
        self.ast.set_datatype(node, datatype);
        Ok(node)
    }

    //Function: parse_assignment
    //Purpose: Resolve an assignment target, desugar compound operators and
    //         apply the constant rules
    //Inputs: segments: target path, first: first path token
    //Returns: ParseResult<NodeId> with an Assign node
    fn parse_assignment(&mut self, segments: &[String], first: &Token) -> ParseResult<NodeId> {
        let operator = self.advance();
        let path = segments.join(".");
        let local = (segments.len() == 1)
            .then(|| self.scopes.lookup_local(&path).cloned())
            .flatten();

        let (resolved, datatype) = match &local {
            Some(local) => (local.name.clone(), local.datatype.clone()),
            None => {
                let global = self.resolve_global(&path, first)?;
                if global.is_constant {
                    self.semantic_error(
                        first,
                        format!("cannot assign to constant global '{}'", global.qualified),
                    )
                    .with_quick_fix("declare the global 'mut'");
                }
                (global.qualified.clone(), global.datatype.clone())
            }
        };

        let mut value = self.parse_expression()?;
        if !operator.is("=") {
            if local.as_ref().is_some_and(|local| !local.initialized) {
                return Err(self.reject(
                    first,
                    format!("variable '{path}' is used before it is assigned"),
                ));
            }
            let op_text = operator.text.trim_end_matches('=');
            let kind = NodeType::from_binary_operator(op_text).ok_or_else(|| {
                self.syntax_error(&operator, format!("unknown assignment operator '{}'", operator.text))
            })?;
            let target = self.ast.add_token(NodeType::Identifier, first);
            self.ast.set_resolved(target, resolved.clone());
            self.ast.set_datatype(target, datatype.clone());
            let op_token = Token::synthetic(op_text, TokenKind::Operator, &operator);
            value = self.binary_node(kind, &op_token, target, value)?;
        }
        let value = self.coerce(value, &datatype, first, "assignment")?;

        if local.is_some() {
            if let Err(err) = self.scopes.assign_local(&path) {
                let diagnostic = self.semantic_error(first, err.to_string());
                if matches!(err, ScopeError::ConstantReassignment(_)) {
                    diagnostic.with_quick_fix(format!("declare it as `mut {datatype} {path}`"));
                }
            }
        }

        let node = self.ast.add_token(NodeType::Assign, first);
        self.ast.set_resolved(node, resolved);
        self.ast.set_datatype(node, datatype);
        self.ast.attach(node, value);
        Ok(node)
    }

    fn parse_condition(&mut self, keyword: &Token) -> ParseResult<NodeId> {
        self.expect("(", &format!("after '{}'", keyword.text))?;
        let condition = self.parse_expression()?;
        self.expect(")", "after condition")?;
        let found = self.ast.datatype(condition).cloned().unwrap_or(Datatype::VOID);
        if found != Datatype::BOOL {
            return Err(self.reject(
                keyword,
                format!("'{}' condition must be bool, found '{found}'", keyword.text),
            ));
        }
        Ok(condition)
    }

    fn parse_if(&mut self, parent: NodeId) -> ParseResult<()> {
        let keyword = self.advance();
        let condition = self.parse_condition(&keyword)?;
        let node = self.ast.add_token(NodeType::IfStatement, &keyword);
        self.ast.attach(node, condition);
        self.ast.attach(parent, node);

        let if_scope = self.scopes.push(ScopeKind::If);
        let body = self.parse_braced_block(node);
        self.scopes.pop();
        body?;

        if self.check("else") {
            let else_token = self.advance();
            let else_node = self.ast.add_token(NodeType::ElseStatement, &else_token);
            self.ast.attach(node, else_node);
            self.scopes.push_else(if_scope);
            let branch = if self.check("if") {
                self.parse_if(else_node)
            } else {
                self.parse_braced_block(else_node).map(|_| ())
            };
            self.scopes.pop();
            branch?;
        }
        Ok(())
    }

    fn parse_while(&mut self, parent: NodeId) -> ParseResult<()> {
        let keyword = self.advance();
        let condition = self.parse_condition(&keyword)?;
        let node = self.ast.add_token(NodeType::WhileStatement, &keyword);
        self.ast.attach(node, condition);
        self.ast.attach(parent, node);

        self.scopes.push(ScopeKind::Loop(LoopKind::While));
        let body = self.parse_braced_block(node);
        self.scopes.pop();
        body.map(|_| ())
    }

    fn parse_do_while(&mut self, parent: NodeId) -> ParseResult<()> {
        let keyword = self.advance();
        let node = self.ast.add_token(NodeType::DoWhileStatement, &keyword);
        self.ast.attach(parent, node);

        self.scopes.push(ScopeKind::Loop(LoopKind::Do));
        let body = self.parse_braced_block(node);
        self.scopes.pop();
        body?;

        let while_token = self.expect("while", "after 'do' body")?;
        let condition = self.parse_condition(&while_token)?;
        self.expect(";", "after do-while condition")?;
        self.ast.attach(node, condition);
        Ok(())
    }

    fn parse_for(&mut self, parent: NodeId) -> ParseResult<()> {
        let keyword = self.advance();
        let node = self.ast.add_token(NodeType::ForStatement, &keyword);
        self.ast.attach(parent, node);

        // The initializer runs once, so it sits in a block around the loop
        // scope rather than inside it.
        self.scopes.push(ScopeKind::Block);
        let parsed = self.parse_for_init(&keyword, node).and_then(|()| {
            self.scopes.push(ScopeKind::Loop(LoopKind::For));
            let parsed = self.parse_for_parts(&keyword, node);
            self.scopes.pop();
            parsed
        });
        self.scopes.pop();
        parsed
    }

    fn parse_for_init(&mut self, keyword: &Token, node: NodeId) -> ParseResult<()> {
        self.expect("(", "after 'for'")?;
        let init = if self.check(";") {
            self.ast.add(NodeType::Scope, None, keyword.line)
        } else if self.starts_declaration() {
            self.parse_local_declaration()?
        } else {
            self.parse_simple_statement()?
        };
        self.ast.attach(node, init);
        self.expect(";", "after for initializer")?;
        Ok(())
    }

    fn parse_for_parts(&mut self, keyword: &Token, node: NodeId) -> ParseResult<()> {
        let condition = self.parse_expression()?;
        let found = self.ast.datatype(condition).cloned().unwrap_or(Datatype::VOID);
        if found != Datatype::BOOL {
            return Err(self.reject(
                keyword,
                format!("'for' condition must be bool, found '{found}'"),
            ));
        }
        self.ast.attach(node, condition);
        self.expect(";", "after for condition")?;

        let step = if self.check(")") {
            self.ast.add(NodeType::Scope, None, keyword.line)
        } else {
            self.parse_simple_statement()?
        };
        self.expect(")", "after for step")?;
        self.ast.attach(node, step);
        self.parse_braced_block(node).map(|_| ())
    }

    fn parse_return(&mut self, parent: NodeId) -> ParseResult<()> {
        let keyword = self.advance();
        let Some(context) = self.function.clone() else {
            return Err(self.reject(&keyword, "'return' outside of a function"));
        };
        let node = self.ast.add_token(NodeType::Return, &keyword);
        self.ast.set_datatype(node, context.return_type.clone());

        if self.check(";") {
            if !context.return_type.is_void() {
                self.semantic_error(
                    &keyword,
                    format!(
                        "function '{}' must return a value of type '{}'",
                        context.name, context.return_type
                    ),
                );
            }
        } else {
            let value = self.parse_expression()?;
            if context.return_type.is_void() {
                return Err(self.reject(
                    &keyword,
                    format!("void function '{}' cannot return a value", context.name),
                ));
            }
            let value = self.coerce(value, &context.return_type, &keyword, "return value")?;
            self.ast.attach(node, value);
        }
        self.expect(";", "after return")?;
        self.scopes.mark_returned();
        self.ast.attach(parent, node);
        Ok(())
    }

    //=====================================================
    // Section 5.0 - Types & Symbol Lookup
    //=====================================================

    /// `IDENT { '.' IDENT }`, returning the segments and the first token.
    fn parse_path(&mut self, what: &str) -> ParseResult<(Vec<String>, Token)> {
        let first = self.expect_identifier(what)?;
        let mut segments = vec![first.text.clone()];
        while self.check(".") {
            self.advance();
            segments.push(self.expect_identifier(what)?.text);
        }
        Ok((segments, first))
    }

    fn parse_type(&mut self, allow_void: bool) -> ParseResult<Datatype> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Keyword {
            let primitive = Primitive::from_name(&token.text)
                .filter(|primitive| *primitive != Primitive::Null)
                .ok_or_else(|| self.syntax_error(&token, format!("expected a type, found '{token}'")))?;
            self.advance();
            if primitive == Primitive::Void && !allow_void {
                return Err(self.reject(&token, "'void' is only valid as a return type"));
            }
            return Ok(Datatype::Primitive(primitive));
        }
        let (segments, first) = self.parse_path("type name")?;
        let path = segments.join(".");
        let found = self
            .candidate_paths(&path)
            .into_iter()
            .find_map(|candidate| self.modules.named_type(&candidate));
        match found {
            Some((datatype, is_public, owner)) => {
                if !is_public && !self.modules.is_within(self.module, owner) {
                    return Err(self.reject(
                        &first,
                        format!("type '{datatype}' is private to its module"),
                    ));
                }
                Ok(datatype)
            }
            None => {
                let suggestion = self.suggest(&path);
                self.semantic_error(&first, format!("unknown type '{path}'"))
                    .with_suggestion(suggestion);
                Err(ParseError)
            }
        }
    }

    /// Qualified names tried for `path`: literal, enclosing modules, usings.
    fn candidate_paths(&self, path: &str) -> Vec<String> {
        let usings: Vec<String> = self.scopes.usings().map(str::to_string).collect();
        candidate_paths(&self.modules, self.module, &usings, path)
    }

    fn resolve_global(&mut self, path: &str, token: &Token) -> ParseResult<GlobalVariable> {
        let found = self
            .candidate_paths(path)
            .into_iter()
            .find_map(|candidate| self.modules.global(&candidate).cloned());
        match found {
            Some(global) => {
                if !global.is_public && !self.modules.is_within(self.module, global.module) {
                    return Err(self.reject(
                        token,
                        format!("global '{}' is private to its module", global.qualified),
                    ));
                }
                Ok(global)
            }
            None => {
                let suggestion = self.suggest(path);
                self.semantic_error(token, format!("unknown identifier '{path}'"))
                    .with_suggestion(suggestion);
                Err(ParseError)
            }
        }
    }

    /// Closest visible name to `target` for "did you mean" hints.
    fn suggest(&self, target: &str) -> Option<String> {
        let mut names: Vec<String> = self
            .scopes
            .visible_locals()
            .into_iter()
            .map(str::to_string)
            .collect();
        for qualified in self.modules.qualified_names() {
            if let Some((_, short)) = qualified.rsplit_once('.') {
                names.push(short.to_string());
            }
            names.push(qualified);
        }
        closest_match(target, names.iter().map(String::as_str))
    }

    //=====================================================
    // Section 6.0 - Token Navigation & Recovery
    //=====================================================

    fn peek(&self) -> &Token {
        if self.current < self.limit {
            &self.tokens[self.current]
        } else {
            &self.eof
        }
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = self.current + offset;
        if index < self.limit {
            &self.tokens[index]
        } else {
            &self.eof
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.limit {
            self.current += 1;
        }
        token
    }

    fn check(&self, text: &str) -> bool {
        self.peek().is(text)
    }

    fn matches(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str, context: &str) -> ParseResult<Token> {
        if self.check(text) {
            return Ok(self.advance());
        }
        let found = self.peek().clone();
        Err(self.syntax_error(&found, format!("expected '{text}' {context}, found '{found}'")))
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<Token> {
        let token = self.peek().clone();
        if token.is_identifier() {
            return Ok(self.advance());
        }
        let message = if is_keyword(&token.text) {
            format!("expected {what}, found reserved word '{token}'")
        } else {
            format!("expected {what}, found '{token}'")
        };
        Err(self.syntax_error(&token, message))
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.limit
    }

    //Function: synchronize
    //Purpose: Skip to the end of the broken statement
    //Inputs: self
    //Returns: () (stops after ';' or a balanced block, or before a stray '}')
    fn synchronize(&mut self) {
        let start = self.current;
        let mut depth = 0usize;
        while !self.is_at_end() {
            let token = self.peek();
            if token.is(";") && depth == 0 {
                self.advance();
                return;
            }
            if token.is("{") {
                depth += 1;
            } else if token.is("}") {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    return;
                }
            }
            self.advance();
        }
        if self.current == start && !self.is_at_end() && self.scopes.depth() <= 1 {
            self.advance();
        }
    }

    fn syntax_error(&mut self, token: &Token, message: impl Into<String>) -> ParseError {
        self.diagnostics
            .report(DiagnosticKind::Syntactic, token, message);
        ParseError
    }

    fn semantic_error(&mut self, token: &Token, message: impl Into<String>) -> &mut Diagnostic {
        self.diagnostics.report(DiagnosticKind::Semantic, token, message)
    }

    /// Register a semantic diagnostic and abandon the current construct.
    fn reject(&mut self, token: &Token, message: impl Into<String>) -> ParseError {
        self.semantic_error(token, message);
        ParseError
    }
}

//=====================================================
// Section 7.0 - Free Helpers
//=====================================================

fn qualify_path(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}.{path}")
    }
}

/// Qualified names tried for `path` from inside `module`.
pub(crate) fn candidate_paths(
    modules: &ModuleTree,
    module: ModuleId,
    usings: &[String],
    path: &str,
) -> Vec<String> {
    let mut candidates = vec![path.to_string()];
    for ancestor in modules.ancestry(module) {
        let prefix = &modules.module(ancestor).qualified;
        if !prefix.is_empty() {
            candidates.push(qualify_path(prefix, path));
        }
    }
    candidates.extend(usings.iter().map(|using| qualify_path(using, path)));
    let mut seen = Vec::with_capacity(candidates.len());
    candidates.retain(|candidate| {
        if seen.contains(candidate) {
            false
        } else {
            seen.push(candidate.clone());
            true
        }
    });
    candidates
}

fn is_binding_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Parse a token stream produced by [`crate::tokenizer::tokenize`].
pub fn parse(stream: TokenStream) -> Result<ParseOutput, Vec<Diagnostic>> {
    Parser::new(stream).parse()
}

//=====================================================
// End of file
//=====================================================
