//=====================================================
// File: compiler/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript bytecode compiler
// Objective: Lower a resolved AST into the stack-machine instruction stream,
//            laying out globals, locals, function ids and definitions
//=====================================================

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{Ast, NodeId, NodeType};
use crate::bytecode::{
    self, ByteCode, ByteCodeValue, ByteDatatype, BytecodeError, Storage, VERSION,
};
use crate::diagnostics::{DEFAULT_TRACEBACK_DEPTH, Traceback, render_trace};
use crate::types::{self, Datatype};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot compile {kind:?} node at line {line}\n{trace}")]
    CannotCompile {
        kind: NodeType,
        line: usize,
        trace: String,
    },
    #[error("no function id for '{signature}' at line {line}")]
    UnknownFunction { signature: String, line: usize },
    #[error("no address for variable '{name}' at line {line}")]
    UnknownVariable { name: String, line: usize },
    #[error("enum '{name}' has no member '{member}'")]
    UnknownEnumMember { name: String, member: String },
    #[error("invalid literal '{text}' at line {line}")]
    InvalidLiteral { text: String, line: usize },
    #[error("type '{name}' has no runtime representation (line {line})")]
    UnsupportedType { name: String, line: usize },
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

/// Output of a compilation: the instruction stream and the id assigned to
/// each function signature (index = id).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub instructions: Vec<ByteCode>,
    pub functions: Vec<String>,
}

impl CompiledProgram {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CompileError> {
        Ok(bytecode::encode_program(&self.instructions)?)
    }
}

//=====================================================
// Section 1.0 - Compile Context
//=====================================================

pub struct CompileContext<'a> {
    ast: &'a Ast,
    module_path: Vec<String>,
    absolute_address: u32,
    /// Next local slot, or -1 outside a function body.
    relative_address: i64,
    function_ids: HashMap<String, u32>,
    functions: Vec<String>,
    enums: HashMap<String, Vec<String>>,
    globals: HashMap<String, u32>,
    local_scopes: Vec<HashMap<String, u32>>,
    code: Vec<ByteCode>,
    function_definitions: Vec<(u32, Vec<ByteCode>)>,
    enum_definitions: Vec<ByteCode>,
    struct_definitions: Vec<ByteCode>,
    traceback: Traceback,
}

impl<'a> CompileContext<'a> {
    pub fn new(ast: &'a Ast, traceback_depth: usize) -> Self {
        Self {
            ast,
            module_path: Vec::new(),
            absolute_address: 0,
            relative_address: -1,
            function_ids: HashMap::new(),
            functions: Vec::new(),
            enums: HashMap::new(),
            globals: HashMap::new(),
            local_scopes: Vec::new(),
            code: Vec::new(),
            function_definitions: Vec::new(),
            enum_definitions: Vec::new(),
            struct_definitions: Vec::new(),
            traceback: Traceback::new(traceback_depth),
        }
    }

    //Function: compile
    //Purpose: Emit the main stream, then flush buffered definitions
    //Inputs: self
    //Returns: Result<CompiledProgram, CompileError>
    pub fn compile(mut self) -> Result<CompiledProgram, CompileError> {
        self.collect_declarations(Ast::ROOT);
        self.code.push(ByteCode::MagicHeader { version: VERSION });
        for &child in self.ast.children(Ast::ROOT) {
            self.compile_member(child)?;
        }

        let mut instructions = std::mem::take(&mut self.code);
        self.function_definitions.sort_by_key(|(id, _)| *id);
        for (_, mut body) in std::mem::take(&mut self.function_definitions) {
            relocate(&mut body, instructions.len() as u32);
            instructions.extend(body);
        }
        instructions.append(&mut self.enum_definitions);
        instructions.append(&mut self.struct_definitions);

        tracing::debug!(
            instructions = instructions.len(),
            functions = self.functions.len(),
            globals = self.absolute_address,
            "compiled program"
        );
        Ok(CompiledProgram {
            instructions,
            functions: self.functions,
        })
    }

    /// Dense function ids in tree order plus enum member tables.
    fn collect_declarations(&mut self, node: NodeId) {
        let ast = self.ast;
        match ast.kind(node) {
            NodeType::FunctionDefinition | NodeType::NativeFunctionDefinition => {
                if let Some(signature) = &ast.node(node).resolved {
                    if !self.function_ids.contains_key(signature) {
                        let id = self.functions.len() as u32;
                        self.function_ids.insert(signature.clone(), id);
                        self.functions.push(signature.clone());
                    }
                }
            }
            NodeType::EnumDefinition => {
                if let Some(name) = &ast.node(node).resolved {
                    let members = ast
                        .children(node)
                        .iter()
                        .map(|&member| ast.node(member).text().to_string())
                        .collect();
                    self.enums.insert(name.clone(), members);
                }
            }
            _ => {}
        }
        for &child in ast.children(node) {
            self.collect_declarations(child);
        }
    }

    //=====================================================
    // Section 2.0 - Module Members
    //=====================================================

    fn compile_member(&mut self, node: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        let entry = ast.node(node);
        match entry.kind {
            NodeType::CreateModule => {
                self.module_path
                    .push(entry.resolved.clone().unwrap_or_default());
                for &child in ast.children(node) {
                    self.compile_member(child)?;
                }
                self.module_path.pop();
                Ok(())
            }
            NodeType::Using => Ok(()),
            NodeType::EnumDefinition => {
                let members = ast
                    .children(node)
                    .iter()
                    .map(|&member| ast.node(member).text().to_string())
                    .collect();
                self.enum_definitions.push(ByteCode::EnumDefinition {
                    name: self.resolved(node),
                    members,
                });
                Ok(())
            }
            NodeType::StructDefinition => {
                let fields = ast
                    .children(node)
                    .iter()
                    .map(|&field| {
                        let field = ast.node(field);
                        let datatype = field
                            .datatype
                            .as_ref()
                            .map(|datatype| datatype.name().to_string())
                            .unwrap_or_default();
                        (field.text().to_string(), datatype)
                    })
                    .collect();
                self.struct_definitions.push(ByteCode::StructDefinition {
                    name: self.resolved(node),
                    fields,
                });
                Ok(())
            }
            NodeType::FunctionDefinition => self.compile_function(node),
            NodeType::NativeFunctionDefinition => self.compile_native(node),
            NodeType::VariableDeclaration | NodeType::VariableDefinition => {
                self.compile_global(node)
            }
            kind => Err(self.cannot_compile(kind, entry.line)),
        }
    }

    fn compile_global(&mut self, node: NodeId) -> Result<(), CompileError> {
        let entry = self.ast.node(node);
        let datatype = self.tag(entry.datatype.as_ref(), entry.line)?;
        let address = self.absolute_address;
        self.absolute_address += 1;
        self.trace(node);
        self.code.push(ByteCode::LineNumber(entry.line as u32));
        self.code.push(ByteCode::DeclareVariable {
            storage: Storage::Global,
            address,
            datatype,
        });
        if let Some(value) = self.ast.child(node, 0) {
            self.compile_expression(value)?;
            self.code.push(ByteCode::DefineVariable {
                storage: Storage::Global,
                address,
            });
        }
        self.globals.insert(self.resolved(node), address);
        Ok(())
    }

    fn compile_native(&mut self, node: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        let entry = ast.node(node);
        let signature = self.resolved(node);
        let id = self.function_id(&signature, entry.line)?;

        let mut children = ast.children(node).iter();
        let binding = children
            .next()
            .map(|&path| ast.node(path).text().to_string())
            .unwrap_or_default();
        let params: Vec<Datatype> = children
            .filter_map(|&param| ast.node(param).datatype.clone())
            .collect();
        let return_type = entry.datatype.clone().unwrap_or(Datatype::VOID);
        let linkage = types::signature(
            &format!("{binding}.{}", entry.text()),
            &params,
            &return_type,
        );

        self.function_definitions.push((
            id,
            vec![
                ByteCode::NativeFunctionDefinitionBegin { signature, linkage },
                ByteCode::FunctionDefinitionEnd,
            ],
        ));
        Ok(())
    }

    fn compile_function(&mut self, node: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        let entry = ast.node(node);
        let signature = self.resolved(node);
        let id = self.function_id(&signature, entry.line)?;

        let main = std::mem::take(&mut self.code);
        self.relative_address = 0;
        self.local_scopes = vec![HashMap::new()];
        self.code
            .push(ByteCode::FunctionDefinitionBegin { signature });

        let mut outcome = Ok(());
        for &child in ast.children(node) {
            outcome = match ast.kind(child) {
                NodeType::Parameter => {
                    let name = self.resolved(child);
                    self.allocate_local(&name);
                    Ok(())
                }
                _ => self.compile_statement(child),
            };
            if outcome.is_err() {
                break;
            }
        }
        self.code.push(ByteCode::FunctionDefinitionEnd);

        let body = std::mem::replace(&mut self.code, main);
        self.relative_address = -1;
        self.local_scopes.clear();
        outcome?;
        self.function_definitions.push((id, body));
        Ok(())
    }

    //=====================================================
    // Section 3.0 - Statements
    //=====================================================

    fn compile_statement(&mut self, node: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        let entry = ast.node(node);
        if entry.kind != NodeType::Scope {
            self.trace(node);
            self.code.push(ByteCode::LineNumber(entry.line as u32));
        }
        match entry.kind {
            NodeType::Scope => {
                self.local_scopes.push(HashMap::new());
                let result = ast
                    .children(node)
                    .iter()
                    .try_for_each(|&child| self.compile_statement(child));
                self.local_scopes.pop();
                result
            }
            NodeType::Using => Ok(()),
            NodeType::VariableDeclaration | NodeType::VariableDefinition => {
                let datatype = self.tag(entry.datatype.as_ref(), entry.line)?;
                if let Some(value) = ast.child(node, 0) {
                    self.compile_expression(value)?;
                }
                let address = self.allocate_local(&self.resolved(node));
                self.code.push(ByteCode::DeclareVariable {
                    storage: Storage::Local,
                    address,
                    datatype,
                });
                if entry.kind == NodeType::VariableDefinition {
                    self.code.push(ByteCode::DefineVariable {
                        storage: Storage::Local,
                        address,
                    });
                }
                Ok(())
            }
            NodeType::Assign => {
                let value = self.required_child(node, 0)?;
                self.compile_expression(value)?;
                let (storage, address) = self.lookup(&self.resolved(node), entry.line)?;
                self.code
                    .push(ByteCode::StoreVariable { storage, address });
                Ok(())
            }
            NodeType::Statement => {
                let call = self.required_child(node, 0)?;
                self.compile_expression(call)?;
                let returns_value = ast
                    .datatype(call)
                    .is_some_and(|datatype| !datatype.is_void());
                if returns_value {
                    self.code.push(ByteCode::Pop);
                }
                Ok(())
            }
            NodeType::IfStatement => self.compile_if(node),
            NodeType::WhileStatement => {
                let start = self.here();
                self.compile_expression(self.required_child(node, 0)?)?;
                let exit = self.emit_placeholder(ByteCode::JumpIfFalse(0));
                self.compile_statement(self.required_child(node, 1)?)?;
                self.code.push(ByteCode::Jump(start));
                self.patch(exit);
                Ok(())
            }
            NodeType::DoWhileStatement => {
                let start = self.here();
                self.compile_statement(self.required_child(node, 0)?)?;
                self.compile_expression(self.required_child(node, 1)?)?;
                let exit = self.emit_placeholder(ByteCode::JumpIfFalse(0));
                self.code.push(ByteCode::Jump(start));
                self.patch(exit);
                Ok(())
            }
            NodeType::ForStatement => {
                self.local_scopes.push(HashMap::new());
                let result = self.compile_for(node);
                self.local_scopes.pop();
                result
            }
            NodeType::Return => {
                let has_value = match ast.child(node, 0) {
                    Some(value) => {
                        self.compile_expression(value)?;
                        true
                    }
                    None => false,
                };
                self.code.push(ByteCode::Return { has_value });
                Ok(())
            }
            kind => Err(self.cannot_compile(kind, entry.line)),
        }
    }

    fn compile_if(&mut self, node: NodeId) -> Result<(), CompileError> {
        self.compile_expression(self.required_child(node, 0)?)?;
        let skip_then = self.emit_placeholder(ByteCode::JumpIfFalse(0));
        self.compile_statement(self.required_child(node, 1)?)?;
        match self.ast.child(node, 2) {
            Some(else_node) => {
                let skip_else = self.emit_placeholder(ByteCode::Jump(0));
                self.patch(skip_then);
                let branch = self.required_child(else_node, 0)?;
                self.compile_statement(branch)?;
                self.patch(skip_else);
            }
            None => self.patch(skip_then),
        }
        Ok(())
    }

    fn compile_for(&mut self, node: NodeId) -> Result<(), CompileError> {
        self.compile_statement(self.required_child(node, 0)?)?;
        let start = self.here();
        self.compile_expression(self.required_child(node, 1)?)?;
        let exit = self.emit_placeholder(ByteCode::JumpIfFalse(0));
        self.compile_statement(self.required_child(node, 3)?)?;
        self.compile_statement(self.required_child(node, 2)?)?;
        self.code.push(ByteCode::Jump(start));
        self.patch(exit);
        Ok(())
    }

    //=====================================================
    // Section 4.0 - Expressions
    //=====================================================

    fn compile_expression(&mut self, node: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        let entry = ast.node(node);
        let kind = entry.kind;
        if kind.is_literal() {
            let value = literal_value(kind, entry.text()).ok_or_else(|| {
                CompileError::InvalidLiteral {
                    text: entry.text().to_string(),
                    line: entry.line,
                }
            })?;
            self.code.push(ByteCode::Push(value));
            return Ok(());
        }
        if let Some(operation) = binary_instruction(kind) {
            self.compile_expression(self.required_child(node, 0)?)?;
            self.compile_expression(self.required_child(node, 1)?)?;
            self.code.push(operation);
            if kind == NodeType::NotEqual {
                self.code.push(ByteCode::Not);
            }
            return Ok(());
        }

        match kind {
            NodeType::Identifier => {
                let (storage, address) = self.lookup(&self.resolved(node), entry.line)?;
                self.code.push(ByteCode::LoadVariable { storage, address });
            }
            NodeType::EnumAccess => {
                let name = self.resolved(node);
                let ordinal = self
                    .enums
                    .get(&name)
                    .and_then(|members| members.iter().position(|member| member == entry.text()))
                    .ok_or_else(|| CompileError::UnknownEnumMember {
                        name: name.clone(),
                        member: entry.text().to_string(),
                    })?;
                self.code
                    .push(ByteCode::Push(ByteCodeValue::Enum(ordinal as u32)));
            }
            NodeType::Not => {
                self.compile_expression(self.required_child(node, 0)?)?;
                self.code.push(ByteCode::Not);
            }
            NodeType::Negate => {
                let datatype = self.tag(entry.datatype.as_ref(), entry.line)?;
                let zero = ByteCodeValue::zero(datatype).ok_or_else(|| {
                    CompileError::UnsupportedType {
                        name: datatype.name().to_string(),
                        line: entry.line,
                    }
                })?;
                self.code.push(ByteCode::Push(zero));
                self.compile_expression(self.required_child(node, 0)?)?;
                self.code.push(ByteCode::Subtract);
            }
            NodeType::Positive => self.compile_expression(self.required_child(node, 0)?)?,
            NodeType::Cast => {
                let datatype = self.tag(entry.datatype.as_ref(), entry.line)?;
                self.compile_expression(self.required_child(node, 0)?)?;
                self.code.push(ByteCode::Cast(datatype));
            }
            NodeType::Ternary => {
                self.compile_expression(self.required_child(node, 0)?)?;
                let skip_then = self.emit_placeholder(ByteCode::JumpIfFalse(0));
                self.compile_expression(self.required_child(node, 1)?)?;
                let skip_else = self.emit_placeholder(ByteCode::Jump(0));
                self.patch(skip_then);
                self.compile_expression(self.required_child(node, 2)?)?;
                self.patch(skip_else);
            }
            NodeType::FunctionCall => {
                for &arg in ast.children(node) {
                    self.compile_expression(arg)?;
                }
                let id = self.function_id(&self.resolved(node), entry.line)?;
                self.code.push(ByteCode::Call(id));
            }
            kind => return Err(self.cannot_compile(kind, entry.line)),
        }
        Ok(())
    }

    //=====================================================
    // Section 5.0 - Helpers
    //=====================================================

    fn resolved(&self, node: NodeId) -> String {
        self.ast.node(node).resolved.clone().unwrap_or_default()
    }

    fn required_child(&self, node: NodeId, index: usize) -> Result<NodeId, CompileError> {
        self.ast.child(node, index).ok_or_else(|| {
            let entry = self.ast.node(node);
            CompileError::CannotCompile {
                kind: entry.kind,
                line: entry.line,
                trace: render_trace(&self.traceback.chronological()),
            }
        })
    }

    fn tag(&self, datatype: Option<&Datatype>, line: usize) -> Result<ByteDatatype, CompileError> {
        datatype
            .and_then(ByteDatatype::from_datatype)
            .ok_or_else(|| CompileError::UnsupportedType {
                name: datatype.map(|d| d.name().to_string()).unwrap_or_default(),
                line,
            })
    }

    fn function_id(&self, signature: &str, line: usize) -> Result<u32, CompileError> {
        self.function_ids
            .get(signature)
            .copied()
            .ok_or_else(|| CompileError::UnknownFunction {
                signature: signature.to_string(),
                line,
            })
    }

    fn allocate_local(&mut self, name: &str) -> u32 {
        let address = self.relative_address.max(0) as u32;
        self.relative_address = i64::from(address) + 1;
        if let Some(scope) = self.local_scopes.last_mut() {
            scope.insert(name.to_string(), address);
        }
        address
    }

    /// Globals carry a dotted qualified name; locals never do.
    fn lookup(&self, name: &str, line: usize) -> Result<(Storage, u32), CompileError> {
        let found = if name.contains('.') {
            self.globals
                .get(name)
                .map(|&address| (Storage::Global, address))
        } else {
            self.local_scopes
                .iter()
                .rev()
                .find_map(|scope| scope.get(name))
                .map(|&address| (Storage::Local, address))
        };
        found.ok_or_else(|| CompileError::UnknownVariable {
            name: name.to_string(),
            line,
        })
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn emit_placeholder(&mut self, instruction: ByteCode) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Point the jump at `index` to the next instruction.
    fn patch(&mut self, index: usize) {
        let target = self.here();
        match &mut self.code[index] {
            ByteCode::Jump(label) | ByteCode::JumpIfFalse(label) => *label = target,
            other => tracing::warn!(instruction = %other, "patch target is not a jump"),
        }
    }

    fn trace(&mut self, node: NodeId) {
        let entry = self.ast.node(node);
        let context = match (self.module_path.last(), entry.text()) {
            (Some(module), "") => format!("{:?} in {module}", entry.kind),
            (Some(module), text) => format!("{:?} '{text}' in {module}", entry.kind),
            (None, text) => format!("{:?} '{text}'", entry.kind),
        };
        self.traceback.push(entry.line, context);
    }

    fn cannot_compile(&self, kind: NodeType, line: usize) -> CompileError {
        let trace = render_trace(&self.traceback.chronological());
        tracing::error!(?kind, line, "cannot compile node\n{trace}");
        CompileError::CannotCompile { kind, line, trace }
    }
}

/// Shift every jump label in a buffered body by `base`.
fn relocate(body: &mut [ByteCode], base: u32) {
    for instruction in body {
        if let ByteCode::Jump(label) | ByteCode::JumpIfFalse(label) = instruction {
            *label += base;
        }
    }
}

fn binary_instruction(kind: NodeType) -> Option<ByteCode> {
    let instruction = match kind {
        NodeType::Add => ByteCode::Add,
        NodeType::Subtract => ByteCode::Subtract,
        NodeType::Multiply => ByteCode::Multiply,
        NodeType::Divide => ByteCode::Divide,
        NodeType::Modulo => ByteCode::Modulo,
        NodeType::ShiftLeft => ByteCode::ShiftLeft,
        NodeType::ShiftRight => ByteCode::ShiftRight,
        NodeType::BitAnd => ByteCode::BitAnd,
        NodeType::BitXor => ByteCode::BitXor,
        NodeType::BitOr => ByteCode::BitOr,
        NodeType::LogicalAnd => ByteCode::LogicalAnd,
        NodeType::LogicalOr => ByteCode::LogicalOr,
        NodeType::Equal | NodeType::NotEqual => ByteCode::Equal,
        NodeType::Less => ByteCode::Less,
        NodeType::Greater => ByteCode::Greater,
        NodeType::LessEqual => ByteCode::LessEqual,
        NodeType::GreaterEqual => ByteCode::GreaterEqual,
        _ => return None,
    };
    Some(instruction)
}

fn literal_value(kind: NodeType, text: &str) -> Option<ByteCodeValue> {
    let value = match kind {
        NodeType::BoolLiteral => ByteCodeValue::Bool(text == "true"),
        NodeType::CharLiteral => ByteCodeValue::Char(text.chars().next()?),
        NodeType::IntLiteral => ByteCodeValue::Int(text.parse().ok()?),
        NodeType::LongLiteral => ByteCodeValue::Long(text.parse().ok()?),
        NodeType::FloatLiteral => ByteCodeValue::Float(text.parse().ok()?),
        NodeType::DoubleLiteral => ByteCodeValue::Double(text.parse().ok()?),
        NodeType::StringLiteral => ByteCodeValue::String(text.to_string()),
        _ => return None,
    };
    Some(value)
}

/// Compile with the default traceback depth.
pub fn compile(ast: &Ast) -> Result<CompiledProgram, CompileError> {
    CompileContext::new(ast, DEFAULT_TRACEBACK_DEPTH).compile()
}

//=====================================================
// End of file
//=====================================================
