//=====================================================
// File: ast/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript Abstract Syntax Tree definitions
// Objective: Define the node kinds and the index-addressed node arena the
//            parser builds and the bytecode compiler consumes
//=====================================================

use std::fmt::Write as _;

use crate::tokenizer::Token;
use crate::types::{Datatype, Primitive};

pub type NodeId = usize;

//=====================================================
// Section 1.0 - Node Kinds
//=====================================================

/// Closed set of node kinds. Associated metadata (literal datatype, operator
/// spelling) is exposed through lookup functions rather than stored fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    // Parent markers
    Parent,
    Scope,
    Statement,

    // Literals
    BoolLiteral,
    CharLiteral,
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    DoubleLiteral,
    StringLiteral,
    NullLiteral,

    // Operators
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Not,
    Negate,
    Positive,
    Ternary,
    Cast,

    // Structure
    CreateModule,
    Using,
    FunctionDefinition,
    NativeFunctionDefinition,
    Parameter,
    VariableDeclaration,
    VariableDefinition,
    Assign,
    Identifier,
    FunctionCall,
    EnumDefinition,
    EnumMember,
    EnumAccess,
    StructDefinition,
    StructField,
    IfStatement,
    ElseStatement,
    WhileStatement,
    ForStatement,
    DoWhileStatement,
    Return,
}

impl NodeType {
    /// Primitive datatype carried by a literal kind.
    pub fn literal_type(self) -> Option<Datatype> {
        let primitive = match self {
            NodeType::BoolLiteral => Primitive::Bool,
            NodeType::CharLiteral => Primitive::Char,
            NodeType::IntLiteral => Primitive::Int,
            NodeType::LongLiteral => Primitive::Long,
            NodeType::FloatLiteral => Primitive::Float,
            NodeType::DoubleLiteral => Primitive::Double,
            NodeType::StringLiteral => Primitive::String,
            NodeType::NullLiteral => Primitive::Null,
            _ => return None,
        };
        Some(Datatype::Primitive(primitive))
    }

    /// Source spelling bound to an operator kind.
    pub fn spelling(self) -> Option<&'static str> {
        let text = match self {
            NodeType::Add | NodeType::Positive => "+",
            NodeType::Subtract | NodeType::Negate => "-",
            NodeType::Multiply => "*",
            NodeType::Divide => "/",
            NodeType::Modulo => "%",
            NodeType::ShiftLeft => "<<",
            NodeType::ShiftRight => ">>",
            NodeType::Less => "<",
            NodeType::Greater => ">",
            NodeType::LessEqual => "<=",
            NodeType::GreaterEqual => ">=",
            NodeType::Equal => "==",
            NodeType::NotEqual => "!=",
            NodeType::BitAnd => "&",
            NodeType::BitXor => "^",
            NodeType::BitOr => "|",
            NodeType::LogicalAnd => "&&",
            NodeType::LogicalOr => "||",
            NodeType::Not => "!",
            NodeType::Ternary => "?",
            _ => return None,
        };
        Some(text)
    }

    pub fn from_binary_operator(text: &str) -> Option<Self> {
        let kind = match text {
            "+" => NodeType::Add,
            "-" => NodeType::Subtract,
            "*" => NodeType::Multiply,
            "/" => NodeType::Divide,
            "%" => NodeType::Modulo,
            "<<" => NodeType::ShiftLeft,
            ">>" => NodeType::ShiftRight,
            "<" => NodeType::Less,
            ">" => NodeType::Greater,
            "<=" => NodeType::LessEqual,
            ">=" => NodeType::GreaterEqual,
            "==" => NodeType::Equal,
            "!=" => NodeType::NotEqual,
            "&" => NodeType::BitAnd,
            "^" => NodeType::BitXor,
            "|" => NodeType::BitOr,
            "&&" => NodeType::LogicalAnd,
            "||" => NodeType::LogicalOr,
            _ => return None,
        };
        Some(kind)
    }

    pub fn from_literal_token(kind: crate::tokenizer::TokenKind) -> Option<Self> {
        use crate::tokenizer::TokenKind;
        let node = match kind {
            TokenKind::BoolLiteral => NodeType::BoolLiteral,
            TokenKind::CharLiteral => NodeType::CharLiteral,
            TokenKind::IntLiteral => NodeType::IntLiteral,
            TokenKind::LongLiteral => NodeType::LongLiteral,
            TokenKind::FloatLiteral => NodeType::FloatLiteral,
            TokenKind::DoubleLiteral => NodeType::DoubleLiteral,
            TokenKind::StringLiteral => NodeType::StringLiteral,
            _ => return None,
        };
        Some(node)
    }

    pub fn is_parent_marker(self) -> bool {
        matches!(self, NodeType::Parent | NodeType::Scope | NodeType::Statement)
    }

    pub fn is_literal(self) -> bool {
        self.literal_type().is_some()
    }

    pub fn is_comparator(self) -> bool {
        matches!(
            self,
            NodeType::Less
                | NodeType::Greater
                | NodeType::LessEqual
                | NodeType::GreaterEqual
                | NodeType::Equal
                | NodeType::NotEqual
        )
    }
}

//=====================================================
// Section 2.0 - Nodes & Arena
//=====================================================

/// One syntax node. `parent` is a diagnostics back-reference only; ownership
/// flows strictly through `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeType,
    pub token: Option<Token>,
    pub children: Vec<NodeId>,
    pub line: usize,
    pub parent: Option<NodeId>,
    /// Inferred expression type, declared variable type or return type.
    pub datatype: Option<Datatype>,
    /// Qualified global name, overload signature or local name.
    pub resolved: Option<String>,
}

impl Node {
    pub fn text(&self) -> &str {
        self.token.as_ref().map(|token| token.text.as_str()).unwrap_or("")
    }
}

/// Arena holding every node of one parse; the root is always a `Parent`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeType::Parent,
                token: None,
                children: Vec::new(),
                line: 0,
                parent: None,
                datatype: None,
                resolved: None,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    /// Allocate a detached node.
    pub fn add(&mut self, kind: NodeType, token: Option<Token>, line: usize) -> NodeId {
        self.nodes.push(Node {
            kind,
            token,
            children: Vec::new(),
            line,
            parent: None,
            datatype: None,
            resolved: None,
        });
        self.nodes.len() - 1
    }

    /// Allocate a node from its token, taking the token's user line.
    pub fn add_token(&mut self, kind: NodeType, token: &Token) -> NodeId {
        self.add(kind, Some(token.clone()), token.line)
    }

    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> NodeType {
        self.nodes[id].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].children.get(index).copied()
    }

    pub fn datatype(&self, id: NodeId) -> Option<&Datatype> {
        self.nodes[id].datatype.as_ref()
    }

    pub fn set_datatype(&mut self, id: NodeId, datatype: Datatype) {
        self.nodes[id].datatype = Some(datatype);
    }

    pub fn set_resolved(&mut self, id: NodeId, resolved: impl Into<String>) {
        self.nodes[id].resolved = Some(resolved.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[Self::ROOT].children.is_empty()
    }

    /// Indented one-node-per-line listing, used by `--print-ast` style tooling.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(Self::ROOT, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let _ = write!(out, "{}{:?}", "  ".repeat(depth), node.kind);
        if let Some(token) = &node.token {
            let _ = write!(out, " '{}'", token.text);
        }
        if let Some(datatype) = &node.datatype {
            let _ = write!(out, " : {datatype}");
        }
        if let Some(resolved) = &node.resolved {
            let _ = write!(out, " -> {resolved}");
        }
        out.push('\n');
        for &child in &node.children {
            self.dump_node(child, depth + 1, out);
        }
    }
}

//=====================================================
// End of file
//=====================================================
