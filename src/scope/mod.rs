//=====================================================
// File: scope/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript lexical scope tracking
// Objective: Track nested scopes, locals, using imports, constant assignment
//            state and return-path reachability while the parser runs
//=====================================================

use thiserror::Error;

use crate::types::Datatype;

pub type ScopeId = usize;

//=====================================================
// Section 1.0 - Scope Model
//=====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    While,
    Do,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
    Loop(LoopKind),
    If,
    Else,
    Enum,
    Struct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub datatype: Datatype,
    pub is_constant: bool,
    pub initialized: bool,
    /// Structural scope of the most recent assignment.
    pub changed_at: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeNode {
    pub kind: ScopeKind,
    pub depth: usize,
    pub parent: Option<ScopeId>,
    pub locals: Vec<LocalVariable>,
    pub reached_end: bool,
    /// For `Else` scopes, the `If` scope they pair with.
    pub linked_if: Option<ScopeId>,
    /// Enum members or struct fields declared inside this scope.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsingImport {
    pub path: String,
    pub depth: usize,
}

/// Summary handed back when a scope closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeExit {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub reached_end: bool,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScopeError {
    #[error("variable '{0}' is already defined")]
    Redefinition(String),
    /// Second assignment to a constant outside an exclusive if/else pair.
    #[error("cannot assign twice to constant '{0}'")]
    ConstantReassignment(String),
    /// Constant declared outside a loop and assigned inside it.
    #[error("constant '{0}' is declared outside this loop and cannot be assigned inside it")]
    ConstantInLoop(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("member '{0}' is already defined")]
    DuplicateMember(String),
}

//=====================================================
// Section 2.0 - Scope Tree
//=====================================================

/// Arena of every scope opened during a parse plus the stack of open ones.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
    open: Vec<ScopeId>,
    usings: Vec<UsingImport>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ScopeKind) -> ScopeId {
        self.push_linked(kind, None)
    }

    /// Open an `Else` scope paired with a closed `If` scope.
    pub fn push_else(&mut self, linked_if: ScopeId) -> ScopeId {
        self.push_linked(ScopeKind::Else, Some(linked_if))
    }

    fn push_linked(&mut self, kind: ScopeKind, linked_if: Option<ScopeId>) -> ScopeId {
        let parent = self.open.last().copied();
        self.nodes.push(ScopeNode {
            kind,
            depth: self.open.len(),
            parent,
            locals: Vec::new(),
            reached_end: false,
            linked_if,
            members: Vec::new(),
        });
        let id = self.nodes.len() - 1;
        self.open.push(id);
        id
    }

    //Function: pop
    //Purpose: Close the innermost scope, dropping its locals and the using
    //         imports registered at its depth, and propagate reachability
    //Inputs: self
    //Returns: Option<ScopeExit> (None when no scope is open)
    pub fn pop(&mut self) -> Option<ScopeExit> {
        let id = self.open.pop()?;
        let depth = self.nodes[id].depth;
        self.usings.retain(|using| using.depth != depth);

        let node = &mut self.nodes[id];
        node.locals.clear();
        let exit = ScopeExit {
            id,
            kind: node.kind,
            reached_end: node.reached_end,
            member_count: node.members.len(),
        };

        if exit.reached_end {
            let propagate = match exit.kind {
                ScopeKind::Else => self.nodes[id]
                    .linked_if
                    .is_some_and(|linked| self.nodes[linked].reached_end),
                ScopeKind::Loop(LoopKind::Do) | ScopeKind::Block => true,
                ScopeKind::If
                | ScopeKind::Loop(LoopKind::While | LoopKind::For)
                | ScopeKind::Function
                | ScopeKind::Module
                | ScopeKind::Enum
                | ScopeKind::Struct => false,
            };
            if propagate {
                if let Some(parent) = self.nodes[id].parent {
                    self.nodes[parent].reached_end = true;
                }
            }
        }
        Some(exit)
    }

    pub fn current(&self) -> Option<ScopeId> {
        self.open.last().copied()
    }

    pub fn node(&self, id: ScopeId) -> &ScopeNode {
        &self.nodes[id]
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn in_function(&self) -> bool {
        self.open
            .iter()
            .any(|&id| self.nodes[id].kind == ScopeKind::Function)
    }

    pub fn in_loop(&self) -> bool {
        self.open
            .iter()
            .any(|&id| matches!(self.nodes[id].kind, ScopeKind::Loop(_)))
    }

    //=====================================================
    // Section 2.1 - Reachability
    //=====================================================

    /// `return` seen in the innermost scope.
    pub fn mark_returned(&mut self) {
        if let Some(id) = self.current() {
            self.nodes[id].reached_end = true;
        }
    }

    pub fn reached_end(&self) -> bool {
        self.current()
            .is_some_and(|id| self.nodes[id].reached_end)
    }

    //=====================================================
    // Section 2.2 - Using Imports
    //=====================================================

    pub fn add_using(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.usings.iter().any(|using| using.path == path) {
            return;
        }
        self.usings.push(UsingImport {
            path,
            depth: self.depth().saturating_sub(1),
        });
    }

    pub fn usings(&self) -> impl Iterator<Item = &str> {
        self.usings.iter().map(|using| using.path.as_str())
    }

    //=====================================================
    // Section 2.3 - Members
    //=====================================================

    /// Record an enum member or struct field in the innermost scope.
    pub fn add_member(&mut self, name: &str) -> Result<(), ScopeError> {
        let id = self.current().ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))?;
        let members = &mut self.nodes[id].members;
        if members.iter().any(|member| member == name) {
            return Err(ScopeError::DuplicateMember(name.to_string()));
        }
        members.push(name.to_string());
        Ok(())
    }

    //=====================================================
    // Section 2.4 - Locals
    //=====================================================

    /// Open scopes belonging to the current function, innermost first.
    fn function_frames(&self) -> impl Iterator<Item = ScopeId> + '_ {
        let mut done = false;
        self.open.iter().rev().copied().take_while(move |&id| {
            if done {
                return false;
            }
            done = self.nodes[id].kind == ScopeKind::Function;
            !matches!(self.nodes[id].kind, ScopeKind::Module)
        })
    }

    pub fn declare_local(
        &mut self,
        name: &str,
        datatype: Datatype,
        is_constant: bool,
        initialized: bool,
    ) -> Result<(), ScopeError> {
        if self.lookup_local(name).is_some() {
            return Err(ScopeError::Redefinition(name.to_string()));
        }
        let id = self
            .current()
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))?;
        let changed_at = initialized.then(|| self.structural_scope());
        self.nodes[id].locals.push(LocalVariable {
            name: name.to_string(),
            datatype,
            is_constant,
            initialized,
            changed_at,
        });
        Ok(())
    }

    pub fn lookup_local(&self, name: &str) -> Option<&LocalVariable> {
        self.locate_local(name)
            .map(|(scope, index)| &self.nodes[scope].locals[index])
    }

    fn locate_local(&self, name: &str) -> Option<(ScopeId, usize)> {
        self.function_frames().find_map(|id| {
            self.nodes[id]
                .locals
                .iter()
                .position(|local| local.name == name)
                .map(|index| (id, index))
        })
    }

    /// Every local visible from the innermost scope, for spelling hints.
    pub fn visible_locals(&self) -> Vec<&str> {
        self.function_frames()
            .flat_map(|id| self.nodes[id].locals.iter().map(|local| local.name.as_str()))
            .collect()
    }

    /// Innermost scope that is not a plain block.
    fn structural_scope(&self) -> ScopeId {
        self.open
            .iter()
            .rev()
            .copied()
            .find(|&id| self.nodes[id].kind != ScopeKind::Block)
            .or_else(|| self.current())
            .unwrap_or(0)
    }

    //Function: assign_local
    //Purpose: Apply the constant-assignment rules to an assignment of `name`
    //Inputs: name: local variable name
    //Returns: Result<(), ScopeError>
    pub fn assign_local(&mut self, name: &str) -> Result<(), ScopeError> {
        let (owner, index) = self
            .locate_local(name)
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))?;
        let current = self.structural_scope();
        let local = &self.nodes[owner].locals[index];

        if local.is_constant {
            // Paired if/else branches included.
            if self.loop_between(owner) {
                return Err(ScopeError::ConstantInLoop(name.to_string()));
            }
            if local.initialized {
                let exclusive = local
                    .changed_at
                    .is_some_and(|previous| self.in_else_of(previous));
                if !exclusive {
                    return Err(ScopeError::ConstantReassignment(name.to_string()));
                }
            }
        }

        let local = &mut self.nodes[owner].locals[index];
        local.initialized = true;
        local.changed_at = Some(current);
        Ok(())
    }

    /// Any open loop scope nested inside `owner`.
    fn loop_between(&self, owner: ScopeId) -> bool {
        self.open
            .iter()
            .rev()
            .take_while(|&&id| id != owner)
            .any(|&id| matches!(self.nodes[id].kind, ScopeKind::Loop(_)))
    }

    /// Whether the innermost code sits in the else branch paired with
    /// `previous`, an `If` scope at the same depth.
    fn in_else_of(&self, previous: ScopeId) -> bool {
        let previous_node = &self.nodes[previous];
        if previous_node.kind != ScopeKind::If {
            return false;
        }
        self.open.iter().rev().any(|&id| {
            let node = &self.nodes[id];
            node.kind == ScopeKind::Else
                && node.linked_if == Some(previous)
                && node.depth == previous_node.depth
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_tree() -> ScopeTree {
        let mut tree = ScopeTree::new();
        tree.push(ScopeKind::Module);
        tree.push(ScopeKind::Function);
        tree
    }

    #[test]
    fn constant_assignment_in_if_and_else_is_accepted() {
        let mut tree = function_tree();
        tree.declare_local("x", Datatype::INT, true, false).expect("declare");
        let if_scope = tree.push(ScopeKind::If);
        tree.assign_local("x").expect("if branch");
        tree.pop();
        tree.push_else(if_scope);
        tree.assign_local("x").expect("else branch");
        tree.pop();
        assert_eq!(
            tree.assign_local("x"),
            Err(ScopeError::ConstantReassignment("x".into()))
        );
    }

    #[test]
    fn constant_assignment_inside_loop_is_rejected() {
        let mut tree = function_tree();
        tree.declare_local("x", Datatype::INT, true, false).expect("declare");
        tree.push(ScopeKind::Loop(LoopKind::While));
        assert_eq!(tree.assign_local("x"), Err(ScopeError::ConstantInLoop("x".into())));
    }

    #[test]
    fn else_branch_loop_cannot_reassign_constant() {
        let mut tree = function_tree();
        tree.declare_local("x", Datatype::INT, true, false).expect("declare");
        let if_scope = tree.push(ScopeKind::If);
        tree.assign_local("x").expect("if branch");
        tree.pop();
        tree.push_else(if_scope);
        tree.push(ScopeKind::Loop(LoopKind::While));
        assert_eq!(tree.assign_local("x"), Err(ScopeError::ConstantInLoop("x".into())));
    }

    #[test]
    fn scope_errors_are_std_errors() {
        let err: Box<dyn std::error::Error> = Box::new(ScopeError::Redefinition("a".into()));
        assert_eq!(err.to_string(), "variable 'a' is already defined");
        let err: Box<dyn std::error::Error> =
            Box::new(crate::symbol::SymbolError::DuplicateType("app.Color".into()));
        assert_eq!(err.to_string(), "type 'app.Color' is already defined");
    }

    #[test]
    fn usings_are_removed_with_their_scope() {
        let mut tree = function_tree();
        tree.add_using("outer");
        tree.push(ScopeKind::Block);
        tree.add_using("inner");
        assert_eq!(tree.usings().count(), 2);
        tree.pop();
        assert_eq!(tree.usings().collect::<Vec<_>>(), vec!["outer"]);
    }

    #[test]
    fn else_propagates_only_when_if_returned() {
        let mut tree = function_tree();
        let if_scope = tree.push(ScopeKind::If);
        tree.mark_returned();
        tree.pop();
        assert!(!tree.reached_end());
        tree.push_else(if_scope);
        tree.mark_returned();
        tree.pop();
        assert!(tree.reached_end());
    }

    #[test]
    fn while_body_does_not_propagate() {
        let mut tree = function_tree();
        tree.push(ScopeKind::Loop(LoopKind::While));
        tree.mark_returned();
        tree.pop();
        assert!(!tree.reached_end());
        tree.push(ScopeKind::Loop(LoopKind::Do));
        tree.mark_returned();
        tree.pop();
        assert!(tree.reached_end());
    }
}

//=====================================================
// End of file
//=====================================================
