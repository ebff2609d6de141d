//=====================================================
// File: parser/declarations.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript declaration pre-pass
// Objective: Register modules, enums, structs and function headers before
//            statements are parsed so calls may precede definitions
//=====================================================

use super::{Parser, candidate_paths, qualify_path};
use crate::diagnostics::DiagnosticKind;
use crate::symbol::{ModuleId, ModuleTree};
use crate::tokenizer::{Token, TokenKind};
use crate::types::{Datatype, Primitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    /// Module tree, enum and struct names.
    Types,
    /// Struct fields and function headers, which may name any type.
    Members,
}

#[derive(Debug, Clone)]
struct ModuleFrame {
    module: ModuleId,
    depth: usize,
    usings: Vec<String>,
}

impl Parser {
    //Function: declare_items
    //Purpose: Run both pre-pass sweeps over the whole token stream
    //Inputs: self
    //Returns: () (duplicate declarations are reported as diagnostics)
    pub(super) fn declare_items(&mut self) {
        self.sweep(Sweep::Types);
        self.sweep(Sweep::Members);
        tracing::debug!(
            modules = self.modules.modules().count(),
            "declaration pre-pass complete"
        );
    }

    fn sweep(&mut self, sweep: Sweep) {
        let mut frames = vec![ModuleFrame {
            module: ModuleTree::ROOT,
            depth: 0,
            usings: Vec::new(),
        }];
        let mut depth = 0usize;
        let mut index = 0usize;

        while index < self.tokens.len() {
            let token = &self.tokens[index];
            if token.is("{") {
                depth += 1;
                index += 1;
                continue;
            }
            if token.is("}") {
                depth = depth.saturating_sub(1);
                if frames.len() > 1 && frames.last().is_some_and(|frame| depth < frame.depth) {
                    frames.pop();
                }
                index += 1;
                continue;
            }
            let Some(frame) = frames.last().cloned() else {
                break;
            };
            if depth != frame.depth {
                index += 1;
                continue;
            }

            if token.is("module") {
                match self.read_path(index + 1) {
                    Some((segments, next)) if self.token_is(next, "{") => {
                        let mut module = frame.module;
                        for segment in &segments {
                            module = self.modules.ensure_child(module, segment);
                        }
                        depth += 1;
                        frames.push(ModuleFrame {
                            module,
                            depth,
                            usings: frame.usings.clone(),
                        });
                        index = next + 1;
                    }
                    _ => index += 1,
                }
                continue;
            }

            if token.is("using") {
                if let Some((segments, next)) = self.read_path(index + 1) {
                    let path = segments.join(".");
                    let resolved = self
                        .modules
                        .ancestry(frame.module)
                        .into_iter()
                        .map(|module| qualify_path(&self.modules.module(module).qualified, &path))
                        .find(|candidate| self.modules.find_module(candidate).is_some());
                    if let (Some(resolved), Some(top)) = (resolved, frames.last_mut()) {
                        top.usings.push(resolved);
                    }
                    index = next;
                } else {
                    index += 1;
                }
                continue;
            }

            let mut cursor = index;
            let is_pub = self.token_is(cursor, "pub");
            if is_pub {
                cursor += 1;
            }
            index = match sweep {
                Sweep::Types => self.declare_type(cursor, frame.module, is_pub),
                Sweep::Members => self.declare_member(cursor, &frame, is_pub),
            }
            .unwrap_or(index + 1);
        }
    }

    //=====================================================
    // Section 1.0 - Types Sweep
    //=====================================================

    fn declare_type(&mut self, cursor: usize, module: ModuleId, is_pub: bool) -> Option<usize> {
        let is_enum = self.token_is(cursor, "enum");
        if !is_enum && !self.token_is(cursor, "struct") {
            return None;
        }
        let name = self.identifier_at(cursor + 1)?.clone();
        if !self.token_is(cursor + 2, "{") {
            return None;
        }

        let registered = if is_enum {
            let mut members = Vec::new();
            let mut at = cursor + 3;
            while let Some(member) = self.identifier_at(at) {
                if !members.contains(&member.text) {
                    members.push(member.text.clone());
                }
                at += 1;
                if !self.token_is(at, ",") {
                    break;
                }
                at += 1;
            }
            self.modules.add_enum(module, &name.text, members, is_pub)
        } else {
            self.modules.add_struct(module, &name.text, is_pub)
        };
        if let Err(err) = registered {
            self.diagnostics
                .report(DiagnosticKind::Semantic, &name, err.to_string());
        }
        // Resume at the brace so the body depth is tracked.
        Some(cursor + 2)
    }

    //=====================================================
    // Section 2.0 - Members Sweep
    //=====================================================

    fn declare_member(&mut self, cursor: usize, frame: &ModuleFrame, is_pub: bool) -> Option<usize> {
        if self.token_is(cursor, "struct") {
            return self.declare_struct_fields(cursor, frame);
        }
        let (is_native, header) = if self.token_is(cursor, "native") {
            let binding = self.tokens.get(cursor + 2)?;
            if !self.token_is(cursor + 1, "(")
                || binding.kind != TokenKind::StringLiteral
                || !self.token_is(cursor + 3, ")")
            {
                return None;
            }
            (true, cursor + 4)
        } else {
            (false, cursor)
        };

        let (return_type, next) = self.read_type(header, frame)?;
        let name = self.identifier_at(next)?.clone();
        if !self.token_is(next + 1, "(") {
            return None;
        }
        let (params, after) = self.read_parameters(next + 2, frame)?;
        if let Err(err) = self.modules.add_function(
            frame.module,
            &name.text,
            return_type,
            params,
            is_native,
            is_pub,
        ) {
            self.diagnostics
                .report(DiagnosticKind::Semantic, &name, err.to_string());
        }
        Some(after)
    }

    fn declare_struct_fields(&mut self, cursor: usize, frame: &ModuleFrame) -> Option<usize> {
        let name = self.identifier_at(cursor + 1)?.text.clone();
        if !self.token_is(cursor + 2, "{") {
            return None;
        }
        let mut fields = Vec::new();
        let mut at = cursor + 3;
        while let Some((datatype, next)) = self.read_type(at, frame) {
            let Some(field) = self.identifier_at(next) else {
                break;
            };
            fields.push((field.text.clone(), datatype));
            at = next + 1;
            if !self.token_is(at, ";") {
                break;
            }
            at += 1;
        }
        self.modules.set_struct_fields(frame.module, &name, fields);
        Some(cursor + 2)
    }

    /// `( [mut] type name {, [mut] type name} )`, returning the types and
    /// the index after the closing parenthesis.
    fn read_parameters(&self, mut at: usize, frame: &ModuleFrame) -> Option<(Vec<Datatype>, usize)> {
        let mut params = Vec::new();
        if self.token_is(at, ")") {
            return Some((params, at + 1));
        }
        loop {
            if self.token_is(at, "mut") {
                at += 1;
            }
            let (datatype, next) = self.read_type(at, frame)?;
            self.identifier_at(next)?;
            params.push(datatype);
            at = next + 1;
            if self.token_is(at, ",") {
                at += 1;
                continue;
            }
            if self.token_is(at, ")") {
                return Some((params, at + 1));
            }
            return None;
        }
    }

    //=====================================================
    // Section 3.0 - Token Helpers
    //=====================================================

    fn read_type(&self, at: usize, frame: &ModuleFrame) -> Option<(Datatype, usize)> {
        let token = self.tokens.get(at)?;
        if token.kind == TokenKind::Keyword {
            let primitive = Primitive::from_name(&token.text).filter(|p| *p != Primitive::Null)?;
            return Some((Datatype::Primitive(primitive), at + 1));
        }
        let (segments, next) = self.read_path(at)?;
        let path = segments.join(".");
        candidate_paths(&self.modules, frame.module, &frame.usings, &path)
            .into_iter()
            .find_map(|candidate| self.modules.named_type(&candidate))
            .map(|(datatype, _, _)| (datatype, next))
    }

    fn read_path(&self, at: usize) -> Option<(Vec<String>, usize)> {
        let mut segments = vec![self.identifier_at(at)?.text.clone()];
        let mut next = at + 1;
        while self.token_is(next, ".") {
            segments.push(self.identifier_at(next + 1)?.text.clone());
            next += 2;
        }
        Some((segments, next))
    }

    fn identifier_at(&self, at: usize) -> Option<&Token> {
        self.tokens.get(at).filter(|token| token.is_identifier())
    }

    fn token_is(&self, at: usize, text: &str) -> bool {
        self.tokens.get(at).is_some_and(|token| token.is(text))
    }
}

//=====================================================
// End of file
//=====================================================
