//==================================================
// File: symbol/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript module tree and global symbol tables
// Objective: Hold modules, overload sets, enums, structs and globals in an
//            index-addressed tree and resolve dotted paths against it
//==================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{self, Datatype};

pub type ModuleId = usize;

//==================================================
// Section 1.0 - Symbols
//==================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    pub qualified: String,
    pub datatype: Datatype,
    pub is_constant: bool,
    pub is_public: bool,
    pub module: ModuleId,
}

/// One overload: a parameter-type list inside a [`FunctionConcept`].
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub params: Vec<Datatype>,
    pub signature: String,
    pub is_native: bool,
    pub is_public: bool,
}

/// Overload set keyed by `(name, return type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConcept {
    pub name: String,
    pub return_type: Datatype,
    pub definitions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub qualified: String,
    pub members: Vec<String>,
    pub is_public: bool,
    pub module: ModuleId,
}

impl EnumType {
    pub fn ordinal(&self, member: &str) -> Option<u32> {
        self.members
            .iter()
            .position(|candidate| candidate == member)
            .map(|index| index as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub qualified: String,
    pub fields: Vec<(String, Datatype)>,
    pub is_public: bool,
    pub module: ModuleId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub qualified: String,
    pub parent: Option<ModuleId>,
    pub children: BTreeMap<String, ModuleId>,
    pub functions: Vec<FunctionConcept>,
    pub enums: BTreeMap<String, EnumType>,
    pub structs: BTreeMap<String, StructType>,
    pub globals: BTreeMap<String, GlobalVariable>,
}

impl Module {
    fn new(name: &str, qualified: String, parent: Option<ModuleId>) -> Self {
        Self {
            name: name.to_string(),
            qualified,
            parent,
            children: BTreeMap::new(),
            functions: Vec::new(),
            enums: BTreeMap::new(),
            structs: BTreeMap::new(),
            globals: BTreeMap::new(),
        }
    }

    pub fn qualify(&self, name: &str) -> String {
        if self.qualified.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.qualified)
        }
    }
}

/// A function picked by overload resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFunction {
    pub qualified: String,
    pub signature: String,
    pub params: Vec<Datatype>,
    pub return_type: Datatype,
    pub is_public: bool,
    pub module: ModuleId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverloadResolution {
    Found(ResolvedFunction),
    /// The name exists but no overload accepts the arguments.
    NoMatch { available: Vec<String> },
    Ambiguous { candidates: Vec<String> },
    /// No function with that name exists in the module.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error("function '{0}' is already defined")]
    DuplicateFunction(String),
    #[error("global variable '{0}' is already defined")]
    DuplicateGlobal(String),
    #[error("type '{0}' is already defined")]
    DuplicateType(String),
}

//==================================================
// Section 2.0 - Module Tree
//==================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleTree {
    modules: Vec<Module>,
}

impl Default for ModuleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleTree {
    pub const ROOT: ModuleId = 0;

    pub fn new() -> Self {
        Self {
            modules: vec![Module::new("", String::new(), None)],
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id]
    }

    fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id]
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Child module `name` of `parent`, created on first use.
    pub fn ensure_child(&mut self, parent: ModuleId, name: &str) -> ModuleId {
        if let Some(&existing) = self.modules[parent].children.get(name) {
            return existing;
        }
        let qualified = self.modules[parent].qualify(name);
        self.modules.push(Module::new(name, qualified, Some(parent)));
        let id = self.modules.len() - 1;
        self.modules[parent].children.insert(name.to_string(), id);
        id
    }

    /// Walk `a.b.c` down from the root.
    pub fn find_module(&self, path: &str) -> Option<ModuleId> {
        if path.is_empty() {
            return Some(Self::ROOT);
        }
        path.split('.').try_fold(Self::ROOT, |current, segment| {
            self.modules[current].children.get(segment).copied()
        })
    }

    /// Split `a.b.name` into the module `a.b` and `name`.
    pub fn split_path<'p>(&self, qualified: &'p str) -> Option<(ModuleId, &'p str)> {
        match qualified.rsplit_once('.') {
            Some((module_path, name)) => self.find_module(module_path).map(|id| (id, name)),
            None => Some((Self::ROOT, qualified)),
        }
    }

    /// `module` itself followed by each ancestor, innermost first.
    pub fn ancestry(&self, module: ModuleId) -> Vec<ModuleId> {
        let mut chain = vec![module];
        let mut current = module;
        while let Some(parent) = self.modules[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether code in `from` can see a non-public item of `owner`.
    pub fn is_within(&self, from: ModuleId, owner: ModuleId) -> bool {
        self.ancestry(from).contains(&owner)
    }

    //==================================================
    // Section 2.1 - Registration
    //==================================================

    pub fn add_enum(
        &mut self,
        module: ModuleId,
        name: &str,
        members: Vec<String>,
        is_public: bool,
    ) -> Result<String, SymbolError> {
        let qualified = self.modules[module].qualify(name);
        if self.type_exists(module, name) {
            return Err(SymbolError::DuplicateType(qualified));
        }
        self.module_mut(module).enums.insert(
            name.to_string(),
            EnumType {
                name: name.to_string(),
                qualified: qualified.clone(),
                members,
                is_public,
                module,
            },
        );
        Ok(qualified)
    }

    pub fn add_struct(
        &mut self,
        module: ModuleId,
        name: &str,
        is_public: bool,
    ) -> Result<String, SymbolError> {
        let qualified = self.modules[module].qualify(name);
        if self.type_exists(module, name) {
            return Err(SymbolError::DuplicateType(qualified));
        }
        self.module_mut(module).structs.insert(
            name.to_string(),
            StructType {
                name: name.to_string(),
                qualified: qualified.clone(),
                fields: Vec::new(),
                is_public,
                module,
            },
        );
        Ok(qualified)
    }

    pub fn set_struct_fields(
        &mut self,
        module: ModuleId,
        name: &str,
        fields: Vec<(String, Datatype)>,
    ) {
        if let Some(entry) = self.module_mut(module).structs.get_mut(name) {
            entry.fields = fields;
        }
    }

    fn type_exists(&self, module: ModuleId, name: &str) -> bool {
        let entry = &self.modules[module];
        entry.enums.contains_key(name) || entry.structs.contains_key(name)
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> Result<(), SymbolError> {
        let module = self.module_mut(global.module);
        if module.globals.contains_key(&global.name) {
            return Err(SymbolError::DuplicateGlobal(global.qualified));
        }
        module.globals.insert(global.name.clone(), global);
        Ok(())
    }

    //Function: add_function
    //Purpose: Insert an overload, rejecting an identical parameter list
    //Inputs: module, name, return type, parameter types, flags
    //Returns: Result<String, SymbolError> with the overload signature
    pub fn add_function(
        &mut self,
        module: ModuleId,
        name: &str,
        return_type: Datatype,
        params: Vec<Datatype>,
        is_native: bool,
        is_public: bool,
    ) -> Result<String, SymbolError> {
        let qualified = self.modules[module].qualify(name);
        let signature = types::signature(&qualified, &params, &return_type);
        let entry = self.module_mut(module);
        let clash = entry
            .functions
            .iter()
            .filter(|concept| concept.name == name)
            .flat_map(|concept| concept.definitions.iter())
            .any(|definition| definition.params == params);
        if clash {
            return Err(SymbolError::DuplicateFunction(signature));
        }
        let definition = FunctionDefinition {
            params,
            signature: signature.clone(),
            is_native,
            is_public,
        };
        match entry
            .functions
            .iter_mut()
            .find(|concept| concept.name == name && concept.return_type == return_type)
        {
            Some(concept) => concept.definitions.push(definition),
            None => entry.functions.push(FunctionConcept {
                name: name.to_string(),
                return_type,
                definitions: vec![definition],
            }),
        }
        Ok(signature)
    }

    //==================================================
    // Section 2.2 - Lookup
    //==================================================

    pub fn global(&self, qualified: &str) -> Option<&GlobalVariable> {
        let (module, name) = self.split_path(qualified)?;
        self.modules[module].globals.get(name)
    }

    pub fn enum_type(&self, qualified: &str) -> Option<&EnumType> {
        let (module, name) = self.split_path(qualified)?;
        self.modules[module].enums.get(name)
    }

    pub fn struct_type(&self, qualified: &str) -> Option<&StructType> {
        let (module, name) = self.split_path(qualified)?;
        self.modules[module].structs.get(name)
    }

    /// Named type at an exact qualified path, with its visibility data.
    pub fn named_type(&self, qualified: &str) -> Option<(Datatype, bool, ModuleId)> {
        if let Some(entry) = self.enum_type(qualified) {
            return Some((Datatype::Enum(entry.qualified.clone()), entry.is_public, entry.module));
        }
        self.struct_type(qualified).map(|entry| {
            (
                Datatype::Struct(entry.qualified.clone()),
                entry.is_public,
                entry.module,
            )
        })
    }

    pub fn has_function(&self, qualified: &str) -> bool {
        self.split_path(qualified).is_some_and(|(module, name)| {
            self.modules[module]
                .functions
                .iter()
                .any(|concept| concept.name == name)
        })
    }

    /// Registered overload with exactly these parameters.
    pub fn find_definition(
        &self,
        module: ModuleId,
        name: &str,
        params: &[Datatype],
    ) -> Option<(&FunctionConcept, &FunctionDefinition)> {
        self.modules[module]
            .functions
            .iter()
            .filter(|concept| concept.name == name)
            .find_map(|concept| {
                concept
                    .definitions
                    .iter()
                    .find(|definition| definition.params == params)
                    .map(|definition| (concept, definition))
            })
    }

    //Function: resolve_overload
    //Purpose: Pick the overload of `qualified` matching `args`
    //Inputs: qualified function path, argument types
    //Returns: OverloadResolution (exact match, then a unique widening match)
    pub fn resolve_overload(&self, qualified: &str, args: &[Datatype]) -> OverloadResolution {
        let Some((module, name)) = self.split_path(qualified) else {
            return OverloadResolution::Missing;
        };
        let candidates: Vec<(&FunctionConcept, &FunctionDefinition)> = self.modules[module]
            .functions
            .iter()
            .filter(|concept| concept.name == name)
            .flat_map(|concept| concept.definitions.iter().map(move |def| (concept, def)))
            .collect();
        if candidates.is_empty() {
            return OverloadResolution::Missing;
        }

        let resolved = |concept: &FunctionConcept, definition: &FunctionDefinition| {
            ResolvedFunction {
                qualified: self.modules[module].qualify(name),
                signature: definition.signature.clone(),
                params: definition.params.clone(),
                return_type: concept.return_type.clone(),
                is_public: definition.is_public,
                module,
            }
        };

        if let Some((concept, definition)) = candidates
            .iter()
            .find(|(_, definition)| definition.params == args)
        {
            return OverloadResolution::Found(resolved(concept, definition));
        }

        let widening: Vec<&(&FunctionConcept, &FunctionDefinition)> = candidates
            .iter()
            .filter(|(_, definition)| {
                definition.params.len() == args.len()
                    && args
                        .iter()
                        .zip(&definition.params)
                        .all(|(arg, param)| arg.is_assignable_to(param))
            })
            .collect();
        match widening.as_slice() {
            [(concept, definition)] => OverloadResolution::Found(resolved(concept, definition)),
            [] => OverloadResolution::NoMatch {
                available: candidates
                    .iter()
                    .map(|(_, definition)| definition.signature.clone())
                    .collect(),
            },
            many => OverloadResolution::Ambiguous {
                candidates: many
                    .iter()
                    .map(|(_, definition)| definition.signature.clone())
                    .collect(),
            },
        }
    }

    /// Every qualified function, global and type name, for spelling hints.
    pub fn qualified_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for module in &self.modules {
            for concept in &module.functions {
                names.push(module.qualify(&concept.name));
            }
            names.extend(module.globals.values().map(|global| global.qualified.clone()));
            names.extend(module.enums.values().map(|entry| entry.qualified.clone()));
            names.extend(module.structs.values().map(|entry| entry.qualified.clone()));
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_math() -> ModuleTree {
        let mut tree = ModuleTree::new();
        let std = tree.ensure_child(ModuleTree::ROOT, "std");
        let math = tree.ensure_child(std, "math");
        tree.add_function(math, "max", Datatype::INT, vec![Datatype::INT, Datatype::INT], false, true)
            .expect("int max");
        tree.add_function(
            math,
            "max",
            Datatype::DOUBLE,
            vec![Datatype::DOUBLE, Datatype::DOUBLE],
            false,
            true,
        )
        .expect("double max");
        tree
    }

    #[test]
    fn paths_resolve_from_root() {
        let tree = tree_with_math();
        let math = tree.find_module("std.math").expect("module");
        assert_eq!(tree.module(math).qualified, "std.math");
        assert!(tree.find_module("std.missing").is_none());
    }

    #[test]
    fn exact_overload_wins_over_widening() {
        let tree = tree_with_math();
        match tree.resolve_overload("std.math.max", &[Datatype::INT, Datatype::INT]) {
            OverloadResolution::Found(found) => assert_eq!(found.return_type, Datatype::INT),
            other => panic!("unexpected {other:?}"),
        }
        match tree.resolve_overload("std.math.max", &[Datatype::INT, Datatype::DOUBLE]) {
            OverloadResolution::Found(found) => {
                assert_eq!(found.signature, "std.math.max(double|double)double")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn identical_parameter_lists_are_rejected() {
        let mut tree = tree_with_math();
        let math = tree.find_module("std.math").expect("module");
        let err = tree
            .add_function(math, "max", Datatype::LONG, vec![Datatype::INT, Datatype::INT], false, true)
            .expect_err("duplicate");
        assert!(matches!(err, SymbolError::DuplicateFunction(_)));
    }
}

//==================================================
// End of file
//==================================================
