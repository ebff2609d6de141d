//=====================================================
// File: vm/runtime.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript stack virtual machine
// Objective: Load and link bytecode, then execute the main stream and
//            host-invoked functions over a push stack and a variable stack
//=====================================================

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::native::{Linkage, NativeError, NativeFunction, NativeRegistry};
use super::{Fault, VmError};
use crate::bytecode::{self, ByteCode, ByteCodeValue, ByteDatatype, BytecodeError, Storage};
use crate::diagnostics::{DEFAULT_TRACEBACK_DEPTH, TraceEntry, Traceback, render_trace};
use crate::types::{Datatype, Primitive};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Runtime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub traceback_depth: usize,
    pub max_call_depth: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            traceback_depth: DEFAULT_TRACEBACK_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

//=====================================================
// Section 1.0 - Function Table
//=====================================================

#[derive(Debug, Clone)]
pub enum ByteCodeRuntimeFunction {
    /// Compiled body spanning `entry..end`; `end` is the closing
    /// `FUNCTION_DEFINITION_END`.
    Intern {
        signature: Linkage,
        entry: usize,
        end: usize,
    },
    Native {
        signature: Linkage,
        native: NativeFunction,
    },
}

impl ByteCodeRuntimeFunction {
    pub fn signature(&self) -> &Linkage {
        match self {
            ByteCodeRuntimeFunction::Intern { signature, .. }
            | ByteCodeRuntimeFunction::Native { signature, .. } => signature,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, ByteCodeRuntimeFunction::Native { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumLayout {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

/// Linked view of a program. Built fresh on every load and published behind
/// an `Arc`; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    pub functions: Vec<ByteCodeRuntimeFunction>,
    pub enums: Vec<EnumLayout>,
    pub structs: Vec<StructLayout>,
}

impl FunctionTable {
    pub fn get(&self, id: u32) -> Option<&ByteCodeRuntimeFunction> {
        self.functions.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Every overload whose script-qualified name is `name`.
    pub fn overloads<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (u32, &'a ByteCodeRuntimeFunction)> + 'a {
        self.functions
            .iter()
            .enumerate()
            .filter(move |(_, function)| function.signature().qualified() == name)
            .map(|(id, function)| (id as u32, function))
    }

    pub fn enum_layout(&self, name: &str) -> Option<&EnumLayout> {
        self.enums.iter().find(|layout| layout.name == name)
    }

    //Function: select
    //Purpose: Pick the overload of `name` for host arguments, exact match
    //         first, then a unique overload reachable by numeric widening
    //Inputs: name: script-qualified function name, args: host values
    //Returns: Result<(u32, Vec<ByteCodeValue>), VmError> (id and widened args)
    pub fn select(
        &self,
        name: &str,
        args: &[ByteCodeValue],
    ) -> Result<(u32, Vec<ByteCodeValue>), VmError> {
        let candidates: Vec<(u32, &ByteCodeRuntimeFunction)> = self
            .overloads(name)
            .filter(|(_, function)| function.signature().params.len() == args.len())
            .collect();

        let describe = || {
            args.iter()
                .map(|arg| arg.datatype().name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ambiguous = |many: &[&(u32, &ByteCodeRuntimeFunction)]| VmError::AmbiguousCall {
            name: name.to_string(),
            args: describe(),
            candidates: many
                .iter()
                .map(|(_, function)| function.signature().to_string())
                .collect(),
        };

        // Enum ordinals carry no type, so overloads that differ only in enum
        // parameters can stay tied here.
        let exact: Vec<&(u32, &ByteCodeRuntimeFunction)> = candidates
            .iter()
            .filter(|(_, function)| {
                function
                    .signature()
                    .params
                    .iter()
                    .zip(args)
                    .all(|(param, arg)| self.accepts_exactly(param, arg))
            })
            .collect();
        match exact.as_slice() {
            [(id, _)] => return Ok((*id, args.to_vec())),
            [] => {}
            many => return Err(ambiguous(many)),
        }

        let widened: Vec<&(u32, &ByteCodeRuntimeFunction)> = candidates
            .iter()
            .filter(|(_, function)| {
                function
                    .signature()
                    .params
                    .iter()
                    .zip(args)
                    .all(|(param, arg)| self.accepts_exactly(param, arg) || widens_to(arg, param))
            })
            .collect();
        match widened.as_slice() {
            [(id, function)] => {
                let converted = function
                    .signature()
                    .params
                    .iter()
                    .zip(args)
                    .map(|(param, arg)| match ByteDatatype::from_name(param) {
                        Some(target) if target != arg.datatype() => {
                            cast_value(arg.clone(), target).map_err(|_| VmError::UnknownFunction {
                                name: name.to_string(),
                                args: describe(),
                            })
                        }
                        _ => Ok(arg.clone()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((*id, converted))
            }
            [] => Err(VmError::UnknownFunction {
                name: name.to_string(),
                args: describe(),
            }),
            many => Err(ambiguous(many)),
        }
    }

    /// Overload of `name` declared with exactly the parameter types `params`.
    pub fn find_overload(&self, name: &str, params: &[&str]) -> Option<u32> {
        self.overloads(name)
            .find(|(_, function)| {
                let declared = &function.signature().params;
                declared.len() == params.len()
                    && declared.iter().zip(params).all(|(left, right)| left == right)
            })
            .map(|(id, _)| id)
    }

    /// Primitive parameters match by datatype, enum parameters by an ordinal
    /// inside that enum's member range.
    fn accepts_exactly(&self, param: &str, arg: &ByteCodeValue) -> bool {
        match (Primitive::from_name(param), arg) {
            (Some(primitive), _) => primitive.name() == arg.datatype().name(),
            (None, ByteCodeValue::Enum(ordinal)) => self
                .enum_layout(param)
                .is_some_and(|layout| (*ordinal as usize) < layout.members.len()),
            (None, _) => false,
        }
    }
}

fn widens_to(arg: &ByteCodeValue, param: &str) -> bool {
    match (Primitive::from_name(arg.datatype().name()), Primitive::from_name(param)) {
        (Some(from), Some(to)) => Datatype::Primitive(from).can_widen_to(&Datatype::Primitive(to)),
        _ => false,
    }
}

//=====================================================
// Section 2.0 - Linking
//=====================================================

//Function: link
//Purpose: Build a function table and the definition skip map for a program
//Inputs: program: decoded instructions, registry: host natives
//Returns: Result<(FunctionTable, HashMap<usize, usize>), VmError>
fn link(
    program: &[ByteCode],
    registry: &NativeRegistry,
) -> Result<(FunctionTable, HashMap<usize, usize>), VmError> {
    let mut table = FunctionTable::default();
    let mut skips = HashMap::new();
    let mut index = 0;

    while index < program.len() {
        match &program[index] {
            ByteCode::FunctionDefinitionBegin { signature } => {
                let end = definition_end(program, index)?;
                table.functions.push(ByteCodeRuntimeFunction::Intern {
                    signature: parse_linkage(signature)?,
                    entry: index + 1,
                    end,
                });
                skips.insert(index, end + 1);
                index = end + 1;
                continue;
            }
            ByteCode::NativeFunctionDefinitionBegin { signature, linkage } => {
                let end = definition_end(program, index)?;
                if end != index + 1 {
                    return Err(VmError::Linkage(format!(
                        "native definition '{signature}' at {index} has a body"
                    )));
                }
                parse_linkage(linkage)?;
                let native = registry.resolve(linkage).cloned().ok_or_else(|| {
                    VmError::UnresolvedNative {
                        signature: signature.clone(),
                        linkage: linkage.clone(),
                    }
                })?;
                table.functions.push(ByteCodeRuntimeFunction::Native {
                    signature: parse_linkage(signature)?,
                    native,
                });
                skips.insert(index, end + 1);
                index = end + 1;
                continue;
            }
            ByteCode::EnumDefinition { name, members } => {
                table.enums.push(EnumLayout {
                    name: name.clone(),
                    members: members.clone(),
                });
                skips.insert(index, index + 1);
            }
            ByteCode::StructDefinition { name, fields } => {
                table.structs.push(StructLayout {
                    name: name.clone(),
                    fields: fields.clone(),
                });
                skips.insert(index, index + 1);
            }
            ByteCode::FunctionDefinitionEnd => {
                return Err(VmError::Linkage(format!(
                    "unmatched FUNCTION_DEFINITION_END at {index}"
                )));
            }
            _ => {}
        }
        index += 1;
    }
    Ok((table, skips))
}

fn definition_end(program: &[ByteCode], begin: usize) -> Result<usize, VmError> {
    for (offset, instruction) in program[begin + 1..].iter().enumerate() {
        match instruction {
            ByteCode::FunctionDefinitionEnd => return Ok(begin + 1 + offset),
            ByteCode::FunctionDefinitionBegin { .. }
            | ByteCode::NativeFunctionDefinitionBegin { .. } => {
                return Err(VmError::Linkage(format!(
                    "function definition at {begin} is not closed before {}",
                    begin + 1 + offset
                )));
            }
            _ => {}
        }
    }
    Err(VmError::Linkage(format!(
        "function definition at {begin} is never closed"
    )))
}

fn parse_linkage(text: &str) -> Result<Linkage, VmError> {
    Linkage::parse(text).map_err(|err| VmError::Linkage(err.to_string()))
}

//=====================================================
// Section 3.0 - Virtual Machine
//=====================================================

#[derive(Debug, Clone)]
struct Frame {
    function: u32,
    /// `None` hands the result back to the host.
    return_to: Option<usize>,
    base: usize,
    stack_base: usize,
}

pub struct ByteCodeVm {
    registry: NativeRegistry,
    options: RuntimeOptions,
    program: Arc<[ByteCode]>,
    table: Arc<FunctionTable>,
    skips: HashMap<usize, usize>,
    globals: Vec<Option<ByteCodeValue>>,
    variables: Vec<Option<ByteCodeValue>>,
    stack: Vec<ByteCodeValue>,
    frames: Vec<Frame>,
    traceback: Traceback,
    line: u32,
    loaded: bool,
    initialized: bool,
}

impl ByteCodeVm {
    pub fn new(registry: NativeRegistry, options: RuntimeOptions) -> Self {
        Self {
            registry,
            options,
            program: Arc::from(Vec::new()),
            table: Arc::new(FunctionTable::default()),
            skips: HashMap::new(),
            globals: Vec::new(),
            variables: Vec::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            traceback: Traceback::new(options.traceback_depth),
            line: 0,
            loaded: false,
            initialized: false,
        }
    }

    /// VM with the default native library and limits.
    pub fn with_builtins() -> Self {
        Self::new(NativeRegistry::with_builtins(), RuntimeOptions::default())
    }

    pub fn registry(&self) -> &NativeRegistry {
        &self.registry
    }

    /// Registrations take effect on the next `load`.
    pub fn registry_mut(&mut self) -> &mut NativeRegistry {
        &mut self.registry
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    pub fn function_table(&self) -> Arc<FunctionTable> {
        Arc::clone(&self.table)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Executed source lines, oldest first.
    pub fn traceback(&self) -> Vec<TraceEntry> {
        self.traceback.chronological()
    }

    //Function: load
    //Purpose: Decode a bytecode image and link it against the registry
    //Inputs: bytes: encoded program
    //Returns: Result<(), VmError>
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let program = bytecode::decode_program(bytes)?;
        self.load_program(program)
    }

    pub fn load_program(&mut self, program: Vec<ByteCode>) -> Result<(), VmError> {
        if !matches!(program.first(), Some(ByteCode::MagicHeader { .. })) {
            return Err(VmError::Bytecode(BytecodeError::MissingHeader));
        }
        let (table, skips) = link(&program, &self.registry)?;
        tracing::debug!(
            instructions = program.len(),
            functions = table.functions.len(),
            enums = table.enums.len(),
            "linked bytecode program"
        );
        self.program = Arc::from(program);
        self.table = Arc::new(table);
        self.skips = skips;
        self.loaded = true;
        self.initialized = false;
        self.reset();
        Ok(())
    }

    //Function: run
    //Purpose: Execute the main stream, initializing globals
    //Inputs: self
    //Returns: Result<(), VmError>
    pub fn run(&mut self) -> Result<(), VmError> {
        if !self.loaded {
            return Err(VmError::NotLoaded);
        }
        self.reset();
        self.globals.clear();
        self.traceback.clear();
        match self.execute(0) {
            Ok(_) => {
                self.initialized = true;
                Ok(())
            }
            Err(fault) => Err(self.fail(fault)),
        }
    }

    //Function: invoke
    //Purpose: Call a function by script-qualified name from the host
    //Inputs: name: e.g. "app.main", args: argument values
    //Returns: Result<Option<ByteCodeValue>, VmError> (None for void)
    pub fn invoke(
        &mut self,
        name: &str,
        args: &[ByteCodeValue],
    ) -> Result<Option<ByteCodeValue>, VmError> {
        self.initialize()?;
        let (id, args) = self.table.select(name, args)?;
        tracing::debug!(name, id, "invoking function");
        self.call(id, args)
    }

    /// Call the overload of `name` declared with exactly `params`, for hosts
    /// that must pick between enum-typed overloads.
    pub fn invoke_overload(
        &mut self,
        name: &str,
        params: &[&str],
        args: &[ByteCodeValue],
    ) -> Result<Option<ByteCodeValue>, VmError> {
        self.initialize()?;
        let table = Arc::clone(&self.table);
        let matching = table.find_overload(name, params).filter(|_| {
            params.len() == args.len()
                && params
                    .iter()
                    .zip(args)
                    .all(|(param, arg)| table.accepts_exactly(param, arg))
        });
        let Some(id) = matching else {
            return Err(VmError::UnknownFunction {
                name: format!("{name}({})", params.join("|")),
                args: args
                    .iter()
                    .map(|arg| arg.datatype().name())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };
        tracing::debug!(name, id, "invoking overload");
        self.call(id, args.to_vec())
    }

    /// Run the main stream once if it has not run since the last load.
    pub fn initialize(&mut self) -> Result<(), VmError> {
        if !self.loaded {
            return Err(VmError::NotLoaded);
        }
        if !self.initialized {
            self.run()?;
        }
        Ok(())
    }

    /// Call a function by id with already-typed arguments. Globals must
    /// already be initialized.
    pub fn call(
        &mut self,
        id: u32,
        args: Vec<ByteCodeValue>,
    ) -> Result<Option<ByteCodeValue>, VmError> {
        let table = Arc::clone(&self.table);
        let Some(function) = table.get(id) else {
            return Err(self.fail(Fault::InvalidFunction(id)));
        };
        let expected = function.signature().params.len();
        if args.len() != expected {
            return Err(self.fail(Fault::Malformed(format!(
                "'{}' expects {expected} arguments, received {}",
                function.signature(),
                args.len()
            ))));
        }
        match function {
            ByteCodeRuntimeFunction::Native { native, .. } => {
                call_native(native, &args).map_err(|fault| self.fail(fault))
            }
            ByteCodeRuntimeFunction::Intern { entry, .. } => {
                self.frames.push(Frame {
                    function: id,
                    return_to: None,
                    base: self.variables.len(),
                    stack_base: self.stack.len(),
                });
                self.variables.extend(args.into_iter().map(Some));
                self.execute(*entry).map_err(|fault| self.fail(fault))
            }
        }
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.stack.clear();
        self.variables.clear();
        self.line = 0;
    }

    fn fail(&mut self, fault: Fault) -> VmError {
        let trace = render_trace(&self.traceback.chronological());
        let line = self.line;
        tracing::error!(%fault, line, "runtime error");
        self.reset();
        VmError::Runtime { fault, line, trace }
    }

    //=====================================================
    // Section 4.0 - Dispatch Loop
    //=====================================================

    fn execute(&mut self, mut ip: usize) -> Result<Option<ByteCodeValue>, Fault> {
        let program = Arc::clone(&self.program);
        let table = Arc::clone(&self.table);

        loop {
            if self.frames.is_empty() {
                if let Some(&next) = self.skips.get(&ip) {
                    ip = next;
                    continue;
                }
            }
            let Some(instruction) = program.get(ip) else {
                if self.frames.is_empty() {
                    return Ok(None);
                }
                return Err(Fault::Malformed(format!(
                    "execution ran past the end of the program at {ip}"
                )));
            };

            let mut next = ip + 1;
            match instruction {
                ByteCode::MagicHeader { .. } => {}
                ByteCode::LineNumber(line) => {
                    self.line = *line;
                    let context = self.context(&table);
                    self.traceback.push(*line as usize, context);
                }
                ByteCode::Push(value) => self.stack.push(value.clone()),
                ByteCode::Pop => {
                    self.pop()?;
                }
                ByteCode::DeclareVariable {
                    storage, address, ..
                } => {
                    *self.slot_mut(*storage, *address, true)? = None;
                }
                ByteCode::DefineVariable { storage, address } => {
                    let value = self.pop()?;
                    *self.slot_mut(*storage, *address, true)? = Some(value);
                }
                ByteCode::StoreVariable { storage, address } => {
                    let value = self.pop()?;
                    *self.slot_mut(*storage, *address, false)? = Some(value);
                }
                ByteCode::LoadVariable { storage, address } => {
                    let value = self
                        .slot_mut(*storage, *address, false)?
                        .clone()
                        .ok_or(Fault::UninitializedVariable {
                            storage: *storage,
                            address: *address,
                        })?;
                    self.stack.push(value);
                }
                ByteCode::Not => match self.pop()? {
                    ByteCodeValue::Bool(value) => self.stack.push(ByteCodeValue::Bool(!value)),
                    other => {
                        return Err(Fault::TypeMismatch {
                            operation: "NOT",
                            operands: other.datatype().name().to_string(),
                        });
                    }
                },
                ByteCode::Cast(target) => {
                    let value = self.pop()?;
                    self.stack.push(cast_value(value, *target)?);
                }
                ByteCode::Jump(label) => next = self.jump_target(*label, program.len())?,
                ByteCode::JumpIfFalse(label) => match self.pop()? {
                    ByteCodeValue::Bool(false) => next = self.jump_target(*label, program.len())?,
                    ByteCodeValue::Bool(true) => {}
                    other => {
                        return Err(Fault::TypeMismatch {
                            operation: "JUMP_IF_FALSE",
                            operands: other.datatype().name().to_string(),
                        });
                    }
                },
                ByteCode::Call(id) => {
                    if let Some(entry) = self.call_instruction(&table, *id, ip + 1)? {
                        next = entry;
                    }
                }
                ByteCode::Return { has_value } => {
                    let value = if *has_value { Some(self.pop()?) } else { None };
                    match self.return_from_frame(value)? {
                        Ok(resume) => next = resume,
                        Err(result) => return Ok(result),
                    }
                }
                ByteCode::FunctionDefinitionEnd => match self.return_from_frame(None)? {
                    Ok(resume) => next = resume,
                    Err(result) => return Ok(result),
                },
                ByteCode::FunctionDefinitionBegin { .. }
                | ByteCode::NativeFunctionDefinitionBegin { .. }
                | ByteCode::EnumDefinition { .. }
                | ByteCode::StructDefinition { .. } => {
                    return Err(Fault::Malformed(format!(
                        "{} reached inside a function body at {ip}",
                        instruction.name()
                    )));
                }
                operation => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(binary(operation, lhs, rhs)?);
                }
            }
            ip = next;
        }
    }

    /// Push a frame for a compiled callee, or run a native in place.
    /// Returns the callee entry point when control transfers.
    fn call_instruction(
        &mut self,
        table: &FunctionTable,
        id: u32,
        return_to: usize,
    ) -> Result<Option<usize>, Fault> {
        let function = table.get(id).ok_or(Fault::InvalidFunction(id))?;
        let arity = function.signature().params.len();
        if self.stack.len() < arity {
            return Err(Fault::StackUnderflow);
        }
        let args = self.stack.split_off(self.stack.len() - arity);

        match function {
            ByteCodeRuntimeFunction::Native { native, .. } => {
                if let Some(value) = call_native(native, &args)? {
                    self.stack.push(value);
                }
                Ok(None)
            }
            ByteCodeRuntimeFunction::Intern { entry, .. } => {
                if self.frames.len() >= self.options.max_call_depth {
                    return Err(Fault::StackOverflow(self.options.max_call_depth));
                }
                self.frames.push(Frame {
                    function: id,
                    return_to: Some(return_to),
                    base: self.variables.len(),
                    stack_base: self.stack.len(),
                });
                self.variables.extend(args.into_iter().map(Some));
                Ok(Some(*entry))
            }
        }
    }

    /// `Ok(resume)` continues in the caller; `Err(value)` returns to the host.
    #[allow(clippy::type_complexity)]
    fn return_from_frame(
        &mut self,
        value: Option<ByteCodeValue>,
    ) -> Result<Result<usize, Option<ByteCodeValue>>, Fault> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Fault::Malformed("return outside of a function".into()))?;
        self.variables.truncate(frame.base);
        self.stack.truncate(frame.stack_base);
        match frame.return_to {
            Some(resume) => {
                if let Some(value) = value {
                    self.stack.push(value);
                }
                Ok(Ok(resume))
            }
            None => Ok(Err(value)),
        }
    }

    fn pop(&mut self) -> Result<ByteCodeValue, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn slot_mut(
        &mut self,
        storage: Storage,
        address: u32,
        allocate: bool,
    ) -> Result<&mut Option<ByteCodeValue>, Fault> {
        let (slots, index) = match storage {
            Storage::Global => (&mut self.globals, address as usize),
            Storage::Local => {
                let base = self.frames.last().map(|frame| frame.base).ok_or_else(|| {
                    Fault::Malformed("local variable access outside of a function".into())
                })?;
                (&mut self.variables, base + address as usize)
            }
        };
        if index >= slots.len() {
            if !allocate {
                return Err(Fault::UndeclaredVariable { storage, address });
            }
            slots.resize(index + 1, None);
        }
        Ok(&mut slots[index])
    }

    fn jump_target(&self, label: u32, len: usize) -> Result<usize, Fault> {
        let target = label as usize;
        if target > len {
            return Err(Fault::InvalidJump(label));
        }
        Ok(target)
    }

    fn context(&self, table: &FunctionTable) -> String {
        self.frames
            .last()
            .and_then(|frame| table.get(frame.function))
            .map(|function| function.signature().to_string())
            .unwrap_or_else(|| "<main>".to_string())
    }
}

/// Run a native and hold its result to the declared return type.
fn call_native(native: &NativeFunction, args: &[ByteCodeValue]) -> Result<Option<ByteCodeValue>, Fault> {
    let fault = |source| Fault::Native {
        linkage: native.linkage.to_string(),
        source,
    };
    let result = native.call(args).map_err(fault)?;
    let expected = native.linkage.return_type.as_str();
    let fits = match (&result, ByteDatatype::from_name(expected)) {
        (None, _) => expected == "void",
        (Some(value), Some(datatype)) => value.datatype() == datatype,
        (Some(_), None) => false,
    };
    if !fits {
        return Err(fault(NativeError::ReturnType {
            expected: expected.to_string(),
            found: result.map_or("nothing", |value| value.datatype().name()),
        }));
    }
    Ok(result)
}

//=====================================================
// Section 5.0 - Value Operations
//=====================================================

const LESS: &[Ordering] = &[Ordering::Less];
const GREATER: &[Ordering] = &[Ordering::Greater];
const LESS_EQUAL: &[Ordering] = &[Ordering::Less, Ordering::Equal];
const GREATER_EQUAL: &[Ordering] = &[Ordering::Greater, Ordering::Equal];

fn numeric_rank(value: &ByteCodeValue) -> Option<u8> {
    match value {
        ByteCodeValue::Int(_) => Some(0),
        ByteCodeValue::Long(_) => Some(1),
        ByteCodeValue::Float(_) => Some(2),
        ByteCodeValue::Double(_) => Some(3),
        _ => None,
    }
}

/// Bring two numeric operands to the heavier of their types.
fn promote(
    lhs: ByteCodeValue,
    rhs: ByteCodeValue,
) -> Result<(ByteCodeValue, ByteCodeValue), Fault> {
    match (numeric_rank(&lhs), numeric_rank(&rhs)) {
        (Some(left), Some(right)) if left < right => {
            let target = rhs.datatype();
            Ok((cast_value(lhs, target)?, rhs))
        }
        (Some(left), Some(right)) if right < left => {
            let target = lhs.datatype();
            Ok((lhs, cast_value(rhs, target)?))
        }
        _ => Ok((lhs, rhs)),
    }
}

fn mismatch(operation: &ByteCode, lhs: &ByteCodeValue, rhs: &ByteCodeValue) -> Fault {
    Fault::TypeMismatch {
        operation: operation.name(),
        operands: format!("{} and {}", lhs.datatype().name(), rhs.datatype().name()),
    }
}

//Function: binary
//Purpose: Apply a two-operand instruction after numeric promotion
//Inputs: operation, lhs, rhs
//Returns: Result<ByteCodeValue, Fault>
fn binary(operation: &ByteCode, lhs: ByteCodeValue, rhs: ByteCodeValue) -> Result<ByteCodeValue, Fault> {
    use ByteCodeValue as V;

    if matches!(operation, ByteCode::Add)
        && (matches!(lhs, V::String(_)) || matches!(rhs, V::String(_)))
    {
        return Ok(V::String(format!("{lhs}{rhs}")));
    }
    let (lhs, rhs) = promote(lhs, rhs)?;

    if matches!(operation, ByteCode::Equal) {
        if lhs.datatype() != rhs.datatype() {
            return Err(mismatch(operation, &lhs, &rhs));
        }
        return Ok(V::Bool(lhs == rhs));
    }
    let accepted = match operation {
        ByteCode::Less => Some(LESS),
        ByteCode::Greater => Some(GREATER),
        ByteCode::LessEqual => Some(LESS_EQUAL),
        ByteCode::GreaterEqual => Some(GREATER_EQUAL),
        _ => None,
    };
    if let Some(accepted) = accepted {
        let ordering = match (&lhs, &rhs) {
            (V::Int(a), V::Int(b)) => a.partial_cmp(b),
            (V::Long(a), V::Long(b)) => a.partial_cmp(b),
            (V::Float(a), V::Float(b)) => a.partial_cmp(b),
            (V::Double(a), V::Double(b)) => a.partial_cmp(b),
            (V::Char(a), V::Char(b)) => a.partial_cmp(b),
            (V::String(a), V::String(b)) => a.partial_cmp(b),
            _ => return Err(mismatch(operation, &lhs, &rhs)),
        };
        return Ok(V::Bool(
            ordering.is_some_and(|ordering| accepted.contains(&ordering)),
        ));
    }

    let value = match (&lhs, &rhs) {
        (V::Int(a), V::Int(b)) => integer(operation, i64::from(*a), i64::from(*b), 32)?
            .map(|value| V::Int(value as i32)),
        (V::Long(a), V::Long(b)) => integer(operation, *a, *b, 64)?.map(V::Long),
        (V::Float(a), V::Float(b)) => {
            floating(operation, f64::from(*a), f64::from(*b))?.map(|value| V::Float(value as f32))
        }
        (V::Double(a), V::Double(b)) => floating(operation, *a, *b)?.map(V::Double),
        (V::Bool(a), V::Bool(b)) => boolean(operation, *a, *b).map(V::Bool),
        _ => None,
    };
    value.ok_or_else(|| mismatch(operation, &lhs, &rhs))
}

/// Wrapping integer arithmetic on `bits`-wide operands widened to i64.
fn integer(operation: &ByteCode, a: i64, b: i64, bits: u32) -> Result<Option<i64>, Fault> {
    let shift = (b as u32) & (bits - 1);
    let value = match operation {
        ByteCode::Add => a.wrapping_add(b),
        ByteCode::Subtract => a.wrapping_sub(b),
        ByteCode::Multiply => a.wrapping_mul(b),
        ByteCode::Divide | ByteCode::Modulo if b == 0 => return Err(Fault::DivisionByZero),
        ByteCode::Divide => a.wrapping_div(b),
        ByteCode::Modulo => a.wrapping_rem(b),
        ByteCode::ShiftLeft => a.wrapping_shl(shift),
        ByteCode::ShiftRight => a.wrapping_shr(shift),
        ByteCode::BitAnd => a & b,
        ByteCode::BitXor => a ^ b,
        ByteCode::BitOr => a | b,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn floating(operation: &ByteCode, a: f64, b: f64) -> Result<Option<f64>, Fault> {
    let value = match operation {
        ByteCode::Add => a + b,
        ByteCode::Subtract => a - b,
        ByteCode::Multiply => a * b,
        ByteCode::Divide | ByteCode::Modulo if b == 0.0 => return Err(Fault::DivisionByZero),
        ByteCode::Divide => a / b,
        ByteCode::Modulo => a % b,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn boolean(operation: &ByteCode, a: bool, b: bool) -> Option<bool> {
    match operation {
        ByteCode::LogicalAnd | ByteCode::BitAnd => Some(a & b),
        ByteCode::LogicalOr | ByteCode::BitOr => Some(a | b),
        ByteCode::BitXor => Some(a ^ b),
        _ => None,
    }
}

//Function: cast_value
//Purpose: Explicit or widening conversion between runtime value types
//Inputs: value, target tag
//Returns: Result<ByteCodeValue, Fault>
pub fn cast_value(value: ByteCodeValue, target: ByteDatatype) -> Result<ByteCodeValue, Fault> {
    use ByteCodeValue as V;

    if value.datatype() == target {
        return Ok(value);
    }
    let invalid = Fault::InvalidCast {
        from: value.datatype().name(),
        to: target.name(),
    };
    let cast = match target {
        ByteDatatype::Int => V::Int(match value {
            V::Long(v) => v as i32,
            V::Float(v) => v as i32,
            V::Double(v) => v as i32,
            V::Char(v) => u32::from(v) as i32,
            V::Enum(v) => v as i32,
            _ => return Err(invalid),
        }),
        ByteDatatype::Long => V::Long(match value {
            V::Int(v) => i64::from(v),
            V::Float(v) => v as i64,
            V::Double(v) => v as i64,
            V::Char(v) => i64::from(u32::from(v)),
            _ => return Err(invalid),
        }),
        ByteDatatype::Float => V::Float(match value {
            V::Int(v) => v as f32,
            V::Long(v) => v as f32,
            V::Double(v) => v as f32,
            _ => return Err(invalid),
        }),
        ByteDatatype::Double => V::Double(match value {
            V::Int(v) => f64::from(v),
            V::Long(v) => v as f64,
            V::Float(v) => f64::from(v),
            _ => return Err(invalid),
        }),
        ByteDatatype::Char => {
            let code = match value {
                V::Int(v) => u32::try_from(v).ok(),
                V::Long(v) => u32::try_from(v).ok(),
                _ => None,
            };
            V::Char(code.and_then(char::from_u32).ok_or(invalid)?)
        }
        // Enums render as their ordinal; member names live in the function table.
        ByteDatatype::String => V::String(value.to_string()),
        ByteDatatype::Bool | ByteDatatype::Enum => return Err(invalid),
    };
    Ok(cast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::VERSION;

    fn program(body: Vec<ByteCode>) -> Vec<ByteCode> {
        let mut program = vec![ByteCode::MagicHeader { version: VERSION }];
        program.extend(body);
        program
    }

    fn add_function() -> Vec<ByteCode> {
        vec![
            ByteCode::FunctionDefinitionBegin {
                signature: "app.add(int|int)int".into(),
            },
            ByteCode::LoadVariable {
                storage: Storage::Local,
                address: 0,
            },
            ByteCode::LoadVariable {
                storage: Storage::Local,
                address: 1,
            },
            ByteCode::Add,
            ByteCode::Return { has_value: true },
            ByteCode::FunctionDefinitionEnd,
        ]
    }

    #[test]
    fn invokes_compiled_function_by_name() {
        let mut vm = ByteCodeVm::with_builtins();
        vm.load_program(program(add_function())).expect("load");
        let result = vm
            .invoke("app.add", &[ByteCodeValue::Int(2), ByteCodeValue::Int(40)])
            .expect("invoke");
        assert_eq!(result, Some(ByteCodeValue::Int(42)));
    }

    #[test]
    fn host_arguments_widen_to_unique_overload() {
        let mut vm = ByteCodeVm::with_builtins();
        let mut body = add_function();
        if let ByteCode::FunctionDefinitionBegin { signature } = &mut body[0] {
            *signature = "app.add(long|long)long".into();
        }
        vm.load_program(program(body)).expect("load");
        let result = vm
            .invoke("app.add", &[ByteCodeValue::Int(1), ByteCodeValue::Long(2)])
            .expect("invoke");
        assert_eq!(result, Some(ByteCodeValue::Long(3)));
    }

    #[test]
    fn unresolved_native_fails_load() {
        let mut vm = ByteCodeVm::new(NativeRegistry::new(), RuntimeOptions::default());
        let err = vm
            .load_program(program(vec![
                ByteCode::NativeFunctionDefinitionBegin {
                    signature: "app.ping()void".into(),
                    linkage: "host.Api.ping()void".into(),
                },
                ByteCode::FunctionDefinitionEnd,
            ]))
            .expect_err("unresolved");
        assert!(matches!(err, VmError::UnresolvedNative { .. }));
    }

    #[test]
    fn globals_initialize_before_invocation() {
        let mut vm = ByteCodeVm::with_builtins();
        let mut body = vec![
            ByteCode::DeclareVariable {
                storage: Storage::Global,
                address: 0,
                datatype: ByteDatatype::Int,
            },
            ByteCode::Push(ByteCodeValue::Int(7)),
            ByteCode::DefineVariable {
                storage: Storage::Global,
                address: 0,
            },
        ];
        body.extend([
            ByteCode::FunctionDefinitionBegin {
                signature: "app.seven()int".into(),
            },
            ByteCode::LoadVariable {
                storage: Storage::Global,
                address: 0,
            },
            ByteCode::Return { has_value: true },
            ByteCode::FunctionDefinitionEnd,
        ]);
        vm.load_program(program(body)).expect("load");
        let result = vm.invoke("app.seven", &[]).expect("invoke");
        assert_eq!(result, Some(ByteCodeValue::Int(7)));
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let mut vm = ByteCodeVm::new(
            NativeRegistry::new(),
            RuntimeOptions {
                max_call_depth: 16,
                ..RuntimeOptions::default()
            },
        );
        vm.load_program(program(vec![
            ByteCode::FunctionDefinitionBegin {
                signature: "app.spin()void".into(),
            },
            ByteCode::LineNumber(3),
            ByteCode::Call(0),
            ByteCode::FunctionDefinitionEnd,
        ]))
        .expect("load");
        let err = vm.invoke("app.spin", &[]).expect_err("overflow");
        assert_eq!(err.fault(), Some(&Fault::StackOverflow(16)));
        let VmError::Runtime { line, trace, .. } = err else {
            panic!("expected runtime error");
        };
        assert_eq!(line, 3);
        assert!(trace.contains("app.spin()void"));
    }

    #[test]
    fn integer_division_by_zero_is_a_fault() {
        let err = binary(&ByteCode::Divide, ByteCodeValue::Int(1), ByteCodeValue::Int(0))
            .expect_err("division by zero");
        assert_eq!(err, Fault::DivisionByZero);
    }

    #[test]
    fn arithmetic_wraps_and_promotes() {
        let wrapped = binary(
            &ByteCode::Add,
            ByteCodeValue::Int(i32::MAX),
            ByteCodeValue::Int(1),
        )
        .expect("add");
        assert_eq!(wrapped, ByteCodeValue::Int(i32::MIN));

        let promoted = binary(
            &ByteCode::Multiply,
            ByteCodeValue::Int(2),
            ByteCodeValue::Double(1.5),
        )
        .expect("multiply");
        assert_eq!(promoted, ByteCodeValue::Double(3.0));

        let shifted = binary(
            &ByteCode::ShiftLeft,
            ByteCodeValue::Int(1),
            ByteCodeValue::Int(33),
        )
        .expect("shift");
        assert_eq!(shifted, ByteCodeValue::Int(2));
    }

    #[test]
    fn comparisons_yield_bool() {
        let less = binary(&ByteCode::Less, ByteCodeValue::Int(1), ByteCodeValue::Long(2))
            .expect("less");
        assert_eq!(less, ByteCodeValue::Bool(true));
        let equal = binary(
            &ByteCode::Equal,
            ByteCodeValue::String("a".into()),
            ByteCodeValue::String("a".into()),
        )
        .expect("equal");
        assert_eq!(equal, ByteCodeValue::Bool(true));
    }

    #[test]
    fn string_addition_concatenates() {
        let joined = binary(
            &ByteCode::Add,
            ByteCodeValue::String("n=".into()),
            ByteCodeValue::Int(4),
        )
        .expect("concat");
        assert_eq!(joined, ByteCodeValue::String("n=4".into()));
    }

    #[test]
    fn casts_follow_explicit_rules() {
        assert_eq!(
            cast_value(ByteCodeValue::Double(3.9), ByteDatatype::Int).expect("cast"),
            ByteCodeValue::Int(3)
        );
        assert_eq!(
            cast_value(ByteCodeValue::Int(65), ByteDatatype::Char).expect("cast"),
            ByteCodeValue::Char('A')
        );
        assert!(cast_value(ByteCodeValue::String("1".into()), ByteDatatype::Int).is_err());
        assert_eq!(
            cast_value(ByteCodeValue::Bool(true), ByteDatatype::String).expect("cast"),
            ByteCodeValue::String("true".into())
        );
    }
}

//=====================================================
// End of file
//=====================================================
