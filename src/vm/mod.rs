//=====================================================
// File: vm/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript bytecode virtual machine
// Objective: Expose the stack VM, its native registry and the runtime error
//            model shared by the CLI and the host bridge
//=====================================================

pub mod builtins;
pub mod native;
pub mod runtime;

use thiserror::Error;

use crate::bytecode::{BytecodeError, Storage};

pub use native::{Linkage, NativeError, NativeFunction, NativeRegistry};
pub use runtime::{ByteCodeRuntimeFunction, ByteCodeVm, FunctionTable, RuntimeOptions};

/// Faults raised while instructions execute.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{operation} is not defined for {operands}")]
    TypeMismatch {
        operation: &'static str,
        operands: String,
    },
    #[error("cannot cast {from} to {to}")]
    InvalidCast {
        from: &'static str,
        to: &'static str,
    },
    #[error("{storage} variable {address} is used before it is defined")]
    UninitializedVariable { storage: Storage, address: u32 },
    #[error("{storage} variable {address} was never declared")]
    UndeclaredVariable { storage: Storage, address: u32 },
    #[error("no function with id {0}")]
    InvalidFunction(u32),
    #[error("jump target {0} is outside the program")]
    InvalidJump(u32),
    #[error("native '{linkage}' failed: {source}")]
    Native {
        linkage: String,
        source: NativeError,
    },
    #[error("{0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    #[error("native binding '{linkage}' for '{signature}' is not registered")]
    UnresolvedNative { signature: String, linkage: String },
    #[error("link error: {0}")]
    Linkage(String),
    #[error("no program is loaded")]
    NotLoaded,
    #[error("no function '{name}' accepts ({args})")]
    UnknownFunction { name: String, args: String },
    #[error("call to '{name}' with ({args}) is ambiguous between {candidates:?}")]
    AmbiguousCall {
        name: String,
        args: String,
        candidates: Vec<String>,
    },
    #[error("runtime error at line {line}: {fault}\n{trace}")]
    Runtime {
        fault: Fault,
        line: u32,
        trace: String,
    },
}

impl VmError {
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            VmError::Runtime { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

//=====================================================
// End of file
//=====================================================
