//=====================================================
// File: errors.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Stable error codes for MibScript failures
// Objective: Map every error class of the pipeline onto a code an embedding
//            host can match on without inspecting messages
//=====================================================

use crate::bytecode::BytecodeError;
use crate::compiler::CompileError;
use crate::diagnostics::Diagnostic;
use crate::interop::InteropError;
use crate::pipeline::PipelineError;
use crate::vm::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Lexical,
    Syntactic,
    Semantic,
    Compilation,
    LoadLink,
    Runtime,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Lexical => "E001",
            ErrorCode::Syntactic => "E002",
            ErrorCode::Semantic => "E003",
            ErrorCode::Compilation => "E004",
            ErrorCode::LoadLink => "E005",
            ErrorCode::Runtime => "E006",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptError {
    pub code: ErrorCode,
    pub message: String,
}

impl ScriptError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code_str(), self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<&Diagnostic> for ScriptError {
    fn from(value: &Diagnostic) -> Self {
        ScriptError::new(value.kind.code(), value.to_string())
    }
}

impl From<CompileError> for ScriptError {
    fn from(value: CompileError) -> Self {
        ScriptError::new(ErrorCode::Compilation, value.to_string())
    }
}

impl From<BytecodeError> for ScriptError {
    fn from(value: BytecodeError) -> Self {
        ScriptError::new(ErrorCode::LoadLink, value.to_string())
    }
}

impl From<VmError> for ScriptError {
    fn from(value: VmError) -> Self {
        ScriptError::new(vm_error_code(&value), value.to_string())
    }
}

impl From<InteropError> for ScriptError {
    fn from(value: InteropError) -> Self {
        let code = match &value {
            InteropError::Vm(inner) => vm_error_code(inner),
            _ => ErrorCode::Runtime,
        };
        ScriptError::new(code, value.to_string())
    }
}

impl From<PipelineError> for ScriptError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Diagnostics(entries) => {
                let code = entries
                    .first()
                    .map(|entry| entry.kind.code())
                    .unwrap_or(ErrorCode::Syntactic);
                let message = entries
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                ScriptError::new(code, message)
            }
            PipelineError::Compile(inner) => inner.into(),
            PipelineError::Vm(inner) => inner.into(),
        }
    }
}

pub fn vm_error_code(error: &VmError) -> ErrorCode {
    match error {
        VmError::Bytecode(_) | VmError::UnresolvedNative { .. } | VmError::Linkage(_) => {
            ErrorCode::LoadLink
        }
        _ => ErrorCode::Runtime,
    }
}

//=====================================================
// End of file
//=====================================================
