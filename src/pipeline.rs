//=====================================================
// File: pipeline.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Single source-to-VM pipeline
// Objective: Compose library and user source, tokenize, parse, compile and
//            hand the result to a VM with one consolidated error type
//=====================================================

use thiserror::Error;

use crate::bytecode::ByteCodeValue;
use crate::compiler::{CompileContext, CompileError, CompiledProgram};
use crate::config::Config;
use crate::diagnostics::{DEFAULT_TRACEBACK_DEPTH, Diagnostic};
use crate::parser::{self, ParseOutput};
use crate::stdlib_registry::StdlibRegistry;
use crate::tokenizer;
use crate::vm::{ByteCodeVm, NativeRegistry, RuntimeOptions, VmError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{}", render_diagnostics(.0))]
    Diagnostics(Vec<Diagnostic>),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl PipelineError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            PipelineError::Diagnostics(entries) => entries,
            _ => &[],
        }
    }
}

fn render_diagnostics(entries: &[Diagnostic]) -> String {
    let mut rendered = entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n");
    rendered.push_str(&format!(
        "\n\n{} error{} reported",
        entries.len(),
        if entries.len() == 1 { "" } else { "s" }
    ));
    rendered
}

//=====================================================
// Section 1.0 - Pipeline
//=====================================================

#[derive(Debug, Clone)]
pub struct Pipeline {
    libraries: StdlibRegistry,
    traceback_depth: usize,
    runtime: RuntimeOptions,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            libraries: StdlibRegistry::with_defaults(),
            traceback_depth: DEFAULT_TRACEBACK_DEPTH,
            runtime: RuntimeOptions::default(),
        }
    }
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        let libraries = if config.compiler.include_stdlib {
            StdlibRegistry::with_defaults()
        } else {
            StdlibRegistry::new()
        };
        Self {
            libraries,
            traceback_depth: config.compiler.traceback_depth,
            runtime: config.runtime.options(),
        }
    }

    /// Pipeline that compiles user source alone.
    pub fn without_stdlib() -> Self {
        Self {
            libraries: StdlibRegistry::new(),
            ..Self::default()
        }
    }

    pub fn libraries_mut(&mut self) -> &mut StdlibRegistry {
        &mut self.libraries
    }

    pub fn parse(&self, user_source: &str) -> Result<ParseOutput, PipelineError> {
        let program = self.libraries.compose(user_source);
        let stream = tokenizer::tokenize(&program);
        tracing::debug!(tokens = stream.tokens.len(), "tokenized program");
        parser::parse(stream).map_err(PipelineError::Diagnostics)
    }

    //Function: compile
    //Purpose: Front end plus bytecode lowering for one user source
    //Inputs: user_source: program text without the library prefix
    //Returns: Result<CompiledProgram, PipelineError>
    pub fn compile(&self, user_source: &str) -> Result<CompiledProgram, PipelineError> {
        let parsed = self.parse(user_source)?;
        let program = CompileContext::new(&parsed.ast, self.traceback_depth).compile()?;
        Ok(program)
    }

    pub fn compile_to_bytes(&self, user_source: &str) -> Result<Vec<u8>, PipelineError> {
        Ok(self.compile(user_source)?.to_bytes()?)
    }

    /// Compile and load into a fresh VM bound to `registry`.
    pub fn load(
        &self,
        user_source: &str,
        registry: NativeRegistry,
    ) -> Result<ByteCodeVm, PipelineError> {
        let program = self.compile(user_source)?;
        let mut vm = ByteCodeVm::new(registry, self.runtime);
        vm.load_program(program.instructions)?;
        Ok(vm)
    }

    pub fn run(
        &self,
        user_source: &str,
        function: &str,
        args: &[ByteCodeValue],
    ) -> Result<Option<ByteCodeValue>, PipelineError> {
        let mut vm = self.load(user_source, NativeRegistry::with_builtins())?;
        Ok(vm.invoke(function, args)?)
    }
}

/// Compile with the bundled standard library.
pub fn compile_source(user_source: &str) -> Result<CompiledProgram, PipelineError> {
    Pipeline::default().compile(user_source)
}

//=====================================================
// End of file
//=====================================================
