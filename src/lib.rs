//=====================================================
// File: lib.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript library root
// Objective: Expose the tokenizer, parser, compiler, bytecode VM and host
//            bridge that make up the MibScript toolchain
//=====================================================

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod interop;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod scope;
pub mod stdlib_registry;
pub mod symbol;
pub mod tokenizer;
pub mod types;
pub mod vm;

pub use errors::{ErrorCode, ScriptError};
pub use pipeline::{Pipeline, PipelineError};

//=====================================================
// End of file
//=====================================================
