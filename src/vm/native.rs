//=====================================================
// File: vm/native.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host native function registry
// Objective: Parse linkage strings and bind them to host callables the VM
//            resolves while loading a program
//=====================================================

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::bytecode::ByteCodeValue;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NativeError {
    #[error("invalid linkage '{0}': expected <path>.<method>(<t1>|...)<ret>")]
    InvalidLinkage(String),
    #[error("native '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("argument {index} of '{method}' expected {expected}, found {found}")]
    Argument {
        method: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("returned {found} where {expected} was declared")]
    ReturnType { expected: String, found: &'static str },
    #[error("{0}")]
    Failed(String),
}

//=====================================================
// Section 1.0 - Linkage
//=====================================================

/// `<path>.<method>(<t1>|<t2>|...)<ret>`. Compiled function signatures use
/// the same grammar with the script-qualified name in place of the binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Linkage {
    pub path: String,
    pub method: String,
    pub params: Vec<String>,
    pub return_type: String,
}

impl Linkage {
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        params: &[&str],
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            params: params.iter().map(|param| param.to_string()).collect(),
            return_type: return_type.into(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, NativeError> {
        text.parse()
    }

    /// `path.method`, the name used for lookups by hosts.
    pub fn qualified(&self) -> String {
        if self.path.is_empty() {
            self.method.clone()
        } else {
            format!("{}.{}", self.path, self.method)
        }
    }

    pub fn returns_value(&self) -> bool {
        self.return_type != "void"
    }
}

impl FromStr for Linkage {
    type Err = NativeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || NativeError::InvalidLinkage(text.to_string());
        let (head, rest) = text.split_once('(').ok_or_else(invalid)?;
        let (params, return_type) = rest.split_once(')').ok_or_else(invalid)?;
        let (path, method) = head.rsplit_once('.').unwrap_or(("", head));

        let is_name = |part: &str| {
            !part.is_empty()
                && part
                    .split('.')
                    .all(|segment| !segment.is_empty() && !segment.contains(char::is_whitespace))
        };
        if !is_name(method) || method.contains('.') || !is_name(return_type) {
            return Err(invalid());
        }
        if !path.is_empty() && !is_name(path) {
            return Err(invalid());
        }

        let params = if params.is_empty() {
            Vec::new()
        } else {
            params
                .split('|')
                .map(|param| is_name(param).then(|| param.to_string()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(invalid)?
        };

        Ok(Self {
            path: path.to_string(),
            method: method.to_string(),
            params,
            return_type: return_type.to_string(),
        })
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}){}",
            self.qualified(),
            self.params.join("|"),
            self.return_type
        )
    }
}

//=====================================================
// Section 2.0 - Registry
//=====================================================

pub type NativeResult = Result<Option<ByteCodeValue>, NativeError>;
pub type NativeCallable = Arc<dyn Fn(&[ByteCodeValue]) -> NativeResult + Send + Sync>;

/// A bound host callable. Cloning shares the callable.
#[derive(Clone)]
pub struct NativeFunction {
    pub linkage: Linkage,
    callable: NativeCallable,
}

impl NativeFunction {
    pub fn call(&self, args: &[ByteCodeValue]) -> NativeResult {
        (self.callable)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("linkage", &self.linkage.to_string())
            .finish()
    }
}

/// Explicit registry handed to the VM; there is no process-wide state.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    functions: HashMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `mib.std.*` library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtins::register_builtins(&mut registry);
        registry
    }

    //Function: register
    //Purpose: Bind a host callable to `<path>.<method>(<params>)<ret>`
    //Inputs: path, method, parameter type names, return type name, callable
    //Returns: Result<(), NativeError>
    pub fn register<F>(
        &mut self,
        path: &str,
        method: &str,
        params: &[&str],
        return_type: &str,
        callable: F,
    ) -> Result<(), NativeError>
    where
        F: Fn(&[ByteCodeValue]) -> NativeResult + Send + Sync + 'static,
    {
        let linkage = Linkage::new(path, method, params, return_type);
        // Round-trip through the parser so malformed names are rejected.
        let key = linkage.to_string();
        let linkage = Linkage::parse(&key)?;
        if self.functions.contains_key(&key) {
            return Err(NativeError::AlreadyRegistered(key));
        }
        tracing::debug!(linkage = %key, "registered native function");
        self.functions.insert(
            key,
            NativeFunction {
                linkage,
                callable: Arc::new(callable),
            },
        );
        Ok(())
    }

    /// Look up a linkage string exactly as emitted into bytecode.
    pub fn resolve(&self, linkage: &str) -> Option<&NativeFunction> {
        self.functions.get(linkage)
    }

    pub fn contains(&self, linkage: &str) -> bool {
        self.functions.contains_key(linkage)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn linkages(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.functions.keys().collect();
        keys.sort();
        f.debug_struct("NativeRegistry").field("functions", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_linkage() {
        let linkage = Linkage::parse("org.x.Y.z(int|string)void").expect("linkage");
        assert_eq!(linkage.path, "org.x.Y");
        assert_eq!(linkage.method, "z");
        assert_eq!(linkage.params, vec!["int".to_string(), "string".to_string()]);
        assert_eq!(linkage.return_type, "void");
        assert!(!linkage.returns_value());
        assert_eq!(linkage.to_string(), "org.x.Y.z(int|string)void");
    }

    #[test]
    fn parses_parameterless_linkage() {
        let linkage = Linkage::parse("mib.std.Time.now()long").expect("linkage");
        assert!(linkage.params.is_empty());
        assert_eq!(linkage.qualified(), "mib.std.Time.now");
    }

    #[test]
    fn rejects_malformed_linkage() {
        for text in ["no_parens", "a.b(int", "a.b(int)", "a.b(int||int)void", "a..b()void"] {
            assert!(Linkage::parse(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = NativeRegistry::new();
        registry
            .register("host.Api", "ping", &[], "void", |_| Ok(None))
            .expect("first registration");
        let err = registry
            .register("host.Api", "ping", &[], "void", |_| Ok(None))
            .expect_err("duplicate");
        assert_eq!(err, NativeError::AlreadyRegistered("host.Api.ping()void".into()));
    }

    #[test]
    fn registered_callable_is_resolvable() {
        let mut registry = NativeRegistry::new();
        registry
            .register("host.Api", "twice", &["int"], "int", |args| match args {
                [ByteCodeValue::Int(value)] => Ok(Some(ByteCodeValue::Int(value * 2))),
                _ => Err(NativeError::Failed("bad args".into())),
            })
            .expect("register");
        let function = registry.resolve("host.Api.twice(int)int").expect("resolve");
        let result = function.call(&[ByteCodeValue::Int(21)]).expect("call");
        assert_eq!(result, Some(ByteCodeValue::Int(42)));
    }
}

//=====================================================
// End of file
//=====================================================
