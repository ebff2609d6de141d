//=====================================================
// File: interop.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host interop bridge
// Objective: Let embedding hosts build script values from JSON, resolve
//            datatypes and invoke script functions through a shared VM
//=====================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::bytecode::{ByteCodeValue, ByteDatatype};
use crate::types::Primitive;
use crate::vm::runtime::{EnumLayout, FunctionTable};
use crate::vm::{ByteCodeVm, VmError};

#[derive(Debug, Error)]
pub enum InteropError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("{value} does not fit in {target}")]
    OutOfRange { value: String, target: &'static str },
    #[error("unknown datatype '{0}'")]
    UnknownType(String),
    #[error("enum '{name}' has no member '{member}'")]
    UnknownEnumMember { name: String, member: String },
    #[error("no overload of '{name}' accepts {args}")]
    NoOverload { name: String, args: String },
}

/// Datatype descriptor handed to hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    Primitive(ByteDatatype),
    Enum { name: String, members: Vec<String> },
}

//=====================================================
// Section 1.0 - Bridge
//=====================================================

/// Cloneable handle serializing host access to one VM.
#[derive(Clone)]
pub struct HostBridge {
    vm: Arc<Mutex<ByteCodeVm>>,
}

impl HostBridge {
    pub fn new(vm: ByteCodeVm) -> Self {
        Self {
            vm: Arc::new(Mutex::new(vm)),
        }
    }

    /// Bridge over a builtins VM loaded with `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InteropError> {
        let mut vm = ByteCodeVm::with_builtins();
        vm.load(bytes)?;
        Ok(Self::new(vm))
    }

    pub fn load(&self, bytes: &[u8]) -> Result<(), InteropError> {
        self.vm.lock().load(bytes)?;
        Ok(())
    }

    /// Run `action` with exclusive access to the VM.
    pub fn with_vm<R>(&self, action: impl FnOnce(&mut ByteCodeVm) -> R) -> R {
        action(&mut self.vm.lock())
    }

    //Function: datatype
    //Purpose: Resolve a primitive or enum type by name
    //Inputs: name: "int", "app.Color", ...
    //Returns: Result<HostType, InteropError>
    pub fn datatype(&self, name: &str) -> Result<HostType, InteropError> {
        let table = self.vm.lock().function_table();
        resolve_type(&table, name)
    }

    /// Build a script value of `type_name` from a host JSON value.
    pub fn value(&self, host: &JsonValue, type_name: &str) -> Result<ByteCodeValue, InteropError> {
        let table = self.vm.lock().function_table();
        to_script(&table, host, type_name)
    }

    /// Convert a script value back to JSON; enum values become member names.
    pub fn to_json(&self, value: &ByteCodeValue, type_name: &str) -> JsonValue {
        let table = self.vm.lock().function_table();
        to_host(&table, value, type_name)
    }

    pub fn invoke(
        &self,
        name: &str,
        values: &[ByteCodeValue],
    ) -> Result<Option<ByteCodeValue>, InteropError> {
        Ok(self.vm.lock().invoke(name, values)?)
    }

    /// Call one overload picked by its declared parameter types.
    pub fn invoke_overload(
        &self,
        name: &str,
        params: &[&str],
        values: &[ByteCodeValue],
    ) -> Result<Option<ByteCodeValue>, InteropError> {
        Ok(self.vm.lock().invoke_overload(name, params, values)?)
    }

    //Function: invoke_json
    //Purpose: Convert JSON arguments with the first overload they fit,
    //         preferring lighter parameter types, then call it
    //Inputs: name: script-qualified function, args: JSON arguments
    //Returns: Result<JsonValue, InteropError> (null for void)
    pub fn invoke_json(&self, name: &str, args: &[JsonValue]) -> Result<JsonValue, InteropError> {
        let mut vm = self.vm.lock();
        vm.initialize()?;
        let table = vm.function_table();

        let mut candidates: Vec<(u32, Vec<String>, String)> = table
            .overloads(name)
            .filter(|(_, function)| function.signature().params.len() == args.len())
            .map(|(id, function)| {
                let signature = function.signature();
                (id, signature.params.clone(), signature.return_type.clone())
            })
            .collect();
        candidates.sort_by_key(|(_, params, _)| params.iter().map(|param| type_cost(param)).sum::<u32>());

        let selected = candidates.into_iter().find_map(|(id, params, return_type)| {
            params
                .iter()
                .zip(args)
                .map(|(param, arg)| to_script(&table, arg, param))
                .collect::<Result<Vec<_>, _>>()
                .ok()
                .map(|values| (id, values, return_type))
        });
        let Some((id, values, return_type)) = selected else {
            return Err(InteropError::NoOverload {
                name: name.to_string(),
                args: JsonValue::Array(args.to_vec()).to_string(),
            });
        };

        tracing::debug!(name, id, "invoking function from json arguments");
        let result = vm.call(id, values)?;
        Ok(result
            .map(|value| to_host(&table, &value, &return_type))
            .unwrap_or(JsonValue::Null))
    }
}

//=====================================================
// Section 2.0 - Conversions
//=====================================================

fn resolve_type(table: &FunctionTable, name: &str) -> Result<HostType, InteropError> {
    if let Some(primitive) = Primitive::from_name(name) {
        return match primitive {
            Primitive::Void | Primitive::Null => Err(InteropError::UnknownType(name.to_string())),
            _ => ByteDatatype::from_name(name)
                .map(HostType::Primitive)
                .ok_or_else(|| InteropError::UnknownType(name.to_string())),
        };
    }
    table
        .enum_layout(name)
        .map(|EnumLayout { name, members }| HostType::Enum {
            name: name.clone(),
            members: members.clone(),
        })
        .ok_or_else(|| InteropError::UnknownType(name.to_string()))
}

/// Lighter parameter types are tried first so `1` prefers `int`.
fn type_cost(name: &str) -> u32 {
    Primitive::from_name(name)
        .and_then(Primitive::weight)
        .map(u32::from)
        .unwrap_or(0)
}

fn json_kind(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".into(),
        JsonValue::Bool(_) => "bool".into(),
        JsonValue::Number(number) if number.is_f64() => "floating-point number".into(),
        JsonValue::Number(_) => "integer".into(),
        JsonValue::String(_) => "string".into(),
        JsonValue::Array(_) => "array".into(),
        JsonValue::Object(_) => "object".into(),
    }
}

fn mismatch(expected: &str, found: &JsonValue) -> InteropError {
    InteropError::TypeMismatch {
        expected: expected.to_string(),
        found: json_kind(found),
    }
}

fn integer(host: &JsonValue, target: &'static str) -> Result<i64, InteropError> {
    match host {
        JsonValue::Number(number) => number.as_i64().ok_or_else(|| InteropError::OutOfRange {
            value: number.to_string(),
            target,
        }),
        other => Err(mismatch(target, other)),
    }
}

//Function: to_script
//Purpose: Shape-checked JSON to script value conversion
//Inputs: table: loaded program metadata, host: JSON value, type_name
//Returns: Result<ByteCodeValue, InteropError>
fn to_script(
    table: &FunctionTable,
    host: &JsonValue,
    type_name: &str,
) -> Result<ByteCodeValue, InteropError> {
    match resolve_type(table, type_name)? {
        HostType::Primitive(datatype) => match datatype {
            ByteDatatype::Bool => host
                .as_bool()
                .map(ByteCodeValue::Bool)
                .ok_or_else(|| mismatch("bool", host)),
            ByteDatatype::Char => {
                let text = host.as_str().ok_or_else(|| mismatch("char", host))?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Ok(ByteCodeValue::Char(ch)),
                    _ => Err(InteropError::TypeMismatch {
                        expected: "single-character string".into(),
                        found: format!("{:?}", text),
                    }),
                }
            }
            ByteDatatype::Int => {
                let value = integer(host, "int")?;
                i32::try_from(value)
                    .map(ByteCodeValue::Int)
                    .map_err(|_| InteropError::OutOfRange {
                        value: value.to_string(),
                        target: "int",
                    })
            }
            ByteDatatype::Long => integer(host, "long").map(ByteCodeValue::Long),
            ByteDatatype::Float => {
                let value = host.as_f64().ok_or_else(|| mismatch("float", host))?;
                if value.is_finite() && value.abs() > f64::from(f32::MAX) {
                    return Err(InteropError::OutOfRange {
                        value: value.to_string(),
                        target: "float",
                    });
                }
                Ok(ByteCodeValue::Float(value as f32))
            }
            ByteDatatype::Double => host
                .as_f64()
                .map(ByteCodeValue::Double)
                .ok_or_else(|| mismatch("double", host)),
            ByteDatatype::String => host
                .as_str()
                .map(|text| ByteCodeValue::String(text.to_string()))
                .ok_or_else(|| mismatch("string", host)),
            ByteDatatype::Enum => Err(InteropError::UnknownType(type_name.to_string())),
        },
        HostType::Enum { name, members } => {
            let ordinal = match host {
                JsonValue::String(member) => members
                    .iter()
                    .position(|candidate| candidate == member)
                    .ok_or_else(|| InteropError::UnknownEnumMember {
                        name: name.clone(),
                        member: member.clone(),
                    })?,
                JsonValue::Number(number) => number
                    .as_u64()
                    .and_then(|ordinal| usize::try_from(ordinal).ok())
                    .filter(|ordinal| *ordinal < members.len())
                    .ok_or_else(|| InteropError::UnknownEnumMember {
                        name: name.clone(),
                        member: number.to_string(),
                    })?,
                other => return Err(mismatch(&name, other)),
            };
            Ok(ByteCodeValue::Enum(ordinal as u32))
        }
    }
}

fn to_host(table: &FunctionTable, value: &ByteCodeValue, type_name: &str) -> JsonValue {
    match value {
        ByteCodeValue::Bool(value) => json!(value),
        ByteCodeValue::Char(value) => json!(value.to_string()),
        ByteCodeValue::Int(value) => json!(value),
        ByteCodeValue::Long(value) => json!(value),
        ByteCodeValue::Float(value) => json!(value),
        ByteCodeValue::Double(value) => json!(value),
        ByteCodeValue::String(value) => json!(value),
        ByteCodeValue::Enum(ordinal) => table
            .enum_layout(type_name)
            .and_then(|layout| layout.members.get(*ordinal as usize))
            .map(|member| json!(member))
            .unwrap_or_else(|| json!(ordinal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ByteCode, VERSION};

    fn bridge() -> HostBridge {
        let mut vm = ByteCodeVm::with_builtins();
        vm.load_program(vec![
            ByteCode::MagicHeader { version: VERSION },
            ByteCode::EnumDefinition {
                name: "app.Color".into(),
                members: vec!["Red".into(), "Green".into()],
            },
        ])
        .expect("load");
        HostBridge::new(vm)
    }

    #[test]
    fn json_values_convert_by_shape() {
        let bridge = bridge();
        assert_eq!(
            bridge.value(&json!(7), "int").expect("int"),
            ByteCodeValue::Int(7)
        );
        assert_eq!(
            bridge.value(&json!("x"), "char").expect("char"),
            ByteCodeValue::Char('x')
        );
        assert_eq!(
            bridge.value(&json!("Green"), "app.Color").expect("enum"),
            ByteCodeValue::Enum(1)
        );
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let bridge = bridge();
        assert!(matches!(
            bridge.value(&json!("7"), "int"),
            Err(InteropError::TypeMismatch { .. })
        ));
        assert!(matches!(
            bridge.value(&json!(5_000_000_000i64), "int"),
            Err(InteropError::OutOfRange { .. })
        ));
        assert!(matches!(
            bridge.value(&json!("ab"), "char"),
            Err(InteropError::TypeMismatch { .. })
        ));
        assert!(matches!(
            bridge.value(&json!("Blue"), "app.Color"),
            Err(InteropError::UnknownEnumMember { .. })
        ));
    }

    #[test]
    fn datatype_lookup_covers_primitives_and_enums() {
        let bridge = bridge();
        assert_eq!(
            bridge.datatype("double").expect("double"),
            HostType::Primitive(ByteDatatype::Double)
        );
        assert!(matches!(
            bridge.datatype("app.Color"),
            Ok(HostType::Enum { members, .. }) if members.len() == 2
        ));
        assert!(matches!(
            bridge.datatype("void"),
            Err(InteropError::UnknownType(_))
        ));
    }

    #[test]
    fn enum_results_serialize_as_member_names() {
        let bridge = bridge();
        assert_eq!(
            bridge.to_json(&ByteCodeValue::Enum(0), "app.Color"),
            json!("Red")
        );
    }
}

//=====================================================
// End of file
//=====================================================
