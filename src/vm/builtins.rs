//=====================================================
// File: vm/builtins.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Default native library
// Objective: Host implementations behind the mib.std.* bindings declared by
//            the bundled standard library source
//=====================================================

use std::io::Write;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::native::{NativeError, NativeRegistry, NativeResult};
use crate::bytecode::ByteCodeValue;

const CONSOLE: &str = "mib.std.Console";
const MATH: &str = "mib.std.Math";
const TIME: &str = "mib.std.Time";
const UUID: &str = "mib.std.Uuid";
const STRINGS: &str = "mib.std.Strings";

type Builtin = fn(&[ByteCodeValue]) -> NativeResult;

/// (binding path, method, parameter types, return type, implementation)
const BUILTINS: &[(&str, &str, &[&str], &str, Builtin)] = &[
    (CONSOLE, "print", &["string"], "void", console_print),
    (CONSOLE, "print", &["int"], "void", console_print),
    (CONSOLE, "print", &["double"], "void", console_print),
    (CONSOLE, "print", &["bool"], "void", console_print),
    (CONSOLE, "println", &["string"], "void", console_println),
    (CONSOLE, "println", &["int"], "void", console_println),
    (CONSOLE, "println", &["long"], "void", console_println),
    (CONSOLE, "println", &["double"], "void", console_println),
    (CONSOLE, "println", &["bool"], "void", console_println),
    (MATH, "abs", &["int"], "int", math_abs),
    (MATH, "abs", &["double"], "double", math_abs),
    (MATH, "sqrt", &["double"], "double", math_sqrt),
    (MATH, "pow", &["double", "double"], "double", math_pow),
    (TIME, "sleep", &["long"], "void", time_sleep),
    (TIME, "now", &[], "long", time_now),
    (UUID, "random", &[], "string", uuid_random),
    (STRINGS, "length", &["string"], "int", strings_length),
];

pub fn register_builtins(registry: &mut NativeRegistry) {
    for &(path, method, params, return_type, builtin) in BUILTINS {
        if let Err(err) = registry.register(path, method, params, return_type, builtin) {
            tracing::warn!(%err, "skipping builtin native");
        }
    }
}

//=====================================================
// Section 1.0 - Console
//=====================================================

fn console_print(args: &[ByteCodeValue]) -> NativeResult {
    let value = single(args, "print")?;
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{value}").map_err(io_failure)?;
    stdout.flush().map_err(io_failure)?;
    Ok(None)
}

fn console_println(args: &[ByteCodeValue]) -> NativeResult {
    let value = single(args, "println")?;
    writeln!(std::io::stdout().lock(), "{value}").map_err(io_failure)?;
    Ok(None)
}

//=====================================================
// Section 2.0 - Math
//=====================================================

fn math_abs(args: &[ByteCodeValue]) -> NativeResult {
    match single(args, "abs")? {
        ByteCodeValue::Int(value) => Ok(Some(ByteCodeValue::Int(value.wrapping_abs()))),
        ByteCodeValue::Double(value) => Ok(Some(ByteCodeValue::Double(value.abs()))),
        other => Err(argument_error("abs", 0, "int or double", other)),
    }
}

fn math_sqrt(args: &[ByteCodeValue]) -> NativeResult {
    let value = double_at(args, 0, "sqrt")?;
    Ok(Some(ByteCodeValue::Double(value.sqrt())))
}

fn math_pow(args: &[ByteCodeValue]) -> NativeResult {
    let base = double_at(args, 0, "pow")?;
    let exponent = double_at(args, 1, "pow")?;
    Ok(Some(ByteCodeValue::Double(base.powf(exponent))))
}

//=====================================================
// Section 3.0 - Time, Uuid & Strings
//=====================================================

fn time_sleep(args: &[ByteCodeValue]) -> NativeResult {
    match single(args, "sleep")? {
        ByteCodeValue::Long(millis) => {
            thread::sleep(Duration::from_millis((*millis).max(0) as u64));
            Ok(None)
        }
        other => Err(argument_error("sleep", 0, "long", other)),
    }
}

fn time_now(_args: &[ByteCodeValue]) -> NativeResult {
    Ok(Some(ByteCodeValue::Long(Utc::now().timestamp_millis())))
}

/// Random version 4 UUID in canonical hyphenated form.
fn uuid_random(_args: &[ByteCodeValue]) -> NativeResult {
    Ok(Some(ByteCodeValue::String(Uuid::new_v4().to_string())))
}

fn strings_length(args: &[ByteCodeValue]) -> NativeResult {
    match single(args, "length")? {
        ByteCodeValue::String(text) => {
            let length = i32::try_from(text.chars().count())
                .map_err(|_| NativeError::Failed("string too long".into()))?;
            Ok(Some(ByteCodeValue::Int(length)))
        }
        other => Err(argument_error("length", 0, "string", other)),
    }
}

//=====================================================
// Section 4.0 - Argument Helpers
//=====================================================

fn single<'a>(args: &'a [ByteCodeValue], method: &str) -> Result<&'a ByteCodeValue, NativeError> {
    match args {
        [value] => Ok(value),
        _ => Err(NativeError::Failed(format!(
            "{method} expects 1 argument, received {}",
            args.len()
        ))),
    }
}

fn double_at(args: &[ByteCodeValue], index: usize, method: &str) -> Result<f64, NativeError> {
    match args.get(index) {
        Some(ByteCodeValue::Double(value)) => Ok(*value),
        Some(other) => Err(argument_error(method, index, "double", other)),
        None => Err(NativeError::Failed(format!(
            "{method} is missing argument {index}"
        ))),
    }
}

fn argument_error(method: &str, index: usize, expected: &'static str, found: &ByteCodeValue) -> NativeError {
    NativeError::Argument {
        method: method.to_string(),
        index,
        expected,
        found: found.datatype().name(),
    }
}

fn io_failure(err: std::io::Error) -> NativeError {
    NativeError::Failed(format!("console write failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_every_binding() {
        let registry = NativeRegistry::with_builtins();
        assert_eq!(registry.len(), BUILTINS.len());
        assert!(registry.contains("mib.std.Console.println(string)void"));
        assert!(registry.contains("mib.std.Math.pow(double|double)double"));
        assert!(registry.contains("mib.std.Time.now()long"));
    }

    #[test]
    fn uuid_has_version_four_layout() {
        let value = uuid_random(&[]).expect("uuid").expect("value");
        let ByteCodeValue::String(uuid) = value else {
            panic!("uuid should be a string");
        };
        let parsed = Uuid::parse_str(&uuid).expect("canonical uuid");
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(uuid.len(), 36);
    }

    #[test]
    fn math_rejects_wrong_argument_type() {
        let err = math_sqrt(&[ByteCodeValue::Int(4)]).expect_err("int is not double");
        assert!(matches!(err, NativeError::Argument { expected: "double", .. }));
    }

    #[test]
    fn string_length_counts_characters() {
        let result = strings_length(&[ByteCodeValue::String("héllo".into())]).expect("length");
        assert_eq!(result, Some(ByteCodeValue::Int(5)));
    }
}

//=====================================================
// End of file
//=====================================================
