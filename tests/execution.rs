// MibScript end-to-end tests: compile, encode, load and execute programs
// through the stack VM with the bundled standard library

use mibscript::bytecode::{ByteCode, ByteCodeValue};
use mibscript::errors::{ErrorCode, ScriptError};
use mibscript::pipeline::{Pipeline, PipelineError};
use mibscript::vm::{ByteCodeVm, Fault, NativeError, NativeRegistry, VmError};

fn run(source: &str, function: &str, args: &[ByteCodeValue]) -> Option<ByteCodeValue> {
    Pipeline::default()
        .run(source, function, args)
        .unwrap_or_else(|err| panic!("running {function} failed: {err}"))
}

fn run_err(source: &str, function: &str, args: &[ByteCodeValue]) -> PipelineError {
    match Pipeline::default().run(source, function, args) {
        Ok(value) => panic!("expected {function} to fail, returned {value:?}"),
        Err(err) => err,
    }
}

#[test]
fn precedence_survives_to_execution() {
    let result = run(
        "module app { int x = 1 + 2 * 3; pub int get() { return x; } }",
        "app.get",
        &[],
    );
    assert_eq!(result, Some(ByteCodeValue::Int(7)));
}

#[test]
fn constant_set_in_either_branch() {
    let source = "module app {
        pub int pick(bool c) {
            int i;
            if (c) { i = 1; } else { i = 2; }
            return i;
        }
    }";
    assert_eq!(
        run(source, "app.pick", &[ByteCodeValue::Bool(true)]),
        Some(ByteCodeValue::Int(1))
    );
    assert_eq!(
        run(source, "app.pick", &[ByteCodeValue::Bool(false)]),
        Some(ByteCodeValue::Int(2))
    );
}

#[test]
fn function_table_follows_compiled_ids() {
    let pipeline = Pipeline::default();
    let source = "module app {
        pub int twice(int v) { return v * 2; }
        pub double twice(double v) { return v * 2.0; }
        pub int main() { return twice(21); }
    }";
    let program = pipeline.compile(source).expect("compile");
    let bytes = program.to_bytes().expect("encode");

    let mut vm = ByteCodeVm::with_builtins();
    vm.load(&bytes).expect("load");
    let table = vm.function_table();
    let linked: Vec<String> = table
        .functions
        .iter()
        .map(|function| function.signature().to_string())
        .collect();
    assert_eq!(linked, program.functions);
    assert!(program.functions.contains(&"app.twice(int)int".to_string()));
    assert!(program.functions.contains(&"app.twice(double)double".to_string()));

    assert_eq!(
        vm.invoke("app.main", &[]).expect("invoke"),
        Some(ByteCodeValue::Int(42))
    );
}

#[test]
fn compiled_image_starts_with_the_header() {
    let program = Pipeline::without_stdlib()
        .compile("module app { int x = 1; }")
        .expect("compile");
    assert!(matches!(
        program.instructions.first(),
        Some(ByteCode::MagicHeader { .. })
    ));
}

#[test]
fn stdlib_functions_resolve_through_using() {
    let source = "module app {
        using std.math;
        pub int bounded() { return max(3, clamp(10, 0, 5)); }
        pub int letters() { return std.strings.length(\"hello\"); }
        pub bool blank() { return std.strings.is_empty(\"\"); }
        pub double root() { return std.math.sqrt(16.0); }
    }";
    assert_eq!(run(source, "app.bounded", &[]), Some(ByteCodeValue::Int(5)));
    assert_eq!(run(source, "app.letters", &[]), Some(ByteCodeValue::Int(5)));
    assert_eq!(run(source, "app.blank", &[]), Some(ByteCodeValue::Bool(true)));
    assert_eq!(run(source, "app.root", &[]), Some(ByteCodeValue::Double(4.0)));
}

#[test]
fn recursion_computes_fibonacci() {
    let source = "module app {
        pub int fib(int n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
    }";
    assert_eq!(
        run(source, "app.fib", &[ByteCodeValue::Int(10)]),
        Some(ByteCodeValue::Int(55))
    );
}

#[test]
fn loops_accumulate() {
    let source = "module app {
        pub int for_sum(int n) {
            mut int sum = 0;
            for (mut int i = 1; i <= n; i += 1) { sum += i; }
            return sum;
        }
        pub int while_sum(int n) {
            mut int sum = 0;
            mut int i = n;
            while (i > 0) { sum += i; i -= 1; }
            return sum;
        }
        pub int do_count() {
            mut int runs = 0;
            do { runs += 1; } while (false);
            return runs;
        }
    }";
    let ten = [ByteCodeValue::Int(10)];
    assert_eq!(run(source, "app.for_sum", &ten), Some(ByteCodeValue::Int(55)));
    assert_eq!(run(source, "app.while_sum", &ten), Some(ByteCodeValue::Int(55)));
    assert_eq!(run(source, "app.do_count", &[]), Some(ByteCodeValue::Int(1)));
}

#[test]
fn enums_compare_by_member() {
    let source = "module app {
        enum Color { Red, Green, Blue }
        pub int classify(bool warm) {
            Color c = warm ? Color::Red : Color::Blue;
            if (c == Color::Red) { return 1; }
            if (c != Color::Green) { return 2; }
            return 3;
        }
    }";
    assert_eq!(
        run(source, "app.classify", &[ByteCodeValue::Bool(true)]),
        Some(ByteCodeValue::Int(1))
    );
    assert_eq!(
        run(source, "app.classify", &[ByteCodeValue::Bool(false)]),
        Some(ByteCodeValue::Int(2))
    );
}

#[test]
fn expressions_promote_cast_and_concatenate() {
    let source = "module app {
        pub double mixed(bool flag) { return flag ? 1 : 2.5; }
        pub int truncate() { return (int) 3.9; }
        pub long widen(int v) { return v * 2L; }
        pub string label(int v) { return \"n=\" + v; }
        pub int negate(int v) { return -v; }
        pub bool different(int a, int b) { return a != b; }
    }";
    assert_eq!(
        run(source, "app.mixed", &[ByteCodeValue::Bool(true)]),
        Some(ByteCodeValue::Double(1.0))
    );
    assert_eq!(run(source, "app.truncate", &[]), Some(ByteCodeValue::Int(3)));
    assert_eq!(
        run(source, "app.widen", &[ByteCodeValue::Int(21)]),
        Some(ByteCodeValue::Long(42))
    );
    assert_eq!(
        run(source, "app.label", &[ByteCodeValue::Int(5)]),
        Some(ByteCodeValue::String("n=5".into()))
    );
    assert_eq!(
        run(source, "app.negate", &[ByteCodeValue::Int(4)]),
        Some(ByteCodeValue::Int(-4))
    );
    assert_eq!(
        run(
            source,
            "app.different",
            &[ByteCodeValue::Int(1), ByteCodeValue::Int(2)]
        ),
        Some(ByteCodeValue::Bool(true))
    );
}

#[test]
fn globals_initialize_once_per_load() {
    let source = "module app {
        mut int counter = 10;
        pub int next() { counter += 1; return counter; }
    }";
    let mut vm = Pipeline::default()
        .load(source, NativeRegistry::with_builtins())
        .expect("load");
    assert_eq!(vm.invoke("app.next", &[]).expect("first"), Some(ByteCodeValue::Int(11)));
    assert_eq!(vm.invoke("app.next", &[]).expect("second"), Some(ByteCodeValue::Int(12)));
}

#[test]
fn host_natives_are_callable_from_script() {
    let mut registry = NativeRegistry::with_builtins();
    registry
        .register("host.Clock", "ticks", &[], "int", |_| {
            Ok(Some(ByteCodeValue::Int(42)))
        })
        .expect("register");
    let source = "module app {
        native(\"host.Clock\") int ticks();
        pub int read() { return ticks() + 1; }
    }";
    let mut vm = Pipeline::default().load(source, registry).expect("load");
    assert_eq!(vm.invoke("app.read", &[]).expect("invoke"), Some(ByteCodeValue::Int(43)));
}

#[test]
fn unresolved_natives_fail_at_load() {
    let source = "module app {
        native(\"host.Missing\") int gone();
        pub int use_it() { return gone(); }
    }";
    let err = Pipeline::default()
        .load(source, NativeRegistry::with_builtins())
        .err()
        .expect("load should fail");
    assert!(matches!(
        err,
        PipelineError::Vm(VmError::UnresolvedNative { ref linkage, .. }) if linkage == "host.Missing.gone()int"
    ));
    let script: ScriptError = err.into();
    assert_eq!(script.code, ErrorCode::LoadLink);
    assert_eq!(script.code_str(), "E005");
}

#[test]
fn division_by_zero_is_a_runtime_fault() {
    let source = "module app {
        pub int div(int a, int b) {
            return a / b;
        }
    }";
    let err = run_err(source, "app.div", &[ByteCodeValue::Int(1), ByteCodeValue::Int(0)]);
    match &err {
        PipelineError::Vm(vm_err @ VmError::Runtime { line, .. }) => {
            assert_eq!(vm_err.fault(), Some(&Fault::DivisionByZero));
            assert_eq!(*line, 3);
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    let script: ScriptError = err.into();
    assert_eq!(script.code_str(), "E006");
}

#[test]
fn runaway_recursion_overflows_the_call_stack() {
    let source = "module app { pub int down(int n) { return down(n + 1); } }";
    let err = run_err(source, "app.down", &[ByteCodeValue::Int(0)]);
    assert!(matches!(
        err,
        PipelineError::Vm(VmError::Runtime {
            fault: Fault::StackOverflow(_),
            ..
        })
    ));
}

#[test]
fn host_arguments_widen_to_the_declared_parameter() {
    let source = "module app { pub double half(double v) { return v / 2.0; } }";
    assert_eq!(
        run(source, "app.half", &[ByteCodeValue::Int(3)]),
        Some(ByteCodeValue::Double(1.5))
    );
}

#[test]
fn unknown_host_calls_are_reported() {
    let err = run_err("module app { pub int f() { return 1; } }", "app.g", &[]);
    assert!(matches!(err, PipelineError::Vm(VmError::UnknownFunction { .. })));
}

#[test]
fn native_results_must_match_the_declared_return_type() {
    let mut registry = NativeRegistry::with_builtins();
    registry
        .register("host.Clock", "ticks", &[], "int", |_| {
            Ok(Some(ByteCodeValue::String("oops".into())))
        })
        .expect("register ticks");
    registry
        .register("host.Clock", "silent", &[], "int", |_| Ok(None))
        .expect("register silent");
    let source = "module app {
        native(\"host.Clock\") int ticks();
        native(\"host.Clock\") int silent();
        pub int read() { return ticks(); }
        pub int quiet() { return silent(); }
    }";
    let mut vm = Pipeline::default().load(source, registry).expect("load");

    for function in ["app.read", "app.quiet"] {
        let err = vm.invoke(function, &[]).expect_err("mismatched native result");
        assert!(
            matches!(
                err.fault(),
                Some(Fault::Native {
                    source: NativeError::ReturnType { .. },
                    ..
                })
            ),
            "{function} returned {err:?}"
        );
    }
}

#[test]
fn enum_overloads_resolve_by_member_range_or_declared_types() {
    let source = "module app {
        enum Pair { Left, Right }
        enum Triple { One, Two, Three }
        pub int kind(Pair p) { return 1; }
        pub int kind(Triple t) { return 2; }
    }";
    let mut vm = Pipeline::default()
        .load(source, NativeRegistry::with_builtins())
        .expect("load");

    assert_eq!(
        vm.invoke("app.kind", &[ByteCodeValue::Enum(2)]).expect("only Triple fits"),
        Some(ByteCodeValue::Int(2))
    );
    assert!(matches!(
        vm.invoke("app.kind", &[ByteCodeValue::Enum(0)]),
        Err(VmError::AmbiguousCall { .. })
    ));
    assert_eq!(
        vm.invoke_overload("app.kind", &["app.Pair"], &[ByteCodeValue::Enum(0)])
            .expect("explicit Pair overload"),
        Some(ByteCodeValue::Int(1))
    );
    assert!(matches!(
        vm.invoke_overload("app.kind", &["app.Pair"], &[ByteCodeValue::Enum(2)]),
        Err(VmError::UnknownFunction { .. })
    ));
}

#[test]
fn integer_minimum_literal_executes() {
    let source = "module app { pub int low() { return -2147483648; } }";
    assert_eq!(run(source, "app.low", &[]), Some(ByteCodeValue::Int(i32::MIN)));
}
