// MibScript front-end tests: tokenizer counts, precedence, type inference
// and the semantic rules reported as diagnostics

use mibscript::ast::{Ast, NodeId, NodeType};
use mibscript::diagnostics::Diagnostic;
use mibscript::errors::ScriptError;
use mibscript::parser::ParseOutput;
use mibscript::pipeline::Pipeline;
use mibscript::tokenizer;
use mibscript::types::Datatype;

fn parse_user(source: &str) -> Result<ParseOutput, Vec<Diagnostic>> {
    Pipeline::without_stdlib()
        .parse(source)
        .map_err(|err| err.diagnostics().to_vec())
}

fn messages(source: &str) -> Vec<String> {
    match parse_user(source) {
        Ok(_) => panic!("expected diagnostics for:\n{source}"),
        Err(entries) => entries.into_iter().map(|entry| entry.message).collect(),
    }
}

fn assert_rejected(source: &str, needle: &str) {
    let found = messages(source);
    assert!(
        found.iter().any(|message| message.contains(needle)),
        "expected a diagnostic containing {needle:?}, got {found:?}"
    );
}

fn find_node(ast: &Ast, kind: NodeType) -> Option<NodeId> {
    (0..ast.len()).find(|&id| ast.kind(id) == kind)
}

#[test]
fn statement_token_counts() {
    assert_eq!(tokenizer::tokenize("int x = 1 + 2 * 3;").len(), 9);
    assert_eq!(tokenizer::tokenize("pub int x = 1 + 2 * 3;").len(), 10);
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let parsed = parse_user("module app { int x = 1 + 2 * 3; }").expect("parse");
    let ast = &parsed.ast;
    let definition = find_node(ast, NodeType::VariableDefinition).expect("definition");
    assert_eq!(ast.node(definition).resolved.as_deref(), Some("app.x"));

    let add = ast.child(definition, 0).expect("initializer");
    assert_eq!(ast.kind(add), NodeType::Add);
    let left = ast.child(add, 0).expect("left operand");
    let right = ast.child(add, 1).expect("right operand");
    assert_eq!(ast.kind(left), NodeType::IntLiteral);
    assert_eq!(ast.kind(right), NodeType::Multiply);
}

#[test]
fn binary_expressions_take_the_heavier_type() {
    let parsed = parse_user("module app { double d = 1 + 2.5; long l = 3 * 4L; }").expect("parse");
    let ast = &parsed.ast;
    let add = find_node(ast, NodeType::Add).expect("add");
    assert_eq!(ast.datatype(add), Some(&Datatype::DOUBLE));
    let multiply = find_node(ast, NodeType::Multiply).expect("multiply");
    assert_eq!(ast.datatype(multiply), Some(&Datatype::LONG));
}

#[test]
fn comparisons_are_bool() {
    let parsed = parse_user("module app { bool b = 1 < 2L; }").expect("parse");
    let less = find_node(&parsed.ast, NodeType::Less).expect("less");
    assert_eq!(parsed.ast.datatype(less), Some(&Datatype::BOOL));
}

#[test]
fn widening_initializers_get_a_cast() {
    let parsed = parse_user("module app { double d = 2; }").expect("parse");
    let ast = &parsed.ast;
    let definition = find_node(ast, NodeType::VariableDefinition).expect("definition");
    let value = ast.child(definition, 0).expect("initializer");
    assert_eq!(ast.kind(value), NodeType::Cast);
    assert_eq!(ast.datatype(value), Some(&Datatype::DOUBLE));
}

#[test]
fn narrowing_requires_an_explicit_cast() {
    assert_rejected("module app { int i = 2.5; }", "initializer expects 'int', found 'double'");
    parse_user("module app { int i = (int) 2.5; }").expect("explicit cast");
}

#[test]
fn constant_assigned_in_both_branches_is_accepted() {
    parse_user(
        "module app {
            int pick(bool c) {
                int i;
                if (c) { i = 1; } else { i = 2; }
                return i;
            }
        }",
    )
    .expect("if/else assignment of a constant");
}

#[test]
fn constant_assigned_twice_is_rejected() {
    assert_rejected(
        "module app { void f() { int i; i = 5; i = 6; } }",
        "cannot assign twice to constant 'i'",
    );
}

#[test]
fn constant_assigned_inside_a_loop_is_rejected() {
    assert_rejected(
        "module app { void f() { int k; while (true) { k = 1; } } }",
        "'k'",
    );
}

#[test]
fn constant_assigned_in_a_loop_inside_else_is_rejected() {
    assert_rejected(
        "module app {
            int f(bool c) {
                int x;
                if (c) { x = 1; } else {
                    mut int n = 0;
                    while (n < 3) { x = n; n += 1; }
                }
                return x;
            }
        }",
        "constant 'x' is declared outside this loop",
    );
}

#[test]
fn for_initializer_runs_outside_the_loop() {
    parse_user(
        "module app {
            int f() {
                int x;
                for (x = 1; false; ) { }
                return x;
            }
        }",
    )
    .expect("constant assigned by the for initializer");
    parse_user(
        "module app {
            int g() {
                mut int sum = 0;
                for (mut int i = 0; i < 2; i += 1) { sum += i; }
                for (mut int i = 0; i < 3; i += 1) { sum += i; }
                return sum;
            }
        }",
    )
    .expect("loop variables end with their loop");
}

#[test]
fn negative_literals_reach_the_type_minimum() {
    parse_user("module app { int low = -2147483648; long lower = -9223372036854775808L; }")
        .expect("minimum literals");
    assert_rejected(
        "module app { int low = -2147483649; }",
        "literal '-2147483649' is out of range for 'int'",
    );
}

#[test]
fn mutable_locals_can_be_reassigned() {
    parse_user("module app { int f() { mut int i = 0; i = 5; i += 1; return i; } }")
        .expect("mutable reassignment");
}

#[test]
fn constant_globals_must_be_initialized() {
    assert_rejected("module app { int x; }", "constant global 'x' must be initialized");
    parse_user("module app { mut int x; }").expect("mutable global without initializer");
}

#[test]
fn constant_globals_cannot_be_assigned() {
    assert_rejected(
        "module app { int x = 1; void f() { x = 2; } }",
        "cannot assign to constant global 'app.x'",
    );
}

#[test]
fn shadowing_is_rejected() {
    assert_rejected(
        "module app { void f() { int a = 1; { int a = 2; } } }",
        "variable 'a' is already defined",
    );
}

#[test]
fn empty_enum_is_rejected() {
    assert_rejected(
        "module app { enum Empty { } }",
        "enum 'Empty' must declare at least one member",
    );
}

#[test]
fn unknown_enum_member_is_rejected() {
    assert_rejected(
        "module app { enum Color { Red, Green } Color c = Color::Purple; }",
        "enum 'app.Color' has no member 'Purple'",
    );
}

#[test]
fn missing_return_is_rejected() {
    assert_rejected(
        "module app { int f(bool c) { if (c) { return 1; } } }",
        "function 'f' does not return a value on every path",
    );
}

#[test]
fn returns_in_both_branches_cover_every_path() {
    parse_user("module app { int f(bool c) { if (c) { return 1; } else { return 2; } } }")
        .expect("both branches return");
}

#[test]
fn statements_after_return_are_unreachable() {
    assert_rejected(
        "module app { int f() { return 1; int dead = 2; } }",
        "unreachable statement after return",
    );
}

#[test]
fn unknown_call_names_function_and_argument_types() {
    let found = messages("module app { void f() { foo(1, 2); } }");
    assert!(
        found
            .iter()
            .any(|message| message.contains("foo") && message.contains("(int, int)")),
        "{found:?}"
    );
}

#[test]
fn calls_may_precede_definitions() {
    parse_user(
        "module app {
            int first() { return second(1); }
            int second(int v) { return v; }
        }",
    )
    .expect("forward call");
}

#[test]
fn private_functions_are_hidden_from_other_modules() {
    assert_rejected(
        "module lib { int secret() { return 1; } }
         module app { int f() { return lib.secret(); } }",
        "function 'lib.secret' is private to its module",
    );
}

#[test]
fn top_level_accepts_only_modules_and_usings() {
    assert_rejected("int x = 1;", "expected 'module' or 'using' at top level");
}

#[test]
fn void_calls_cannot_be_values() {
    assert_rejected(
        "module app { void g() { } int f() { return g(); } }",
        "void function 'app.g' cannot be used as a value",
    );
}

#[test]
fn null_has_no_runtime_value() {
    assert_rejected("module app { int f() { return null; } }", "'null' has no runtime value");
}

#[test]
fn user_diagnostics_report_user_relative_lines() {
    let err = Pipeline::default()
        .parse("module app {\n    void f() {\n        missing = 1;\n    }\n}\n")
        .expect_err("unknown identifier");
    let diagnostic = err
        .diagnostics()
        .iter()
        .find(|entry| entry.message.contains("missing"))
        .expect("diagnostic for 'missing'");
    assert_eq!(diagnostic.line, 3);
    assert!(!diagnostic.in_stdlib);
    assert!(diagnostic.absolute_line > diagnostic.line);
}

#[test]
fn misspelled_names_get_a_suggestion() {
    let found = parse_user("module app { int total = 1; int f() { return totl; } }")
        .expect_err("misspelled");
    let diagnostic = found
        .iter()
        .find(|entry| entry.message.contains("totl"))
        .expect("diagnostic");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("total"));
}

#[test]
fn front_end_errors_map_to_their_codes() {
    let err = Pipeline::without_stdlib()
        .parse("module app { int x = 1 }")
        .expect_err("missing semicolon");
    let script: ScriptError = err.into();
    assert_eq!(script.code_str(), "E002");

    let err = Pipeline::without_stdlib()
        .parse("module app { void f() { int i; i = 1; i = 2; } }")
        .expect_err("constant reassignment");
    let script: ScriptError = err.into();
    assert_eq!(script.code_str(), "E003");
}
