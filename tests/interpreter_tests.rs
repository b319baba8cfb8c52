// Integration tests driving the interpreter end to end: a fresh `Vm` per
// test, feeding it whole programs through `interpret`, exercising the
// scenarios and boundary behaviours the compiler/VM/GC need to agree on.
//
// Assertions check both the `InterpretResult` and, where the program prints
// something, the exact captured text — a wrong jump patch or a broken
// `format_number` would still return `Ok` but print the wrong value, so the
// result code alone doesn't prove correctness.

use tallow::vm::{InterpretResult, Vm};

fn run(source: &str) -> (InterpretResult, String) {
    let mut vm = Vm::new();
    vm.capture_output();
    let result = vm.interpret(source);
    (result, vm.take_output())
}

fn run_with_diagnostics(source: &str) -> (InterpretResult, Vec<String>) {
    let mut vm = Vm::new();
    let result = vm.interpret(source);
    (result, vm.diagnostics().to_vec())
}

// --- the six end-to-end scenarios ---------------------------------------

#[test]
fn arithmetic_and_precedence() {
    let (result, output) = run("print 1 + 2 * 3 - 4 / 2;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "7\n");
}

#[test]
fn string_concatenation_and_equality() {
    let (result, output) = run(r#"
        var a = "hi";
        var b = " there";
        print a + b;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "hi there\n");
}

#[test]
fn closures_capture_and_mutate_shared_upvalues() {
    let (result, output) = run(r#"
        fun make() {
            var x = 0;
            fun inc() {
                x = x + 1;
                return x;
            }
            return inc;
        }
        var c = make();
        print c();
        print c();
        print c();
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn init_method_and_field_access_via_this() {
    let (result, output) = run(r#"
        class Greeter {
            init(name) {
                this.name = name;
            }
            hello() {
                print "Hi, " + this.name;
            }
        }
        Greeter("world").hello();
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "Hi, world\n");
}

#[test]
fn while_loop_accumulates_a_sum() {
    let (result, output) = run(r#"
        var i = 0;
        var s = 0;
        while (i < 5) {
            s = s + i;
            i = i + 1;
        }
        print s;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "10\n");
}

#[test]
fn function_identity_is_preserved_across_calls() {
    let (result, output) = run(r#"
        fun f() { return f; }
        print f() == f;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "true\n");
}

// --- other functional coverage ------------------------------------------

#[test]
fn global_and_local_variables_shadow_correctly() {
    let (result, output) = run(r#"
        var x = 10;
        {
            var x = 20;
            print x;
        }
        print x;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "20\n10\n");
}

#[test]
fn control_flow_if_else_and_loops() {
    let (result, output) = run(r#"
        var total = 0;
        for (var i = 0; i < 10; i = i + 1) {
            if (i == 5) {
                total = total + 100;
            } else {
                total = total + i;
            }
        }
        print total;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    // 0+1+2+3+4 + 100 + 6+7+8+9 = 10 + 100 + 30 = 140
    assert_eq!(output, "140\n");
}

#[test]
fn recursive_function() {
    let (result, output) = run(r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "55\n");
}

#[test]
fn bound_methods_survive_outside_the_instance_expression() {
    let (result, output) = run(r#"
        class Greeter {
            init(name) {
                this.name = name;
            }
            greet() {
                return "hello " + this.name;
            }
        }
        var g = Greeter("ruff");
        var method = g.greet;
        print method();
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "hello ruff\n");
}

#[test]
fn fields_can_be_added_and_overwritten_on_instances() {
    let (result, output) = run(r#"
        class Box {}
        var b = Box();
        b.value = 1;
        b.value = b.value + 1;
        print b.value;
    "#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "2\n");
}

// --- error conditions -----------------------------------------------------

#[test]
fn undefined_global_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics("print undefined_name;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(
        diagnostics[0],
        "Undefined variable 'undefined_name'.\n[line 1] in script"
    );
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics("var x = 1; x();");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(diagnostics[0], "Can only call functions and classes.\n[line 1] in script");
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics(r#"
        fun f(a, b) { return a + b; }
        f(1);
    "#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(diagnostics[0].starts_with("Expected 2 arguments but got 1."));
}

#[test]
fn adding_a_number_to_a_string_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics(r#"print 1 + "one";"#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(diagnostics[0].starts_with("Operands must be two numbers or two strings."));
}

#[test]
fn unterminated_string_is_a_compile_error() {
    assert_eq!(run("print \"unterminated;").0, InterpretResult::CompileError);
}

#[test]
fn syntax_error_is_a_compile_error() {
    assert_eq!(run("var = ;").0, InterpretResult::CompileError);
}

#[test]
fn accessing_a_property_on_a_non_instance_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics("var x = 1; print x.y;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(diagnostics[0].starts_with("Only instances have properties."));
}

#[test]
fn undefined_property_is_a_runtime_error() {
    let (result, diagnostics) = run_with_diagnostics(r#"
        class Empty {}
        var e = Empty();
        print e.missing;
    "#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(diagnostics[0].starts_with("Undefined property 'missing'."));
}

#[test]
fn returning_a_value_from_an_initializer_is_a_compile_error() {
    assert_eq!(
        run(r#"
            class C {
                init() {
                    return 1;
                }
            }
        "#)
        .0,
        InterpretResult::CompileError
    );
}

#[test]
fn returning_from_top_level_is_a_compile_error() {
    assert_eq!(run("return 1;").0, InterpretResult::CompileError);
}

// --- boundary behaviours --------------------------------------------------

#[test]
fn deep_recursion_overflows_the_call_stack() {
    let (result, diagnostics) = run_with_diagnostics(r#"
        fun recurse(n) {
            return recurse(n + 1);
        }
        recurse(0);
    "#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(diagnostics[0].starts_with("Stack overflow."));
}

#[test]
fn more_than_256_locals_is_a_compile_error() {
    let mut source = String::from("{\n");
    for i in 0..257 {
        source.push_str(&format!("var v{} = {};\n", i, i));
    }
    source.push_str("}\n");
    let (result, diagnostics) = run_with_diagnostics(&source);
    assert_eq!(result, InterpretResult::CompileError);
    assert!(diagnostics.iter().any(|d| d.contains("Too many local variables in function.")));
}

#[test]
fn more_than_255_parameters_is_a_compile_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
    let source = format!("fun f({}) {{}}\n", params.join(", "));
    let (result, diagnostics) = run_with_diagnostics(&source);
    assert_eq!(result, InterpretResult::CompileError);
    assert!(diagnostics.iter().any(|d| d.contains("Can't have more than 255 parameters.")));
}

#[test]
fn more_than_255_arguments_is_a_compile_error() {
    let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
    let source = format!("fun f() {{}}\nf({});\n", args.join(", "));
    let (result, diagnostics) = run_with_diagnostics(&source);
    assert_eq!(result, InterpretResult::CompileError);
    assert!(diagnostics.iter().any(|d| d.contains("Can't have more than 255 arguments.")));
}

#[test]
fn stress_gc_keeps_a_live_program_correct() {
    let mut vm = Vm::new();
    vm.set_stress_gc(true);
    vm.capture_output();
    let source = r#"
        class Node {
            init(value, next) {
                this.value = value;
                this.next = next;
            }
        }
        var list = nil;
        for (var i = 0; i < 200; i = i + 1) {
            list = Node(i, list);
        }
        var sum = 0;
        var node = list;
        while (node != nil) {
            sum = sum + node.value;
            node = node.next;
        }
        print sum;
    "#;
    assert_eq!(vm.interpret(source), InterpretResult::Ok);
    // sum of 0..200 = 199*200/2
    assert_eq!(vm.take_output(), "19900\n");
}

#[test]
fn repl_style_session_persists_globals_across_interpret_calls() {
    let mut vm = Vm::new();
    vm.capture_output();
    assert_eq!(vm.interpret("var counter = 0;"), InterpretResult::Ok);
    assert_eq!(vm.interpret("counter = counter + 1;"), InterpretResult::Ok);
    assert_eq!(vm.interpret("print counter;"), InterpretResult::Ok);
    assert_eq!(vm.take_output(), "1\n");
}

#[test]
fn clock_native_returns_a_number() {
    let (result, output) = run("print clock() >= 0;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "true\n");
}
