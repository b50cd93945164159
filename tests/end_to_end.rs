//! End-to-end scenarios run through the compiled `loxvm` binary, matching
//! the book's own style of testing a Lox implementation by feeding it
//! whole scripts and checking captured stdout/stderr rather than poking at
//! internals.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::str::contains;

fn script_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("loxvm-e2e-{name}-{}.lox", std::process::id()));
    path
}

fn write_script(name: &str, source: &str) -> PathBuf {
    let path = script_path(name);
    fs::write(&path, source).expect("write temp script");
    path
}

#[test]
fn arithmetic_and_precedence() {
    let path = write_script("arith", "print 1 + 2 * 3;\n");
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("7\n");
}

#[test]
fn closure_captures_mutable_local() {
    let source = r#"
        fun makeCounter() {
          var i = 0;
          fun count() { i = i + 1; print i; }
          return count;
        }
        var c = makeCounter();
        c(); c(); c();
    "#;
    let path = write_script("closure", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("1\n2\n3\n");
}

#[test]
fn class_with_init_and_method() {
    let source = r#"
        class Greeter {
          init(name) { this.name = name; }
          hello() { print "hi " + this.name; }
        }
        Greeter("world").hello();
    "#;
    let path = write_script("class", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("hi world\n");
}

#[test]
fn inheritance_and_super() {
    let source = r#"
        class A { speak() { print "A"; } }
        class B < A { speak() { super.speak(); print "B"; } }
        B().speak();
    "#;
    let path = write_script("inherit", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("A\nB\n");
}

#[test]
fn runtime_error_reports_stack_trace() {
    let path = write_script("runtime-error", "fun f() { return 1 + \"x\"; } f();\n");
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(contains("Operands must be two numbers or strings."))
        .stderr(contains("[line 1] in f"))
        .stderr(contains("[line 1] in script"));
}

#[test]
fn compile_error_exits_65() {
    let path = write_script("compile-error", "var;\n");
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .code(65);
}

#[test]
fn gc_stress_keeps_memory_bounded() {
    let source = r#"
        fun makeCounter() {
          var i = 0;
          fun count() { i = i + 1; return i; }
          return count;
        }
        var c = makeCounter();
        var last = 0;
        var n = 0;
        while (n < 2000) {
          var each = makeCounter();
          last = each();
          n = n + 1;
        }
        print c();
    "#;
    let path = write_script("gc-stress", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .args(["--stress-gc"])
        .arg(&path)
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn interned_string_concatenation_is_equal() {
    let source = r#"print ("ab" + "c") == ("a" + "bc");"#;
    let path = write_script("intern-eq", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("true\n");
}

#[test]
fn redeclaring_local_in_same_scope_is_compile_error() {
    let source = "{ var a = 1; var a = 2; }";
    let path = write_script("redeclare-local", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .code(65)
        .stderr(contains("Already a variable with this name in this scope."));
}

#[test]
fn redeclaring_global_reassigns() {
    let source = "var a = 1; var a = 2; print a;";
    let path = write_script("redeclare-global", source);
    Command::cargo_bin("loxvm")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout("2\n");
}
