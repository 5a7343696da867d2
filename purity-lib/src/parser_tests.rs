use super::lexer::*;
use super::parser::*;
use super::program::*;
use utils::DiagnosticEmitter;

fn parse_string(source: &str) -> Result<Program, String> {
    let mut diag = DiagnosticEmitter::log_to_buffer();
    let lexer = Lexer::new(source, &mut diag);
    let tokens = lexer.lex_all();
    if tokens.tokens.is_empty() {
        return Err(diag.out_buffer().unwrap() + &diag.err_buffer().unwrap());
    }
    let parser = Parser::new(tokens, &mut diag);
    let Some(program) = parser.parse() else {
        return Err(diag.out_buffer().unwrap() + &diag.err_buffer().unwrap());
    };
    Ok(program)
}

#[test]
fn parse_empty() {
    let program = parse_string("").unwrap();
    assert!(program.classes().is_empty());
    assert_eq!(print(&program), "");
}

#[test]
fn parse_round_trip() -> Result<(), String> {
    let source = r"class Point {
  field x final;
  field y;
  field origin: Point;
  method <init> { write y; }
  method getX { read x; }
  method setY { write y; }
  method norm { call getX; call Math.sqrt; alloc; }
  method nop {}
}

class Math {
  method sqrt { native; }
}

class Point3D extends Point {
  field z final;
  method getZ { read z; read Point.y; }
}
";
    let program = parse_string(source)?;
    assert_eq!(print(&program), source);
    Ok(())
}

#[test]
fn members_and_facts() -> Result<(), String> {
    let source = r"class Counter {
  field count;
  field limit final;
  method <init> { write count; }
  method increment { read count; write count; }
  method reset { write count; call increment; }
}";
    let program = parse_string(source)?;
    let counter = program.find_class("Counter").unwrap();
    let count = program.find_field("Counter", "count").unwrap();
    let limit = program.find_field("Counter", "limit").unwrap();
    let init = program.find_method("Counter", "<init>").unwrap();
    let increment = program.find_method("Counter", "increment").unwrap();
    let reset = program.find_method("Counter", "reset").unwrap();

    assert_eq!(program.fields_of(counter), &[count, limit]);
    assert!(program.is_declared_final(limit));
    assert!(!program.is_declared_final(count));
    assert_eq!(program.writers_of(count), &[init, increment, reset]);
    assert!(program.writers_of(limit).is_empty());
    assert!(program.is_constructor(init));
    assert!(!program.is_constructor(reset));
    assert_eq!(
        program.statements(reset),
        &[Statement::Write(count), Statement::Call(increment)]
    );
    assert_eq!(program.describe(Entity::Method(increment)), "Counter.increment");
    assert_eq!(program.describe(Entity::Field(limit)), "Counter.limit");
    assert_eq!(program.describe(Entity::Class(counter)), "Counter");
    Ok(())
}

#[test]
fn inherited_members_resolve_through_superclass() -> Result<(), String> {
    let source = r"class Base {
  field shared;
  method helper {}
}
class Derived extends Base {
  method run { read shared; call helper; }
}";
    let program = parse_string(source)?;
    let run = program.find_method("Derived", "run").unwrap();
    let shared = program.find_field("Base", "shared").unwrap();
    let helper = program.find_method("Base", "helper").unwrap();
    assert_eq!(
        program.statements(run),
        &[Statement::Read(shared), Statement::Call(helper)]
    );
    assert_eq!(
        program.superclass(program.find_class("Derived").unwrap()),
        program.find_class("Base")
    );
    Ok(())
}

#[test]
fn forward_references() -> Result<(), String> {
    let source = r"class A { method f { call B.g; } }
class B { method g { call A.f; } }";
    let program = parse_string(source)?;
    let f = program.find_method("A", "f").unwrap();
    let g = program.find_method("B", "g").unwrap();
    assert_eq!(program.statements(f), &[Statement::Call(g)]);
    assert_eq!(program.statements(g), &[Statement::Call(f)]);
    Ok(())
}

#[test]
fn syntax_errors() {
    let cases = [
        ("method m {}", "[line 1] Error at 'method': Class declaration expected.\n"),
        ("class A {", "[line 1] Error at end of file: Field or method declaration expected.\n"),
        ("class A { field x }", "[line 1] Error at '}': ';' expected.\n"),
        ("class A { method m { jump; } }", "[line 1] Error at 'jump': Statement expected.\n"),
        ("class A {\n  method m { read ; }\n}", "[line 2] Error at ';': Identifier expected.\n"),
        ("class A { method m { native } }", "[line 1] Error at '}': ';' expected.\n"),
    ];
    for (source, expected) in cases {
        assert_eq!(parse_string(source).unwrap_err(), expected, "{source}");
    }
}

#[test]
fn resolution_errors() {
    let cases = [
        (
            "class A {}\nclass A {}",
            "[line 2] Error at 'class': Class 'A' is declared twice.\n",
        ),
        (
            "class A { field x; field x; }",
            "[line 1] Error at 'field': Field 'x' is declared twice.\n",
        ),
        (
            "class A { method m {} method m {} }",
            "[line 1] Error at 'method': Method 'm' is declared twice.\n",
        ),
        (
            "class A extends B {}",
            "[line 1] Error at 'B': Unknown class 'B'.\n",
        ),
        (
            "class A extends A {}",
            "[line 1] Error at 'class': Class 'A' cannot extend itself.\n",
        ),
        (
            "class A { field x: Missing; }",
            "[line 1] Error at 'Missing': Unknown class 'Missing'.\n",
        ),
        (
            "class A {\n  method m { read y; }\n}",
            "[line 2] Error at 'y': Unknown field 'y'.\n",
        ),
        (
            "class A {}\nclass B {\n  method m { call A.run; }\n}",
            "[line 3] Error at 'A': Unknown call target 'A.run'.\n",
        ),
        (
            "class A { method m { call Math.sqrt; } }",
            "[line 1] Error at 'Math': Unknown class 'Math'.\n",
        ),
    ];
    for (source, expected) in cases {
        assert_eq!(parse_string(source).unwrap_err(), expected, "{source}");
    }
}
