use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;
use propstore::context::{AnalysisContext, Config};
use propstore::domains::{JoinSemiLattice, Lattice};
use propstore::error::PhaseError;
use propstore::property::{CycleResolution, KindSpec};
use proptest::prelude::*;
use utils::DiagnosticEmitter;

use super::*;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::program::*;

fn context(threads: usize) -> AnalysisContext {
    AnalysisContext::new(
        Config::default()
            .with_cpu_threads(threads)
            .with_io_threads(1),
    )
    .unwrap()
}

fn parse(source: &str) -> Program {
    let mut diag = DiagnosticEmitter::log_to_buffer();
    let tokens = Lexer::new(source, &mut diag).lex_all();
    let program = Parser::new(tokens, &mut diag).parse();
    program.unwrap_or_else(|| panic!("{}", diag.err_buffer().unwrap()))
}

fn analyze(source: &str, selection: Analyses, threads: usize) -> Vec<String> {
    let ctx = context(threads);
    run_analyses(Arc::new(parse(source)), &ctx, selection)
        .unwrap()
        .lines
}

const POINT: &str = r"class Point {
  field x final;
  field y;
  method <init> { write y; }
  method getX { read x; }
  method setY { write y; }
  method norm { call getX; call Math.sqrt; }
}
class Math { method sqrt { native; } }
";

#[test]
fn point_example() {
    let expected = [
        "Math.sqrt: impure",
        "Point.<init>: impure",
        "Point.getX: pure",
        "Point.norm: impure",
        "Point.setY: impure",
        "Point.x: declared final",
        "Point.y: mutable",
        "Math: immutable",
        "Point: mutable",
    ];
    for threads in [1, 4] {
        assert_eq!(analyze(POINT, Analyses::All, threads), expected);
    }
}

#[test]
fn selection_limits_the_report() {
    assert_eq!(
        analyze(POINT, Analyses::FieldMutability, 2),
        ["Point.x: declared final", "Point.y: mutable"]
    );
    assert_eq!(
        analyze(POINT, Analyses::ClassImmutability, 2),
        ["Math: immutable", "Point: mutable"]
    );
    assert_eq!(analyze(POINT, Analyses::Purity, 2).len(), 5);
}

#[test]
fn reads_and_allocations() {
    let source = r"class Counter {
  field count;
  field limit;
  method <init> { write count; write limit; }
  method get { read count; }
  method getLimit { read limit; }
  method increment { read count; write count; }
  method make { alloc; call getLimit; }
  method twice { call getLimit; call getLimit; read limit; }
}";
    assert_eq!(
        analyze(source, Analyses::Purity, 2),
        [
            "Counter.<init>: impure",
            "Counter.get: side-effect free",
            "Counter.getLimit: pure",
            "Counter.increment: impure",
            "Counter.make: side-effect free",
            "Counter.twice: pure",
        ]
    );
}

#[test]
fn recursion_is_resolved_optimistically() {
    let source = r"class Parity {
  field base final;
  field cache;
  method isEven { call isOdd; read base; }
  method isOdd { call isEven; }
  method fact { call fact; }
  method lookup { call peek; }
  method peek { call lookup; read cache; }
  method store { write cache; }
}";
    assert_eq!(
        analyze(source, Analyses::Purity, 3),
        [
            "Parity.fact: pure",
            "Parity.isEven: pure (cycle)",
            "Parity.isOdd: pure (cycle)",
            "Parity.lookup: side-effect free (cycle)",
            "Parity.peek: side-effect free (cycle)",
            "Parity.store: impure",
        ]
    );
}

#[test]
fn impure_callee_breaks_the_cycle() {
    let source = r"class Log {
  method a { call b; }
  method b { call c; }
  method c { call a; native; }
}";
    assert_eq!(
        analyze(source, Analyses::Purity, 2),
        ["Log.a: impure", "Log.b: impure", "Log.c: impure"]
    );
}

#[test]
fn effectively_final_fields() {
    let source = r"class Base {
  field shared;
  field name;
  field id final;
  method <init> { write name; }
}
class Derived extends Base {
  field own;
  method <init> { write own; write Base.shared; }
}
class Empty {}
";
    assert_eq!(
        analyze(source, Analyses::FieldMutability, 2),
        [
            "Base.id: declared final",
            "Base.name: effectively final",
            "Base.shared: mutable",
            "Derived.own: effectively final",
        ]
    );
}

#[test]
fn class_immutability_follows_references() {
    let source = r"class Node {
  field value final;
  field next: Node final;
}
class Holder { field list: Node final; }
class A { field b: B final; }
class B { field a: A final; }
class Box { field content: A final; }
class Cell { field value; method set { write value; } }
class Wrapper { field cell: Cell final; }
class SubNode extends Node {}
class SubCell extends Cell {}
";
    assert_eq!(
        analyze(source, Analyses::ClassImmutability, 3),
        [
            "A: mutable (cycle)",
            "B: mutable (cycle)",
            "Box: mutable",
            "Cell: mutable",
            "Holder: immutable",
            "Node: immutable",
            "SubCell: mutable",
            "SubNode: immutable",
            "Wrapper: mutable",
        ]
    );
}

/// Delegates to a program, but cannot describe one method.
struct BrokenFacts {
    program: Program,
    broken: MethodId,
}

impl FactSource for BrokenFacts {
    fn classes(&self) -> Vec<ClassId> {
        self.program.classes()
    }
    fn methods(&self) -> Vec<MethodId> {
        self.program.methods()
    }
    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.program.superclass(class)
    }
    fn fields_of(&self, class: ClassId) -> &[FieldId] {
        self.program.fields_of(class)
    }
    fn field_class(&self, field: FieldId) -> ClassId {
        self.program.field_class(field)
    }
    fn is_declared_final(&self, field: FieldId) -> bool {
        self.program.is_declared_final(field)
    }
    fn field_type(&self, field: FieldId) -> Option<ClassId> {
        self.program.field_type(field)
    }
    fn writers_of(&self, field: FieldId) -> &[MethodId] {
        self.program.writers_of(field)
    }
    fn method_class(&self, method: MethodId) -> ClassId {
        self.program.method_class(method)
    }
    fn is_constructor(&self, method: MethodId) -> bool {
        self.program.is_constructor(method)
    }
    fn statements(&self, method: MethodId) -> &[Statement] {
        if method == self.broken {
            panic!("no bytecode for {method:?}");
        }
        self.program.statements(method)
    }
    fn describe(&self, entity: Entity) -> String {
        self.program.describe(entity)
    }
}

#[test]
fn failing_fact_source_fails_the_phase() {
    let program = parse(POINT);
    let broken = program.find_method("Point", "getX").unwrap();
    let ctx = context(2);
    let err = run_analyses(
        Arc::new(BrokenFacts { program, broken }),
        &ctx,
        Analyses::All,
    )
    .unwrap_err();

    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entity, Entity::Method(broken));
    assert_eq!(failures[0].kind, "purity");
    assert!(failures[0].cause.to_string().contains("no bytecode"));
}

#[test]
fn interrupted_run() {
    let ctx = context(2).with_interrupt_check(|| true);
    let err = run_analyses(Arc::new(parse(POINT)), &ctx, Analyses::All).unwrap_err();
    assert!(matches!(err, PhaseError::Interrupted { .. }), "{err:?}");
}

#[test]
fn kinds_are_registered_once() {
    let ctx = context(1);
    let mut store = new_store(&ctx).unwrap();
    assert_eq!(store.kind_name(PropertyKind::Purity), Some("purity"));
    assert!(
        store
            .register_kind(KindSpec::new(
                "purity again",
                Property::Purity(Purity::Impure),
                CycleResolution::Fallback,
            ))
            .is_err()
    );
}

#[test]
fn property_order() {
    let pure = Property::Purity(Purity::Pure);
    let impure = Property::Purity(Purity::Impure);
    let mutable = Property::FieldMutability(FieldMutability::Mutable);
    assert!(pure < impure);
    assert_eq!(pure.partial_cmp(&mutable), None);
    assert_eq!(
        Purity::SideEffectFree.join(&Purity::Pure, &()),
        Purity::SideEffectFree
    );
    assert_eq!(
        FieldMutability::bottom(&()),
        FieldMutability::DeclaredFinal
    );
    assert_eq!(ClassImmutability::top(&()), ClassImmutability::Mutable);
    assert_eq!(
        Purity::SideEffectFree.meet(&Purity::Impure, &()),
        Purity::SideEffectFree
    );
}

/// Reference results computed directly on the program, without the store.
struct Reference<'p> {
    program: &'p Program,
}

impl Reference<'_> {
    fn mutability(&self, field: FieldId) -> FieldMutability {
        let facts = self.program;
        if facts.is_declared_final(field) {
            return FieldMutability::DeclaredFinal;
        }
        let owner = facts.field_class(field);
        if facts
            .writers_of(field)
            .iter()
            .all(|&m| facts.is_constructor(m) && facts.method_class(m) == owner)
        {
            FieldMutability::EffectivelyFinal
        } else {
            FieldMutability::Mutable
        }
    }

    fn own_effect(&self, method: MethodId) -> Purity {
        self.program
            .statements(method)
            .iter()
            .map(|stmt| match *stmt {
                Statement::Write(_) | Statement::Native => Purity::Impure,
                Statement::Alloc => Purity::SideEffectFree,
                Statement::Read(field) if self.mutability(field) == FieldMutability::Mutable => {
                    Purity::SideEffectFree
                }
                Statement::Read(_) | Statement::Call(_) => Purity::Pure,
            })
            .max()
            .unwrap_or(Purity::Pure)
    }

    /// The least pure own effect of everything reachable through calls.
    fn purity(&self, method: MethodId) -> Purity {
        let mut seen = HashSet::from([method]);
        let mut stack = vec![method];
        let mut purity = Purity::Pure;
        while let Some(current) = stack.pop() {
            purity = purity.max(self.own_effect(current));
            for stmt in self.program.statements(current) {
                if let Statement::Call(callee) = *stmt {
                    if seen.insert(callee) {
                        stack.push(callee);
                    }
                }
            }
        }
        purity
    }
}

fn program_strategy() -> impl Strategy<Value = Program> {
    (1usize..4, 0usize..6, 1usize..10).prop_flat_map(|(classes, fields, methods)| {
        let field_defs = prop::collection::vec((0..classes, any::<bool>()), fields);
        let statement = prop_oneof![
            Just(None),
            Just(Some(Statement::Native)),
            Just(Some(Statement::Alloc)),
            (0..methods).prop_map(|m| Some(Statement::Call(MethodId(m)))),
            (0..fields.max(1), any::<bool>()).prop_map(move |(f, write)| {
                (fields > 0).then(|| {
                    if write {
                        Statement::Write(FieldId(f))
                    } else {
                        Statement::Read(FieldId(f))
                    }
                })
            }),
        ];
        let method_defs = prop::collection::vec(
            (
                0..classes,
                any::<bool>(),
                prop::collection::vec(statement, 0..4),
            ),
            methods,
        );
        (field_defs, method_defs).prop_map(move |(field_defs, method_defs)| {
            let mut class_list: Vec<Class> = (0..classes)
                .map(|i| Class {
                    name: format!("C{i}"),
                    superclass: None,
                    fields: Vec::new(),
                    methods: Vec::new(),
                })
                .collect();
            let fields: Vec<Field> = field_defs
                .into_iter()
                .enumerate()
                .map(|(i, (class, declared_final))| {
                    class_list[class].fields.push(FieldId(i));
                    Field {
                        name: format!("f{i}"),
                        class: ClassId(class),
                        declared_final,
                        ty: None,
                    }
                })
                .collect();
            let methods: Vec<Method> = method_defs
                .into_iter()
                .enumerate()
                .map(|(i, (class, constructor, body))| {
                    class_list[class].methods.push(MethodId(i));
                    Method {
                        name: if constructor {
                            "<init>".to_owned()
                        } else {
                            format!("m{i}")
                        },
                        class: ClassId(class),
                        body: body.into_iter().flatten().collect(),
                    }
                })
                .collect();
            Program::new(class_list, fields, methods)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_programs_match_reference(program in program_strategy()) {
        let reference = Reference { program: &program };
        let expected: Vec<String> = program
            .methods()
            .into_iter()
            .map(|m| format!("{}: {}", program.describe(Entity::Method(m)), reference.purity(m)))
            .sorted()
            .collect();

        let facts: Arc<dyn FactSource> = Arc::new(program.clone());
        for threads in [1, 3] {
            let ctx = context(threads);
            let lines: Vec<String> = run_analyses(Arc::clone(&facts), &ctx, Analyses::Purity)
                .unwrap()
                .lines
                .into_iter()
                .map(|line| line.trim_end_matches(" (cycle)").to_owned())
                .collect();
            prop_assert_eq!(&lines, &expected);
        }
    }
}
