use std::collections::HashMap;

use utils::DiagnosticEmitter;

use crate::{
    lexer::{Identifier, IdentifierTable, LexResult, Token, TokenValue},
    program::{Class, ClassId, Field, FieldId, Method, MethodId, Program, Statement},
};

use TokenValue::*;

/// `member` or `Class.member`, resolved once every class is known.
#[derive(Clone, Copy, Debug)]
struct Reference {
    token: Token,
    class: Option<Identifier>,
    member: Identifier,
}

#[derive(Clone, Copy, Debug)]
enum RawStatement {
    Read(Reference),
    Write(Reference),
    Call(Reference),
    Native,
    Alloc,
}

#[derive(Debug)]
struct RawField {
    token: Token,
    name: Identifier,
    ty: Option<(Token, Identifier)>,
    declared_final: bool,
}

#[derive(Debug)]
struct RawMethod {
    token: Token,
    name: Identifier,
    body: Vec<RawStatement>,
}

#[derive(Debug)]
struct RawClass {
    token: Token,
    name: Identifier,
    superclass: Option<(Token, Identifier)>,
    fields: Vec<RawField>,
    methods: Vec<RawMethod>,
}

pub struct Parser<'src> {
    current_tok: usize,
    tokens: Vec<Token>,
    identifiers: IdentifierTable,
    diag: &'src mut DiagnosticEmitter,
}

impl<'src> Parser<'src> {
    pub fn new(lexed: LexResult, diag: &'src mut DiagnosticEmitter) -> Self {
        let LexResult {
            tokens,
            identifiers,
        } = lexed;

        Parser {
            current_tok: 0,
            tokens,
            identifiers,
            diag,
        }
    }

    pub fn parse(mut self) -> Option<Program> {
        let mut classes = Vec::new();
        while !self.is_at_end() {
            classes.push(self.parse_class()?);
        }
        self.resolve(&classes)
    }

    fn parse_class(&mut self) -> Option<RawClass> {
        let token = self.consume(Class, "Class declaration expected.")?;
        let (_, name) = self.consume_identifier()?;
        let mut superclass = None;
        if self.try_consume(Extends).is_some() {
            superclass = Some(self.consume_identifier()?);
        }
        self.consume(LeftBrace, "")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(RightBrace) {
            if let Some(token) = self.try_consume(Field) {
                fields.push(self.parse_field(token)?);
            } else if let Some(token) = self.try_consume(Method) {
                methods.push(self.parse_method(token)?);
            } else {
                self.error(self.peek(), "Field or method declaration expected.");
                return None;
            }
        }
        self.consume(RightBrace, "")?;

        Some(RawClass {
            token,
            name,
            superclass,
            fields,
            methods,
        })
    }

    fn parse_field(&mut self, token: Token) -> Option<RawField> {
        let (_, name) = self.consume_identifier()?;
        let mut ty = None;
        if self.try_consume(Colon).is_some() {
            ty = Some(self.consume_identifier()?);
        }
        let declared_final = self.try_consume(Final).is_some();
        self.consume(Semicolon, "")?;
        Some(RawField {
            token,
            name,
            ty,
            declared_final,
        })
    }

    fn parse_method(&mut self, token: Token) -> Option<RawMethod> {
        let (_, name) = self.consume_identifier()?;
        self.consume(LeftBrace, "")?;
        let mut body = Vec::new();
        while !self.check(RightBrace) {
            body.push(self.parse_statement()?);
        }
        self.consume(RightBrace, "")?;
        Some(RawMethod { token, name, body })
    }

    fn parse_statement(&mut self) -> Option<RawStatement> {
        let stmt = if self.try_consume(Native).is_some() {
            RawStatement::Native
        } else if self.try_consume(Alloc).is_some() {
            RawStatement::Alloc
        } else if self.try_consume(Read).is_some() {
            RawStatement::Read(self.parse_reference()?)
        } else if self.try_consume(Write).is_some() {
            RawStatement::Write(self.parse_reference()?)
        } else if self.try_consume(Call).is_some() {
            RawStatement::Call(self.parse_reference()?)
        } else {
            self.error(self.peek(), "Statement expected.");
            return None;
        };
        self.consume(Semicolon, "")?;
        Some(stmt)
    }

    fn parse_reference(&mut self) -> Option<Reference> {
        let (token, first) = self.consume_identifier()?;
        if self.try_consume(Dot).is_some() {
            let (_, member) = self.consume_identifier()?;
            return Some(Reference {
                token,
                class: Some(first),
                member,
            });
        }
        Some(Reference {
            token,
            class: None,
            member: first,
        })
    }

    fn resolve(&mut self, raw: &[RawClass]) -> Option<Program> {
        let mut class_ids = HashMap::new();
        for (id, class) in raw.iter().enumerate() {
            if class_ids.insert(class.name, ClassId(id)).is_some() {
                let msg = format!("Class '{}' is declared twice.", self.name(class.name));
                self.error(class.token, &msg);
                return None;
            }
        }

        let mut classes = Vec::with_capacity(raw.len());
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut field_ids: Vec<HashMap<Identifier, FieldId>> = Vec::with_capacity(raw.len());
        let mut method_ids: Vec<HashMap<Identifier, MethodId>> = Vec::with_capacity(raw.len());
        for (id, class) in raw.iter().enumerate() {
            let owner = ClassId(id);
            let superclass = match class.superclass {
                Some((token, name)) => Some(self.class_id(&class_ids, token, name)?),
                None => None,
            };
            if superclass == Some(owner) {
                let msg = format!("Class '{}' cannot extend itself.", self.name(class.name));
                self.error(class.token, &msg);
                return None;
            }

            let mut own_fields = HashMap::new();
            for field in &class.fields {
                let field_id = FieldId(fields.len());
                if own_fields.insert(field.name, field_id).is_some() {
                    let msg = format!("Field '{}' is declared twice.", self.name(field.name));
                    self.error(field.token, &msg);
                    return None;
                }
                let ty = match field.ty {
                    Some((token, name)) => Some(self.class_id(&class_ids, token, name)?),
                    None => None,
                };
                fields.push(Field {
                    name: self.name(field.name).to_owned(),
                    class: owner,
                    declared_final: field.declared_final,
                    ty,
                });
            }

            let mut own_methods = HashMap::new();
            for method in &class.methods {
                let method_id = MethodId(methods.len());
                if own_methods.insert(method.name, method_id).is_some() {
                    let msg = format!("Method '{}' is declared twice.", self.name(method.name));
                    self.error(method.token, &msg);
                    return None;
                }
                // Bodies are filled in once every member has an id.
                methods.push(Method {
                    name: self.name(method.name).to_owned(),
                    class: owner,
                    body: Vec::new(),
                });
            }

            classes.push(Class {
                name: self.name(class.name).to_owned(),
                superclass,
                fields: own_fields.values().copied().collect(),
                methods: own_methods.values().copied().collect(),
            });
            field_ids.push(own_fields);
            method_ids.push(own_methods);
        }
        for class in &mut classes {
            class.fields.sort();
            class.methods.sort();
        }

        let members = Members {
            classes: &classes,
            class_ids: &class_ids,
            field_ids: &field_ids,
            method_ids: &method_ids,
        };
        let mut next_method = 0;
        for (id, class) in raw.iter().enumerate() {
            for method in &class.methods {
                let mut body = Vec::with_capacity(method.body.len());
                for stmt in &method.body {
                    let resolved = match *stmt {
                        RawStatement::Native => Statement::Native,
                        RawStatement::Alloc => Statement::Alloc,
                        RawStatement::Read(r) => {
                            Statement::Read(self.field_ref(&members, ClassId(id), r)?)
                        }
                        RawStatement::Write(r) => {
                            Statement::Write(self.field_ref(&members, ClassId(id), r)?)
                        }
                        RawStatement::Call(r) => {
                            Statement::Call(self.method_ref(&members, ClassId(id), r)?)
                        }
                    };
                    body.push(resolved);
                }
                methods[next_method].body = body;
                next_method += 1;
            }
        }

        Some(Program::new(classes, fields, methods))
    }

    fn class_id(
        &mut self,
        class_ids: &HashMap<Identifier, ClassId>,
        token: Token,
        name: Identifier,
    ) -> Option<ClassId> {
        if let Some(id) = class_ids.get(&name) {
            return Some(*id);
        }
        let msg = format!("Unknown class '{}'.", self.name(name));
        self.error(token, &msg);
        None
    }

    fn field_ref(&mut self, members: &Members, owner: ClassId, r: Reference) -> Option<FieldId> {
        let class = match r.class {
            Some(name) => self.class_id(members.class_ids, r.token, name)?,
            None => owner,
        };
        let found = members.lookup(class, |c| members.field_ids[c.0].get(&r.member).copied());
        if let Some(id) = found {
            return Some(id);
        }
        let msg = format!("Unknown field '{}'.", self.reference_name(r));
        self.error(r.token, &msg);
        None
    }

    fn method_ref(&mut self, members: &Members, owner: ClassId, r: Reference) -> Option<MethodId> {
        let class = match r.class {
            Some(name) => self.class_id(members.class_ids, r.token, name)?,
            None => owner,
        };
        let found = members.lookup(class, |c| members.method_ids[c.0].get(&r.member).copied());
        if let Some(id) = found {
            return Some(id);
        }
        let msg = format!("Unknown call target '{}'.", self.reference_name(r));
        self.error(r.token, &msg);
        None
    }

    fn reference_name(&self, r: Reference) -> String {
        match r.class {
            Some(class) => format!("{}.{}", self.name(class), self.name(r.member)),
            None => self.name(r.member).to_owned(),
        }
    }

    fn name(&self, id: Identifier) -> &str {
        self.identifiers.get_name(id)
    }

    fn peek(&self) -> Token {
        self.tokens[self.current_tok]
    }

    fn previous(&self) -> Token {
        self.tokens[self.current_tok - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().value, EndOfFile)
    }

    fn check(&self, tok_val: TokenValue) -> bool {
        if self.is_at_end() {
            false
        } else {
            core::mem::discriminant(&self.peek().value) == core::mem::discriminant(&tok_val)
        }
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current_tok += 1;
        }
        self.previous()
    }

    fn consume(&mut self, tok_val: TokenValue, s: &str) -> Option<Token> {
        if self.check(tok_val) {
            return Some(self.advance());
        }
        let msg = if s.is_empty() {
            format!("'{tok_val}' expected.")
        } else {
            s.to_owned()
        };
        self.error(self.peek(), &msg);
        None
    }

    fn consume_identifier(&mut self) -> Option<(Token, Identifier)> {
        if let Id(id) = self.peek().value {
            let token = self.advance();
            return Some((token, id));
        }
        self.error(self.peek(), "Identifier expected.");
        None
    }

    fn try_consume(&mut self, tok_val: TokenValue) -> Option<Token> {
        if self.check(tok_val) {
            return Some(self.advance());
        }
        None
    }

    fn error(&mut self, tok: Token, s: &str) {
        match tok.value {
            Id(id) => {
                let item = format!("at '{}'", self.identifiers.get_name(id));
                self.diag.report(tok.line_num.0, &item, s);
            }
            _ => tok.error(self.diag, s),
        }
    }
}

/// Member tables of every class, used to resolve references.
struct Members<'a> {
    classes: &'a [Class],
    class_ids: &'a HashMap<Identifier, ClassId>,
    field_ids: &'a [HashMap<Identifier, FieldId>],
    method_ids: &'a [HashMap<Identifier, MethodId>],
}

impl Members<'_> {
    /// Looks for a member in `class`, then up its superclass chain.
    fn lookup<T>(&self, class: ClassId, find: impl Fn(ClassId) -> Option<T>) -> Option<T> {
        let mut current = Some(class);
        let mut steps = 0;
        while let Some(class) = current {
            if let Some(found) = find(class) {
                return Some(found);
            }
            // Inheritance cycles are not rejected, so bound the walk.
            steps += 1;
            if steps > self.classes.len() {
                return None;
            }
            current = self.classes[class.0].superclass;
        }
        None
    }
}
