use core::fmt::Display;

use itertools::Itertools;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub usize);

/// The things the analyses attach properties to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Class(ClassId),
    Field(FieldId),
    Method(MethodId),
}

/// What a method body does, as far as the analyses care.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Statement {
    Read(FieldId),
    Write(FieldId),
    Call(MethodId),
    /// Calls into code we know nothing about.
    Native,
    /// Creates a new object.
    Alloc,
}

#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<ClassId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub class: ClassId,
    pub declared_final: bool,
    /// The class of the referenced object, `None` for primitive values.
    pub ty: Option<ClassId>,
}

#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub class: ClassId,
    pub body: Vec<Statement>,
}

impl Method {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// The facts the analyses consume. Analyses only ever see this trait, so
/// they work the same whether the facts come from a fact file or from a
/// bytecode front end.
pub trait FactSource: Send + Sync {
    fn classes(&self) -> Vec<ClassId>;
    fn methods(&self) -> Vec<MethodId>;

    fn superclass(&self, class: ClassId) -> Option<ClassId>;
    fn fields_of(&self, class: ClassId) -> &[FieldId];

    fn field_class(&self, field: FieldId) -> ClassId;
    fn is_declared_final(&self, field: FieldId) -> bool;
    fn field_type(&self, field: FieldId) -> Option<ClassId>;
    /// Every method with a `write` of the field.
    fn writers_of(&self, field: FieldId) -> &[MethodId];

    fn method_class(&self, method: MethodId) -> ClassId;
    fn is_constructor(&self, method: MethodId) -> bool;
    fn statements(&self, method: MethodId) -> &[Statement];

    /// Human readable name, e.g., `Point.getX`.
    fn describe(&self, entity: Entity) -> String;
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    classes: Vec<Class>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    writers: Vec<Vec<MethodId>>,
}

impl Program {
    pub fn new(classes: Vec<Class>, fields: Vec<Field>, methods: Vec<Method>) -> Self {
        let mut writers = vec![Vec::new(); fields.len()];
        for (id, method) in methods.iter().enumerate() {
            for stmt in &method.body {
                if let Statement::Write(field) = stmt {
                    let writers = &mut writers[field.0];
                    if writers.last() != Some(&MethodId(id)) {
                        writers.push(MethodId(id));
                    }
                }
            }
        }
        Self {
            classes,
            fields,
            methods,
            writers,
        }
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0]
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes.iter().position(|c| c.name == name).map(ClassId)
    }

    /// Looks up `Class.member` names, for tests and reports.
    pub fn find_method(&self, class: &str, name: &str) -> Option<MethodId> {
        let class = self.find_class(class)?;
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).name == name)
    }

    pub fn find_field(&self, class: &str, name: &str) -> Option<FieldId> {
        let class = self.find_class(class)?;
        self.class(class)
            .fields
            .iter()
            .copied()
            .find(|f| self.field(*f).name == name)
    }

    fn qualified(&self, class: ClassId, member: &str) -> String {
        format!("{}.{member}", self.class(class).name)
    }
}

impl FactSource for Program {
    fn classes(&self) -> Vec<ClassId> {
        (0..self.classes.len()).map(ClassId).collect()
    }

    fn methods(&self) -> Vec<MethodId> {
        (0..self.methods.len()).map(MethodId).collect()
    }

    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.class(class).superclass
    }

    fn fields_of(&self, class: ClassId) -> &[FieldId] {
        &self.class(class).fields
    }

    fn field_class(&self, field: FieldId) -> ClassId {
        self.field(field).class
    }

    fn is_declared_final(&self, field: FieldId) -> bool {
        self.field(field).declared_final
    }

    fn field_type(&self, field: FieldId) -> Option<ClassId> {
        self.field(field).ty
    }

    fn writers_of(&self, field: FieldId) -> &[MethodId] {
        &self.writers[field.0]
    }

    fn method_class(&self, method: MethodId) -> ClassId {
        self.method(method).class
    }

    fn is_constructor(&self, method: MethodId) -> bool {
        self.method(method).is_constructor()
    }

    fn statements(&self, method: MethodId) -> &[Statement] {
        &self.method(method).body
    }

    fn describe(&self, entity: Entity) -> String {
        match entity {
            Entity::Class(id) => self.class(id).name.clone(),
            Entity::Field(id) => {
                let field = self.field(id);
                self.qualified(field.class, &field.name)
            }
            Entity::Method(id) => {
                let method = self.method(id);
                self.qualified(method.class, &method.name)
            }
        }
    }
}

struct StatementPrinter<'p> {
    program: &'p Program,
    owner: ClassId,
    stmt: Statement,
}

impl Display for StatementPrinter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let member = |class: ClassId, name: &str| {
            if class == self.owner {
                name.to_owned()
            } else {
                self.program.qualified(class, name)
            }
        };
        match self.stmt {
            Statement::Read(id) => {
                let field = self.program.field(id);
                write!(f, "read {};", member(field.class, &field.name))
            }
            Statement::Write(id) => {
                let field = self.program.field(id);
                write!(f, "write {};", member(field.class, &field.name))
            }
            Statement::Call(id) => {
                let method = self.program.method(id);
                write!(f, "call {};", member(method.class, &method.name))
            }
            Statement::Native => write!(f, "native;"),
            Statement::Alloc => write!(f, "alloc;"),
        }
    }
}

/// Renders the program in the fact format it was parsed from.
pub fn print(program: &Program) -> String {
    program
        .classes()
        .into_iter()
        .map(|id| print_class(program, id))
        .join("\n")
}

fn print_class(program: &Program, id: ClassId) -> String {
    let class = program.class(id);
    let mut result = format!("class {}", class.name);
    if let Some(superclass) = class.superclass {
        result.push_str(&format!(" extends {}", program.class(superclass).name));
    }
    result.push_str(" {\n");
    for &field_id in &class.fields {
        let field = program.field(field_id);
        result.push_str(&format!("  field {}", field.name));
        if let Some(ty) = field.ty {
            result.push_str(&format!(": {}", program.class(ty).name));
        }
        if field.declared_final {
            result.push_str(" final");
        }
        result.push_str(";\n");
    }
    for &method_id in &class.methods {
        let method = program.method(method_id);
        let body = method
            .body
            .iter()
            .map(|&stmt| {
                StatementPrinter {
                    program,
                    owner: id,
                    stmt,
                }
                .to_string()
            })
            .join(" ");
        if body.is_empty() {
            result.push_str(&format!("  method {} {{}}\n", method.name));
        } else {
            result.push_str(&format!("  method {} {{ {body} }}\n", method.name));
        }
    }
    result.push_str("}\n");
    result
}
