//! Type descriptors and the builder used to register them

use super::instance::Instance;
use crate::host::{full_name, ClassHandle, ManagedException, MethodAddress, MethodDefinition, Value};
use std::sync::Arc;

/// Native constructor; runs after the allocator, before first use
pub type NativeConstructor = fn(&Instance<'_>, &[Value]) -> Result<(), ManagedException>;

/// Native destructor; runs before the managed object is reclaimed
pub type NativeDestructor = fn(&Instance<'_>);

/// Storage kind of a bridged field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Object,
    /// Owned string, lives in a native cell
    Text,
    /// Owned list of values, lives in a native cell
    List,
}

impl FieldKind {
    /// Trivial fields are fully initialized by the allocator
    pub fn is_trivial(self) -> bool {
        !matches!(self, FieldKind::Text | FieldKind::List)
    }

    /// Type name reported to the host
    pub fn type_name(self) -> &'static str {
        match self {
            FieldKind::Int => "long",
            FieldKind::Float => "double",
            FieldKind::Bool => "bool",
            FieldKind::Object => "object",
            FieldKind::Text => "string",
            FieldKind::List => "System.Collections.Generic.List<object>",
        }
    }
}

/// Declared default of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInit {
    Value(Value),
    Text(String),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub kind: FieldKind,
    /// Slot index in the host object
    pub offset: usize,
    pub default: FieldInit,
}

impl FieldSlot {
    pub fn is_trivial(&self) -> bool {
        self.kind.is_trivial()
    }
}

/// A registered method with its compiled entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedMethod {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: String,
    pub address: MethodAddress,
    pub body_len: usize,
    pub is_virtual: bool,
}

#[derive(Debug, Clone)]
pub enum ParentType {
    /// Another bridged type; its fields and lifecycle are inherited
    Bridged(Arc<TypeDescriptor>),
    /// A class owned by the host
    Host(ClassHandle),
}

/// A native-defined type registered into the managed type system
///
/// Created once by `TypeBridge::define_type` and kept for the process
/// lifetime.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub namespace: String,
    pub name: String,
    pub parent: Option<ParentType>,
    /// Host class backing instances of this type
    pub class: ClassHandle,
    /// Own fields; inherited ones live on the parent descriptor
    pub fields: Vec<FieldSlot>,
    pub methods: Vec<BridgedMethod>,
    pub constructor: Option<NativeConstructor>,
    pub destructor: Option<NativeDestructor>,
}

impl TypeDescriptor {
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }

    /// Bridged types from the root down to `self`
    pub fn ancestry(&self) -> Vec<&TypeDescriptor> {
        let mut chain = vec![self];
        let mut cursor = self;
        while let Some(ParentType::Bridged(parent)) = &cursor.parent {
            chain.push(parent.as_ref());
            cursor = parent.as_ref();
        }
        chain.reverse();
        chain
    }

    /// Own and inherited bridged fields, parents first
    pub fn all_fields(&self) -> Vec<&FieldSlot> {
        self.ancestry()
            .into_iter()
            .flat_map(|d| d.fields.iter())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.all_fields().into_iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&BridgedMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_non_trivial_fields(&self) -> bool {
        self.all_fields().iter().any(|f| !f.is_trivial())
    }
}

pub(crate) enum ParentSpec {
    None,
    Bridged(String),
    Host(ClassHandle),
}

/// Field declaration collected by [`TypeBuilder`]
pub(crate) struct FieldDecl {
    pub name: String,
    pub kind: FieldKind,
    pub default: FieldInit,
}

/// Declarative description of a bridged type
///
/// # Examples
///
/// ```rust
/// use mbridge::host::{CallFrame, MethodDefinition, MethodResult, Value};
/// use mbridge::types::{Instance, TypeBuilder};
///
/// fn increment(frame: &CallFrame<'_>, _: &[Value]) -> MethodResult {
///     let this = Instance::from_frame(frame);
///     let count = this.get_int("count")?;
///     this.set("count", Value::Int(count + 1))?;
///     Ok(Value::Void)
/// }
///
/// let counter = TypeBuilder::new("Game", "Counter")
///     .field_int("count", 0)
///     .method(MethodDefinition::new("increment", &[], "void", increment));
/// ```
pub struct TypeBuilder {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) parent: ParentSpec,
    pub(crate) fields: Vec<FieldDecl>,
    pub(crate) methods: Vec<MethodDefinition>,
    pub(crate) constructor: Option<NativeConstructor>,
    pub(crate) destructor: Option<NativeDestructor>,
}

impl TypeBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            parent: ParentSpec::None,
            fields: Vec::new(),
            methods: Vec::new(),
            constructor: None,
            destructor: None,
        }
    }

    /// Inherit from a bridged type registered earlier
    pub fn extends_type(mut self, full_name: &str) -> Self {
        self.parent = ParentSpec::Bridged(full_name.to_string());
        self
    }

    /// Inherit from a host-owned class
    pub fn extends_class(mut self, class: ClassHandle) -> Self {
        self.parent = ParentSpec::Host(class);
        self
    }

    fn push(mut self, name: &str, kind: FieldKind, default: FieldInit) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            kind,
            default,
        });
        self
    }

    pub fn field_int(self, name: &str, default: i64) -> Self {
        self.push(name, FieldKind::Int, FieldInit::Value(Value::Int(default)))
    }

    pub fn field_float(self, name: &str, default: f64) -> Self {
        self.push(name, FieldKind::Float, FieldInit::Value(Value::Float(default)))
    }

    pub fn field_bool(self, name: &str, default: bool) -> Self {
        self.push(name, FieldKind::Bool, FieldInit::Value(Value::Bool(default)))
    }

    /// Object reference field, null by default
    pub fn field_object(self, name: &str) -> Self {
        self.push(name, FieldKind::Object, FieldInit::Value(Value::Null))
    }

    pub fn field_text(self, name: &str, default: &str) -> Self {
        self.push(name, FieldKind::Text, FieldInit::Text(default.to_string()))
    }

    pub fn field_list(self, name: &str, default: Vec<Value>) -> Self {
        self.push(name, FieldKind::List, FieldInit::List(default))
    }

    pub fn method(mut self, method: MethodDefinition) -> Self {
        self.methods.push(method);
        self
    }

    pub fn constructor(mut self, ctor: NativeConstructor) -> Self {
        self.constructor = Some(ctor);
        self
    }

    pub fn destructor(mut self, dtor: NativeDestructor) -> Self {
        self.destructor = Some(dtor);
        self
    }

    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_triviality() {
        assert!(FieldKind::Int.is_trivial());
        assert!(FieldKind::Object.is_trivial());
        assert!(!FieldKind::Text.is_trivial());
        assert!(!FieldKind::List.is_trivial());
    }

    #[test]
    fn test_builder_collects_fields() {
        let builder = TypeBuilder::new("Game", "Player")
            .field_int("hp", 100)
            .field_text("name", "anon")
            .field_list("items", Vec::new());

        assert_eq!(builder.full_name(), "Game.Player");
        assert_eq!(builder.fields.len(), 3);
        assert_eq!(builder.fields[1].default, FieldInit::Text("anon".into()));
    }

    #[test]
    fn test_ancestry_order() {
        let base = Arc::new(TypeDescriptor {
            namespace: "Game".into(),
            name: "Base".into(),
            parent: None,
            class: ClassHandle(1),
            fields: vec![FieldSlot {
                name: "a".into(),
                kind: FieldKind::Int,
                offset: 0,
                default: FieldInit::Value(Value::Int(0)),
            }],
            methods: Vec::new(),
            constructor: None,
            destructor: None,
        });
        let derived = TypeDescriptor {
            namespace: "Game".into(),
            name: "Derived".into(),
            parent: Some(ParentType::Bridged(base)),
            class: ClassHandle(2),
            fields: vec![FieldSlot {
                name: "b".into(),
                kind: FieldKind::Text,
                offset: 1,
                default: FieldInit::Text(String::new()),
            }],
            methods: Vec::new(),
            constructor: None,
            destructor: None,
        };

        let names: Vec<_> = derived.ancestry().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["Base".to_string(), "Derived".to_string()]);
        assert_eq!(derived.field("a").map(|f| f.offset), Some(0));
        assert!(derived.has_non_trivial_fields());
    }
}
