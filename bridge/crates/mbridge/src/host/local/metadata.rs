//! Class table of the local host
//!
//! Slot layout is flat: a class's own fields follow all of its parents'
//! fields, so a slot index is valid on every subclass.

use crate::error::{BridgeError, Result};
use crate::host::{full_name, ClassHandle, FieldLayout, FinalizerFn, MethodMetadata, Value};
use rustc_hash::FxHashMap;

pub struct ClassRecord {
    pub handle: ClassHandle,
    pub namespace: String,
    pub name: String,
    pub parent: Option<ClassHandle>,
    /// Own fields only
    pub fields: Vec<FieldLayout>,
    /// Slot index of the first own field
    pub slot_base: usize,
    /// Declared methods with their compiled entries
    pub methods: Vec<MethodMetadata>,
    pub finalizer: Option<FinalizerFn>,
}

impl ClassRecord {
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }

    pub fn field_count(&self) -> usize {
        self.slot_base + self.fields.len()
    }
}

#[derive(Default)]
pub struct ClassTable {
    classes: Vec<ClassRecord>,
    by_name: FxHashMap<String, ClassHandle>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next inserted class will receive
    pub fn next_handle(&self) -> ClassHandle {
        ClassHandle(self.classes.len() + 1)
    }

    pub fn contains_name(&self, full_name: &str) -> bool {
        self.by_name.contains_key(full_name)
    }

    pub fn insert(&mut self, record: ClassRecord) -> Result<ClassHandle> {
        let name = record.full_name();
        if self.by_name.contains_key(&name) {
            return Err(BridgeError::TypeAlreadyDefined { name });
        }
        if record.handle != self.next_handle() {
            return Err(BridgeError::Internal(format!(
                "class {} inserted out of order",
                name
            )));
        }

        let handle = record.handle;
        self.by_name.insert(name, handle);
        self.classes.push(record);
        Ok(handle)
    }

    pub fn get(&self, class: ClassHandle) -> Result<&ClassRecord> {
        class
            .0
            .checked_sub(1)
            .and_then(|i| self.classes.get(i))
            .ok_or_else(|| BridgeError::UnknownType {
                name: format!("class#{}", class.0),
            })
    }

    pub fn get_mut(&mut self, class: ClassHandle) -> Result<&mut ClassRecord> {
        class
            .0
            .checked_sub(1)
            .and_then(|i| self.classes.get_mut(i))
            .ok_or_else(|| BridgeError::UnknownType {
                name: format!("class#{}", class.0),
            })
    }

    pub fn find(&self, namespace: &str, name: &str) -> Option<ClassHandle> {
        self.by_name.get(&full_name(namespace, name)).copied()
    }

    /// Walk `class` and its parents, most-derived first
    pub fn chain(&self, class: ClassHandle) -> Vec<&ClassRecord> {
        let mut out = Vec::new();
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            match self.get(c) {
                Ok(record) => {
                    cursor = record.parent;
                    out.push(record);
                },
                Err(_) => break,
            }
        }
        out
    }

    pub fn field_slot(&self, class: ClassHandle, field: &str) -> Option<usize> {
        self.chain(class).into_iter().find_map(|record| {
            record
                .fields
                .iter()
                .position(|f| f.name == field)
                .map(|i| record.slot_base + i)
        })
    }

    /// Allocator defaults for every slot, parents first
    pub fn defaults(&self, class: ClassHandle) -> Result<Vec<Value>> {
        let chain = self.chain(class);
        if chain.is_empty() {
            return Err(BridgeError::UnknownType {
                name: format!("class#{}", class.0),
            });
        }
        Ok(chain
            .into_iter()
            .rev()
            .flat_map(|record| record.fields.iter().map(|f| f.default))
            .collect())
    }

    /// Declared methods matching name and arity
    pub fn find_methods(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Vec<MethodMetadata> {
        let Some(handle) = self.find(namespace, class) else {
            return Vec::new();
        };
        let Ok(record) = self.get(handle) else {
            return Vec::new();
        };
        record
            .methods
            .iter()
            .filter(|m| m.name == method && m.arity() == arity)
            .cloned()
            .collect()
    }

    /// Most-derived virtual implementation of `method`
    pub fn find_virtual(&self, class: ClassHandle, method: &str, arity: usize) -> Option<MethodMetadata> {
        self.chain(class).into_iter().find_map(|record| {
            record
                .methods
                .iter()
                .find(|m| m.name == method && m.arity() == arity)
                .cloned()
        })
    }

    /// Finalizer of the most-derived class that has one
    pub fn finalizer_for(&self, class: ClassHandle) -> Option<FinalizerFn> {
        self.chain(class)
            .into_iter()
            .find_map(|record| record.finalizer.clone())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &ClassTable, name: &str, parent: Option<ClassHandle>, fields: &[&str]) -> ClassRecord {
        let slot_base = parent
            .and_then(|p| table.get(p).ok())
            .map(|p| p.field_count())
            .unwrap_or(0);
        ClassRecord {
            handle: table.next_handle(),
            namespace: "Game".to_string(),
            name: name.to_string(),
            parent,
            fields: fields
                .iter()
                .map(|f| FieldLayout {
                    name: f.to_string(),
                    type_name: "int".to_string(),
                    default: Value::Int(0),
                })
                .collect(),
            slot_base,
            methods: Vec::new(),
            finalizer: None,
        }
    }

    #[test]
    fn test_flat_slot_layout() {
        let mut table = ClassTable::new();
        let base = table.insert(record(&table, "Base", None, &["a", "b"])).unwrap();
        let derived = table
            .insert(record(&table, "Derived", Some(base), &["c"]))
            .unwrap();

        assert_eq!(table.field_slot(derived, "a"), Some(0));
        assert_eq!(table.field_slot(derived, "c"), Some(2));
        assert_eq!(table.field_slot(base, "c"), None);
        assert_eq!(table.defaults(derived).unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = ClassTable::new();
        table.insert(record(&table, "Base", None, &[])).unwrap();
        let dup = record(&table, "Base", None, &[]);
        assert!(matches!(
            table.insert(dup),
            Err(BridgeError::TypeAlreadyDefined { .. })
        ));
    }
}
