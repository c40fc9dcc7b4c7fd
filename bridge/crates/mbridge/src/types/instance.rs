//! Field and method access on a bridged instance

use super::native::{self, NativeCell};
use crate::error::{BridgeError, Result};
use crate::host::{CallFrame, ManagedObjectHandle, ManagedRuntime, Value};

/// View of a managed object through its class's field layout
///
/// Borrowed, cheap to create; bridged method bodies build one from their
/// [`CallFrame`].
pub struct Instance<'a> {
    runtime: &'a dyn ManagedRuntime,
    handle: ManagedObjectHandle,
}

impl<'a> Instance<'a> {
    pub fn new(runtime: &'a dyn ManagedRuntime, handle: ManagedObjectHandle) -> Self {
        Self { runtime, handle }
    }

    /// The receiver of a method call
    pub fn from_frame(frame: &CallFrame<'a>) -> Self {
        Self::new(frame.runtime(), frame.this())
    }

    pub fn handle(&self) -> ManagedObjectHandle {
        self.handle
    }

    pub fn runtime(&self) -> &'a dyn ManagedRuntime {
        self.runtime
    }

    fn slot(&self, field: &str) -> Result<usize> {
        let class = self.runtime.class_of(self.handle)?;
        self.runtime
            .field_slot(class, field)
            .ok_or_else(|| BridgeError::UnknownField {
                type_name: self
                    .runtime
                    .class_name(class)
                    .unwrap_or_else(|_| format!("class#{}", class.0)),
                field: field.to_string(),
            })
    }

    /// Raw slot value
    ///
    /// Non-trivial fields read as `Value::Native` once constructed and as
    /// `Value::Undefined` before.
    pub fn get(&self, field: &str) -> Result<Value> {
        self.runtime.read_field(self.handle, self.slot(field)?)
    }

    /// Write a trivial field
    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        let slot = self.slot(field)?;
        if let Value::Native(_) = value {
            return Err(BridgeError::TypeMismatch {
                expected: "managed value".to_string(),
                found: value.kind().to_string(),
            });
        }
        let current = self.runtime.read_field(self.handle, slot)?;
        if let Value::Native(_) = current {
            return Err(BridgeError::TypeMismatch {
                expected: "trivial field".to_string(),
                found: format!("non-trivial field {}", field),
            });
        }
        self.runtime.write_field(self.handle, slot, value)
    }

    fn typed<T>(&self, field: &str, want: &str, pick: impl FnOnce(&Value) -> Option<T>) -> Result<T> {
        let value = self.get(field)?;
        pick(&value).ok_or_else(|| BridgeError::TypeMismatch {
            expected: want.to_string(),
            found: value.kind().to_string(),
        })
    }

    pub fn get_int(&self, field: &str) -> Result<i64> {
        self.typed(field, "int", Value::as_int)
    }

    pub fn get_float(&self, field: &str) -> Result<f64> {
        self.typed(field, "float", Value::as_float)
    }

    pub fn get_bool(&self, field: &str) -> Result<bool> {
        self.typed(field, "bool", Value::as_bool)
    }

    pub fn get_object(&self, field: &str) -> Result<ManagedObjectHandle> {
        self.typed(field, "object", Value::as_object)
    }

    /// Run `f` on the native cell behind a non-trivial field
    ///
    /// `Ok(None)` if the constructor path has not run yet.
    fn with_cell<R>(&self, field: &str, f: impl FnOnce(&mut NativeCell) -> R) -> Result<Option<R>> {
        match self.get(field)? {
            Value::Native(ptr) => {
                let cell = native::get(ptr).ok_or_else(|| BridgeError::DanglingNativeCell {
                    handle: self.handle,
                    field: field.to_string(),
                })?;
                let mut guard = cell.lock();
                Ok(Some(f(&mut guard)))
            },
            Value::Undefined => {
                log::warn!(
                    "field {} of {} read before its constructor ran",
                    field,
                    self.handle
                );
                Ok(None)
            },
            other => Err(BridgeError::TypeMismatch {
                expected: "non-trivial field".to_string(),
                found: other.kind().to_string(),
            }),
        }
    }

    fn constructed<R>(&self, field: &str, out: Option<Result<R>>) -> Result<R> {
        out.unwrap_or_else(|| {
            Err(BridgeError::FieldUnconstructed {
                handle: self.handle,
                field: field.to_string(),
            })
        })
    }

    /// Text field contents; `None` before construction
    pub fn text(&self, field: &str) -> Result<Option<String>> {
        self.with_cell(field, |cell| match cell {
            NativeCell::Text(s) => Ok(s.clone()),
            other => Err(mismatch("string", other)),
        })?
        .transpose()
    }

    pub fn with_text_mut<R>(&self, field: &str, f: impl FnOnce(&mut String) -> R) -> Result<R> {
        let out = self.with_cell(field, |cell| match cell {
            NativeCell::Text(s) => Ok(f(s)),
            other => Err(mismatch("string", other)),
        })?;
        self.constructed(field, out)
    }

    /// List field contents; `None` before construction
    pub fn list(&self, field: &str) -> Result<Option<Vec<Value>>> {
        self.with_cell(field, |cell| match cell {
            NativeCell::List(items) => Ok(items.clone()),
            other => Err(mismatch("list", other)),
        })?
        .transpose()
    }

    pub fn list_len(&self, field: &str) -> Result<Option<usize>> {
        Ok(self.list(field)?.map(|items| items.len()))
    }

    pub fn with_list_mut<R>(&self, field: &str, f: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        let out = self.with_cell(field, |cell| match cell {
            NativeCell::List(items) => Ok(f(items)),
            other => Err(mismatch("list", other)),
        })?;
        self.constructed(field, out)
    }

    /// Virtual call on this instance
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.runtime.invoke_virtual(self.handle, method, args)
    }
}

fn mismatch(expected: &str, cell: &NativeCell) -> BridgeError {
    BridgeError::TypeMismatch {
        expected: expected.to_string(),
        found: cell.kind().to_string(),
    }
}
