//! Method signatures
//!
//! Textual forms accepted by [`MethodSignature::parse`]:
//!
//! - `Ns.Class::Method/2` - match by name and arity
//! - `Ns.Class::Method(int, string)` - match by name and exact parameter types
//!
//! Parameter types are normalized before comparison, so `int` and
//! `System.Int32` name the same type.

use crate::error::{BridgeError, Result};
use crate::host::{full_name, MethodMetadata};
use std::fmt;

/// Parameter constraint of a signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Params {
    /// Any parameter types, this many of them
    Arity(usize),
    /// Exactly these normalized types, in order
    Types(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub namespace: String,
    pub class: String,
    pub method: String,
    pub params: Params,
}

impl MethodSignature {
    /// Name-and-arity signature
    pub fn new(namespace: &str, class: &str, method: &str, arity: usize) -> Self {
        Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params: Params::Arity(arity),
        }
    }

    /// Full signature with parameter types
    pub fn with_types(namespace: &str, class: &str, method: &str, params: &[&str]) -> Self {
        Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params: Params::Types(params.iter().map(|p| normalize_type(p)).collect()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |why: &str| BridgeError::InvalidArgument(format!("signature {:?}: {}", text, why));

        let (owner, rest) = text
            .trim()
            .rsplit_once("::")
            .ok_or_else(|| invalid("expected Class::Method"))?;
        let (namespace, class) = match owner.rsplit_once('.') {
            Some((ns, class)) => (ns.trim(), class.trim()),
            None => ("", owner.trim()),
        };
        if class.is_empty() {
            return Err(invalid("missing class name"));
        }

        let rest = rest.trim();
        let (method, params) = if let Some(open) = rest.find('(') {
            let inner = rest[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| invalid("unterminated parameter list"))?;
            let types = split_params(inner)
                .into_iter()
                .map(|p| {
                    if p.is_empty() {
                        Err(invalid("empty parameter type"))
                    } else {
                        Ok(normalize_type(&p))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            (rest[..open].trim(), Params::Types(types))
        } else if let Some((name, arity)) = rest.split_once('/') {
            let arity = arity
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid("arity is not a number"))?;
            (name.trim(), Params::Arity(arity))
        } else {
            return Err(invalid("expected (params) or /arity"));
        };

        if method.is_empty() {
            return Err(invalid("missing method name"));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params,
        })
    }

    pub fn arity(&self) -> usize {
        match &self.params {
            Params::Arity(n) => *n,
            Params::Types(types) => types.len(),
        }
    }

    /// Check a host method against this signature
    pub fn matches(&self, method: &MethodMetadata) -> bool {
        if method.namespace != self.namespace
            || method.class != self.class
            || method.name != self.method
            || method.arity() != self.arity()
        {
            return false;
        }
        match &self.params {
            Params::Arity(_) => true,
            Params::Types(types) => types
                .iter()
                .zip(&method.params)
                .all(|(want, have)| *want == normalize_type(have)),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", full_name(&self.namespace, &self.class), self.method)?;
        match &self.params {
            Params::Arity(n) => write!(f, "/{}", n),
            Params::Types(types) => write!(f, "({})", types.join(", ")),
        }
    }
}

/// Split a parameter list on top-level commas
fn split_params(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '<' | '[' => depth += 1,
            '>' | ']' => depth -= 1,
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
                continue;
            },
            _ => {},
        }
        current.push(ch);
    }
    out.push(current.trim().to_string());
    out
}

/// Canonical spelling of a type name
///
/// Language keywords map to their runtime type names; array and generic
/// suffixes are preserved around the normalized element type.
pub fn normalize_type(name: &str) -> String {
    let name: String = name.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(element) = name.strip_suffix("[]") {
        return format!("{}[]", normalize_type(element));
    }

    if let (Some(open), Some(inner)) = (name.find('<'), name.strip_suffix('>')) {
        let args: Vec<String> = split_params(&inner[open + 1..])
            .iter()
            .map(|a| normalize_type(a))
            .collect();
        return format!("{}<{}>", &name[..open], args.join(","));
    }

    let canonical = match name.as_str() {
        "bool" => "System.Boolean",
        "byte" => "System.Byte",
        "sbyte" => "System.SByte",
        "char" => "System.Char",
        "short" => "System.Int16",
        "ushort" => "System.UInt16",
        "int" => "System.Int32",
        "uint" => "System.UInt32",
        "long" => "System.Int64",
        "ulong" => "System.UInt64",
        "float" => "System.Single",
        "double" => "System.Double",
        "string" => "System.String",
        "object" => "System.Object",
        "void" => "System.Void",
        _ => return name,
    };
    canonical.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MethodAddress;

    fn meta(params: &[&str]) -> MethodMetadata {
        MethodMetadata {
            namespace: "Game".into(),
            class: "Foo".into(),
            name: "Bar".into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            return_type: "void".into(),
            address: MethodAddress::from_raw(0x1000),
            body_len: 32,
            is_virtual: false,
        }
    }

    #[test]
    fn test_parse_arity_form() {
        let sig = MethodSignature::parse("Game.Foo::Bar/2").unwrap();
        assert_eq!(sig, MethodSignature::new("Game", "Foo", "Bar", 2));
        assert_eq!(sig.to_string(), "Game.Foo::Bar/2");
    }

    #[test]
    fn test_parse_typed_form() {
        let sig = MethodSignature::parse("Game.Foo::Bar(int, System.String)").unwrap();
        assert_eq!(sig.arity(), 2);
        assert_eq!(
            sig.params,
            Params::Types(vec!["System.Int32".into(), "System.String".into()])
        );
        assert!(sig.matches(&meta(&["System.Int32", "string"])));
        assert!(!sig.matches(&meta(&["string", "int"])));
    }

    #[test]
    fn test_parse_global_namespace_and_empty_params() {
        let sig = MethodSignature::parse("Foo::Tick()").unwrap();
        assert_eq!(sig.namespace, "");
        assert_eq!(sig.params, Params::Types(Vec::new()));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["Foo.Bar", "Foo::(int)", "Foo::Bar(int", "Foo::Bar/x", "::Bar/1", "Foo::Bar(int,)"] {
            assert!(MethodSignature::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_normalize_nested() {
        assert_eq!(normalize_type("int[]"), "System.Int32[]");
        assert_eq!(
            normalize_type("Dictionary<string, List<int>>"),
            "Dictionary<System.String,List<System.Int32>>"
        );
        assert_eq!(normalize_type("Game.Counter"), "Game.Counter");
    }

    #[test]
    fn test_generic_params_split_at_top_level() {
        let sig = MethodSignature::parse("Foo::Put(Dictionary<int, string>, bool)").unwrap();
        assert_eq!(sig.arity(), 2);
    }
}
