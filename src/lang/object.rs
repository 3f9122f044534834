use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::op::Instructions;
use crate::lang::ast::{Block, Identifier};

// =============================================================================
// OBJECT - Runtime values
// =============================================================================

/// Runtime value in the wick language.
///
/// This is a closed set: the compiler produces constants from it, the VM and
/// the tree-walking evaluator manipulate it. Arrays and hashes are shared by
/// reference, so a mutation through one binding is visible through every
/// binding that observes the same object.
#[derive(Debug, Clone)]
pub enum Object {
    /// 64-bit signed integer.
    Integer(i64),

    /// Boolean. Exactly two values exist, so value equality is identity.
    Bool(bool),

    /// The null value.
    Null,

    /// Immutable UTF-8 string.
    Str(Rc<String>),

    /// Growable ordered sequence; elements are mutable in place.
    Array(Rc<RefCell<Vec<Object>>>),

    /// Object-to-object mapping, keyed by a hashable projection of the key.
    Hash(Rc<RefCell<HashMap<HashKey, HashPair>>>),

    /// Bytecode function template, or a closure once the free values are
    /// captured.
    CompiledFunction(Rc<CompiledFunction>),

    /// Stable index into the builtin table. The native operation is resolved
    /// only at call time.
    Builtin(usize),

    /// Runtime error carried as a value (builtin misuse).
    Error(String),

    /// AST closure. Tree-walking evaluator only.
    Function(Rc<Function>),

    /// Wrapper signalling an early return. Tree-walking evaluator only.
    Return(Box<Object>),
}

impl Object {
    pub fn str(value: impl Into<String>) -> Self {
        Object::Str(Rc::new(value.into()))
    }

    pub fn array(elements: Vec<Object>) -> Self {
        Object::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "int",
            Object::Bool(_) => "bool",
            Object::Null => "null",
            Object::Str(_) => "string",
            Object::Array(_) => "array",
            Object::Hash(_) => "hash",
            Object::CompiledFunction(_) => "fun",
            Object::Builtin(_) => "builtin",
            Object::Error(_) => "error",
            Object::Function(_) => "fun",
            Object::Return(_) => "return",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }
}

impl std::fmt::Display for Object {
    /// Render a value the way the language prints it.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::Integer(n) => write!(f, "{}", n),
            Object::Bool(b) => write!(f, "{}", b),
            Object::Null => write!(f, "null"),
            Object::Str(s) => write!(f, "{}", s),
            Object::Array(elements) => {
                let rendered: Vec<String> =
                    elements.borrow().iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", rendered.join(","))
            }
            Object::Hash(pairs) => {
                let rendered: Vec<String> = pairs
                    .borrow()
                    .values()
                    .map(|p| format!("{}:{}", p.key, p.value))
                    .collect();
                write!(f, "{{{}}}", rendered.join(","))
            }
            Object::CompiledFunction(_) => write!(f, "fun"),
            Object::Builtin(_) => write!(f, "builtin"),
            Object::Error(msg) => write!(f, "{}", msg),
            Object::Function(_) => write!(f, "fun"),
            Object::Return(value) => write!(f, "{}", value),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Null, Object::Null) => true,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => a == b,
            (Object::Hash(a), Object::Hash(b)) => a == b,
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => a == b,
            (Object::Builtin(a), Object::Builtin(b)) => a == b,
            (Object::Error(a), Object::Error(b)) => a == b,
            // Environments can be cyclic through captured closures, so AST
            // closures compare by identity.
            (Object::Function(a), Object::Function(b)) => Rc::ptr_eq(a, b),
            (Object::Return(a), Object::Return(b)) => a == b,
            _ => false,
        }
    }
}

// =============================================================================
// Hash keys
// =============================================================================

/// The hashable projection of an object. Only integers, strings and booleans
/// can key a hash; anything else is "unusable as a hash key".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Str(String),
    Bool(bool),
}

impl HashKey {
    pub fn from_object(object: &Object) -> Option<HashKey> {
        match object {
            Object::Integer(n) => Some(HashKey::Integer(*n)),
            Object::Str(s) => Some(HashKey::Str(s.as_ref().clone())),
            Object::Bool(b) => Some(HashKey::Bool(*b)),
            _ => None,
        }
    }
}

/// A stored hash entry. The original key object is kept for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

// =============================================================================
// Functions
// =============================================================================

/// A compiled function: its instruction stream, the number of local slots its
/// body needs, its declared parameter count, and, once constructed as a
/// closure, the captured free values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_params: usize,
    pub free: Vec<Object>,
}

/// An AST closure for the tree-walking evaluator: parameter names, body, and
/// the environment the literal was evaluated in.
#[derive(Debug)]
pub struct Function {
    pub params: Vec<Identifier>,
    pub body: Block,
    pub env: Env,
}

// =============================================================================
// Environments (tree-walking evaluator)
// =============================================================================

/// A chain of name→value bindings. Cloning an `Env` aliases the same scope.
#[derive(Debug, Clone)]
pub struct Env {
    inner: Rc<RefCell<EnvData>>,
}

#[derive(Debug)]
struct EnvData {
    store: HashMap<String, Object>,
    parent: Option<Env>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            inner: Rc::new(RefCell::new(EnvData {
                store: HashMap::new(),
                parent: None,
            })),
        }
    }

    /// A fresh scope whose lookups fall back to `parent`.
    pub fn enclosed(parent: &Env) -> Self {
        Env {
            inner: Rc::new(RefCell::new(EnvData {
                store: HashMap::new(),
                parent: Some(parent.clone()),
            })),
        }
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        let data = self.inner.borrow();
        match data.store.get(name) {
            Some(value) => Some(value.clone()),
            None => data.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: Object) {
        self.inner.borrow_mut().store.insert(name.into(), value);
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalars() {
        assert_eq!(Object::Integer(42).to_string(), "42");
        assert_eq!(Object::Bool(true).to_string(), "true");
        assert_eq!(Object::Null.to_string(), "null");
        assert_eq!(Object::str("hello").to_string(), "hello");
    }

    #[test]
    fn test_render_array() {
        let arr = Object::array(vec![
            Object::Integer(1),
            Object::str("two"),
            Object::Null,
        ]);
        assert_eq!(arr.to_string(), "[1,two,null]");
    }

    #[test]
    fn test_array_clone_aliases_storage() {
        let arr = Object::array(vec![Object::Integer(1)]);
        let alias = arr.clone();

        if let Object::Array(elements) = &arr {
            elements.borrow_mut().push(Object::Integer(2));
        }

        assert_eq!(alias.to_string(), "[1,2]");
        assert_eq!(arr, alias);
    }

    #[test]
    fn test_hash_key_projection() {
        assert_eq!(
            HashKey::from_object(&Object::Integer(3)),
            Some(HashKey::Integer(3))
        );
        assert_eq!(
            HashKey::from_object(&Object::str("k")),
            Some(HashKey::Str("k".to_string()))
        );
        assert_eq!(HashKey::from_object(&Object::Null), None);
        assert_eq!(
            HashKey::from_object(&Object::array(Vec::new())),
            None
        );
    }

    #[test]
    fn test_env_chain_lookup() {
        let outer = Env::new();
        outer.set("x", Object::Integer(1));

        let inner = Env::enclosed(&outer);
        inner.set("y", Object::Integer(2));

        assert_eq!(inner.get("x"), Some(Object::Integer(1)));
        assert_eq!(inner.get("y"), Some(Object::Integer(2)));
        assert_eq!(outer.get("y"), None);
    }

    #[test]
    fn test_shadowing_does_not_touch_parent() {
        let outer = Env::new();
        outer.set("x", Object::Integer(1));

        let inner = Env::enclosed(&outer);
        inner.set("x", Object::Integer(9));

        assert_eq!(inner.get("x"), Some(Object::Integer(9)));
        assert_eq!(outer.get("x"), Some(Object::Integer(1)));
    }
}
