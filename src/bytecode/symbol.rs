use std::collections::HashMap;

// =============================================================================
// SYMBOL TABLE - scope-chain resolution for the compiler
// =============================================================================

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// A slot in the VM's global array.
    Global,
    /// A slot in the current frame's locals.
    Local,
    /// A position in the enclosing closure's captured free values.
    Free,
}

/// A resolved binding: its name, where it lives, and its dense slot index
/// within that storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One lexical scope. Scopes reference their parent by arena index, never by
/// an owning link.
#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    symbols: HashMap<String, Symbol>,
    num_definitions: usize,
    free: Vec<Symbol>,
}

/// The scope arena. Scopes are pushed on function entry and popped on exit;
/// the root scope (index 0, no parent) holds globals and persists for the
/// lifetime of a session.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
            current: 0,
        }
    }

    /// Open a child scope for a function literal.
    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope {
            parent: Some(self.current),
            ..Scope::default()
        });
        self.current = self.scopes.len() - 1;
    }

    /// Close the current scope, returning its promoted free bindings (in
    /// first-promotion order) and the number of slots it defined. Leaving the
    /// root scope is a no-op.
    pub fn leave_scope(&mut self) -> (Vec<Symbol>, usize) {
        if self.scopes.len() == 1 {
            return (Vec::new(), 0);
        }
        let record = self.scopes.pop().unwrap_or_default();
        self.current = record.parent.unwrap_or(0);
        (record.free, record.num_definitions)
    }

    /// Bind a name in the current scope, allocating the next slot index.
    /// Redefinition shadows without error.
    pub fn define(&mut self, name: &str) -> Symbol {
        let record = &mut self.scopes[self.current];
        let scope = if record.parent.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: record.num_definitions,
        };
        record.symbols.insert(name.to_string(), symbol.clone());
        record.num_definitions += 1;
        symbol
    }

    /// Look a name up through the scope chain. A Local or Free binding found
    /// in an ancestor is promoted into every scope between the definition and
    /// the reference; the promoted Free symbol replaces the map entry so
    /// repeated references resolve to the same free slot.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        self.resolve_in(self.current, name)
    }

    /// Drop a binding from the current scope. The slot counter is not
    /// decremented; the slot is simply no longer reachable by name.
    pub fn forget(&mut self, name: &str) {
        self.scopes[self.current].symbols.remove(name);
    }

    fn resolve_in(&mut self, scope: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.scopes[scope].symbols.get(name) {
            return Some(symbol.clone());
        }

        let parent = self.scopes[scope].parent?;
        let outer = self.resolve_in(parent, name)?;

        // Globals are reachable from any frame and need no capture.
        if outer.scope == SymbolScope::Global {
            return Some(outer);
        }

        Some(self.promote_free(scope, outer))
    }

    fn promote_free(&mut self, scope: usize, outer: Symbol) -> Symbol {
        let record = &mut self.scopes[scope];
        record.free.push(outer.clone());

        let symbol = Symbol {
            name: outer.name,
            scope: SymbolScope::Free,
            index: record.free.len() - 1,
        };
        record
            .symbols
            .insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            scope,
            index,
        }
    }

    #[test]
    fn test_define_globals_densely() {
        let mut table = SymbolTable::new();
        assert_eq!(table.define("a"), sym("a", SymbolScope::Global, 0));
        assert_eq!(table.define("b"), sym("b", SymbolScope::Global, 1));
    }

    #[test]
    fn test_define_locals_per_scope() {
        let mut table = SymbolTable::new();
        table.define("g");

        table.enter_scope();
        assert_eq!(table.define("a"), sym("a", SymbolScope::Local, 0));
        assert_eq!(table.define("b"), sym("b", SymbolScope::Local, 1));

        table.enter_scope();
        // A fresh scope starts its indices at 0 again.
        assert_eq!(table.define("c"), sym("c", SymbolScope::Local, 0));
    }

    #[test]
    fn test_resolve_global_from_nested_scope_unchanged() {
        let mut table = SymbolTable::new();
        table.define("g");
        table.enter_scope();
        table.enter_scope();

        assert_eq!(table.resolve("g"), Some(sym("g", SymbolScope::Global, 0)));
        // No capture happened.
        let (free, _) = table.leave_scope();
        assert!(free.is_empty());
    }

    #[test]
    fn test_shadowing_in_inner_scope() {
        let mut table = SymbolTable::new();
        table.define("x");
        table.enter_scope();
        table.define("x");

        assert_eq!(table.resolve("x"), Some(sym("x", SymbolScope::Local, 0)));
    }

    #[test]
    fn test_resolve_promotes_outer_local_to_free() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("a");

        table.enter_scope();
        assert_eq!(table.resolve("a"), Some(sym("a", SymbolScope::Free, 0)));

        let (free, _) = table.leave_scope();
        // The free list records the binding as seen by the enclosing scope.
        assert_eq!(free, vec![sym("a", SymbolScope::Local, 0)]);
    }

    #[test]
    fn test_repeated_resolution_dedupes() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("a");

        table.enter_scope();
        let first = table.resolve("a").unwrap();
        let second = table.resolve("a").unwrap();
        assert_eq!(first, second);

        let (free, _) = table.leave_scope();
        assert_eq!(free.len(), 1);
    }

    #[test]
    fn test_capture_across_two_levels() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("a");

        table.enter_scope(); // middle
        table.enter_scope(); // innermost

        assert_eq!(table.resolve("a"), Some(sym("a", SymbolScope::Free, 0)));

        // The innermost scope captured from the middle scope's perspective...
        let (inner_free, _) = table.leave_scope();
        assert_eq!(inner_free, vec![sym("a", SymbolScope::Free, 0)]);

        // ...and the middle scope was itself promoted against the outer local.
        let (middle_free, _) = table.leave_scope();
        assert_eq!(middle_free, vec![sym("a", SymbolScope::Local, 0)]);
    }

    #[test]
    fn test_leave_scope_reports_definition_count() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.define("a");
        table.define("b");
        table.forget("b");

        let (_, num_definitions) = table.leave_scope();
        // Forgetting does not reclaim slots.
        assert_eq!(num_definitions, 2);
    }

    #[test]
    fn test_forget_makes_name_unresolvable() {
        let mut table = SymbolTable::new();
        table.define("i");
        table.forget("i");
        assert_eq!(table.resolve("i"), None);
    }

    #[test]
    fn test_leave_root_scope_is_noop() {
        let mut table = SymbolTable::new();
        table.define("a");
        let (free, count) = table.leave_scope();
        assert!(free.is_empty());
        assert_eq!(count, 0);
        // The root scope is still usable.
        assert!(table.resolve("a").is_some());
    }
}
