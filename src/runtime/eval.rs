use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use crate::frontend::token::TokenKind;
use crate::lang::ast::{Block, Expression, Program, Statement};
use crate::lang::builtins;
use crate::lang::object::{Env, Function, HashKey, HashPair, Object};

// =============================================================================
// EVAL - direct AST interpretation
// =============================================================================
//
// A second, much slower engine that walks the AST instead of compiling it.
// It exists for comparison and testing; the bytecode VM is the production
// path, and the loop/assignment forms are only supported there.

pub struct Evaluator {
    output: Box<dyn Write>,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            output: Box::new(io::stdout()),
        }
    }

    pub fn with_output(output: Box<dyn Write>) -> Self {
        Evaluator { output }
    }

    pub fn eval_program(&mut self, program: &Program, env: &Env) -> Object {
        let mut result = Object::Null;
        for statement in &program.statements {
            result = self.eval_statement(statement, env);
            match result {
                Object::Return(value) => return *value,
                Object::Error(_) => return result,
                _ => {}
            }
        }
        result
    }

    fn eval_statement(&mut self, statement: &Statement, env: &Env) -> Object {
        match statement {
            Statement::Let { name, value, .. } => {
                let value = self.eval_expression(value, env);
                if value.is_error() {
                    return value;
                }
                env.set(name.name.clone(), value);
                Object::Null
            }
            Statement::Return { value, .. } => {
                let value = self.eval_expression(value, env);
                if value.is_error() {
                    return value;
                }
                Object::Return(Box::new(value))
            }
            Statement::Expression { expression, .. } => self.eval_expression(expression, env),
        }
    }

    fn eval_block(&mut self, block: &Block, env: &Env) -> Object {
        let mut result = Object::Null;
        for statement in &block.statements {
            result = self.eval_statement(statement, env);
            // Return wrappers bubble unopened so outer blocks keep
            // unwinding; errors bubble the same way.
            if matches!(result, Object::Return(_) | Object::Error(_)) {
                return result;
            }
        }
        result
    }

    fn eval_expression(&mut self, expression: &Expression, env: &Env) -> Object {
        match expression {
            Expression::IntegerLiteral { value, .. } => Object::Integer(*value),
            Expression::StringLiteral { value, .. } => Object::str(value.clone()),
            Expression::BoolLiteral { value, .. } => Object::Bool(*value),
            Expression::Identifier(ident) => match env.get(&ident.name) {
                Some(value) => value,
                None => match builtins::lookup(&ident.name) {
                    Some(index) => Object::Builtin(index),
                    None => Object::Null,
                },
            },
            Expression::Prefix { token, right } => {
                let right = self.eval_expression(right, env);
                if right.is_error() {
                    return right;
                }
                self.eval_prefix(token.kind, right)
            }
            Expression::Infix { token, left, right } => {
                let left = self.eval_expression(left, env);
                if left.is_error() {
                    return left;
                }
                let right = self.eval_expression(right, env);
                if right.is_error() {
                    return right;
                }
                self.eval_infix(token.kind, left, right)
            }
            Expression::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                let condition = self.eval_expression(condition, env);
                if condition.is_error() {
                    return condition;
                }
                if is_truthy(&condition) {
                    self.eval_block(consequence, env)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative, env)
                } else {
                    Object::Null
                }
            }
            Expression::FunctionLiteral {
                name, params, body, ..
            } => {
                let function = Object::Function(Rc::new(Function {
                    params: params.clone(),
                    body: body.clone(),
                    env: env.clone(),
                }));
                if let Some(name) = name {
                    env.set(name.name.clone(), function.clone());
                }
                function
            }
            Expression::Call { function, args, .. } => {
                let callee = self.eval_expression(function, env);
                if callee.is_error() {
                    return callee;
                }
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.eval_expression(arg, env);
                    if value.is_error() {
                        return value;
                    }
                    evaluated.push(value);
                }
                self.apply(callee, evaluated)
            }
            Expression::ArrayLiteral { elements, .. } => {
                let mut evaluated = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.eval_expression(element, env);
                    if value.is_error() {
                        return value;
                    }
                    evaluated.push(value);
                }
                Object::array(evaluated)
            }
            Expression::HashLiteral { pairs, .. } => self.eval_hash(pairs, env),
            Expression::Index { left, index, .. } => {
                let base = self.eval_expression(left, env);
                if base.is_error() {
                    return base;
                }
                let index = self.eval_expression(index, env);
                if index.is_error() {
                    return index;
                }
                eval_index(base, index)
            }
            Expression::Assign { .. } => {
                Object::Error("assignment is not supported by the tree-walking evaluator".into())
            }
            Expression::Suffix { .. } => {
                Object::Error("suffix steps are not supported by the tree-walking evaluator".into())
            }
            Expression::For { .. } => {
                Object::Error("loops are not supported by the tree-walking evaluator".into())
            }
        }
    }

    fn eval_prefix(&mut self, operator: TokenKind, value: Object) -> Object {
        match operator {
            TokenKind::Bang => match value {
                Object::Bool(b) => Object::Bool(!b),
                Object::Null => Object::Bool(true),
                _ => Object::Bool(false),
            },
            TokenKind::Minus => match value {
                Object::Integer(n) => Object::Integer(-n),
                other => Object::Error(format!(
                    "cannot negate a value of type {}",
                    other.type_name()
                )),
            },
            other => Object::Error(format!("unknown prefix operator '{}'", other)),
        }
    }

    fn eval_infix(&mut self, operator: TokenKind, left: Object, right: Object) -> Object {
        match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => match operator {
                TokenKind::Plus => Object::Integer(l + r),
                TokenKind::Minus => Object::Integer(l - r),
                TokenKind::Asterisk => Object::Integer(l * r),
                TokenKind::Slash => {
                    if *r == 0 {
                        Object::Error("division by zero".into())
                    } else {
                        Object::Integer(l / r)
                    }
                }
                TokenKind::Lt => Object::Bool(l < r),
                TokenKind::Gt => Object::Bool(l > r),
                TokenKind::Eq => Object::Bool(l == r),
                TokenKind::NotEq => Object::Bool(l != r),
                other => Object::Error(format!("unknown operator '{}'", other)),
            },
            (Object::Str(l), Object::Str(r)) => match operator {
                TokenKind::Plus => Object::str(format!("{}{}", l, r)),
                TokenKind::Eq => Object::Bool(l == r),
                TokenKind::NotEq => Object::Bool(l != r),
                _ => Object::Error("strings only support the '+' operator".into()),
            },
            (Object::Bool(l), Object::Bool(r)) => match operator {
                TokenKind::Eq => Object::Bool(l == r),
                TokenKind::NotEq => Object::Bool(l != r),
                other => Object::Error(format!("unknown operator '{}' for booleans", other)),
            },
            _ => Object::Error(format!(
                "operand type mismatch: {} and {}",
                left.type_name(),
                right.type_name()
            )),
        }
    }

    fn eval_hash(&mut self, pairs: &[(Expression, Expression)], env: &Env) -> Object {
        let mut map = HashMap::new();
        for (key_expression, value_expression) in pairs {
            let key = self.eval_expression(key_expression, env);
            if key.is_error() {
                return key;
            }
            let value = self.eval_expression(value_expression, env);
            if value.is_error() {
                return value;
            }
            let hashed = match HashKey::from_object(&key) {
                Some(hashed) => hashed,
                None => {
                    return Object::Error(format!(
                        "unusable as a hash key: {}",
                        key.type_name()
                    ));
                }
            };
            map.insert(hashed, HashPair { key, value });
        }
        Object::Hash(Rc::new(RefCell::new(map)))
    }

    fn apply(&mut self, callee: Object, args: Vec<Object>) -> Object {
        match callee {
            Object::Function(function) => {
                if args.len() != function.params.len() {
                    return Object::Error(format!(
                        "wrong number of arguments: expected {}, got {}",
                        function.params.len(),
                        args.len()
                    ));
                }
                let env = Env::enclosed(&function.env);
                for (param, value) in function.params.iter().zip(args) {
                    env.set(param.name.clone(), value);
                }
                let result = self.eval_block(&function.body, &env);
                match result {
                    Object::Return(value) => *value,
                    other => other,
                }
            }
            Object::Builtin(index) => match builtins::get(index) {
                Some(builtin) => (builtin.func)(&args, self.output.as_mut()),
                None => Object::Error("undefined builtin index".into()),
            },
            other => Object::Error(format!("cannot call a value of type {}", other.type_name())),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

/// Everything except false and null counts as true here; the bytecode VM's
/// jump test is stricter.
fn is_truthy(object: &Object) -> bool {
    !matches!(object, Object::Bool(false) | Object::Null)
}

fn eval_index(base: Object, index: Object) -> Object {
    match base {
        Object::Array(elements) => {
            let i = match index {
                Object::Integer(i) => i,
                other => {
                    return Object::Error(format!(
                        "array index must be an integer, got {}",
                        other.type_name()
                    ));
                }
            };
            let elements = elements.borrow();
            if i < 0 || i as usize >= elements.len() {
                return Object::Null;
            }
            elements[i as usize].clone()
        }
        Object::Hash(pairs) => match HashKey::from_object(&index) {
            Some(key) => pairs
                .borrow()
                .get(&key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Object::Null),
            None => Object::Null,
        },
        Object::Null => Object::Null,
        _ => Object::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn eval_source(input: &str) -> Object {
        let tokens = Lexer::new(input).tokenize().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        Evaluator::new().eval_program(&program, &Env::new())
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval_source("5;"), Object::Integer(5));
        assert_eq!(eval_source("2 + 3 * 4;"), Object::Integer(14));
        assert_eq!(eval_source("7 / 2;"), Object::Integer(3));
        assert_eq!(eval_source("\"a\" + \"b\";"), Object::str("ab"));
        assert_eq!(eval_source("true;"), Object::Bool(true));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_source("1 < 2;"), Object::Bool(true));
        assert_eq!(eval_source("1 == 2;"), Object::Bool(false));
        assert_eq!(eval_source("\"a\" == \"a\";"), Object::Bool(true));
        assert_eq!(eval_source("true != false;"), Object::Bool(true));
    }

    #[test]
    fn test_conditionals_use_loose_truthiness() {
        assert_eq!(eval_source("if (true) { 10 };"), Object::Integer(10));
        assert_eq!(eval_source("if (false) { 10 };"), Object::Null);
        // The evaluator treats any non-false, non-null condition as true.
        assert_eq!(eval_source("if (1) { 10 };"), Object::Integer(10));
        assert_eq!(
            eval_source("if (false) { 10 } else { 20 };"),
            Object::Integer(20)
        );
    }

    #[test]
    fn test_let_and_identifiers() {
        assert_eq!(eval_source("let a = 5; a + a;"), Object::Integer(10));
    }

    #[test]
    fn test_undefined_identifier_is_null() {
        assert_eq!(eval_source("missing;"), Object::Null);
    }

    #[test]
    fn test_return_unwinds_blocks() {
        assert_eq!(
            eval_source("if (true) { if (true) { return 1; }; return 2; };"),
            Object::Integer(1)
        );
    }

    #[test]
    fn test_functions_and_closures() {
        assert_eq!(
            eval_source("let f = fun(x) { return x + 5; }; f(5);"),
            Object::Integer(10)
        );
        assert_eq!(
            eval_source("fun(x) { return x + 5; }(5);"),
            Object::Integer(10)
        );
        assert_eq!(
            eval_source(
                "let outer = fun(x) { return fun(y) { return x + y; }; }; outer(5)(10);"
            ),
            Object::Integer(15)
        );
    }

    #[test]
    fn test_named_function_binds_itself() {
        assert_eq!(
            eval_source(
                "fun fact(n) { if (n < 2) { return 1; }; return n * fact(n - 1); }; fact(5);"
            ),
            Object::Integer(120)
        );
    }

    #[test]
    fn test_call_arity_mismatch() {
        let result = eval_source("let f = fun(a) { a; }; f();");
        assert!(result.is_error());
    }

    #[test]
    fn test_arrays_and_indexing() {
        assert_eq!(eval_source("[1, 2, 3][1];"), Object::Integer(2));
        assert_eq!(eval_source("[1][9];"), Object::Null);
        assert_eq!(eval_source("{\"k\": 7}[\"k\"];"), Object::Integer(7));
        assert_eq!(eval_source("{1: 1}[2];"), Object::Null);
    }

    #[test]
    fn test_builtins_are_reachable() {
        assert_eq!(eval_source("len(\"abc\");"), Object::Integer(3));
        assert_eq!(eval_source("str_rev(\"abc\");"), Object::str("cba"));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        assert!(eval_source("1 + \"a\";").is_error());
        assert!(eval_source("1 / 0;").is_error());
    }

    #[test]
    fn test_errors_stop_evaluation() {
        // The error from the first statement surfaces; the second never runs.
        assert!(eval_source("1 + \"a\"; 42;").is_error());
    }

    #[test]
    fn test_bytecode_only_constructs_are_errors() {
        assert!(eval_source("let a = 1; a = 2;").is_error());
        assert!(eval_source("for (let i = 0; i < 3; i++) { };").is_error());
    }

    #[test]
    fn test_output_capture() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Clone, Default)]
        struct SharedBuffer(Rc<RefCell<Vec<u8>>>);
        impl Write for SharedBuffer {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buffer = SharedBuffer::default();
        let tokens = Lexer::new("println(\"x\", 1);").tokenize().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let mut evaluator = Evaluator::with_output(Box::new(buffer.clone()));
        evaluator.eval_program(&program, &Env::new());

        assert_eq!(String::from_utf8(buffer.0.borrow().clone()).unwrap(), "x1\n");
    }
}
