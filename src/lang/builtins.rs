use std::io::Write;

use crate::lang::object::Object;

/// A native operation. Builtins receive the evaluated arguments and the
/// engine's output sink; misuse is reported as an `Object::Error` value, not
/// as a fatal VM error.
pub type BuiltinFn = fn(&[Object], &mut dyn Write) -> Object;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// The builtin table. The order is part of the bytecode contract: the
/// compiler resolves names to positions in this table, and the VM resolves
/// the position back to the native operation at call time. Entries are only
/// ever appended.
pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        func: builtin_len,
    },
    Builtin {
        name: "println",
        func: builtin_println,
    },
    Builtin {
        name: "echo",
        func: builtin_echo,
    },
    Builtin {
        name: "put",
        func: builtin_put,
    },
    Builtin {
        name: "str_rev",
        func: builtin_str_rev,
    },
];

/// Resolve a builtin name to its stable table index.
pub fn lookup(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|b| b.name == name)
}

/// Resolve a stable index back to the builtin definition.
pub fn get(index: usize) -> Option<&'static Builtin> {
    BUILTINS.get(index)
}

fn wrong_arity(name: &str, expected: usize, got: usize) -> Object {
    Object::Error(format!(
        "wrong number of arguments: {} expects {}, got {}",
        name, expected, got
    ))
}

/// `len(x)`: the element count of an array or the character count of a
/// string.
fn builtin_len(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity("len", 1, args.len());
    }
    match &args[0] {
        Object::Str(s) => Object::Integer(s.chars().count() as i64),
        Object::Array(elements) => Object::Integer(elements.borrow().len() as i64),
        other => Object::Error(format!("len: unsupported argument type {}", other.type_name())),
    }
}

/// `println(a, b, ...)`: print the rendered arguments, concatenated, with a
/// trailing newline.
fn builtin_println(args: &[Object], out: &mut dyn Write) -> Object {
    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    writeln!(out, "{}", rendered.concat()).ok();
    Object::Null
}

/// `echo(x)`: print one rendered value with a trailing newline.
fn builtin_echo(args: &[Object], out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity("echo", 1, args.len());
    }
    writeln!(out, "{}", args[0]).ok();
    Object::Null
}

/// `put(arr, x)`: append `x` to the array and return the array itself. The
/// append is visible through every binding that shares the array.
fn builtin_put(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 2 {
        return wrong_arity("put", 2, args.len());
    }
    match &args[0] {
        Object::Array(elements) => {
            elements.borrow_mut().push(args[1].clone());
            args[0].clone()
        }
        other => Object::Error(format!("put: expected an array, got {}", other.type_name())),
    }
}

/// `str_rev(s)`: the string reversed, character by character.
fn builtin_str_rev(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity("str_rev", 1, args.len());
    }
    match &args[0] {
        Object::Str(s) => Object::str(s.chars().rev().collect::<String>()),
        other => Object::Error(format!(
            "str_rev: expected a string, got {}",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(index: usize, args: &[Object]) -> (Object, String) {
        let mut out = Vec::new();
        let result = (get(index).unwrap().func)(args, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_table_order_is_stable() {
        let names: Vec<&str> = BUILTINS.iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["len", "println", "echo", "put", "str_rev"]);
        assert_eq!(lookup("len"), Some(0));
        assert_eq!(lookup("str_rev"), Some(4));
        assert_eq!(lookup("missing"), None);
    }

    #[test]
    fn test_len() {
        let (result, _) = call(0, &[Object::str("abc")]);
        assert_eq!(result, Object::Integer(3));

        let (result, _) = call(
            0,
            &[Object::array(vec![Object::Integer(1), Object::Integer(2)])],
        );
        assert_eq!(result, Object::Integer(2));

        let (result, _) = call(0, &[Object::Integer(1)]);
        assert!(result.is_error());

        let (result, _) = call(0, &[]);
        assert!(result.is_error());
    }

    #[test]
    fn test_println_concatenates() {
        let (result, out) = call(1, &[Object::str("a"), Object::Integer(1)]);
        assert_eq!(result, Object::Null);
        assert_eq!(out, "a1\n");
    }

    #[test]
    fn test_echo() {
        let (result, out) = call(2, &[Object::Integer(7)]);
        assert_eq!(result, Object::Null);
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_put_appends_in_place() {
        let arr = Object::array(vec![Object::Integer(1)]);
        let (result, _) = call(3, &[arr.clone(), Object::Integer(2)]);

        // The returned value and the argument alias the same storage.
        assert_eq!(result, arr);
        assert_eq!(arr.to_string(), "[1,2]");
    }

    #[test]
    fn test_str_rev() {
        let (result, _) = call(4, &[Object::str("abc")]);
        assert_eq!(result, Object::str("cba"));

        let (result, _) = call(4, &[Object::Integer(1)]);
        assert!(result.is_error());
    }
}
