use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use crate::bytecode::compile::Bytecode;
use crate::bytecode::op::{Op, read_u16};
use crate::lang::builtins;
use crate::lang::object::{CompiledFunction, HashKey, HashPair, Object};
use crate::runtime::runtime_error::{
    RuntimeError, array_index_type, division_by_zero, index_write_out_of_range,
    indexed_write_target, not_callable, not_indexable, ordering_requires_integers,
    stack_overflow, stack_underflow, string_operator, type_mismatch, unusable_hash_key,
    wrong_arity,
};

// =============================================================================
// VM - bytecode execution
// =============================================================================

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 2048;
pub const MAX_FRAMES: usize = 1024;

/// One active call: an instruction pointer into the function's stream and the
/// frame's local slots. Free values are read from the function itself.
#[derive(Debug)]
struct Frame {
    function: Rc<CompiledFunction>,
    ip: usize,
    locals: Vec<Object>,
}

impl Frame {
    fn new(function: Rc<CompiledFunction>) -> Self {
        let locals = vec![Object::Null; function.num_locals];
        Frame {
            function,
            ip: 0,
            locals,
        }
    }
}

/// The virtual machine. One VM executes one compiled program; after a fatal
/// error it is poisoned and a fresh VM must be built (optionally over the
/// same persistent globals).
pub struct Vm {
    constants: Vec<Object>,
    globals: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    frames: Vec<Frame>,
    errors: Vec<String>,
    failed: bool,
    output: Box<dyn Write>,
}

/// A fresh, fully null global slot array for a new session.
pub fn new_globals() -> Vec<Object> {
    vec![Object::Null; GLOBALS_SIZE]
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::with_state(bytecode, new_globals())
    }

    /// Run against the global slots of an ongoing session.
    pub fn with_state(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            ..CompiledFunction::default()
        };
        Vm {
            constants: bytecode.constants,
            globals,
            stack: vec![Object::Null; STACK_SIZE],
            sp: 0,
            frames: vec![Frame::new(Rc::new(main))],
            errors: Vec::new(),
            failed: false,
            output: Box::new(io::stdout()),
        }
    }

    /// Redirect builtin printing, e.g. into a buffer for tests.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = output;
        self
    }

    /// Hand the global slots back for the next unit of the session.
    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value most recently popped off the operand stack. After a balanced
    /// run this is the value of the last expression statement.
    pub fn last_popped(&self) -> Object {
        self.stack[self.sp].clone()
    }

    /// Execute until the outermost frame runs off the end of its stream.
    /// The first fatal error is recorded and aborts the run for good.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        if self.failed {
            return Err(RuntimeError::aggregate(&self.errors));
        }
        match self.execute() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.errors.push(err.message);
                self.failed = true;
                Err(RuntimeError::aggregate(&self.errors))
            }
        }
    }

    fn execute(&mut self) -> Result<(), RuntimeError> {
        loop {
            let (ip, end) = {
                let frame = self.current_frame();
                (frame.ip, frame.function.instructions.len())
            };

            if ip >= end {
                if self.frames.len() == 1 {
                    return Ok(());
                }
                // A body without an explicit return; the caller sees null.
                self.frames.pop();
                self.push(Object::Null)?;
                continue;
            }

            let byte = self.current_frame().function.instructions.as_bytes()[ip];
            let op = Op::from_byte(byte)
                .ok_or_else(|| RuntimeError::new(format!("undefined opcode {}", byte)))?;
            self.current_frame().ip += 1;

            match op {
                Op::Constant => {
                    let index = self.read_operand();
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or_else(|| RuntimeError::new("constant index out of range"))?;
                    self.push(constant)?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => self.binary_operation(op)?,
                Op::Pop => {
                    self.pop()?;
                }
                Op::True => self.push(Object::Bool(true))?,
                Op::False => self.push(Object::Bool(false))?,
                Op::Equal | Op::NotEqual | Op::GreaterThan | Op::LessThan => {
                    self.comparison(op)?
                }
                Op::Minus => {
                    let value = self.pop()?;
                    match value {
                        Object::Integer(n) => self.push(Object::Integer(-n))?,
                        other => {
                            return Err(RuntimeError::new(format!(
                                "cannot negate a value of type {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Op::Bang => {
                    let value = self.pop()?;
                    // false and null are falsy; every other value, of any
                    // type, negates to false.
                    let negated = match value {
                        Object::Bool(b) => !b,
                        Object::Null => true,
                        _ => false,
                    };
                    self.push(Object::Bool(negated))?;
                }
                Op::JumpNotTruthy => {
                    let target = self.read_operand();
                    let condition = self.pop()?;
                    // Only the true singleton falls through.
                    if condition != Object::Bool(true) {
                        self.current_frame().ip = target;
                    }
                }
                Op::Jump => {
                    let target = self.read_operand();
                    self.current_frame().ip = target;
                }
                Op::Null => self.push(Object::Null)?,
                Op::SetGlobal => {
                    let index = self.read_operand();
                    let value = self.pop()?;
                    *self.global_slot(index)? = value;
                }
                Op::GetGlobal => {
                    let index = self.read_operand();
                    let value = self.global_slot(index)?.clone();
                    self.push(value)?;
                }
                Op::DelGlobal => {
                    let index = self.read_operand();
                    *self.global_slot(index)? = Object::Null;
                }
                Op::SetLocal => {
                    let index = self.read_operand();
                    let value = self.pop()?;
                    *self.local_slot(index)? = value;
                }
                Op::GetLocal => {
                    let index = self.read_operand();
                    let value = self.local_slot(index)?.clone();
                    self.push(value)?;
                }
                Op::DelLocal => {
                    let index = self.read_operand();
                    *self.local_slot(index)? = Object::Null;
                }
                Op::GetFree => {
                    let index = self.read_operand();
                    let frame = self.current_frame();
                    let value = frame
                        .function
                        .free
                        .get(index)
                        .cloned()
                        .ok_or_else(|| RuntimeError::new("free slot out of range"))?;
                    self.push(value)?;
                }
                Op::Array => {
                    let count = self.read_operand();
                    let elements = self.take(count)?;
                    self.push(Object::array(elements))?;
                }
                Op::Hash => {
                    let count = self.read_operand();
                    let slots = self.take(count)?;
                    let hash = self.build_hash(slots)?;
                    self.push(hash)?;
                }
                Op::Index => {
                    let index = self.pop()?;
                    let base = self.pop()?;
                    let value = self.execute_index(base, index)?;
                    self.push(value)?;
                }
                Op::Call => {
                    let argc = self.read_operand();
                    self.call(argc)?;
                }
                Op::ReturnValue => {
                    let value = self.pop()?;
                    if self.return_to_caller(value)? {
                        return Ok(());
                    }
                }
                Op::Return => {
                    if self.return_to_caller(Object::Null)? {
                        return Ok(());
                    }
                }
                Op::Closure => {
                    let const_index = self.read_operand();
                    let free_count = self.read_operand();
                    self.load_closure(const_index, free_count)?;
                }
                Op::GetBuiltin => {
                    let index = self.read_operand();
                    builtins::get(index)
                        .ok_or_else(|| RuntimeError::new("undefined builtin index"))?;
                    self.push(Object::Builtin(index))?;
                }
                Op::SetIndexGlobal => {
                    let slot = self.read_operand();
                    let base = self.global_slot(slot)?.clone();
                    self.indexed_write(base)?;
                }
                Op::SetIndexLocal => {
                    let slot = self.read_operand();
                    let base = self.local_slot(slot)?.clone();
                    self.indexed_write(base)?;
                }
            }
        }
    }

    // =========================================================================
    // Stack and frame plumbing
    // =========================================================================

    fn current_frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("vm has no active frame")
    }

    /// Decode the two-byte operand at the instruction pointer and step past
    /// it.
    fn read_operand(&mut self) -> usize {
        let frame = self.current_frame();
        let operand = read_u16(&frame.function.instructions.as_bytes()[frame.ip..]) as usize;
        frame.ip += 2;
        operand
    }

    fn push(&mut self, object: Object) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(stack_overflow());
        }
        self.stack[self.sp] = object;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, RuntimeError> {
        if self.sp == 0 {
            return Err(stack_underflow());
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Pop `count` values, preserving their push order.
    fn take(&mut self, count: usize) -> Result<Vec<Object>, RuntimeError> {
        if self.sp < count {
            return Err(stack_underflow());
        }
        let taken = self.stack[self.sp - count..self.sp].to_vec();
        self.sp -= count;
        Ok(taken)
    }

    fn global_slot(&mut self, index: usize) -> Result<&mut Object, RuntimeError> {
        self.globals
            .get_mut(index)
            .ok_or_else(|| RuntimeError::new("global slot out of range"))
    }

    fn local_slot(&mut self, index: usize) -> Result<&mut Object, RuntimeError> {
        self.current_frame()
            .locals
            .get_mut(index)
            .ok_or_else(|| RuntimeError::new("local slot out of range"))
    }

    /// Pop the current frame and hand `value` to the caller. Returns true
    /// when the outermost frame returned, which halts the run with the value
    /// as the last popped element.
    fn return_to_caller(&mut self, value: Object) -> Result<bool, RuntimeError> {
        if self.frames.len() == 1 {
            self.push(value)?;
            self.pop()?;
            return Ok(true);
        }
        self.frames.pop();
        self.push(value)?;
        Ok(false)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn binary_operation(&mut self, op: Op) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => match op {
                Op::Add => Object::Integer(l + r),
                Op::Sub => Object::Integer(l - r),
                Op::Mul => Object::Integer(l * r),
                Op::Div => {
                    if *r == 0 {
                        return Err(division_by_zero());
                    }
                    Object::Integer(l / r)
                }
                _ => return Err(RuntimeError::new("unexpected arithmetic opcode")),
            },
            (Object::Str(l), Object::Str(r)) => {
                if op != Op::Add {
                    return Err(string_operator());
                }
                Object::str(format!("{}{}", l, r))
            }
            _ => return Err(type_mismatch(left.type_name(), right.type_name())),
        };

        self.push(result)
    }

    fn comparison(&mut self, op: Op) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match op {
            // Equality compares rendered values, whatever the types.
            Op::Equal => left.to_string() == right.to_string(),
            Op::NotEqual => left.to_string() != right.to_string(),
            Op::GreaterThan | Op::LessThan => match (&left, &right) {
                (Object::Integer(l), Object::Integer(r)) => {
                    if op == Op::GreaterThan {
                        l > r
                    } else {
                        l < r
                    }
                }
                _ => {
                    return Err(ordering_requires_integers(
                        left.type_name(),
                        right.type_name(),
                    ));
                }
            },
            _ => return Err(RuntimeError::new("unexpected comparison opcode")),
        };

        self.push(Object::Bool(result))
    }

    fn build_hash(&mut self, slots: Vec<Object>) -> Result<Object, RuntimeError> {
        let mut pairs = HashMap::new();
        for chunk in slots.chunks(2) {
            let (key, value) = match chunk {
                [key, value] => (key.clone(), value.clone()),
                _ => return Err(RuntimeError::new("dangling hash key without a value")),
            };
            let hashed = HashKey::from_object(&key)
                .ok_or_else(|| unusable_hash_key(key.type_name()))?;
            pairs.insert(hashed, HashPair { key, value });
        }
        Ok(Object::Hash(Rc::new(RefCell::new(pairs))))
    }

    fn execute_index(&mut self, base: Object, index: Object) -> Result<Object, RuntimeError> {
        match base {
            Object::Array(elements) => {
                let i = match index {
                    Object::Integer(i) => i,
                    other => return Err(array_index_type(other.type_name())),
                };
                let elements = elements.borrow();
                // Out-of-range reads are a defined value, not an error.
                if i < 0 || i as usize >= elements.len() {
                    return Ok(Object::Null);
                }
                Ok(elements[i as usize].clone())
            }
            Object::Hash(pairs) => {
                let key = match HashKey::from_object(&index) {
                    Some(key) => key,
                    None => return Ok(Object::Null),
                };
                Ok(pairs
                    .borrow()
                    .get(&key)
                    .map(|pair| pair.value.clone())
                    .unwrap_or(Object::Null))
            }
            other => Err(not_indexable(other.type_name())),
        }
    }

    /// `base[index] = value` with index and value on the stack. The array
    /// object is mutated in place; neither the slot nor the constant pool is
    /// rewritten, so every alias observes the write.
    fn indexed_write(&mut self, base: Object) -> Result<(), RuntimeError> {
        let index = self.pop()?;
        let value = self.pop()?;

        let elements = match &base {
            Object::Array(elements) => elements,
            other => return Err(indexed_write_target(other.type_name())),
        };
        let i = match index {
            Object::Integer(i) => i,
            other => return Err(array_index_type(other.type_name())),
        };

        let mut elements = elements.borrow_mut();
        if i < 0 || i as usize >= elements.len() {
            return Err(index_write_out_of_range(i, elements.len()));
        }
        elements[i as usize] = value;
        Ok(())
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.pop()?;
        match callee {
            Object::Builtin(index) => {
                let builtin = builtins::get(index)
                    .ok_or_else(|| RuntimeError::new("undefined builtin index"))?;
                let args = self.take(argc)?;
                let result = (builtin.func)(&args, self.output.as_mut());
                self.push(result)
            }
            Object::CompiledFunction(function) => {
                if argc != function.num_params {
                    return Err(wrong_arity(function.num_params, argc));
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(stack_overflow());
                }
                self.frames.push(Frame::new(function));
                Ok(())
            }
            other => Err(not_callable(other.type_name())),
        }
    }

    /// Pair the function template from the constant pool with the captured
    /// free values sitting on the stack.
    fn load_closure(&mut self, const_index: usize, free_count: usize) -> Result<(), RuntimeError> {
        let template = match self.constants.get(const_index) {
            Some(Object::CompiledFunction(function)) => Rc::clone(function),
            Some(other) => {
                return Err(RuntimeError::new(format!(
                    "closure template is a {}, not a function",
                    other.type_name()
                )));
            }
            None => return Err(RuntimeError::new("constant index out of range")),
        };

        let free = self.take(free_count)?;
        let closure = CompiledFunction {
            instructions: template.instructions.clone(),
            num_locals: template.num_locals,
            num_params: template.num_params,
            free,
        };
        self.push(Object::CompiledFunction(Rc::new(closure)))
    }
}
