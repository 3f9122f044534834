use std::rc::Rc;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::{Instructions, Op, make};
use crate::bytecode::symbol::{Symbol, SymbolScope, SymbolTable};
use crate::frontend::token::TokenKind;
use crate::lang::ast::{Block, Expression, Program, Statement};
use crate::lang::builtins;
use crate::lang::object::{CompiledFunction, Object};

// =============================================================================
// COMPILER - single-pass AST to bytecode lowering
// =============================================================================

/// Stand-in operand for a forward jump. Always back-patched before the
/// enclosing construct finishes compiling.
const PLACEHOLDER_TARGET: usize = 0xFFFF;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    op: Op,
    pos: usize,
}

/// One function body under compilation. The compiler keeps a stack of these:
/// entering a function literal pushes a scope, leaving it pops the scope and
/// hands the finished instruction stream back.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

/// The compiled artifact: enough to execute or disassemble without the
/// originating AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

pub struct Compiler {
    constants: Vec<Object>,
    scopes: Vec<CompilationScope>,
    symbols: SymbolTable,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            constants: Vec::new(),
            scopes: vec![CompilationScope::default()],
            symbols: SymbolTable::new(),
        }
    }

    /// Continue a session: reuse the symbol table and constant pool left by
    /// a previous unit so its bindings stay visible.
    pub fn with_state(symbols: SymbolTable, constants: Vec<Object>) -> Self {
        Compiler {
            constants,
            scopes: vec![CompilationScope::default()],
            symbols,
        }
    }

    /// Lower a unit to bytecode. On error the unit's instructions must be
    /// discarded wholesale; they are never partially reusable.
    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    /// Hand the session state back for the next unit.
    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbols, self.constants)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Let { name, value, .. } => {
                let symbol = self.symbols.define(&name.name);
                self.compile_expression(value)?;
                self.emit_set(&symbol)?;
            }
            Statement::Return { value, .. } => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[]);
            }
            Statement::Expression { expression, .. } => {
                self.compile_expression(expression)?;
                // Assignments, suffix steps, function literals and loops
                // already leave nothing behind; everything else produced a
                // value that statement position must drop.
                match expression {
                    Expression::Assign { .. }
                    | Expression::Suffix { .. }
                    | Expression::FunctionLiteral { .. }
                    | Expression::For { .. } => {}
                    _ => {
                        self.emit(Op::Pop, &[]);
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::IntegerLiteral { value, .. } => {
                let index = self.add_constant(Object::Integer(*value));
                self.emit(Op::Constant, &[index]);
            }
            Expression::StringLiteral { value, .. } => {
                let index = self.add_constant(Object::str(value.clone()));
                self.emit(Op::Constant, &[index]);
            }
            Expression::BoolLiteral { value, .. } => {
                self.emit(if *value { Op::True } else { Op::False }, &[]);
            }
            Expression::Identifier(ident) => match self.symbols.resolve(&ident.name) {
                Some(symbol) => {
                    self.emit_get(&symbol);
                }
                // Unresolved names fall back to the builtin table before
                // failing.
                None => match builtins::lookup(&ident.name) {
                    Some(index) => {
                        self.emit(Op::GetBuiltin, &[index]);
                    }
                    None => return Err(CompileError::undefined_variable(&ident.name)),
                },
            },
            Expression::Prefix { token, right } => {
                self.compile_expression(right)?;
                match token.kind {
                    TokenKind::Bang => self.emit(Op::Bang, &[]),
                    TokenKind::Minus => self.emit(Op::Minus, &[]),
                    other => return Err(CompileError::unknown_operator(other.as_str())),
                };
            }
            Expression::Infix { token, left, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.emit_infix_operator(token.kind)?;
            }
            Expression::If {
                condition,
                consequence,
                alternative,
                ..
            } => self.compile_if(condition, consequence, alternative.as_ref())?,
            Expression::ArrayLiteral { elements, .. } => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()]);
            }
            Expression::HashLiteral { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2]);
            }
            Expression::Index { left, index, .. } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[]);
            }
            Expression::Assign { target, value } => self.compile_assign(target, value)?,
            Expression::FunctionLiteral {
                name, params, body, ..
            } => self.compile_function(name.as_ref(), params, body)?,
            Expression::Call { function, args, .. } => {
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.compile_expression(function)?;
                self.emit(Op::Call, &[args.len()]);
            }
            Expression::For {
                init,
                condition,
                increment,
                body,
                ..
            } => self.compile_for(init, condition, increment, body)?,
            Expression::Suffix { token, target } => {
                let symbol = self
                    .symbols
                    .resolve(&target.name)
                    .ok_or_else(|| CompileError::undeclared_assignment(&target.name))?;
                self.emit_get(&symbol);
                let one = self.add_constant(Object::Integer(1));
                self.emit(Op::Constant, &[one]);
                match token.kind {
                    TokenKind::PlusPlus => self.emit(Op::Add, &[]),
                    TokenKind::MinusMinus => self.emit(Op::Sub, &[]),
                    other => return Err(CompileError::unknown_operator(other.as_str())),
                };
                self.emit_set(&symbol)?;
            }
        }
        Ok(())
    }

    fn emit_infix_operator(&mut self, kind: TokenKind) -> Result<(), CompileError> {
        match kind {
            TokenKind::Plus => self.emit(Op::Add, &[]),
            TokenKind::Minus => self.emit(Op::Sub, &[]),
            TokenKind::Asterisk => self.emit(Op::Mul, &[]),
            TokenKind::Slash => self.emit(Op::Div, &[]),
            TokenKind::Eq => self.emit(Op::Equal, &[]),
            TokenKind::NotEq => self.emit(Op::NotEqual, &[]),
            TokenKind::Gt => self.emit(Op::GreaterThan, &[]),
            TokenKind::Lt => self.emit(Op::LessThan, &[]),
            other => return Err(CompileError::unknown_operator(other.as_str())),
        };
        Ok(())
    }

    /// A conditional is itself a value: each branch leaves exactly one value
    /// on the stack, with a missing alternative standing in for null.
    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<(), CompileError> {
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Op::JumpNotTruthy, &[PLACEHOLDER_TARGET]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Op::Pop) {
            self.remove_last_instruction();
        }

        let jump_over_alternative = self.emit(Op::Jump, &[PLACEHOLDER_TARGET]);
        self.change_operand(jump_not_truthy, self.current_instructions().len());

        match alternative {
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_instruction();
                }
            }
            None => {
                self.emit(Op::Null, &[]);
            }
        }
        self.change_operand(jump_over_alternative, self.current_instructions().len());

        Ok(())
    }

    /// `for (let i = ...; cond; step) { body }`. The induction variable is
    /// only visible inside the loop: its symbol is forgotten once the loop
    /// has been compiled.
    fn compile_for(
        &mut self,
        init: &Statement,
        condition: &Expression,
        increment: &Expression,
        body: &Block,
    ) -> Result<(), CompileError> {
        self.compile_statement(init)?;
        let loop_start = self.current_instructions().len();

        self.compile_expression(condition)?;
        let exit_jump = self.emit(Op::JumpNotTruthy, &[PLACEHOLDER_TARGET]);

        self.compile_block(body)?;
        self.compile_expression(increment)?;
        self.emit(Op::Jump, &[loop_start]);
        self.change_operand(exit_jump, self.current_instructions().len());

        match init {
            Statement::Let { name, .. } => self.symbols.forget(&name.name),
            _ => {
                return Err(CompileError::internal(
                    "loop initializer is not a let binding",
                ));
            }
        }
        Ok(())
    }

    /// Compile a function literal into a constant and emit the closure-load
    /// that captures its free variables at runtime.
    fn compile_function(
        &mut self,
        name: Option<&crate::lang::ast::Identifier>,
        params: &[crate::lang::ast::Identifier],
        body: &Block,
    ) -> Result<(), CompileError> {
        // A named function is bound in the enclosing scope before its body
        // compiles, so the body can call it recursively.
        let function_symbol = name.map(|ident| self.symbols.define(&ident.name));

        self.symbols.enter_scope();
        self.enter_scope();

        for param in params {
            self.symbols.define(&param.name);
        }
        // The prologue moves arguments from the operand stack into their
        // slots. Arguments pop right-to-left, so the stores run from the
        // last slot down.
        for index in (0..params.len()).rev() {
            self.emit(Op::SetLocal, &[index]);
        }

        self.compile_block(body)?;

        // A trailing statement pop becomes the implicit return of the last
        // expression; anything else still needs a bare return so the frame
        // always unwinds.
        if self.last_instruction_is(Op::Pop) {
            self.replace_last_with_return();
        }
        if !self.last_instruction_is(Op::ReturnValue) {
            self.emit(Op::Return, &[]);
        }

        let instructions = self.leave_scope();
        let (free, num_locals) = self.symbols.leave_scope();

        // Capture code runs in the enclosing scope, in first-promotion order.
        for symbol in &free {
            self.emit_get(symbol);
        }

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_params: params.len(),
            free: Vec::new(),
        };
        let index = self.add_constant(Object::CompiledFunction(Rc::new(function)));
        self.emit(Op::Closure, &[index, free.len()]);

        if let Some(symbol) = function_symbol {
            self.emit_set(&symbol)?;
        }
        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expression,
        value: &Expression,
    ) -> Result<(), CompileError> {
        match target {
            Expression::Identifier(ident) => {
                let symbol = self
                    .symbols
                    .resolve(&ident.name)
                    .ok_or_else(|| CompileError::undeclared_assignment(&ident.name))?;
                self.compile_expression(value)?;
                self.emit_set(&symbol)?;
            }
            Expression::Index { left, index, .. } => {
                let name = match left.as_ref() {
                    Expression::Identifier(ident) => &ident.name,
                    _ => {
                        return Err(CompileError::internal(
                            "indexed assignment base must be an identifier",
                        ));
                    }
                };
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::undeclared_assignment(name))?;

                self.compile_expression(value)?;
                self.compile_expression(index)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Op::SetIndexGlobal, &[symbol.index]),
                    SymbolScope::Local => self.emit(Op::SetIndexLocal, &[symbol.index]),
                    SymbolScope::Free => {
                        return Err(CompileError::captured_assignment(&symbol.name));
                    }
                };
            }
            _ => {
                return Err(CompileError::internal("invalid assignment target"));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit(&mut self, op: Op, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let pos = self.add_instruction(&instruction);

        let scope = self.current_scope();
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { op, pos });

        pos
    }

    fn emit_get(&mut self, symbol: &Symbol) -> usize {
        match symbol.scope {
            SymbolScope::Global => self.emit(Op::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Op::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Op::GetFree, &[symbol.index]),
        }
    }

    fn emit_set(&mut self, symbol: &Symbol) -> Result<usize, CompileError> {
        match symbol.scope {
            SymbolScope::Global => Ok(self.emit(Op::SetGlobal, &[symbol.index])),
            SymbolScope::Local => Ok(self.emit(Op::SetLocal, &[symbol.index])),
            SymbolScope::Free => Err(CompileError::captured_assignment(&symbol.name)),
        }
    }

    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    fn add_instruction(&mut self, bytes: &[u8]) -> usize {
        let instructions = &mut self.current_scope().instructions;
        let pos = instructions.len();
        instructions.0.extend_from_slice(bytes);
        pos
    }

    fn current_scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler has no active scope")
    }

    fn current_instructions(&self) -> &Instructions {
        &self
            .scopes
            .last()
            .expect("compiler has no active scope")
            .instructions
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        match self.scopes.last().and_then(|s| s.last) {
            Some(last) => last.op == op,
            None => false,
        }
    }

    fn remove_last_instruction(&mut self) {
        let scope = self.current_scope();
        if let Some(last) = scope.last {
            scope.instructions.0.truncate(last.pos);
            scope.last = scope.previous;
        }
    }

    fn replace_last_with_return(&mut self) {
        let scope = self.current_scope();
        if let Some(last) = &mut scope.last {
            let pos = last.pos;
            last.op = Op::ReturnValue;
            self.replace_instruction(pos, &make(Op::ReturnValue, &[]));
        }
    }

    fn replace_instruction(&mut self, pos: usize, bytes: &[u8]) {
        let instructions = &mut self.current_scope().instructions;
        instructions.0[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    /// Back-patch the operand of a previously emitted jump.
    fn change_operand(&mut self, pos: usize, operand: usize) {
        let byte = self.current_instructions().0[pos];
        let op = Op::from_byte(byte).expect("patching a non-instruction byte");
        self.replace_instruction(pos, &make(op, &[operand]));
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
    }

    fn leave_scope(&mut self) -> Instructions {
        self.scopes
            .pop()
            .expect("compiler has no scope to leave")
            .instructions
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
