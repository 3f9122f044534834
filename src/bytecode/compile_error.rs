/// An error raised while lowering an AST to bytecode. Compilation of the
/// current unit stops at the first error; anything already emitted for that
/// unit is discarded wholesale by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A name was referenced that is neither declared nor a builtin.
    UndefinedVariable { name: String },
    /// A plain or indexed assignment targeted a name that was never declared.
    UndeclaredAssignment { name: String },
    /// An infix or prefix operator with no bytecode mapping.
    UnknownOperator { operator: String },
    /// Assignment to a name that resolves to a captured free variable. The
    /// instruction set has no write-through-capture form.
    CapturedAssignment { name: String },
    /// Internal compiler error (shouldn't happen in normal use).
    Internal(String),
}

impl CompileError {
    pub fn undefined_variable(name: impl Into<String>) -> Self {
        CompileError::UndefinedVariable { name: name.into() }
    }

    pub fn undeclared_assignment(name: impl Into<String>) -> Self {
        CompileError::UndeclaredAssignment { name: name.into() }
    }

    pub fn unknown_operator(operator: impl Into<String>) -> Self {
        CompileError::UnknownOperator {
            operator: operator.into(),
        }
    }

    pub fn captured_assignment(name: impl Into<String>) -> Self {
        CompileError::CapturedAssignment { name: name.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::UndefinedVariable { name } => {
                write!(f, "compile error: undefined variable '{}'", name)?;
                write!(f, "\n  hint: declare it first with 'let {} = ...'", name)
            }
            CompileError::UndeclaredAssignment { name } => {
                write!(
                    f,
                    "compile error: cannot assign to undeclared variable '{}'",
                    name
                )
            }
            CompileError::UnknownOperator { operator } => {
                write!(f, "compile error: unknown operator '{}'", operator)
            }
            CompileError::CapturedAssignment { name } => {
                write!(
                    f,
                    "compile error: cannot assign to captured variable '{}'",
                    name
                )
            }
            CompileError::Internal(msg) => {
                write!(f, "compile error: internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CompileError {}
