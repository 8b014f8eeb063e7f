use lapis_ast::Span;
use smol_str::SmolStr;
use std::fmt;
use thiserror::Error;

/// A diagnostic produced during type inference. Kinds are stable so
/// tests can match on them; the rendered message carries the details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
    /// Secondary locations, each with a short label.
    pub secondary: Vec<(String, Span)>,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.span.start, self.span.end, self.kind)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeErrorKind {
    #[error("cannot unify {a} and {b}")]
    TypeMismatch { a: String, b: String },
    #[error("{ty} does not have sort {sort}")]
    SortMismatch { ty: String, sort: String },
    #[error("recursive unification: {var} occurs in {ty}")]
    RecursiveUnification { var: String, ty: String },
    #[error("attempt to type identifier referring to unexpected node")]
    UnexpectedReferent,
    #[error("identifier has no referenced declaration")]
    UnresolvedReference,
    #[error("recursion during type class instantiation")]
    RecursiveInstantiation,
    #[error("function in type class may only depend on the type class variable")]
    ClassMethodVariables,
    #[error("function in type class declared multiple times")]
    DuplicateMethod { name: SmolStr },
    #[error("duplicate definition of function {name} during type class instantiation")]
    DuplicateMember { name: SmolStr },
    #[error("duplicate instantiation of {class} for {constructor}")]
    DuplicateInstance { class: SmolStr, constructor: SmolStr },
    #[error("{message}")]
    ClassDeclaration { message: String },
    #[error("{message}")]
    Instantiation { message: String },
    #[error("invalid number literal")]
    InvalidLiteral,
    #[error("only number literals are supported")]
    UnsupportedLiteral,
    #[error("unsupported AST node during type inference")]
    UnsupportedNode,
    #[error("{construct} not supported in {context} context")]
    BadContext {
        construct: &'static str,
        context: &'static str,
    },
    #[error("multi variable declaration not supported")]
    MultiVariableDeclaration,
    #[error("no type constructor registered for the declaration")]
    UnregisteredType,
    #[error("unregistered type class")]
    UnregisteredClass,
    #[error("expected type class")]
    ExpectedClass,
    #[error("invalid type constructor")]
    InvalidConstructor,
    #[error("no class function registered for the operator")]
    UnsupportedOperator,
    #[error("member {name} not found")]
    MemberNotFound { name: SmolStr },
    #[error("member access on an expression that is not a type constant")]
    InvalidMemberAccess,
}

/// Marker returned by the fatal reporting path; unwinds the walker via
/// `?` without unwinding the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalError;

/// Collects diagnostics for one analysis pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<TypeError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_error(&mut self, span: Span, kind: TypeErrorKind) {
        self.errors.push(TypeError {
            kind,
            span,
            secondary: Vec::new(),
        });
    }

    pub fn type_error_with(
        &mut self,
        span: Span,
        secondary: Vec<(String, Span)>,
        kind: TypeErrorKind,
    ) {
        self.errors.push(TypeError {
            kind,
            span,
            secondary,
        });
    }

    /// Record a diagnostic that aborts the pass.
    #[must_use]
    pub fn fatal_type_error(&mut self, span: Span, kind: TypeErrorKind) -> FatalError {
        self.type_error(span, kind);
        FatalError
    }

    #[must_use]
    pub fn fatal_type_error_with(
        &mut self,
        span: Span,
        secondary: Vec<(String, Span)>,
        kind: TypeErrorKind,
    ) -> FatalError {
        self.type_error_with(span, secondary, kind);
        FatalError
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[TypeError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<TypeError> {
        self.errors
    }
}
