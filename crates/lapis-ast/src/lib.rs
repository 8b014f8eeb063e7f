//! Syntax tree for the Lapis front-end.
//!
//! Nodes live in a single arena so that every annotatable construct —
//! declarations, statements, parameter lists, expressions — shares one
//! identity space. Later passes attach their results in side-tables keyed
//! by [`NodeId`]; the tree itself stays immutable after parsing and name
//! resolution.

use la_arena::{Arena, Idx};
use smol_str::SmolStr;

// ── Spans ────────────────────────────────────────────────────────

/// Byte range in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ── ID types ─────────────────────────────────────────────────────

pub type NodeId = Idx<Node>;

// ── Source unit ──────────────────────────────────────────────────

/// A parsed, name-resolved source file.
#[derive(Debug, Clone, Default)]
pub struct SourceUnit {
    pub nodes: Arena<Node>,
    /// Top-level declarations in source order.
    pub top_level: Vec<NodeId>,
}

impl SourceUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.nodes.alloc(Node { kind, span })
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id].span
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

// ── Node kinds ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum NodeKind {
    FunctionDefinition(FunctionDefinition),
    ParameterList(ParameterList),
    Block(Block),
    Return(Return),
    VariableDeclarationStatement(VariableDeclarationStatement),
    VariableDeclaration(VariableDeclaration),
    TypeClassDefinition(TypeClassDefinition),
    TypeClassInstantiation(TypeClassInstantiation),
    TypeDefinition(TypeDefinition),
    Assignment(Assignment),
    Identifier(Identifier),
    IdentifierPath(IdentifierPath),
    TupleExpression(TupleExpression),
    BinaryOperation(BinaryOperation),
    FunctionCall(FunctionCall),
    MemberAccess(MemberAccess),
    InlineAssembly(InlineAssembly),
    Literal(Literal),
    BuiltinTypeName(BuiltinTypeName),
    Pragma(Pragma),
}

/// Function definition: `function name(params) -> (returns) { body }`.
/// Inside a type class declaration the body is absent.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: SmolStr,
    pub parameters: NodeId,
    pub return_parameters: Option<NodeId>,
    pub body: Option<NodeId>,
}

/// Parenthesized declaration list, used for function parameters, return
/// parameters, and type-definition arguments.
#[derive(Debug, Clone)]
pub struct ParameterList {
    pub parameters: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Return {
    pub expression: Option<NodeId>,
}

/// `let x: T = value;`
#[derive(Debug, Clone)]
pub struct VariableDeclarationStatement {
    pub declarations: Vec<NodeId>,
    pub initial_value: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub name: SmolStr,
    /// Optional type (in term context) or sort (in type context) expression.
    pub type_expression: Option<NodeId>,
}

/// `class a: Name { functions }` — declares a type class abstracting over
/// the declared type variable.
#[derive(Debug, Clone)]
pub struct TypeClassDefinition {
    pub name: SmolStr,
    /// The declared type variable (a `VariableDeclaration`).
    pub type_variable: NodeId,
    pub functions: Vec<NodeId>,
}

/// `instantiation Ctor(argument sorts): Class { functions }`.
#[derive(Debug, Clone)]
pub struct TypeClassInstantiation {
    pub class_name: ClassName,
    /// The node naming the target type constructor; the registration pass
    /// annotates it with the constructor identity.
    pub type_constructor: NodeId,
    pub argument_sorts: Option<NodeId>,
    pub functions: Vec<NodeId>,
}

/// A type class reference: either a path to a user declaration or a
/// built-in class token.
#[derive(Debug, Clone)]
pub enum ClassName {
    Path(NodeId),
    Builtin(BuiltinClass),
}

/// `type T(arguments) = underlying;`
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: SmolStr,
    pub arguments: Option<NodeId>,
    pub type_expression: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub left: NodeId,
    pub right: NodeId,
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: SmolStr,
    /// Populated by the name resolver.
    pub referenced_declaration: Option<NodeId>,
}

/// Dotted path, e.g. a qualified type class name.
#[derive(Debug, Clone)]
pub struct IdentifierPath {
    pub path: Vec<SmolStr>,
    pub referenced_declaration: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct TupleExpression {
    pub components: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct BinaryOperation {
    pub operator: BinaryOperator,
    pub left: NodeId,
    pub right: NodeId,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub callee: NodeId,
    pub arguments: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MemberAccess {
    pub expression: NodeId,
    pub member: SmolStr,
}

#[derive(Debug, Clone)]
pub struct InlineAssembly {
    pub block: AsmBlock,
}

#[derive(Debug, Clone)]
pub struct Literal {
    pub kind: LiteralKind,
    /// Raw token text, underscores included.
    pub value: SmolStr,
    pub sub_denomination: Option<SubDenomination>,
}

/// A built-in elementary type name used as an expression, e.g. `uint256`
/// or `word` in type context.
#[derive(Debug, Clone)]
pub struct BuiltinTypeName {
    pub name: SmolStr,
}

#[derive(Debug, Clone)]
pub struct Pragma {
    pub text: SmolStr,
}

// ── Tokens ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Sort ascription in type context.
    Colon,
    /// Function arrow in type context.
    RightArrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    String,
    Boolean,
}

/// Unit suffix on a number literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubDenomination {
    Wei,
    Gwei,
    Ether,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Year,
}

/// The type classes backing built-in operators and literals. The
/// registration pass declares these in the registry and keys them by this
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinClass {
    Integer,
    Mul,
    Add,
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl BuiltinClass {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinClass::Integer => "integer",
            BuiltinClass::Mul => "mul",
            BuiltinClass::Add => "add",
            BuiltinClass::Equal => "equal",
            BuiltinClass::Less => "less",
            BuiltinClass::LessOrEqual => "lessOrEqual",
            BuiltinClass::Greater => "greater",
            BuiltinClass::GreaterOrEqual => "greaterOrEqual",
        }
    }
}

// ── Inline assembly ──────────────────────────────────────────────

/// An inline assembly block. The sub-language is analyzed by a separate
/// collaborator; the inference pass only cares about references that
/// escape to declarations outside the block.
#[derive(Debug, Clone)]
pub struct AsmBlock {
    /// Opaque assembly text.
    pub code: SmolStr,
    pub external_references: Vec<AsmExternalRef>,
}

/// A reference from assembly code to a declaration outside the block,
/// resolved by the name resolver.
#[derive(Debug, Clone)]
pub struct AsmExternalRef {
    pub name: SmolStr,
    pub declaration: NodeId,
    pub is_assignment: bool,
    pub span: Span,
}
