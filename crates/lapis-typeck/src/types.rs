use smol_str::SmolStr;
use std::collections::BTreeSet;

// ── Types ────────────────────────────────────────────────────────

pub type TypeVarId = u32;

/// Identity of a constructor registered by the type registration pass
/// (user type definitions, type class declarations, elementary types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructorId(pub u32);

/// Identity of a declared type class; indexes the registry's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeClassId(pub u32);

/// A type constructor: a name with a fixed number of arguments whose
/// applications form types. Tuples are a constructor family, one per
/// length; the empty tuple is [`TypeConstructor::Unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeConstructor {
    /// `fn(args -> result)` — argument tuple and result.
    Function,
    /// `tfn(args => result)` — a constructor application described in
    /// type context.
    TypeFunction,
    Tuple(usize),
    Unit,
    Void,
    Word,
    Integer,
    Bool,
    Named(ConstructorId),
}

/// A type: either a unification variable or a constructor application.
/// Variables are compared by id; their sorts live in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Var(TypeVarId),
    Constant {
        constructor: TypeConstructor,
        arguments: Vec<Type>,
    },
}

impl Type {
    pub fn constant(constructor: TypeConstructor, arguments: Vec<Type>) -> Type {
        Type::Constant {
            constructor,
            arguments,
        }
    }

    pub fn unit() -> Type {
        Type::constant(TypeConstructor::Unit, vec![])
    }

    pub fn void() -> Type {
        Type::constant(TypeConstructor::Void, vec![])
    }

    pub fn word() -> Type {
        Type::constant(TypeConstructor::Word, vec![])
    }

    pub fn integer() -> Type {
        Type::constant(TypeConstructor::Integer, vec![])
    }

    pub fn bool() -> Type {
        Type::constant(TypeConstructor::Bool, vec![])
    }

    /// `fn(argument -> result)`.
    pub fn function(argument: Type, result: Type) -> Type {
        Type::constant(TypeConstructor::Function, vec![argument, result])
    }

    /// `tfn(argument => result)`.
    pub fn type_function(argument: Type, result: Type) -> Type {
        Type::constant(TypeConstructor::TypeFunction, vec![argument, result])
    }

    /// The canonical tuple of the given components: the empty tuple is
    /// the unit type and a singleton collapses to its component. A
    /// one-element tuple *constant* can still be built explicitly and is
    /// a different type from its element.
    pub fn tuple(mut components: Vec<Type>) -> Type {
        match components.len() {
            0 => Type::unit(),
            1 => components.remove(0),
            n => Type::constant(TypeConstructor::Tuple(n), components),
        }
    }

    pub fn as_var(&self) -> Option<TypeVarId> {
        match self {
            Type::Var(id) => Some(*id),
            Type::Constant { .. } => None,
        }
    }

    pub fn as_constant(&self) -> Option<(TypeConstructor, &[Type])> {
        match self {
            Type::Var(_) => None,
            Type::Constant {
                constructor,
                arguments,
            } => Some((*constructor, arguments)),
        }
    }

    /// Destructure a function type into `(argument, result)`.
    pub fn dest_function(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Constant {
                constructor: TypeConstructor::Function,
                arguments,
            } if arguments.len() == 2 => Some((&arguments[0], &arguments[1])),
            _ => None,
        }
    }

    /// Destructure a type-function into `(argument, result)`.
    pub fn dest_type_function(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Constant {
                constructor: TypeConstructor::TypeFunction,
                arguments,
            } if arguments.len() == 2 => Some((&arguments[0], &arguments[1])),
            _ => None,
        }
    }

    /// Components of the canonical tuple reading of this type: the unit
    /// type has none, a tuple constant its arguments, and anything else
    /// reads as the singleton of itself.
    pub fn tuple_components(&self) -> Vec<Type> {
        match self {
            Type::Constant {
                constructor: TypeConstructor::Unit,
                ..
            } => vec![],
            Type::Constant {
                constructor: TypeConstructor::Tuple(_),
                arguments,
            } => arguments.clone(),
            other => vec![other.clone()],
        }
    }
}

// ── Sorts ────────────────────────────────────────────────────────

/// A set of type classes constraining a type variable. "`t` has sort `S`"
/// means `t` is an instance of every class in `S`; sorts join by union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    pub classes: BTreeSet<TypeClassId>,
}

impl Sort {
    pub fn empty() -> Sort {
        Sort::default()
    }

    pub fn from_class(class: TypeClassId) -> Sort {
        let mut classes = BTreeSet::new();
        classes.insert(class);
        Sort { classes }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn union(&self, other: &Sort) -> Sort {
        Sort {
            classes: self.classes.union(&other.classes).copied().collect(),
        }
    }

    pub fn contains_all(&self, other: &Sort) -> bool {
        other.classes.is_subset(&self.classes)
    }
}

// ── Registry-facing records ──────────────────────────────────────

/// Per-constructor information kept by the registry.
#[derive(Debug, Clone)]
pub struct ConstructorInfo {
    pub name: SmolStr,
    /// Number of type arguments.
    pub arguments: usize,
    pub decl: Option<lapis_ast::NodeId>,
}

/// The claim that a constructor applied to arguments of the given sorts
/// is an instance of a class.
#[derive(Debug, Clone)]
pub struct Arity {
    pub argument_sorts: Vec<Sort>,
    pub class: TypeClassId,
}
