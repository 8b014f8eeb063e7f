use la_arena::ArenaMap;
use lapis_ast::NodeId;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};

use crate::env::TypeEnvironment;
use crate::error::TypeError;
use crate::infer::Annotation;
use crate::registry::TypeRegistry;
use crate::types::{Type, TypeConstructor};

/// A member reachable through a type constructor, e.g. a class function
/// or the `abs`/`rep` conversions of a type definition.
#[derive(Debug, Clone)]
pub struct TypeMember {
    pub ty: Type,
}

/// Everything the inference pass produces. Annotations persist for
/// downstream passes; the environment and registry carry the bindings
/// and instances they need to resolve the annotated types.
pub struct Inference {
    /// `true` iff no error was reported.
    pub success: bool,
    pub annotations: ArenaMap<NodeId, Annotation>,
    /// Per-constructor member tables.
    pub members: HashMap<TypeConstructor, BTreeMap<SmolStr, TypeMember>>,
    pub env: TypeEnvironment,
    pub registry: TypeRegistry,
    pub errors: Vec<TypeError>,
}
