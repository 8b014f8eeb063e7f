//! Type inference for the Lapis front-end.
//!
//! A Hindley-Milner-style engine extended with a sort discipline over
//! type variables: every variable carries a set of type classes, classes
//! are declared and instantiated in the source, and mutually dependent
//! instantiations are resolved on demand while unifying. The pass walks
//! a name-resolved [`lapis_ast::SourceUnit`], annotates every node with
//! its principal type, and returns the annotations together with the
//! final environment and registry.

pub mod asm;
pub mod env;
pub mod error;
pub mod infer;
pub mod literal;
pub mod registration;
pub mod registry;
pub mod result;
pub mod types;


pub use asm::{AsmAnalyzer, AsmRefContext, AsmResolver, ExternalsOnlyAnalyzer};
pub use env::{TypeEnvironment, UnificationFailure};
pub use error::{Diagnostics, FatalError, TypeError, TypeErrorKind};
pub use infer::{analyze, Annotation, ExpressionContext, TypeInference};
pub use registration::Registration;
pub use registry::{Instance, InstanceError, TypeClassInfo, TypeRegistry};
pub use result::{Inference, TypeMember};
pub use types::{
    Arity, ConstructorId, ConstructorInfo, Sort, Type, TypeClassId, TypeConstructor, TypeVarId,
};
