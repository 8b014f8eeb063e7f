//! The annotation produced by the type registration pass, consumed here.
//! Registration runs before inference: it assigns constructor identities
//! to constructor-bearing declarations, declares the classes backing
//! built-in operators and literals, and indexes the instantiations of
//! every class so the inference pass can visit them on demand.

use la_arena::ArenaMap;
use lapis_ast::{BinaryOperator, BuiltinClass, NodeId};
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};

use crate::env::TypeEnvironment;
use crate::registry::TypeRegistry;
use crate::types::{Sort, Type, TypeClassId, TypeConstructor};

#[derive(Debug, Default)]
pub struct Registration {
    /// Constructor identity per constructor-bearing node (type
    /// definitions, class declarations, builtin type names).
    pub type_constructors: ArenaMap<NodeId, TypeConstructor>,
    /// Term-context binary operators, each backed by a class function.
    pub operators: HashMap<BinaryOperator, (TypeClassId, SmolStr)>,
    pub builtin_classes: HashMap<BuiltinClass, TypeClassId>,
    pub builtin_classes_by_name: HashMap<SmolStr, BuiltinClass>,
    /// Known instantiations per class declaration, by target constructor.
    pub instantiations: HashMap<NodeId, BTreeMap<TypeConstructor, NodeId>>,
    /// Same, for the built-in classes that have no declaration node.
    pub builtin_instantiations: HashMap<BuiltinClass, BTreeMap<TypeConstructor, NodeId>>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the class backing a built-in token and record it under
    /// the token and its name. The operator classes carry one binary
    /// function each; comparison classes return bool, the arithmetic
    /// ones the class variable itself.
    pub fn declare_builtin_class(
        &mut self,
        registry: &mut TypeRegistry,
        env: &mut TypeEnvironment,
        builtin: BuiltinClass,
    ) -> Result<TypeClassId, String> {
        let variable = env.fresh_var(Sort::empty());
        let binary = |result: Type| {
            Type::function(Type::tuple(vec![variable.clone(), variable.clone()]), result)
        };

        let mut methods = BTreeMap::new();
        match builtin {
            BuiltinClass::Integer => {}
            BuiltinClass::Mul => {
                methods.insert(SmolStr::new_static("mul"), binary(variable.clone()));
            }
            BuiltinClass::Add => {
                methods.insert(SmolStr::new_static("add"), binary(variable.clone()));
            }
            BuiltinClass::Equal => {
                methods.insert(SmolStr::new_static("eq"), binary(Type::bool()));
            }
            BuiltinClass::Less => {
                methods.insert(SmolStr::new_static("lt"), binary(Type::bool()));
            }
            BuiltinClass::LessOrEqual => {
                methods.insert(SmolStr::new_static("leq"), binary(Type::bool()));
            }
            BuiltinClass::Greater => {
                methods.insert(SmolStr::new_static("gt"), binary(Type::bool()));
            }
            BuiltinClass::GreaterOrEqual => {
                methods.insert(SmolStr::new_static("geq"), binary(Type::bool()));
            }
        }

        let name = SmolStr::new_static(builtin.name());
        let class = registry.declare_type_class(env, variable, methods, name.clone(), None)?;
        self.builtin_classes.insert(builtin, class);
        self.builtin_classes_by_name.insert(name, builtin);
        Ok(class)
    }

    /// Register a term-context operator as a class function.
    pub fn register_operator(
        &mut self,
        operator: BinaryOperator,
        class: TypeClassId,
        function: &str,
    ) {
        self.operators.insert(operator, (class, SmolStr::new(function)));
    }
}
