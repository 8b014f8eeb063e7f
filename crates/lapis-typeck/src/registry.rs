//! Constructor and type-class tables: class declaration, instantiation,
//! and the arity table unification consults for sort checks.

use std::collections::{BTreeMap, HashMap};

use lapis_ast::NodeId;
use smol_str::SmolStr;
use thiserror::Error;

use crate::env::TypeEnvironment;
use crate::types::{Arity, ConstructorId, ConstructorInfo, Sort, Type, TypeClassId, TypeConstructor};

// ── Class records ────────────────────────────────────────────────

/// A declared type class: the variable it abstracts over, its method
/// schemes (closed over that variable), and its origin.
#[derive(Debug, Clone)]
pub struct TypeClassInfo {
    pub type_variable: Type,
    pub methods: BTreeMap<SmolStr, Type>,
    pub name: SmolStr,
    pub decl: Option<NodeId>,
}

/// A recorded instantiation of a class for a constructor. Promissory
/// entries are published by the driver while the instantiation is still
/// being visited, so mutually dependent instantiations can see each
/// other; they are replaced on completion or retracted on failure.
#[derive(Debug, Clone)]
pub struct Instance {
    pub argument_sorts: Vec<Sort>,
    pub methods: BTreeMap<SmolStr, Type>,
    pub promissory: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("duplicate instantiation of {class} for {constructor}")]
    DuplicateInstance { class: SmolStr, constructor: SmolStr },
    #[error("instantiation does not define function {name}")]
    MissingMethod { name: SmolStr },
    #[error("function {name} is not part of the instantiated class")]
    UnknownMethod { name: SmolStr },
    #[error("type of function {name} does not match the declared type in the class")]
    MethodTypeMismatch { name: SmolStr },
    #[error("instantiated type is not a constructor application")]
    NotAConstant,
}

// ── Registry ─────────────────────────────────────────────────────

/// Shared tables of the analysis: registered constructors, declared type
/// classes, and the instance table. The registration pass pre-populates
/// constructors and built-in classes; the inference pass adds user
/// classes and instances.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    constructors: Vec<ConstructorInfo>,
    classes: Vec<TypeClassInfo>,
    class_names: HashMap<SmolStr, TypeClassId>,
    class_decls: HashMap<NodeId, TypeClassId>,
    instances: HashMap<(TypeClassId, TypeConstructor), Instance>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Constructors ─────────────────────────────────────────────

    pub fn register_constructor(
        &mut self,
        name: SmolStr,
        arguments: usize,
        decl: Option<NodeId>,
    ) -> ConstructorId {
        let id = ConstructorId(self.constructors.len() as u32);
        self.constructors.push(ConstructorInfo {
            name,
            arguments,
            decl,
        });
        id
    }

    pub fn constructor_arguments(&self, constructor: TypeConstructor) -> usize {
        match constructor {
            TypeConstructor::Function | TypeConstructor::TypeFunction => 2,
            TypeConstructor::Tuple(n) => n,
            TypeConstructor::Unit
            | TypeConstructor::Void
            | TypeConstructor::Word
            | TypeConstructor::Integer
            | TypeConstructor::Bool => 0,
            TypeConstructor::Named(id) => self.constructors[id.0 as usize].arguments,
        }
    }

    pub fn constructor_name(&self, constructor: TypeConstructor) -> SmolStr {
        match constructor {
            TypeConstructor::Function => SmolStr::new_static("fn"),
            TypeConstructor::TypeFunction => SmolStr::new_static("tfn"),
            TypeConstructor::Tuple(_) => SmolStr::new_static("tuple"),
            TypeConstructor::Unit => SmolStr::new_static("unit"),
            TypeConstructor::Void => SmolStr::new_static("void"),
            TypeConstructor::Word => SmolStr::new_static("word"),
            TypeConstructor::Integer => SmolStr::new_static("integer"),
            TypeConstructor::Bool => SmolStr::new_static("bool"),
            TypeConstructor::Named(id) => self.constructors[id.0 as usize].name.clone(),
        }
    }

    // ── Classes ──────────────────────────────────────────────────

    /// Register a new type class abstracting over `variable`. The
    /// variable's sort is narrowed to the new class, so the stored method
    /// schemes constrain their uses to instances of it.
    pub fn declare_type_class(
        &mut self,
        env: &mut TypeEnvironment,
        variable: Type,
        methods: BTreeMap<SmolStr, Type>,
        name: SmolStr,
        decl: Option<NodeId>,
    ) -> Result<TypeClassId, String> {
        let Some(var) = variable.as_var() else {
            return Err("type class variable must be a type variable".into());
        };
        if self.class_names.contains_key(&name) {
            return Err(format!("type class {name} is already declared"));
        }
        if let Some(decl) = decl {
            if self.class_decls.contains_key(&decl) {
                return Err(format!(
                    "declaration already registered as type class {name}"
                ));
            }
        }

        let class = TypeClassId(self.classes.len() as u32);
        env.narrow_var_sort(var, Sort::from_class(class));
        self.classes.push(TypeClassInfo {
            type_variable: variable,
            methods,
            name: name.clone(),
            decl,
        });
        self.class_names.insert(name, class);
        if let Some(decl) = decl {
            self.class_decls.insert(decl, class);
        }
        Ok(class)
    }

    pub fn class_info(&self, class: TypeClassId) -> &TypeClassInfo {
        &self.classes[class.0 as usize]
    }

    pub fn class_name(&self, class: TypeClassId) -> &SmolStr {
        &self.classes[class.0 as usize].name
    }

    pub fn class_decl(&self, class: TypeClassId) -> Option<NodeId> {
        self.classes[class.0 as usize].decl
    }

    /// The declared scheme of a class method, still closed over the
    /// class variable; callers refresh it before unifying.
    pub fn type_class_function(&self, class: TypeClassId, name: &str) -> Option<&Type> {
        self.classes[class.0 as usize].methods.get(name)
    }

    // ── Instances ────────────────────────────────────────────────

    /// Record that `constructed` is an instance of `arity.class`. The
    /// instance is entered into the table before its methods are
    /// checked, so method implementations may themselves rely on it.
    pub fn instantiate_class(
        &mut self,
        env: &mut TypeEnvironment,
        constructed: &Type,
        arity: Arity,
        method_impls: BTreeMap<SmolStr, Type>,
    ) -> Result<(), InstanceError> {
        let Some((constructor, _)) = constructed.as_constant() else {
            return Err(InstanceError::NotAConstant);
        };
        let class = arity.class;
        if self
            .instances
            .get(&(class, constructor))
            .is_some_and(|instance| !instance.promissory)
        {
            return Err(InstanceError::DuplicateInstance {
                class: self.class_name(class).clone(),
                constructor: self.constructor_name(constructor),
            });
        }

        self.instances.insert(
            (class, constructor),
            Instance {
                argument_sorts: arity.argument_sorts,
                methods: method_impls.clone(),
                promissory: false,
            },
        );

        let info = self.class_info(class).clone();
        let class_var = info
            .type_variable
            .as_var()
            .ok_or(InstanceError::NotAConstant)?;
        for (name, scheme) in &info.methods {
            let Some(implementation) = method_impls.get(name) else {
                return Err(InstanceError::MissingMethod { name: name.clone() });
            };
            let expected = substitute_var(&env.resolve(scheme), class_var, constructed);
            if !env.unify(&expected, implementation, self).is_empty() {
                return Err(InstanceError::MethodTypeMismatch { name: name.clone() });
            }
        }
        for name in method_impls.keys() {
            if !info.methods.contains_key(name) {
                return Err(InstanceError::UnknownMethod { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Publish the arity of an instantiation that is still being
    /// visited. No-op when a real instance already exists.
    pub fn promise_instance(
        &mut self,
        class: TypeClassId,
        constructor: TypeConstructor,
        argument_sorts: Vec<Sort>,
    ) {
        self.instances
            .entry((class, constructor))
            .or_insert_with(|| Instance {
                argument_sorts,
                methods: BTreeMap::new(),
                promissory: true,
            });
    }

    /// Drop a promissory entry that was never completed.
    pub fn retract_promise(&mut self, class: TypeClassId, constructor: TypeConstructor) {
        if self
            .instances
            .get(&(class, constructor))
            .is_some_and(|instance| instance.promissory)
        {
            self.instances.remove(&(class, constructor));
        }
    }

    pub fn has_instance(&self, class: TypeClassId, constructor: TypeConstructor) -> bool {
        self.instances.contains_key(&(class, constructor))
    }

    pub fn instance(
        &self,
        class: TypeClassId,
        constructor: TypeConstructor,
    ) -> Option<&Instance> {
        self.instances.get(&(class, constructor))
    }

    /// All arities claimed for a constructor: the classes it
    /// instantiates, with the argument sorts required by each.
    pub fn arities_of(
        &self,
        constructor: TypeConstructor,
    ) -> impl Iterator<Item = (TypeClassId, &Vec<Sort>)> {
        self.instances.iter().filter_map(move |((class, ctor), instance)| {
            (*ctor == constructor).then_some((*class, &instance.argument_sorts))
        })
    }

    // ── Rendering ────────────────────────────────────────────────

    pub fn type_to_string(&self, env: &TypeEnvironment, ty: &Type) -> String {
        self.render_type(&env.resolve(ty))
    }

    fn render_type(&self, ty: &Type) -> String {
        match ty {
            Type::Var(id) => format!("?{id}"),
            Type::Constant {
                constructor,
                arguments,
            } => match constructor {
                TypeConstructor::Function if arguments.len() == 2 => format!(
                    "fn({} -> {})",
                    self.render_type(&arguments[0]),
                    self.render_type(&arguments[1])
                ),
                TypeConstructor::TypeFunction if arguments.len() == 2 => format!(
                    "tfn({} => {})",
                    self.render_type(&arguments[0]),
                    self.render_type(&arguments[1])
                ),
                TypeConstructor::Tuple(_) => {
                    let parts: Vec<_> = arguments.iter().map(|a| self.render_type(a)).collect();
                    format!("({})", parts.join(", "))
                }
                TypeConstructor::Unit => "()".into(),
                _ if arguments.is_empty() => self.constructor_name(*constructor).to_string(),
                _ => {
                    let parts: Vec<_> = arguments.iter().map(|a| self.render_type(a)).collect();
                    format!("{}({})", self.constructor_name(*constructor), parts.join(", "))
                }
            },
        }
    }

    pub fn sort_to_string(&self, sort: &Sort) -> String {
        let parts: Vec<_> = sort
            .classes
            .iter()
            .map(|class| self.class_name(*class).to_string())
            .collect();
        format!("({})", parts.join(", "))
    }
}

/// Structural substitution of a single variable. Used to specialize a
/// class method scheme to the instantiated type without touching the
/// stored scheme.
fn substitute_var(ty: &Type, var: crate::types::TypeVarId, replacement: &Type) -> Type {
    match ty {
        Type::Var(id) if *id == var => replacement.clone(),
        Type::Var(_) => ty.clone(),
        Type::Constant {
            constructor,
            arguments,
        } => Type::Constant {
            constructor: *constructor,
            arguments: arguments
                .iter()
                .map(|a| substitute_var(a, var, replacement))
                .collect(),
        },
    }
}
