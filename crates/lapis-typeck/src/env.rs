//! The type environment: fresh variable allocation, the substitution, and
//! structural unification. Unification collects failures into a list
//! instead of stopping at the first one, so the driver can decide whether
//! a sort mismatch is a real error or just an instantiation it has not
//! visited yet.

use std::collections::HashMap;

use crate::registry::TypeRegistry;
use crate::types::{Sort, Type, TypeVarId};

// ── Failures ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnificationFailure {
    /// Two constructor applications with different heads or arities.
    TypeMismatch { a: Type, b: Type },
    /// A constant that does not instantiate every class the variable's
    /// sort requires.
    SortMismatch { ty: Type, sort: Sort },
    /// Occurs-check violation.
    RecursiveUnification { var: Type, ty: Type },
}

// ── Environment ──────────────────────────────────────────────────

/// Substitution and sort tables, indexed densely by variable id.
#[derive(Debug, Default)]
pub struct TypeEnvironment {
    substitution: Vec<Option<Type>>,
    sorts: Vec<Sort>,
    /// Kind variables stand for the result of a type-level application
    /// while its constructor is still unknown.
    kind_vars: Vec<bool>,
}

impl TypeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_var(&mut self, sort: Sort) -> Type {
        self.alloc_var(sort, false)
    }

    pub fn fresh_kind_var(&mut self) -> Type {
        self.alloc_var(Sort::empty(), true)
    }

    fn alloc_var(&mut self, sort: Sort, kind: bool) -> Type {
        let id = self.substitution.len() as TypeVarId;
        self.substitution.push(None);
        self.sorts.push(sort);
        self.kind_vars.push(kind);
        Type::Var(id)
    }

    pub fn var_sort(&self, var: TypeVarId) -> &Sort {
        &self.sorts[var as usize]
    }

    pub fn is_kind_var(&self, var: TypeVarId) -> bool {
        self.kind_vars[var as usize]
    }

    /// Narrow a variable's sort by union. Used when a class declaration
    /// claims its abstraction variable.
    pub(crate) fn narrow_var_sort(&mut self, var: TypeVarId, sort: Sort) {
        self.sorts[var as usize] = self.sorts[var as usize].union(&sort);
    }

    /// Chase variable bindings and resolve sub-terms until the type
    /// mentions only unbound variables.
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(id) => match &self.substitution[*id as usize] {
                Some(target) => self.resolve(target),
                None => ty.clone(),
            },
            Type::Constant {
                constructor,
                arguments,
            } => Type::Constant {
                constructor: *constructor,
                arguments: arguments.iter().map(|a| self.resolve(a)).collect(),
            },
        }
    }

    /// The sort of a type under this environment: a variable's stored
    /// sort, or for a constant the union over all arities of its
    /// constructor whose argument sorts accept the arguments.
    pub fn sort_of(&self, ty: &Type, registry: &TypeRegistry) -> Sort {
        match &self.resolve(ty) {
            Type::Var(id) => self.sorts[*id as usize].clone(),
            Type::Constant {
                constructor,
                arguments,
            } => {
                let mut sort = Sort::empty();
                for (class, argument_sorts) in registry.arities_of(*constructor) {
                    let accepted = arguments.len() == argument_sorts.len()
                        && arguments.iter().zip(argument_sorts).all(|(arg, required)| {
                            self.sort_of(arg, registry).contains_all(required)
                        });
                    if accepted {
                        sort.classes.insert(class);
                    }
                }
                sort
            }
        }
    }

    /// Unbound variables of `ty`, in first-occurrence order, deduplicated.
    pub fn free_vars(&self, ty: &Type) -> Vec<TypeVarId> {
        let mut vars = Vec::new();
        self.collect_free_vars(&self.resolve(ty), &mut vars);
        vars
    }

    fn collect_free_vars(&self, ty: &Type, vars: &mut Vec<TypeVarId>) {
        match ty {
            Type::Var(id) => {
                if !vars.contains(id) {
                    vars.push(*id);
                }
            }
            Type::Constant { arguments, .. } => {
                for argument in arguments {
                    self.collect_free_vars(argument, vars);
                }
            }
        }
    }

    /// A fresh copy of `ty`: every unbound variable consistently renamed
    /// to a new variable with its own copy of the sort. This realises
    /// let-polymorphism when a polymorphic binding is referenced.
    pub fn fresh(&mut self, ty: &Type) -> Type {
        let resolved = self.resolve(ty);
        let mut mapping = HashMap::new();
        self.fresh_inner(&resolved, &mut mapping)
    }

    fn fresh_inner(&mut self, ty: &Type, mapping: &mut HashMap<TypeVarId, Type>) -> Type {
        match ty {
            Type::Var(id) => match mapping.get(id) {
                Some(renamed) => renamed.clone(),
                None => {
                    let sort = self.sorts[*id as usize].clone();
                    let kind = self.kind_vars[*id as usize];
                    let renamed = self.alloc_var(sort, kind);
                    mapping.insert(*id, renamed.clone());
                    renamed
                }
            },
            Type::Constant {
                constructor,
                arguments,
            } => Type::Constant {
                constructor: *constructor,
                arguments: arguments
                    .iter()
                    .map(|a| self.fresh_inner(a, mapping))
                    .collect(),
            },
        }
    }

    // ── Unification ──────────────────────────────────────────────

    /// Structural unification. Mutates the substitution for the parts
    /// that do unify and returns the failures for the parts that do not.
    pub fn unify(
        &mut self,
        a: &Type,
        b: &Type,
        registry: &TypeRegistry,
    ) -> Vec<UnificationFailure> {
        let mut failures = Vec::new();
        self.unify_inner(a, b, registry, &mut failures);
        failures
    }

    fn unify_inner(
        &mut self,
        a: &Type,
        b: &Type,
        registry: &TypeRegistry,
        failures: &mut Vec<UnificationFailure>,
    ) {
        let a = self.resolve(a);
        let b = self.resolve(b);

        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) => {
                if x != y {
                    self.merge_vars(*x, *y);
                }
            }

            (Type::Var(var), Type::Constant { .. }) => {
                self.bind(*var, &b, registry, failures);
            }

            (Type::Constant { .. }, Type::Var(var)) => {
                self.bind(*var, &a, registry, failures);
            }

            (
                Type::Constant {
                    constructor: c1,
                    arguments: a1,
                },
                Type::Constant {
                    constructor: c2,
                    arguments: a2,
                },
            ) => {
                if c1 == c2 && a1.len() == a2.len() {
                    for (x, y) in a1.iter().zip(a2.iter()) {
                        self.unify_inner(x, y, registry, failures);
                    }
                } else {
                    failures.push(UnificationFailure::TypeMismatch {
                        a: a.clone(),
                        b: b.clone(),
                    });
                }
            }
        }
    }

    /// Merge two unbound variables: the kept variable inherits the union
    /// of both sorts.
    fn merge_vars(&mut self, x: TypeVarId, y: TypeVarId) {
        let union = self.sorts[x as usize].union(&self.sorts[y as usize]);
        self.sorts[y as usize] = union;
        self.kind_vars[y as usize] |= self.kind_vars[x as usize];
        self.substitution[x as usize] = Some(Type::Var(y));
    }

    /// Bind an unbound variable to a constant, enforcing the occurs
    /// check and the variable's sort. A failed check records a failure
    /// and leaves the variable unbound, so a later retry can succeed
    /// once the missing instantiation exists.
    fn bind(
        &mut self,
        var: TypeVarId,
        ty: &Type,
        registry: &TypeRegistry,
        failures: &mut Vec<UnificationFailure>,
    ) {
        if self.occurs(var, ty) {
            failures.push(UnificationFailure::RecursiveUnification {
                var: Type::Var(var),
                ty: ty.clone(),
            });
            return;
        }
        let required = self.sorts[var as usize].clone();
        if !self.sort_of(ty, registry).contains_all(&required) {
            failures.push(UnificationFailure::SortMismatch {
                ty: ty.clone(),
                sort: required,
            });
            return;
        }
        self.substitution[var as usize] = Some(ty.clone());
    }

    /// Whether `var` occurs in `ty`. `ty` must already be resolved.
    fn occurs(&self, var: TypeVarId, ty: &Type) -> bool {
        match ty {
            Type::Var(id) => *id == var,
            Type::Constant { arguments, .. } => {
                arguments.iter().any(|a| self.occurs(var, a))
            }
        }
    }
}
