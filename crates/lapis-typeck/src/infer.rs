//! The inference driver: a context-sensitive walk over the syntax tree
//! that assigns a principal type to every node, declares type classes
//! and their instantiations, and resolves interdependent instantiations
//! on demand during unification.

use la_arena::ArenaMap;
use num_bigint::BigInt;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use lapis_ast::{
    AsmExternalRef, Assignment, BinaryOperation, BinaryOperator, Block, BuiltinClass,
    BuiltinTypeName, ClassName, FunctionCall, FunctionDefinition, Identifier, IdentifierPath,
    InlineAssembly, Literal, LiteralKind, MemberAccess, NodeId, NodeKind, ParameterList, Return,
    SourceUnit, Span, TupleExpression, TypeClassDefinition, TypeClassInstantiation,
    TypeDefinition, VariableDeclaration, VariableDeclarationStatement,
};

use crate::asm::{AsmAnalyzer, AsmRefContext};
use crate::env::{TypeEnvironment, UnificationFailure};
use crate::error::{Diagnostics, FatalError, TypeErrorKind};
use crate::literal::rational_value;
use crate::registration::Registration;
use crate::registry::{InstanceError, TypeRegistry};
use crate::result::{Inference, TypeMember};
use crate::types::{Arity, Sort, Type, TypeClassId, TypeConstructor};

// ── Contexts and annotations ─────────────────────────────────────

/// The grammatical level an expression is read at. The same syntactic
/// forms occur at all three levels with different typing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionContext {
    Term,
    Type,
    Sort,
}

fn context_name(context: ExpressionContext) -> &'static str {
    match context {
        ExpressionContext::Term => "term",
        ExpressionContext::Type => "type",
        ExpressionContext::Sort => "sort",
    }
}

/// Per-node result of the pass. `ty` is present on every node visited
/// without a fatal error; the other fields are populated where they
/// apply.
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub ty: Option<Type>,
    /// On class definitions, the declared class.
    pub type_class: Option<TypeClassId>,
    /// On number literals, the evaluated value.
    pub literal_value: Option<BigInt>,
}

// ── Driver ───────────────────────────────────────────────────────

/// Run type inference over a name-resolved source unit. The registry
/// and environment arrive pre-populated by the registration pass and
/// are returned, extended, in the result.
pub fn analyze(
    unit: &SourceUnit,
    registration: &Registration,
    registry: TypeRegistry,
    env: TypeEnvironment,
    asm_analyzer: &mut dyn AsmAnalyzer,
) -> Inference {
    TypeInference::new(unit, registration, registry, env, asm_analyzer).run()
}

pub struct TypeInference<'a> {
    unit: &'a SourceUnit,
    registration: &'a Registration,
    registry: TypeRegistry,
    env: TypeEnvironment,
    diagnostics: Diagnostics,
    annotations: ArenaMap<NodeId, Annotation>,
    members: HashMap<TypeConstructor, BTreeMap<SmolStr, TypeMember>>,
    context: ExpressionContext,
    current_function_type: Option<Type>,
    /// Stack of instantiations currently being visited, innermost last;
    /// consulted when a sort mismatch may just mean an instantiation has
    /// not been seen yet. Each entry holds the instantiation's arity
    /// once it is known, so the driver can publish it as a promissory
    /// instance while other instantiations are resolved.
    active_instantiations: Vec<ActiveInstantiation>,
    asm_analyzer: Option<&'a mut dyn AsmAnalyzer>,
}

/// An instantiation that is still being visited.
#[derive(Debug, Clone)]
struct ActiveInstantiation {
    node: NodeId,
    arity: Option<ActiveArity>,
}

/// Class, target constructor, and argument sorts of an active
/// instantiation.
#[derive(Debug, Clone)]
struct ActiveArity {
    class: TypeClassId,
    constructor: TypeConstructor,
    argument_sorts: Vec<Sort>,
}

impl<'a> TypeInference<'a> {
    pub fn new(
        unit: &'a SourceUnit,
        registration: &'a Registration,
        registry: TypeRegistry,
        env: TypeEnvironment,
        asm_analyzer: &'a mut dyn AsmAnalyzer,
    ) -> Self {
        Self {
            unit,
            registration,
            registry,
            env,
            diagnostics: Diagnostics::new(),
            annotations: ArenaMap::default(),
            members: HashMap::new(),
            context: ExpressionContext::Term,
            current_function_type: None,
            active_instantiations: Vec::new(),
            asm_analyzer: Some(asm_analyzer),
        }
    }

    pub fn run(mut self) -> Inference {
        debug!(nodes = self.unit.nodes.len(), "running type inference");
        let top_level = self.unit.top_level.clone();
        for node in top_level {
            if self.visit(node).is_err() {
                break;
            }
        }
        Inference {
            success: !self.diagnostics.has_errors(),
            annotations: self.annotations,
            members: self.members,
            env: self.env,
            registry: self.registry,
            errors: self.diagnostics.into_errors(),
        }
    }

    // ── Node dispatch ────────────────────────────────────────────

    fn visit(&mut self, id: NodeId) -> Result<(), FatalError> {
        let kind = self.unit.kind(id).clone();
        match kind {
            NodeKind::FunctionDefinition(node) => self.visit_function_definition(id, &node),
            NodeKind::ParameterList(node) => self.visit_parameter_list(id, &node),
            NodeKind::Block(node) => self.visit_block(id, &node),
            NodeKind::Return(node) => self.visit_return(id, &node),
            NodeKind::VariableDeclarationStatement(node) => {
                self.visit_variable_declaration_statement(id, &node)
            }
            NodeKind::VariableDeclaration(node) => self.visit_variable_declaration(id, &node),
            NodeKind::TypeClassDefinition(node) => self.visit_type_class_definition(id, &node),
            NodeKind::TypeClassInstantiation(node) => {
                self.visit_type_class_instantiation(id, &node)
            }
            NodeKind::TypeDefinition(node) => self.visit_type_definition(id, &node),
            NodeKind::Assignment(node) => self.visit_assignment(id, &node),
            NodeKind::Identifier(node) => self.visit_identifier(id, &node),
            NodeKind::IdentifierPath(node) => self.visit_identifier_path(id, &node),
            NodeKind::TupleExpression(node) => self.visit_tuple_expression(id, &node),
            NodeKind::BinaryOperation(node) => self.visit_binary_operation(id, &node),
            NodeKind::FunctionCall(node) => self.visit_function_call(id, &node),
            NodeKind::MemberAccess(node) => self.visit_member_access(id, &node),
            NodeKind::InlineAssembly(node) => self.visit_inline_assembly(id, &node),
            NodeKind::Literal(node) => self.visit_literal(id, &node),
            NodeKind::BuiltinTypeName(node) => self.visit_builtin_type_name(id, &node),
            NodeKind::Pragma(_) => Err(self
                .diagnostics
                .fatal_type_error(self.span(id), TypeErrorKind::UnsupportedNode)),
        }
    }

    // ── Declarations ─────────────────────────────────────────────

    fn visit_function_definition(
        &mut self,
        id: NodeId,
        node: &FunctionDefinition,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }

        let saved = self.current_function_type.take();
        self.visit(node.parameters)?;
        if let Some(returns) = node.return_parameters {
            self.visit(returns)?;
        }
        let parameters = self.node_type(node.parameters);
        let returns = match node.return_parameters {
            Some(list) => self.node_type(list),
            None => Type::unit(),
        };
        let function_type = Type::function(parameters, returns);

        self.current_function_type = Some(function_type.clone());
        if let Some(body) = node.body {
            self.visit(body)?;
        }
        self.current_function_type = saved;

        self.set_type(id, function_type);
        Ok(())
    }

    fn visit_parameter_list(&mut self, id: NodeId, node: &ParameterList) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        for &parameter in &node.parameters {
            self.visit(parameter)?;
        }
        let types = node
            .parameters
            .iter()
            .map(|&parameter| self.node_type(parameter))
            .collect();
        self.set_type(id, Type::tuple(types));
        Ok(())
    }

    fn visit_type_class_definition(
        &mut self,
        id: NodeId,
        node: &TypeClassDefinition,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        let constructor = self.type_constructor_of(id)?;
        self.set_type(id, Type::constant(constructor, vec![]));

        self.with_context(ExpressionContext::Type, |this| this.visit(node.type_variable))?;

        let class_var = self.env.fresh_var(Sort::empty());
        let mut methods = BTreeMap::new();
        self.members.entry(constructor).or_default();

        for &function in &node.functions {
            self.visit(function)?;
            let NodeKind::FunctionDefinition(def) = self.unit.kind(function) else {
                return Err(self
                    .diagnostics
                    .fatal_type_error(self.span(function), TypeErrorKind::UnsupportedNode));
            };
            let function_type = {
                let declared = self.node_type(function);
                self.env.fresh(&declared)
            };
            let free = self.env.free_vars(&function_type);
            if free.len() != 1 {
                return Err(self.diagnostics.fatal_type_error(
                    self.span(function),
                    TypeErrorKind::ClassMethodVariables,
                ));
            }
            self.unify(self.span(function), &Type::Var(free[0]), &class_var)?;

            let table = self
                .members
                .get_mut(&constructor)
                .expect("member table created above");
            if table.contains_key(&def.name) {
                return Err(self.diagnostics.fatal_type_error(
                    self.span(function),
                    TypeErrorKind::DuplicateMethod {
                        name: def.name.clone(),
                    },
                ));
            }
            table.insert(
                def.name.clone(),
                TypeMember {
                    ty: function_type.clone(),
                },
            );
            methods.insert(def.name.clone(), function_type);
        }

        let class = match self.registry.declare_type_class(
            &mut self.env,
            class_var,
            methods,
            node.name.clone(),
            Some(id),
        ) {
            Ok(class) => class,
            Err(message) => {
                return Err(self
                    .diagnostics
                    .fatal_type_error(self.span(id), TypeErrorKind::ClassDeclaration { message }))
            }
        };
        debug!(class = %node.name, "declared type class");
        self.annotation_mut(id).type_class = Some(class);

        let declared = self.node_type(node.type_variable);
        let sorted = self.env.fresh_var(Sort::from_class(class));
        self.unify(self.span(id), &declared, &sorted)?;

        // Visit the known instantiations right away, so their order
        // relative to this declaration in the source does not matter.
        if let Some(instantiations) = self.registration.instantiations.get(&id) {
            let nodes: Vec<NodeId> = instantiations.values().copied().collect();
            for node in nodes {
                self.visit(node)?;
            }
        }
        Ok(())
    }

    fn visit_type_class_instantiation(
        &mut self,
        id: NodeId,
        node: &TypeClassInstantiation,
    ) -> Result<(), FatalError> {
        let newly_active = !self.is_active(id);
        if newly_active {
            self.active_instantiations.push(ActiveInstantiation {
                node: id,
                arity: None,
            });
        }
        let result = self.instantiation_inner(id, node);
        if newly_active {
            let entry = self
                .active_instantiations
                .pop()
                .expect("active instantiation pushed above");
            if let Some(arity) = entry.arity {
                // A promise that was never completed must not survive.
                self.registry.retract_promise(arity.class, arity.constructor);
            }
        }
        result
    }

    fn is_active(&self, id: NodeId) -> bool {
        self.active_instantiations
            .iter()
            .any(|active| active.node == id)
    }

    fn instantiation_inner(
        &mut self,
        id: NodeId,
        node: &TypeClassInstantiation,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        // Annotate before visiting anything: the class visit below
        // re-enters this instantiation and must find it finished.
        self.set_type(id, Type::void());

        let class = match &node.class_name {
            ClassName::Path(path) => {
                let referenced = match self.unit.kind(*path) {
                    NodeKind::Identifier(identifier) => identifier.referenced_declaration,
                    NodeKind::IdentifierPath(path) => path.referenced_declaration,
                    _ => None,
                };
                let declaration = referenced.filter(|&decl| {
                    matches!(self.unit.kind(decl), NodeKind::TypeClassDefinition(_))
                });
                match declaration {
                    Some(decl) => {
                        self.visit(decl)?;
                        match self.annotations.get(decl).and_then(|ann| ann.type_class) {
                            Some(class) => class,
                            // Errors were reported by the class visit.
                            None => return Ok(()),
                        }
                    }
                    None => {
                        self.diagnostics
                            .type_error(self.span(*path), TypeErrorKind::ExpectedClass);
                        return Ok(());
                    }
                }
            }
            ClassName::Builtin(builtin) => {
                match self.registration.builtin_classes.get(builtin) {
                    Some(class) => *class,
                    None => {
                        self.diagnostics
                            .type_error(self.span(id), TypeErrorKind::ExpectedClass);
                        return Ok(());
                    }
                }
            }
        };

        let Some(constructor) = self
            .registration
            .type_constructors
            .get(node.type_constructor)
            .copied()
        else {
            self.diagnostics.type_error(
                self.span(node.type_constructor),
                TypeErrorKind::InvalidConstructor,
            );
            return Ok(());
        };

        let mut arguments = Vec::new();
        let mut argument_sorts = Vec::new();
        if let Some(sorts) = node.argument_sorts {
            self.with_context(ExpressionContext::Type, |this| this.visit(sorts))?;
            arguments = self.node_type(sorts).tuple_components();
            argument_sorts = arguments
                .iter()
                .map(|argument| self.env.sort_of(argument, &self.registry))
                .collect();
        }

        let constructed = Type::constant(constructor, arguments);
        if let Some(entry) = self
            .active_instantiations
            .iter_mut()
            .rfind(|active| active.node == id)
        {
            entry.arity = Some(ActiveArity {
                class,
                constructor,
                argument_sorts: argument_sorts.clone(),
            });
        }

        let mut method_impls: BTreeMap<SmolStr, Type> = BTreeMap::new();
        for &function in &node.functions {
            let NodeKind::FunctionDefinition(def) = self.unit.kind(function) else {
                return Err(self
                    .diagnostics
                    .fatal_type_error(self.span(function), TypeErrorKind::UnsupportedNode));
            };
            self.visit(function)?;
            if method_impls.contains_key(&def.name) {
                self.diagnostics.type_error(
                    self.span(function),
                    TypeErrorKind::DuplicateMember {
                        name: def.name.clone(),
                    },
                );
            } else {
                method_impls.insert(def.name.clone(), self.node_type(function));
            }
        }

        let arity = Arity {
            argument_sorts,
            class,
        };
        if let Err(error) =
            self.registry
                .instantiate_class(&mut self.env, &constructed, arity, method_impls)
        {
            let kind = match error {
                InstanceError::DuplicateInstance { class, constructor } => {
                    TypeErrorKind::DuplicateInstance { class, constructor }
                }
                other => TypeErrorKind::Instantiation {
                    message: other.to_string(),
                },
            };
            self.diagnostics.type_error(self.span(id), kind);
        }
        Ok(())
    }

    fn visit_type_definition(
        &mut self,
        id: NodeId,
        node: &TypeDefinition,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }

        if let Some(arguments) = node.arguments {
            self.visit(arguments)?;
        }
        let underlying = match node.type_expression {
            Some(expression) => {
                self.with_context(ExpressionContext::Type, |this| this.visit(expression))?;
                Some(self.node_type(expression))
            }
            None => None,
        };

        let constructor = self.type_constructor_of(id)?;
        let argument_count = match node.arguments {
            Some(list) => match self.unit.kind(list) {
                NodeKind::ParameterList(parameters) => parameters.parameters.len(),
                _ => 0,
            },
            None => 0,
        };
        let arguments: Vec<Type> = (0..argument_count)
            .map(|_| self.env.fresh_var(Sort::empty()))
            .collect();
        let defined = Type::constant(constructor, arguments.clone());
        if arguments.is_empty() {
            self.set_type(id, defined.clone());
        } else {
            self.set_type(
                id,
                Type::type_function(Type::tuple(arguments), defined.clone()),
            );
        }

        let table = self.members.entry(constructor).or_default();
        if let Some(underlying) = underlying {
            table.insert(
                SmolStr::new_static("abs"),
                TypeMember {
                    ty: Type::function(underlying.clone(), defined.clone()),
                },
            );
            table.insert(
                SmolStr::new_static("rep"),
                TypeMember {
                    ty: Type::function(defined, underlying),
                },
            );
        }
        Ok(())
    }

    fn visit_variable_declaration(
        &mut self,
        id: NodeId,
        node: &VariableDeclaration,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        match self.context {
            ExpressionContext::Term => {
                if let Some(expression) = node.type_expression {
                    self.with_context(ExpressionContext::Type, |this| this.visit(expression))?;
                    let ty = self.node_type(expression);
                    self.set_type(id, ty);
                } else {
                    let ty = self.env.fresh_var(Sort::empty());
                    self.set_type(id, ty);
                }
            }
            ExpressionContext::Type => {
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty.clone());
                if let Some(expression) = node.type_expression {
                    self.with_context(ExpressionContext::Sort, |this| this.visit(expression))?;
                    let declared = self.node_type(expression);
                    self.unify(self.span(expression), &ty, &declared)?;
                }
            }
            ExpressionContext::Sort => {
                self.diagnostics.type_error(
                    self.span(id),
                    TypeErrorKind::BadContext {
                        construct: "variable declaration",
                        context: "sort",
                    },
                );
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty);
            }
        }
        Ok(())
    }

    // ── Statements ───────────────────────────────────────────────

    fn visit_block(&mut self, id: NodeId, node: &Block) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        for &statement in &node.statements {
            self.visit(statement)?;
        }
        self.set_type(id, Type::unit());
        Ok(())
    }

    fn visit_return(&mut self, id: NodeId, node: &Return) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        if let Some(expression) = node.expression {
            self.visit(expression)?;
        }
        let function_type = self
            .current_function_type
            .clone()
            .expect("return statement outside of a function");
        let returns = function_type
            .dest_function()
            .expect("current function type is a function")
            .1
            .clone();
        let value = match node.expression {
            Some(expression) => self.node_type(expression),
            None => Type::unit(),
        };
        self.unify(self.span(id), &returns, &value)?;
        self.set_type(id, Type::unit());
        Ok(())
    }

    fn visit_variable_declaration_statement(
        &mut self,
        id: NodeId,
        node: &VariableDeclarationStatement,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        for &declaration in &node.declarations {
            self.visit(declaration)?;
        }
        if let Some(value) = node.initial_value {
            self.visit(value)?;
        }
        if node.declarations.len() != 1 {
            self.diagnostics
                .type_error(self.span(id), TypeErrorKind::MultiVariableDeclaration);
            return Ok(());
        }
        if let Some(value) = node.initial_value {
            let declared = self.node_type(node.declarations[0]);
            let initial = self.node_type(value);
            self.unify(self.span(id), &declared, &initial)?;
        }
        self.set_type(id, Type::unit());
        Ok(())
    }

    fn visit_inline_assembly(
        &mut self,
        id: NodeId,
        node: &InlineAssembly,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        let mut analyzer = self
            .asm_analyzer
            .take()
            .expect("assembly analyzer is not re-entrant");
        let mut resolver = |reference: &AsmExternalRef,
                            context: AsmRefContext,
                            _is_assignment: bool|
         -> bool {
            if context == AsmRefContext::NonExternal {
                return false;
            }
            let Some(declared) = self
                .annotations
                .get(reference.declaration)
                .and_then(|annotation| annotation.ty.clone())
            else {
                self.diagnostics
                    .type_error(reference.span, TypeErrorKind::UnresolvedReference);
                return false;
            };
            let failures = self.env.unify(&declared, &Type::word(), &self.registry);
            self.report_failures(reference.span, failures);
            true
        };
        if !analyzer.analyze(&node.block, &mut resolver) {
            debug_assert!(self.diagnostics.has_errors());
        }
        self.asm_analyzer = Some(analyzer);
        self.set_type(id, Type::unit());
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────

    fn visit_assignment(&mut self, id: NodeId, node: &Assignment) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        self.visit(node.left)?;
        self.visit(node.right)?;

        if self.context != ExpressionContext::Term {
            self.diagnostics.type_error(
                self.span(id),
                TypeErrorKind::BadContext {
                    construct: "assignment",
                    context: context_name(self.context),
                },
            );
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }

        let left = self.node_type(node.left);
        let right = self.node_type(node.right);
        self.unify(self.span(id), &left, &right)?;
        self.set_type(id, self.env.resolve(&left));
        Ok(())
    }

    fn visit_identifier(&mut self, id: NodeId, node: &Identifier) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        if let Some(declaration) = node.referenced_declaration {
            let ty = self.type_of_referenced(self.span(id), declaration)?;
            self.set_type(id, ty);
            return Ok(());
        }
        match self.context {
            // Free type-level name: stands for itself as a fresh variable.
            ExpressionContext::Type => {
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty);
                Ok(())
            }
            ExpressionContext::Term | ExpressionContext::Sort => Err(self
                .diagnostics
                .fatal_type_error(self.span(id), TypeErrorKind::UnresolvedReference)),
        }
    }

    fn visit_identifier_path(
        &mut self,
        id: NodeId,
        node: &IdentifierPath,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        match node.referenced_declaration {
            Some(declaration) => {
                let ty = self.type_of_referenced(self.span(id), declaration)?;
                self.set_type(id, ty);
                Ok(())
            }
            None => Err(self
                .diagnostics
                .fatal_type_error(self.span(id), TypeErrorKind::UnresolvedReference)),
        }
    }

    /// Type an identifier through the declaration it references,
    /// visiting the declaration first if it has no annotation yet.
    fn type_of_referenced(
        &mut self,
        span: Span,
        declaration: NodeId,
    ) -> Result<Type, FatalError> {
        match self.context {
            ExpressionContext::Term => match self.unit.kind(declaration) {
                NodeKind::VariableDeclaration(_) => {
                    self.ensure_annotated(declaration)?;
                    Ok(self.node_type(declaration))
                }
                NodeKind::FunctionDefinition(_)
                | NodeKind::TypeClassDefinition(_)
                | NodeKind::TypeDefinition(_) => {
                    self.ensure_annotated(declaration)?;
                    let ty = self.node_type(declaration);
                    Ok(self.env.fresh(&ty))
                }
                _ => Err(self.unexpected_referent(span, declaration)),
            },
            ExpressionContext::Type => match self.unit.kind(declaration) {
                NodeKind::VariableDeclaration(_) => {
                    self.ensure_annotated(declaration)?;
                    Ok(self.node_type(declaration))
                }
                NodeKind::TypeDefinition(_) => {
                    self.ensure_annotated(declaration)?;
                    let ty = self.node_type(declaration);
                    Ok(self.env.fresh(&ty))
                }
                _ => Err(self.unexpected_referent(span, declaration)),
            },
            ExpressionContext::Sort => match self.unit.kind(declaration) {
                NodeKind::TypeClassDefinition(_) => {
                    self.with_context(ExpressionContext::Term, |this| this.visit(declaration))?;
                    match self
                        .annotations
                        .get(declaration)
                        .and_then(|annotation| annotation.type_class)
                    {
                        Some(class) => Ok(self.env.fresh_var(Sort::from_class(class))),
                        None => {
                            self.diagnostics
                                .type_error(span, TypeErrorKind::UnregisteredClass);
                            Ok(self.env.fresh_var(Sort::empty()))
                        }
                    }
                }
                _ => {
                    self.diagnostics.type_error(span, TypeErrorKind::ExpectedClass);
                    Ok(self.env.fresh_var(Sort::empty()))
                }
            },
        }
    }

    fn visit_tuple_expression(
        &mut self,
        id: NodeId,
        node: &TupleExpression,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        for &component in &node.components {
            self.visit(component)?;
        }
        let component_types: Vec<Type> = node
            .components
            .iter()
            .map(|&component| self.node_type(component))
            .collect();
        match self.context {
            ExpressionContext::Term | ExpressionContext::Type => {
                self.set_type(id, Type::tuple(component_types));
            }
            // At the sort level a tuple constrains one variable by every
            // component.
            ExpressionContext::Sort => {
                let ty = self.env.fresh_var(Sort::empty());
                for component in &component_types {
                    self.unify(self.span(id), &ty, component)?;
                }
                self.set_type(id, ty);
            }
        }
        Ok(())
    }

    fn visit_binary_operation(
        &mut self,
        id: NodeId,
        node: &BinaryOperation,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        match self.context {
            ExpressionContext::Term => {
                let Some((class, function)) =
                    self.registration.operators.get(&node.operator).cloned()
                else {
                    self.diagnostics
                        .type_error(self.span(id), TypeErrorKind::UnsupportedOperator);
                    let ty = self.env.fresh_var(Sort::empty());
                    self.set_type(id, ty);
                    return Ok(());
                };
                self.visit(node.left)?;
                self.visit(node.right)?;

                let Some(scheme) = self.registry.type_class_function(class, &function).cloned()
                else {
                    self.diagnostics
                        .type_error(self.span(id), TypeErrorKind::UnsupportedOperator);
                    let ty = self.env.fresh_var(Sort::empty());
                    self.set_type(id, ty);
                    return Ok(());
                };
                let function_type = self.env.fresh(&scheme);
                let argument_tuple =
                    Type::tuple(vec![self.node_type(node.left), self.node_type(node.right)]);
                let generic =
                    Type::function(argument_tuple, self.env.fresh_var(Sort::empty()));
                self.unify(self.span(id), &function_type, &generic)?;

                let resolved = self.env.resolve(&generic);
                let (_, result) = resolved
                    .dest_function()
                    .expect("generic operator type is a function");
                self.set_type(id, result.clone());
            }
            ExpressionContext::Type => match node.operator {
                // Sort ascription.
                BinaryOperator::Colon => {
                    self.visit(node.left)?;
                    self.with_context(ExpressionContext::Sort, |this| this.visit(node.right))?;
                    let left = self.node_type(node.left);
                    let right = self.node_type(node.right);
                    self.unify(self.span(id), &left, &right)?;
                    self.set_type(id, left);
                }
                BinaryOperator::RightArrow => {
                    self.visit(node.left)?;
                    self.visit(node.right)?;
                    let function =
                        Type::function(self.node_type(node.left), self.node_type(node.right));
                    self.set_type(id, function);
                }
                _ => {
                    self.diagnostics.type_error(
                        self.span(id),
                        TypeErrorKind::BadContext {
                            construct: "binary operation",
                            context: "type",
                        },
                    );
                    let ty = self.env.fresh_var(Sort::empty());
                    self.set_type(id, ty);
                }
            },
            ExpressionContext::Sort => {
                self.diagnostics.type_error(
                    self.span(id),
                    TypeErrorKind::BadContext {
                        construct: "binary operation",
                        context: "sort",
                    },
                );
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty);
            }
        }
        Ok(())
    }

    fn visit_function_call(&mut self, id: NodeId, node: &FunctionCall) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        self.visit(node.callee)?;
        for &argument in &node.arguments {
            self.visit(argument)?;
        }

        if self.context == ExpressionContext::Sort {
            self.diagnostics.type_error(
                self.span(id),
                TypeErrorKind::BadContext {
                    construct: "function call",
                    context: "sort",
                },
            );
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }

        let argument_types: Vec<Type> = node
            .arguments
            .iter()
            .map(|&argument| self.node_type(argument))
            .collect();
        let callee = self.node_type(node.callee);

        match self.context {
            ExpressionContext::Term => {
                let generic = Type::function(
                    Type::tuple(argument_types),
                    self.env.fresh_var(Sort::empty()),
                );
                self.unify(self.span(id), &callee, &generic)?;
                let resolved = self.env.resolve(&generic);
                let (_, result) = resolved
                    .dest_function()
                    .expect("generic call type is a function");
                self.set_type(id, result.clone());
            }
            ExpressionContext::Type => {
                let generic = Type::type_function(
                    Type::tuple(argument_types),
                    self.env.fresh_kind_var(),
                );
                self.unify(self.span(id), &callee, &generic)?;
                let resolved = self.env.resolve(&generic);
                let (_, result) = resolved
                    .dest_type_function()
                    .expect("generic application type is a type function");
                self.set_type(id, result.clone());
            }
            ExpressionContext::Sort => unreachable!("handled above"),
        }
        Ok(())
    }

    fn visit_member_access(&mut self, id: NodeId, node: &MemberAccess) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        if self.context != ExpressionContext::Term {
            self.diagnostics.type_error(
                self.span(id),
                TypeErrorKind::BadContext {
                    construct: "member access",
                    context: context_name(self.context),
                },
            );
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }

        self.visit(node.expression)?;
        let expression_type = {
            let ty = self.node_type(node.expression);
            self.env.resolve(&ty)
        };
        match expression_type.as_constant() {
            Some((constructor, _)) => {
                let member = self
                    .members
                    .get(&constructor)
                    .and_then(|table| table.get(&node.member))
                    .cloned();
                match member {
                    Some(member) => {
                        let ty = self.env.fresh(&member.ty);
                        self.set_type(id, ty);
                    }
                    None => {
                        self.diagnostics.type_error(
                            self.span(id),
                            TypeErrorKind::MemberNotFound {
                                name: node.member.clone(),
                            },
                        );
                        let ty = self.env.fresh_var(Sort::empty());
                        self.set_type(id, ty);
                    }
                }
            }
            None => {
                self.diagnostics.type_error(
                    self.span(node.expression),
                    TypeErrorKind::InvalidMemberAccess,
                );
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty);
            }
        }
        Ok(())
    }

    fn visit_literal(&mut self, id: NodeId, node: &Literal) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        if node.kind != LiteralKind::Number {
            self.diagnostics
                .type_error(self.span(id), TypeErrorKind::UnsupportedLiteral);
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }
        let Some(value) = rational_value(&node.value, node.sub_denomination) else {
            self.diagnostics
                .type_error(self.span(id), TypeErrorKind::InvalidLiteral);
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        };
        if !value.is_integer() {
            self.diagnostics
                .type_error(self.span(id), TypeErrorKind::InvalidLiteral);
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }
        let Some(class) = self
            .registration
            .builtin_classes
            .get(&BuiltinClass::Integer)
            .copied()
        else {
            return Err(self
                .diagnostics
                .fatal_type_error(self.span(id), TypeErrorKind::UnregisteredClass));
        };
        let ty = self.env.fresh_var(Sort::from_class(class));
        self.annotation_mut(id).literal_value = Some(value.to_integer());
        self.set_type(id, ty);
        Ok(())
    }

    fn visit_builtin_type_name(
        &mut self,
        id: NodeId,
        _node: &BuiltinTypeName,
    ) -> Result<(), FatalError> {
        if self.annotated(id) {
            return Ok(());
        }
        if self.context != ExpressionContext::Type {
            self.diagnostics.type_error(
                self.span(id),
                TypeErrorKind::BadContext {
                    construct: "builtin type name",
                    context: context_name(self.context),
                },
            );
            let ty = self.env.fresh_var(Sort::empty());
            self.set_type(id, ty);
            return Ok(());
        }
        match self.registration.type_constructors.get(id).copied() {
            Some(constructor) => {
                let argument_count = self.registry.constructor_arguments(constructor);
                let arguments: Vec<Type> = (0..argument_count)
                    .map(|_| self.env.fresh_var(Sort::empty()))
                    .collect();
                if arguments.is_empty() {
                    self.set_type(id, Type::constant(constructor, arguments));
                } else {
                    self.set_type(
                        id,
                        Type::type_function(
                            Type::tuple(arguments.clone()),
                            Type::constant(constructor, arguments),
                        ),
                    );
                }
            }
            None => {
                self.diagnostics
                    .type_error(self.span(id), TypeErrorKind::UnregisteredType);
                let ty = self.env.fresh_var(Sort::empty());
                self.set_type(id, ty);
            }
        }
        Ok(())
    }

    // ── Unification driver ───────────────────────────────────────

    /// Unify through the environment and report the failures. While
    /// instantiations are being visited, a batch consisting purely of
    /// sort mismatches whose classes have known instantiations for the
    /// constructor is retried once after visiting those instantiations;
    /// an instantiation that is already active is a cycle.
    fn unify(&mut self, span: Span, a: &Type, b: &Type) -> Result<(), FatalError> {
        let mut failures = self.env.unify(a, b, &self.registry);

        if !self.active_instantiations.is_empty() && !failures.is_empty() {
            let mut missing = Vec::new();
            let mut only_missing = true;

            let innermost = self
                .active_instantiations
                .last()
                .map(|active| active.node);

            'failures: for failure in &failures {
                if let UnificationFailure::SortMismatch { ty, sort } = failure {
                    if let Some((constructor, _)) = ty.as_constant() {
                        for class in &sort.classes {
                            match self.known_instantiation(*class, constructor) {
                                // Requiring the instantiation we are
                                // inside of is a genuine cycle; an outer
                                // active one is satisfied by its promise
                                // below.
                                Some(instantiation) if Some(instantiation) == innermost => {
                                    self.report_instantiation_cycle(span);
                                    return Ok(());
                                }
                                Some(instantiation) => missing.push(instantiation),
                                None => {
                                    only_missing = false;
                                    break 'failures;
                                }
                            }
                        }
                        continue;
                    }
                }
                only_missing = false;
                break;
            }

            if only_missing {
                debug!(count = missing.len(), "resolving missing type class instantiations");
                // Publish the arities of the enclosing instantiations
                // still in flight, so the ones visited below can rely on
                // them the way they will once registration completes.
                let promises: Vec<ActiveArity> = self
                    .active_instantiations
                    .iter()
                    .filter(|active| Some(active.node) != innermost)
                    .filter_map(|active| active.arity.clone())
                    .collect();
                for promise in promises {
                    if !self.registry.has_instance(promise.class, promise.constructor) {
                        self.registry.promise_instance(
                            promise.class,
                            promise.constructor,
                            promise.argument_sorts,
                        );
                    }
                }
                for instantiation in missing {
                    self.visit(instantiation)?;
                }
                failures = self.env.unify(a, b, &self.registry);
            }
        }

        self.report_failures(span, failures);
        Ok(())
    }

    /// The registered instantiation node of `class` for `constructor`,
    /// through the class declaration or, for declaration-less built-in
    /// classes, through the builtin tables.
    fn known_instantiation(
        &self,
        class: TypeClassId,
        constructor: TypeConstructor,
    ) -> Option<NodeId> {
        match self.registry.class_decl(class) {
            Some(declaration) => self
                .registration
                .instantiations
                .get(&declaration)?
                .get(&constructor)
                .copied(),
            None => {
                let builtin = self
                    .registration
                    .builtin_classes_by_name
                    .get(self.registry.class_name(class))?;
                self.registration
                    .builtin_instantiations
                    .get(builtin)?
                    .get(&constructor)
                    .copied()
            }
        }
    }

    fn report_instantiation_cycle(&mut self, span: Span) {
        let secondary = self
            .active_instantiations
            .iter()
            .map(|active| ("involved instantiation".to_string(), self.span(active.node)))
            .collect();
        self.diagnostics
            .type_error_with(span, secondary, TypeErrorKind::RecursiveInstantiation);
    }

    fn report_failures(&mut self, span: Span, failures: Vec<UnificationFailure>) {
        for failure in failures {
            let kind = match failure {
                UnificationFailure::TypeMismatch { a, b } => TypeErrorKind::TypeMismatch {
                    a: self.registry.type_to_string(&self.env, &a),
                    b: self.registry.type_to_string(&self.env, &b),
                },
                UnificationFailure::SortMismatch { ty, sort } => TypeErrorKind::SortMismatch {
                    ty: self.registry.type_to_string(&self.env, &ty),
                    sort: self.registry.sort_to_string(&sort),
                },
                UnificationFailure::RecursiveUnification { var, ty } => {
                    TypeErrorKind::RecursiveUnification {
                        var: self.registry.type_to_string(&self.env, &var),
                        ty: self.registry.type_to_string(&self.env, &ty),
                    }
                }
            };
            self.diagnostics.type_error(span, kind);
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn with_context<T>(
        &mut self,
        context: ExpressionContext,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved = self.context;
        self.context = context;
        let result = f(self);
        self.context = saved;
        result
    }

    fn ensure_annotated(&mut self, declaration: NodeId) -> Result<(), FatalError> {
        if !self.annotated(declaration) {
            self.visit(declaration)?;
        }
        Ok(())
    }

    fn unexpected_referent(&mut self, span: Span, declaration: NodeId) -> FatalError {
        let secondary = vec![("referenced node".to_string(), self.span(declaration))];
        self.diagnostics
            .fatal_type_error_with(span, secondary, TypeErrorKind::UnexpectedReferent)
    }

    fn type_constructor_of(&mut self, declaration: NodeId) -> Result<TypeConstructor, FatalError> {
        match self.registration.type_constructors.get(declaration) {
            Some(constructor) => Ok(*constructor),
            None => Err(self
                .diagnostics
                .fatal_type_error(self.span(declaration), TypeErrorKind::UnregisteredType)),
        }
    }

    fn annotated(&self, id: NodeId) -> bool {
        self.annotations
            .get(id)
            .is_some_and(|annotation| annotation.ty.is_some())
    }

    fn annotation_mut(&mut self, id: NodeId) -> &mut Annotation {
        if self.annotations.get(id).is_none() {
            self.annotations.insert(id, Annotation::default());
        }
        self.annotations.get_mut(id).expect("annotation inserted above")
    }

    fn set_type(&mut self, id: NodeId, ty: Type) {
        self.annotation_mut(id).ty = Some(ty);
    }

    /// The type annotation of an already-visited node.
    fn node_type(&self, id: NodeId) -> Type {
        self.annotations
            .get(id)
            .and_then(|annotation| annotation.ty.clone())
            .expect("node visited without a type annotation")
    }

    fn span(&self, id: NodeId) -> Span {
        self.unit.span(id)
    }
}
