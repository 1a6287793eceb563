//! Instrumentation rewriter: makes the bundle's arithmetic observable.
//!
//! Two independent transformations over the parsed tree:
//!
//! 1. Within the matched region, member-access objects are captured and
//!    renamed with a fixed prefix, and the region is made to bind each
//!    prefixed name to an interception wrapper over the original value
//!    before it evaluates.
//! 2. Everywhere in the tree, binary `+`/`-`/`%` expressions become calls
//!    to the logged arithmetic functions the executor registers.
//!
//! The tree is consumed here; after regeneration only source text remains.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::ControlFlow;

use boa_ast::expression::access::{PropertyAccessField, SimplePropertyAccess};
use boa_ast::expression::literal::Literal;
use boa_ast::expression::operator::assign::{AssignOp, AssignTarget};
use boa_ast::expression::operator::binary::{ArithmeticOp, BinaryOp};
use boa_ast::expression::operator::{Assign, Binary};
use boa_ast::expression::{Call, Expression, Identifier};
use boa_ast::statement::Return;
use boa_ast::visitor::{VisitWith, VisitorMut};
use boa_ast::Script;
use boa_interner::{Interner, Sym, ToInternedString};

use crate::types::MathRegion;

/// Prefix convention: renaming is 1:1 and reversible by stripping this.
pub const WRAP_PREFIX: &str = "_";
/// Wrapper factory installed by the executor's JS prelude.
pub const WRAP_FACTORY: &str = "_wrap";
/// Logged arithmetic equivalents registered natively by the executor.
pub const LOGGED_ADD: &str = "_add";
pub const LOGGED_SUB: &str = "_sub";
pub const LOGGED_MOD: &str = "_mod";

/// Rewritten source plus the captured binding set, in name order.
#[derive(Debug, Clone)]
pub struct Instrumented {
    pub source: String,
    pub bindings: BTreeSet<String>,
}

/// Apply both transformations and regenerate source text.
pub fn instrument(mut script: Script, region: MathRegion, interner: &mut Interner) -> Instrumented {
    let bindings = wrap_region_identifiers(&mut script, region, interner);
    rewrite_operators(&mut script, interner);
    let source = regenerate(&script, interner);
    Instrumented { source, bindings }
}

pub fn regenerate(script: &Script, interner: &Interner) -> String {
    script.statements().to_interned_string(interner)
}

/// Transformation 1: identifier capture & wrapping, restricted to the
/// matched return's subtree.
pub fn wrap_region_identifiers(
    script: &mut Script,
    region: MathRegion,
    interner: &mut Interner,
) -> BTreeSet<String> {
    let math_sym = interner.get_or_intern(crate::locate::MATH_OBJECT);
    let mut wrapper = RegionWrapper {
        interner,
        math_sym,
        target_ordinal: region.return_ordinal,
        next_ordinal: 0,
        in_region: false,
        bindings: BTreeMap::new(),
    };
    let _ = script.visit_with_mut(&mut wrapper);
    wrapper.bindings.into_keys().collect()
}

/// Transformation 2: every binary `+`, `-`, `%` anywhere in the tree
/// becomes a call to its logged equivalent.
pub fn rewrite_operators(script: &mut Script, interner: &mut Interner) {
    let mut rewriter = OperatorRewriter {
        add_sym: interner.get_or_intern(LOGGED_ADD),
        sub_sym: interner.get_or_intern(LOGGED_SUB),
        mod_sym: interner.get_or_intern(LOGGED_MOD),
    };
    let _ = script.visit_with_mut(&mut rewriter);
}

struct RegionWrapper<'i> {
    interner: &'i mut Interner,
    math_sym: Sym,
    target_ordinal: usize,
    next_ordinal: usize,
    in_region: bool,
    bindings: BTreeMap<String, Sym>,
}

impl RegionWrapper<'_> {
    fn resolve(&self, sym: Sym) -> String {
        self.interner.resolve_expect(sym).join(
            |s: &str| s.to_string(),
            String::from_utf16_lossy,
            true,
        )
    }
}

impl<'ast> VisitorMut<'ast> for RegionWrapper<'_> {
    type BreakTy = ();

    fn visit_return_mut(&mut self, node: &'ast mut Return) -> ControlFlow<Self::BreakTy> {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        if ordinal != self.target_ordinal {
            return node.visit_with_mut(self);
        }

        self.in_region = true;
        let _ = node.visit_with_mut(self);
        self.in_region = false;

        // Bind the wrappers inside the enclosing scope, right before the
        // region evaluates: `return E` => `return (_a = _wrap(a, "a"), E)`.
        // The captured names are locals of the bundle function, so the
        // wrappers cannot be synthesized anywhere further out.
        let target = node.target().cloned();
        if let (false, Some(target)) = (self.bindings.is_empty(), target) {
            let mut chain: Option<Expression> = None;
            let captured: Vec<(String, Sym)> =
                self.bindings.iter().map(|(name, sym)| (name.clone(), *sym)).collect();
            for (name, sym) in captured {
                let assign = wrapper_assignment(self.interner, &name, sym);
                chain = Some(match chain {
                    None => assign,
                    Some(prev) => Expression::Binary(Binary::new(BinaryOp::Comma, prev, assign)),
                });
            }
            if let Some(assignments) = chain {
                let chained =
                    Expression::Binary(Binary::new(BinaryOp::Comma, assignments, target));
                *node = Return::new(Some(chained));
            }
        }
        ControlFlow::Break(())
    }

    fn visit_simple_property_access_mut(
        &mut self,
        node: &'ast mut SimplePropertyAccess,
    ) -> ControlFlow<Self::BreakTy> {
        if self.in_region {
            let target_sym = match node.target() {
                Expression::Identifier(ident) => Some(ident.sym()),
                _ => None,
            };
            if let Some(sym) = target_sym.filter(|sym| *sym != self.math_sym) {
                let name = self.resolve(sym);
                if !name.is_empty() {
                    let prefixed =
                        self.interner.get_or_intern(format!("{WRAP_PREFIX}{name}").as_str());
                    self.bindings.insert(name, sym);
                    let field: PropertyAccessField = node.field().clone();
                    *node = SimplePropertyAccess::new(
                        Expression::Identifier(Identifier::new(prefixed)),
                        field,
                    );
                }
            }
        }
        node.visit_with_mut(self)
    }
}

/// `_name = _wrap(name, "name")` — the string argument reuses the original
/// symbol, so the wrapper reports reads under the captured name.
fn wrapper_assignment(interner: &mut Interner, name: &str, original: Sym) -> Expression {
    let prefixed = interner.get_or_intern(format!("{WRAP_PREFIX}{name}").as_str());
    let factory = interner.get_or_intern(WRAP_FACTORY);
    let call = Call::new(
        Expression::Identifier(Identifier::new(factory)),
        vec![
            Expression::Identifier(Identifier::new(original)),
            Expression::Literal(Literal::String(original)),
        ]
        .into_boxed_slice(),
    );
    Expression::Assign(Assign::new(
        AssignOp::Assign,
        AssignTarget::Identifier(Identifier::new(prefixed)),
        Expression::Call(call),
    ))
}

struct OperatorRewriter {
    add_sym: Sym,
    sub_sym: Sym,
    mod_sym: Sym,
}

impl<'ast> VisitorMut<'ast> for OperatorRewriter {
    type BreakTy = ();

    fn visit_expression_mut(&mut self, node: &'ast mut Expression) -> ControlFlow<Self::BreakTy> {
        // Operands first, so nested arithmetic is already in call form when
        // the enclosing expression is replaced.
        let flow = node.visit_with_mut(self);
        if let Expression::Binary(binary) = node {
            if let BinaryOp::Arithmetic(op) = binary.op() {
                let name = match op {
                    ArithmeticOp::Add => self.add_sym,
                    ArithmeticOp::Sub => self.sub_sym,
                    ArithmeticOp::Mod => self.mod_sym,
                    _ => return flow,
                };
                let call = Call::new(
                    Expression::Identifier(Identifier::new(name)),
                    vec![binary.lhs().clone(), binary.rhs().clone()].into_boxed_slice(),
                );
                *node = Expression::Call(call);
            }
        }
        flow
    }
}
