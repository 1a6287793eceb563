//! AST locator: finds the checksum-computing region inside the bundle.
//!
//! The region is identified structurally: the first return statement (in
//! document order) whose subtree mentions the numeric utility object. The
//! search is two-phase — outer pass over return statements, inner pass over
//! identifiers restricted to each return's own subtree — and halts globally
//! at the first hit.

use std::ops::ControlFlow;

use boa_ast::expression::Identifier;
use boa_ast::scope::Scope;
use boa_ast::statement::Return;
use boa_ast::visitor::{VisitWith, Visitor};
use boa_ast::Script;
use boa_interner::{Interner, Sym};
use boa_parser::{Parser, Source};

use crate::types::{ExtractError, MathRegion};

/// Name of the numeric utility object anchoring the heuristic.
pub const MATH_OBJECT: &str = "Math";

pub fn parse_bundle(source: &str, interner: &mut Interner) -> Result<Script, ExtractError> {
    let mut parser = Parser::new(Source::from_bytes(source));
    let scope = Scope::new_global();
    parser.parse_script(&scope, interner).map_err(|err| ExtractError::Parse(err.to_string()))
}

/// First-match-wins search for the math region. `None` is a valid terminal
/// state: the bundle has no qualifying region and the caller decides how
/// to fail.
pub fn locate_math_region(script: &Script, interner: &mut Interner) -> Option<MathRegion> {
    let math_sym = interner.get_or_intern(MATH_OBJECT);
    let mut finder = RegionFinder { math_sym, next_ordinal: 0 };
    match script.visit_with(&mut finder) {
        ControlFlow::Break(return_ordinal) => Some(MathRegion { return_ordinal }),
        ControlFlow::Continue(()) => None,
    }
}

struct RegionFinder {
    math_sym: Sym,
    next_ordinal: usize,
}

impl<'ast> Visitor<'ast> for RegionFinder {
    type BreakTy = usize;

    fn visit_return(&mut self, node: &'ast Return) -> ControlFlow<Self::BreakTy> {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let mut probe = MathProbe { math_sym: self.math_sym };
        if node.visit_with(&mut probe).is_break() {
            return ControlFlow::Break(ordinal);
        }
        // No hit in this subtree; nested function expressions may still
        // carry qualifying returns of their own.
        node.visit_with(self)
    }
}

struct MathProbe {
    math_sym: Sym,
}

impl<'ast> Visitor<'ast> for MathProbe {
    type BreakTy = ();

    fn visit_identifier(&mut self, node: &'ast Identifier) -> ControlFlow<Self::BreakTy> {
        if node.sym() == self.math_sym {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
