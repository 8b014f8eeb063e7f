//! Boundary to the inline-assembly analyzer. The sub-language itself is
//! validated elsewhere; the inference pass only supplies a resolver that
//! types references escaping to surrounding declarations.

use lapis_ast::{AsmBlock, AsmExternalRef};

/// How an identifier is used inside the assembly dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmRefContext {
    /// Reference to a declaration outside the assembly block.
    External,
    /// Resolved within the sub-language; the resolver declines these.
    NonExternal,
}

/// Resolver supplied by the inference pass: returns whether the
/// reference is a valid external of size one word.
pub type AsmResolver<'a> = &'a mut dyn FnMut(&AsmExternalRef, AsmRefContext, bool) -> bool;

/// The analyzer validating an assembly block. Returning `false` means
/// the analyzer reported errors through its own channel.
pub trait AsmAnalyzer {
    fn analyze(&mut self, block: &AsmBlock, resolver: AsmResolver<'_>) -> bool;
}

/// Analyzer that only drives external-reference resolution, accepting
/// the rest of the block as-is.
#[derive(Debug, Default)]
pub struct ExternalsOnlyAnalyzer;

impl AsmAnalyzer for ExternalsOnlyAnalyzer {
    fn analyze(&mut self, block: &AsmBlock, resolver: AsmResolver<'_>) -> bool {
        let mut ok = true;
        for reference in &block.external_references {
            ok &= resolver(reference, AsmRefContext::External, reference.is_assignment);
        }
        ok
    }
}
