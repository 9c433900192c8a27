//! String interning and the id newtypes shared across the pipeline.
//!
//! Expression nodes, symbol tables, and pages store compact `u32` ids rather
//! than owned strings. The analyser and generator hand these ids around
//! freely; the `Interns` table is the single place an id turns back into
//! text (for error messages and program invocation).

use ahash::AHashMap;

/// Declares a `Copy` id newtype over a `u32` index.
///
/// Ids are constructed with a checked narrowing so an index that exceeds
/// `u32::MAX` fails loudly during compilation rather than wrapping.
macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect(concat!(stringify!($name), " index exceeds u32")))
            }

            /// Returns the raw index value.
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id! {
    /// Index into the string interner.
    StringId
}
define_id! {
    /// Handle for a user function (or closure body) in the analyser's side
    /// table; doubles as the index of its page in the compiled program.
    FunctionId
}
define_id! {
    /// Handle for a user struct declaration.
    StructId
}
define_id! {
    /// Handle for a host-provided standard function in the bindings table.
    StdFunctionId
}
define_id! {
    /// Index into the scope arena.
    ScopeId
}

/// Append-only string interner.
///
/// Interning the same text twice yields the same id, so name comparisons in
/// the analyser are integer comparisons.
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the existing id when already present.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.lookup.get(text) {
            return id;
        }
        let id = StringId::new(self.strings.len());
        self.strings.push(Box::from(text));
        self.lookup.insert(Box::from(text), id);
        id
    }

    /// Returns the interned text for an id.
    ///
    /// # Panics
    /// Panics if the id did not come from this table.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut interns = Interns::new();
        let a = interns.intern("echo");
        let b = interns.intern("grep");
        let c = interns.intern("echo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interns.get(a), "echo");
        assert_eq!(interns.get(b), "grep");
    }

    #[test]
    fn ids_round_trip_index() {
        let id = FunctionId::new(7);
        assert_eq!(id.index(), 7);
    }
}
