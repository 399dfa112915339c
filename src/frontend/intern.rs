//! Symbol interning. Identifiers, block labels, and function names repeat
//! constantly across a compilation, so each distinct string is stored once
//! for the lifetime of the process and passed around as a small copyable
//! handle.

use std::sync::RwLock;

use once_cell::sync::Lazy;

static SYMBOLS: Lazy<RwLock<Vec<&'static str>>> = Lazy::new(Default::default);

/// A handle into the process-wide symbol store. Symbols with the same
/// textual value always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        {
            let symbols = SYMBOLS.read().unwrap();

            if let Some(index) = symbols.iter().position(|s| *s == value) {
                return Self(index as u32);
            }
        }

        let mut symbols = SYMBOLS.write().unwrap();

        // Another thread may have interned the value between the locks
        if let Some(index) = symbols.iter().position(|s| *s == value) {
            return Self(index as u32);
        }

        symbols.push(Box::leak(value.to_owned().into_boxed_str()));
        Self((symbols.len() - 1) as u32)
    }

    pub fn value(&self) -> &'static str {
        SYMBOLS.read().unwrap()[self.0 as usize]
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_string_interns_to_same_symbol() {
        let a = InternedSymbol::new("every_start0");
        let b = InternedSymbol::new("every_start0");
        let c = InternedSymbol::new("every_start1");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), "every_start0");
    }

    #[test]
    fn handles_survive_as_plain_copies() {
        let symbol = InternedSymbol::new("entry");
        let copy = symbol;

        assert_eq!(symbol, copy);
        assert_eq!(copy.to_string(), "entry");
    }
}
