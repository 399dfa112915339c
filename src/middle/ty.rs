//! The type hierarchy used to annotate SSA values. A single process-lifetime
//! registry interns the primitive types and mints composite types on demand;
//! it is warmed before any tokenization begins and never replaced afterwards.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::{
    frontend::intern::InternedSymbol,
    index::{simple_index, IndexVec},
};

simple_index! {
    /// Handle to an interned type in the global registry
    pub struct TypeId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Integer { bits: u16, signed: bool },
    Float { bits: u16 },
    Boolean,
    String,
    Duration,
    Dodecagram,
    Function {
        return_type: TypeId,
        parameters: Vec<TypeId>,
    },
    Array {
        element: TypeId,
        length: usize,
    },
    Struct {
        name: InternedSymbol,
        fields: Vec<(InternedSymbol, TypeId)>,
    },
    Pointer(TypeId),
    Void,
    /// Placeholder for inference
    Auto,
}

#[derive(Debug)]
pub struct TypeRegistry {
    types: RwLock<IndexVec<TypeId, TypeKind>>,
}

static REGISTRY: Lazy<TypeRegistry> = Lazy::new(|| {
    let registry = TypeRegistry {
        types: RwLock::new(IndexVec::new()),
    };

    // Primitives are interned up front so their ids are stable
    for kind in [
        TypeKind::Void,
        TypeKind::Auto,
        TypeKind::Boolean,
        TypeKind::String,
        TypeKind::Duration,
        TypeKind::Dodecagram,
        TypeKind::Integer {
            bits: 64,
            signed: true,
        },
    ] {
        registry.intern(kind);
    }

    registry
});

impl TypeRegistry {
    pub fn global() -> &'static TypeRegistry {
        &REGISTRY
    }

    pub fn intern(&self, kind: TypeKind) -> TypeId {
        {
            let types = self.types.read().unwrap();
            let found = types.enumerate().find(|(_, k)| **k == kind).map(|(id, _)| id);

            if let Some(id) = found {
                return id;
            }
        }

        self.types.write().unwrap().push(kind)
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types.read().unwrap()[id].clone()
    }

    pub fn void(&self) -> TypeId {
        self.intern(TypeKind::Void)
    }

    pub fn auto(&self) -> TypeId {
        self.intern(TypeKind::Auto)
    }

    pub fn boolean(&self) -> TypeId {
        self.intern(TypeKind::Boolean)
    }

    pub fn string(&self) -> TypeId {
        self.intern(TypeKind::String)
    }

    pub fn duration(&self) -> TypeId {
        self.intern(TypeKind::Duration)
    }

    pub fn dodecagram(&self) -> TypeId {
        self.intern(TypeKind::Dodecagram)
    }

    pub fn integer(&self, bits: u16, signed: bool) -> TypeId {
        self.intern(TypeKind::Integer { bits, signed })
    }

    pub fn size_of(&self, id: TypeId) -> usize {
        match self.kind(id) {
            TypeKind::Integer { bits, .. } | TypeKind::Float { bits } => bits as usize / 8,
            TypeKind::Boolean => 1,
            // Pointer plus length
            TypeKind::String => 16,
            TypeKind::Duration | TypeKind::Dodecagram => 8,
            TypeKind::Function { .. } | TypeKind::Pointer(_) => 8,
            TypeKind::Array { element, length } => self.size_of(element) * length,
            TypeKind::Struct { fields, .. } => {
                let mut offset = 0usize;

                for (_, field) in &fields {
                    let alignment = self.alignment_of(*field);
                    offset = offset.next_multiple_of(alignment);
                    offset += self.size_of(*field);
                }

                offset.next_multiple_of(self.alignment_of(id))
            }
            TypeKind::Void | TypeKind::Auto => 0,
        }
    }

    pub fn alignment_of(&self, id: TypeId) -> usize {
        match self.kind(id) {
            TypeKind::Integer { bits, .. } | TypeKind::Float { bits } => {
                (bits as usize / 8).max(1)
            }
            TypeKind::Boolean => 1,
            TypeKind::String => 8,
            TypeKind::Duration | TypeKind::Dodecagram => 8,
            TypeKind::Function { .. } | TypeKind::Pointer(_) => 8,
            TypeKind::Array { element, .. } => self.alignment_of(element),
            TypeKind::Struct { fields, .. } => fields
                .iter()
                .map(|(_, field)| self.alignment_of(*field))
                .max()
                .unwrap_or(1),
            TypeKind::Void | TypeKind::Auto => 1,
        }
    }

    /// Attempts to unify two types. Integers promote to the wider width;
    /// integers and dodecagrams interconvert freely (shared representation);
    /// string, duration, and dodecagram are otherwise nominal.
    pub fn unify(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if a == b {
            return Some(a);
        }

        match (self.kind(a), self.kind(b)) {
            (TypeKind::Auto, _) => Some(b),
            (_, TypeKind::Auto) => Some(a),
            (
                TypeKind::Integer {
                    bits: bits_a,
                    signed: signed_a,
                },
                TypeKind::Integer {
                    bits: bits_b,
                    signed: signed_b,
                },
            ) => Some(self.integer(bits_a.max(bits_b), signed_a || signed_b)),
            (TypeKind::Integer { .. }, TypeKind::Dodecagram)
            | (TypeKind::Dodecagram, TypeKind::Integer { .. }) => Some(self.dodecagram()),
            _ => None,
        }
    }

    pub fn display(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Integer { bits, signed: true } => format!("i{bits}"),
            TypeKind::Integer {
                bits,
                signed: false,
            } => format!("u{bits}"),
            TypeKind::Float { bits } => format!("f{bits}"),
            TypeKind::Boolean => "bool".to_owned(),
            TypeKind::String => "str".to_owned(),
            TypeKind::Duration => "duration".to_owned(),
            TypeKind::Dodecagram => "dodecagram".to_owned(),
            TypeKind::Function {
                return_type,
                parameters,
            } => format!(
                "fn({}) -> {}",
                parameters
                    .iter()
                    .map(|p| self.display(*p))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.display(return_type)
            ),
            TypeKind::Array { element, length } => {
                format!("[{}; {length}]", self.display(element))
            }
            TypeKind::Struct { name, .. } => name.value().to_owned(),
            TypeKind::Pointer(pointee) => format!("*{}", self.display(pointee)),
            TypeKind::Void => "void".to_owned(),
            TypeKind::Auto => "auto".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_intern_to_stable_ids() {
        let registry = TypeRegistry::global();
        assert_eq!(registry.dodecagram(), registry.dodecagram());
        assert_ne!(registry.dodecagram(), registry.duration());
    }

    #[test]
    fn integer_promotion_takes_the_wider_width() {
        let registry = TypeRegistry::global();
        let narrow = registry.integer(32, true);
        let wide = registry.integer(64, true);

        assert_eq!(registry.unify(narrow, wide), Some(wide));
    }

    #[test]
    fn dodecagram_and_integer_share_representation() {
        let registry = TypeRegistry::global();
        let int = registry.integer(64, true);

        assert_eq!(registry.unify(int, registry.dodecagram()), Some(registry.dodecagram()));
        assert_eq!(registry.size_of(registry.dodecagram()), 8);
    }

    #[test]
    fn nominal_types_do_not_unify() {
        let registry = TypeRegistry::global();
        assert_eq!(registry.unify(registry.duration(), registry.dodecagram()), None);
        assert_eq!(registry.unify(registry.string(), registry.boolean()), None);
    }

    #[test]
    fn struct_layout_aligns_fields() {
        let registry = TypeRegistry::global();

        let byte = registry.integer(8, false);
        let word = registry.integer(64, true);

        let packed = registry.intern(TypeKind::Struct {
            name: InternedSymbol::new("sample"),
            fields: vec![
                (InternedSymbol::new("flag"), byte),
                (InternedSymbol::new("count"), word),
            ],
        });

        // flag at 0, count aligned to 8, total rounded to alignment 8
        assert_eq!(registry.alignment_of(packed), 8);
        assert_eq!(registry.size_of(packed), 16);
    }
}
