// The universal tagged value of the DSL.
//
// A mlrval is one of {absent, error, string, int, float, boolean, map}.
// Absent propagates through arithmetic; error is sticky. See DESIGN.md
// for the grounding of this re-expression as a sum type.

use std::fmt;
use enumflags2::BitFlags;

use crate::mlhmmv::Mlhmmv;

/// Runtime error payload carried by an `Mlrval::Error`. Distinct from
/// `BuildError` (error.rs), which is fatal and caught before execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    TypeMask,
    DivideByZero,
    BadCoercion,
    KeyError,
    NotIterable,
    NotCallable,
    Arity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::TypeMask => "type mask violation",
            ErrorKind::DivideByZero => "divide by zero",
            ErrorKind::BadCoercion => "bad coercion",
            ErrorKind::KeyError => "key error",
            ErrorKind::NotIterable => "not iterable",
            ErrorKind::NotCallable => "not callable",
            ErrorKind::Arity => "arity mismatch",
        };
        write!(f, "{}", msg)
    }
}

#[derive(Clone, Debug)]
pub enum Mlrval {
    Absent,
    Error(ErrorKind),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Map(Mlhmmv),
}

/// Type-mask category, used both for local-variable slot declarations
/// (§3 "local variable frame") and for quick dispatch in the type
/// checker / CST builder.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Int   = 0b00001,
    Float = 0b00010,
    Bool  = 0b00100,
    Str   = 0b01000,
    Map   = 0b10000,
}

pub type TypeMask = BitFlags<TypeTag>;

pub const MASK_ANY: TypeMask = enumflags2::make_bitflags!(TypeTag::{Int | Float | Bool | Str | Map});
pub const MASK_NUMERIC: TypeMask = enumflags2::make_bitflags!(TypeTag::{Int | Float});

impl Mlrval {
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Mlrval::Absent | Mlrval::Error(_) => None,
            Mlrval::Int(_) => Some(TypeTag::Int),
            Mlrval::Float(_) => Some(TypeTag::Float),
            Mlrval::Bool(_) => Some(TypeTag::Bool),
            Mlrval::Str(_) => Some(TypeTag::Str),
            Mlrval::Map(_) => Some(TypeTag::Map),
        }
    }

    /// Does this value satisfy the given slot type mask? Absent is
    /// always permitted (it's the value a cleared slot holds); an
    /// in-band error is never a type violation in itself, since it
    /// already records a prior failure.
    pub fn matches_mask(&self, mask: TypeMask) -> bool {
        match self.type_tag() {
            None => true,
            Some(tag) => mask.contains(tag),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Mlrval::Absent)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Mlrval::Error(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Mlrval::Bool(b) => *b,
            Mlrval::Int(i) => *i != 0,
            Mlrval::Float(f) => *f != 0.0,
            Mlrval::Str(s) => !s.is_empty(),
            Mlrval::Map(m) => !m.is_empty(),
            Mlrval::Absent | Mlrval::Error(_) => false,
        }
    }

    /// Parse a srec field's string per the active type-inferencing mode.
    pub fn infer(text: &str, mode: TypeInferencing) -> Mlrval {
        match mode {
            TypeInferencing::StringOnly => Mlrval::Str(text.to_string()),
            TypeInferencing::Int => {
                if let Ok(i) = text.parse::<i64>() {
                    Mlrval::Int(i)
                } else {
                    Mlrval::Str(text.to_string())
                }
            }
            TypeInferencing::IntOrFloat => {
                if let Ok(i) = text.parse::<i64>() {
                    Mlrval::Int(i)
                } else if let Ok(f) = text.parse::<f64>() {
                    Mlrval::Float(f)
                } else {
                    Mlrval::Str(text.to_string())
                }
            }
        }
    }

    /// Stringify for writing back into a srec field.
    pub fn format(&self) -> String {
        match self {
            Mlrval::Absent => String::new(),
            Mlrval::Error(kind) => format!("(error) {}", kind),
            Mlrval::Str(s) => s.clone(),
            Mlrval::Int(i) => i.to_string(),
            Mlrval::Float(f) => f.to_string(),
            Mlrval::Bool(b) => b.to_string(),
            Mlrval::Map(m) => m.to_json().to_string(),
        }
    }
}

/// Consulted by scalar-expression construction (§4.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeInferencing {
    StringOnly,
    Int,
    IntOrFloat,
}

// Factors out the absent/error propagation rule common to every
// arithmetic and relational operator: absent propagates, error is
// sticky, and only then do we dispatch on the concrete operand types.
macro_rules! binop {
    ($name:ident { $( $p:pat => $e:expr ),+ $(,)? }) => {
        pub fn $name(&self, other: &Mlrval) -> Mlrval {
            use Mlrval::*;
            match (self, other) {
                (Error(k), _) | (_, Error(k)) => Error(*k),
                (Absent, _) | (_, Absent) => Absent,
                $($p => $e),+,
                _ => Error(ErrorKind::TypeMismatch),
            }
        }
    };
}

macro_rules! unop {
    ($name:ident { $( $p:pat => $e:expr ),+ $(,)? }) => {
        pub fn $name(&self) -> Mlrval {
            use Mlrval::*;
            match self {
                Error(k) => Error(*k),
                Absent => Absent,
                $($p => $e),+,
                _ => Error(ErrorKind::TypeMismatch),
            }
        }
    };
}

impl Mlrval {
    binop! { add {
        (Int(a), Int(b)) => Mlrval::Int(a + b),
        (Float(a), Float(b)) => Mlrval::Float(a + b),
        (Int(a), Float(b)) => Mlrval::Float(*a as f64 + b),
        (Float(a), Int(b)) => Mlrval::Float(a + *b as f64),
        (Str(a), Str(b)) => Mlrval::Str(format!("{}{}", a, b)),
    } }

    binop! { sub {
        (Int(a), Int(b)) => Mlrval::Int(a - b),
        (Float(a), Float(b)) => Mlrval::Float(a - b),
        (Int(a), Float(b)) => Mlrval::Float(*a as f64 - b),
        (Float(a), Int(b)) => Mlrval::Float(a - *b as f64),
    } }

    binop! { mul {
        (Int(a), Int(b)) => Mlrval::Int(a * b),
        (Float(a), Float(b)) => Mlrval::Float(a * b),
        (Int(a), Float(b)) => Mlrval::Float(*a as f64 * b),
        (Float(a), Int(b)) => Mlrval::Float(a * *b as f64),
    } }

    pub fn div(&self, other: &Mlrval) -> Mlrval {
        use Mlrval::*;
        match (self, other) {
            (Error(k), _) | (_, Error(k)) => Error(*k),
            (Absent, _) | (_, Absent) => Absent,
            (_, Int(0)) => Error(ErrorKind::DivideByZero),
            (Int(a), Int(b)) => Float(*a as f64 / *b as f64),
            (Float(a), Float(b)) => Float(a / b),
            (Int(a), Float(b)) => Float(*a as f64 / b),
            (Float(a), Int(b)) => Float(a / *b as f64),
            _ => Error(ErrorKind::TypeMismatch),
        }
    }

    binop! { lt {
        (Int(a), Int(b)) => Mlrval::Bool(a < b),
        (Float(a), Float(b)) => Mlrval::Bool(a < b),
        (Int(a), Float(b)) => Mlrval::Bool((*a as f64) < *b),
        (Float(a), Int(b)) => Mlrval::Bool(*a < *b as f64),
        (Str(a), Str(b)) => Mlrval::Bool(a < b),
    } }

    binop! { gt {
        (Int(a), Int(b)) => Mlrval::Bool(a > b),
        (Float(a), Float(b)) => Mlrval::Bool(a > b),
        (Int(a), Float(b)) => Mlrval::Bool((*a as f64) > *b),
        (Float(a), Int(b)) => Mlrval::Bool(*a > *b as f64),
        (Str(a), Str(b)) => Mlrval::Bool(a > b),
    } }

    binop! { lte {
        (Int(a), Int(b)) => Mlrval::Bool(a <= b),
        (Float(a), Float(b)) => Mlrval::Bool(a <= b),
        (Int(a), Float(b)) => Mlrval::Bool((*a as f64) <= *b),
        (Float(a), Int(b)) => Mlrval::Bool(*a <= *b as f64),
        (Str(a), Str(b)) => Mlrval::Bool(a <= b),
    } }

    binop! { gte {
        (Int(a), Int(b)) => Mlrval::Bool(a >= b),
        (Float(a), Float(b)) => Mlrval::Bool(a >= b),
        (Int(a), Float(b)) => Mlrval::Bool((*a as f64) >= *b),
        (Float(a), Int(b)) => Mlrval::Bool(*a >= *b as f64),
        (Str(a), Str(b)) => Mlrval::Bool(a >= b),
    } }

    pub fn eq_val(&self, other: &Mlrval) -> Mlrval {
        use Mlrval::*;
        match (self, other) {
            (Error(k), _) | (_, Error(k)) => Error(*k),
            (Absent, _) | (_, Absent) => Absent,
            (Int(a), Int(b)) => Bool(a == b),
            (Float(a), Float(b)) => Bool(a == b),
            (Int(a), Float(b)) => Bool(*a as f64 == *b),
            (Float(a), Int(b)) => Bool(*a == *b as f64),
            (Str(a), Str(b)) => Bool(a == b),
            (Bool(a), Bool(b)) => Bool(a == b),
            _ => Bool(false),
        }
    }

    binop! { and {
        (Bool(a), Bool(b)) => Mlrval::Bool(*a && *b),
    } }

    binop! { or {
        (Bool(a), Bool(b)) => Mlrval::Bool(*a || *b),
    } }

    unop! { not {
        Bool(a) => Mlrval::Bool(!a),
    } }

    unop! { neg {
        Int(a) => Mlrval::Int(-a),
        Float(a) => Mlrval::Float(-a),
    } }
}

impl fmt::Display for Mlrval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

// mlrval is used as a keylist element, hence as a map key in Mlhmmv;
// this requires total Eq/Hash, so floats are compared/hashed by bit
// pattern rather than by the numeric-coercing `eq_val` above (which
// stays the operator semantics, not the map-key identity).
impl PartialEq for Mlrval {
    fn eq(&self, other: &Self) -> bool {
        use Mlrval::*;
        match (self, other) {
            (Absent, Absent) => true,
            (Error(a), Error(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Mlrval {}

impl std::hash::Hash for Mlrval {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Mlrval::Absent => {}
            Mlrval::Error(k) => k.hash(state),
            Mlrval::Str(s) => s.hash(state),
            Mlrval::Int(i) => i.hash(state),
            Mlrval::Float(f) => f.to_bits().hash(state),
            Mlrval::Bool(b) => b.hash(state),
            Mlrval::Map(_) => {} // maps are not used as hash keys in practice
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_propagates_through_arithmetic() {
        assert!(Mlrval::Absent.add(&Mlrval::Int(3)).is_absent());
        assert!(Mlrval::Int(3).add(&Mlrval::Absent).is_absent());
        assert!(Mlrval::Absent.lt(&Mlrval::Int(3)).is_absent());
    }

    #[test]
    fn error_is_sticky() {
        let e = Mlrval::Error(ErrorKind::DivideByZero);
        assert!(e.add(&Mlrval::Int(3)).is_error());
        assert!(Mlrval::Int(3).add(&e).is_error());
    }

    #[test]
    fn div_by_zero_is_error_not_panic() {
        assert!(Mlrval::Int(1).div(&Mlrval::Int(0)).is_error());
    }

    #[test]
    fn type_inferencing_modes() {
        assert_eq!(Mlrval::infer("3", TypeInferencing::StringOnly), Mlrval::Str("3".into()));
        assert_eq!(Mlrval::infer("3", TypeInferencing::Int), Mlrval::Int(3));
        assert_eq!(Mlrval::infer("3.5", TypeInferencing::Int), Mlrval::Str("3.5".into()));
        assert_eq!(Mlrval::infer("3.5", TypeInferencing::IntOrFloat), Mlrval::Float(3.5));
        assert_eq!(Mlrval::infer("abc", TypeInferencing::IntOrFloat), Mlrval::Str("abc".into()));
    }

    #[test]
    fn mask_admits_absent_and_rejects_wrong_tag() {
        assert!(Mlrval::Absent.matches_mask(MASK_NUMERIC));
        assert!(Mlrval::Int(1).matches_mask(MASK_NUMERIC));
        assert!(!Mlrval::Str("x".into()).matches_mask(MASK_NUMERIC));
    }
}
