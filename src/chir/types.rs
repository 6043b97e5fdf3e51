//! The CHIR type graph.
//!
//! Types are value-shaped and compare structurally. The wrapper cache and
//! devirtualisation use a relaxed structural equality that treats generic
//! variables as wildcards, so an instantiated method still matches the cache
//! entry created from its generic original.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChirType {
    Unit,
    Bool,
    Rune,
    Int { width: u8 },
    UInt { width: u8 },
    Float { width: u8 },
    Class { def: String, args: Vec<ChirType> },
    Struct { def: String, args: Vec<ChirType> },
    Enum { def: String, args: Vec<ChirType> },
    /// A generic type variable, e.g. the `T` of `func foo<T>()`.
    Generic(String),
    Func { params: Vec<ChirType>, ret: Box<ChirType> },
    Ref(Box<ChirType>),
    Tuple(Vec<ChirType>),
}

impl ChirType {
    pub fn class(def: impl Into<String>) -> Self {
        ChirType::Class { def: def.into(), args: Vec::new() }
    }

    pub fn strukt(def: impl Into<String>) -> Self {
        ChirType::Struct { def: def.into(), args: Vec::new() }
    }

    pub fn func(params: Vec<ChirType>, ret: ChirType) -> Self {
        ChirType::Func { params, ret: Box::new(ret) }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ChirType::Int { .. } | ChirType::UInt { .. })
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            ChirType::Unit
                | ChirType::Bool
                | ChirType::Rune
                | ChirType::Int { .. }
                | ChirType::UInt { .. }
                | ChirType::Float { .. }
                | ChirType::Struct { .. }
                | ChirType::Enum { .. }
                | ChirType::Tuple(_)
        )
    }

    /// The mangled definition name behind a nominal type.
    pub fn def_name(&self) -> Option<&str> {
        match self {
            ChirType::Class { def, .. } | ChirType::Struct { def, .. } | ChirType::Enum { def, .. } => {
                Some(def)
            }
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            ChirType::Unit => "Unit".into(),
            ChirType::Bool => "Bool".into(),
            ChirType::Rune => "Rune".into(),
            ChirType::Int { width } => format!("Int{width}"),
            ChirType::UInt { width } => format!("UInt{width}"),
            ChirType::Float { width } => format!("Float{width}"),
            ChirType::Class { def, args }
            | ChirType::Struct { def, args }
            | ChirType::Enum { def, args } => {
                if args.is_empty() {
                    def.clone()
                } else {
                    let rendered: Vec<String> = args.iter().map(ChirType::render).collect();
                    format!("{def}<{}>", rendered.join(","))
                }
            }
            ChirType::Generic(name) => name.clone(),
            ChirType::Func { params, ret } => {
                let rendered: Vec<String> = params.iter().map(ChirType::render).collect();
                format!("({})->{}", rendered.join(","), ret.render())
            }
            ChirType::Ref(inner) => format!("&{}", inner.render()),
            ChirType::Tuple(elems) => {
                let rendered: Vec<String> = elems.iter().map(ChirType::render).collect();
                format!("({})", rendered.join(","))
            }
        }
    }
}

/// Structural equality with generic variables as wildcards on either side.
pub fn wildcard_eq(a: &ChirType, b: &ChirType) -> bool {
    match (a, b) {
        (ChirType::Generic(_), _) | (_, ChirType::Generic(_)) => true,
        (
            ChirType::Class { def: da, args: aa },
            ChirType::Class { def: db, args: ab },
        )
        | (
            ChirType::Struct { def: da, args: aa },
            ChirType::Struct { def: db, args: ab },
        )
        | (
            ChirType::Enum { def: da, args: aa },
            ChirType::Enum { def: db, args: ab },
        ) => da == db && aa.len() == ab.len() && aa.iter().zip(ab).all(|(x, y)| wildcard_eq(x, y)),
        (ChirType::Func { params: pa, ret: ra }, ChirType::Func { params: pb, ret: rb }) => {
            pa.len() == pb.len()
                && pa.iter().zip(pb).all(|(x, y)| wildcard_eq(x, y))
                && wildcard_eq(ra, rb)
        }
        (ChirType::Ref(ia), ChirType::Ref(ib)) => wildcard_eq(ia, ib),
        (ChirType::Tuple(ea), ChirType::Tuple(eb)) => {
            ea.len() == eb.len() && ea.iter().zip(eb).all(|(x, y)| wildcard_eq(x, y))
        }
        _ => a == b,
    }
}
