//! Runtime type descriptors.
//!
//! The wire format talks about types: a field carries its runtime type whenever it differs from
//! the statically expected one. [`Type`] is the descriptor used for that, identified by its
//! canonical name:
//!
//! - `name` for named types
//! - `definition<arg,...>` for constructed generics
//! - `element[]`, `element[,]`, ... for arrays (rank = commas + 1)
//! - `element*` / `element&` for pointer and by-ref shapes (never serializable)

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::{Error, Result};

/// Descriptor of a runtime type. Cheap to clone; equality and hashing use the canonical name.
#[derive(Clone)]
pub struct Type(Arc<TypeDef>);

struct TypeDef {
    name: String,
    kind: TypeKind,
}

/// The shape of a [`Type`].
#[derive(Clone, Debug)]
pub enum TypeKind {
    /// Built-in leaf value type.
    Primitive,
    /// User-defined value type.
    Struct,
    /// Enumeration over a 64-bit integer.
    Enum,
    /// Reference type, optionally derived from `base`.
    Class {
        base: Option<Type>,
        interfaces: Vec<Type>,
        is_abstract: bool,
    },
    Interface,
    /// Open generic type; only its constructions can be serialized.
    GenericDefinition { arity: usize, is_value_type: bool },
    Constructed { definition: Type, arguments: Vec<Type> },
    Array { element: Type, rank: usize },
    Pointer(Type),
    ByRef(Type),
}

impl Type {
    fn from_parts(name: String, kind: TypeKind) -> Self {
        Type(Arc::new(TypeDef { name, kind }))
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), TypeKind::Primitive)
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), TypeKind::Struct)
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), TypeKind::Enum)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::from_parts(
            name.into(),
            TypeKind::Class {
                base: None,
                interfaces: Vec::new(),
                is_abstract: false,
            },
        )
    }

    /// A class deriving from `base`.
    pub fn derived(name: impl Into<String>, base: &Type) -> Self {
        Self::from_parts(
            name.into(),
            TypeKind::Class {
                base: Some(base.clone()),
                interfaces: Vec::new(),
                is_abstract: false,
            },
        )
    }

    pub fn abstract_class(name: impl Into<String>, base: Option<&Type>) -> Self {
        Self::from_parts(
            name.into(),
            TypeKind::Class {
                base: base.cloned(),
                interfaces: Vec::new(),
                is_abstract: true,
            },
        )
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), TypeKind::Interface)
    }

    /// Returns this class with `interfaces` added to its implemented set.
    ///
    /// Non-class types are returned unchanged.
    pub fn implementing(self, extra: &[Type]) -> Self {
        match &self.0.kind {
            TypeKind::Class {
                base,
                interfaces,
                is_abstract,
            } => {
                let mut all = interfaces.clone();
                all.extend(extra.iter().cloned());
                Self::from_parts(
                    self.0.name.clone(),
                    TypeKind::Class {
                        base: base.clone(),
                        interfaces: all,
                        is_abstract: *is_abstract,
                    },
                )
            }
            _ => self,
        }
    }

    pub fn generic_definition(name: impl Into<String>, arity: usize, is_value_type: bool) -> Self {
        Self::from_parts(name.into(), TypeKind::GenericDefinition { arity, is_value_type })
    }

    /// Constructs `definition<arguments...>`.
    ///
    /// # Errors
    /// `UnsupportedType` if `definition` is not a generic definition or the argument count does
    /// not match its arity.
    pub fn constructed(definition: &Type, arguments: Vec<Type>) -> Result<Self> {
        match definition.kind() {
            TypeKind::GenericDefinition { arity, .. } if *arity == arguments.len() => {}
            TypeKind::GenericDefinition { .. } => {
                return Err(Error::UnsupportedType {
                    ty: definition.clone(),
                    reason: "generic argument count does not match arity",
                })
            }
            _ => {
                return Err(Error::UnsupportedType {
                    ty: definition.clone(),
                    reason: "not a generic type definition",
                })
            }
        }
        Ok(Self::construct(definition, arguments))
    }

    /// Builds a construction whose arity is known to match.
    pub(crate) fn construct(definition: &Type, arguments: Vec<Type>) -> Self {
        let args: Vec<&str> = arguments.iter().map(Type::name).collect();
        let name = format!("{}<{}>", definition.name(), args.join(","));
        Self::from_parts(
            name,
            TypeKind::Constructed {
                definition: definition.clone(),
                arguments,
            },
        )
    }

    pub fn array(element: &Type, rank: usize) -> Self {
        let rank = rank.max(1);
        let name = format!("{}[{}]", element.name(), ",".repeat(rank - 1));
        Self::from_parts(
            name,
            TypeKind::Array {
                element: element.clone(),
                rank,
            },
        )
    }

    pub fn pointer(element: &Type) -> Self {
        Self::from_parts(format!("{}*", element.name()), TypeKind::Pointer(element.clone()))
    }

    pub fn by_ref(element: &Type) -> Self {
        Self::from_parts(format!("{}&", element.name()), TypeKind::ByRef(element.clone()))
    }

    /// The root of the class hierarchy; fields of this type accept any value.
    pub fn object() -> Self {
        OBJECT.clone()
    }

    /// An opaque byte buffer, written length-prefixed.
    pub fn bytes() -> Self {
        BYTES.clone()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn is_value_type(&self) -> bool {
        match self.kind() {
            TypeKind::Primitive | TypeKind::Struct | TypeKind::Enum => true,
            TypeKind::GenericDefinition { is_value_type, .. } => *is_value_type,
            TypeKind::Constructed { definition, .. } => definition.is_value_type(),
            _ => false,
        }
    }

    pub fn is_reference_type(&self) -> bool {
        !self.is_value_type()
    }

    /// Interfaces, abstract classes and `object` have no codec of their own.
    pub fn is_abstract(&self) -> bool {
        match self.kind() {
            TypeKind::Interface => true,
            TypeKind::Class { is_abstract, .. } => *is_abstract,
            _ => false,
        }
    }

    pub fn base(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Class { base, .. } => base.as_ref(),
            _ => None,
        }
    }

    pub fn generic_definition_of(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Constructed { definition, .. } => Some(definition),
            _ => None,
        }
    }

    pub fn generic_arguments(&self) -> &[Type] {
        match self.kind() {
            TypeKind::Constructed { arguments, .. } => arguments,
            _ => &[],
        }
    }

    /// Whether a value of type `other` may be stored in a location of this type.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other || *self == *OBJECT {
            return true;
        }
        match other.kind() {
            TypeKind::Class { base, interfaces, .. } => {
                interfaces.iter().any(|i| self.is_assignable_from(i))
                    || base.as_ref().is_some_and(|b| self.is_assignable_from(b))
            }
            _ => false,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.0.name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

static OBJECT: LazyLock<Type> = LazyLock::new(|| Type::abstract_class("object", None));
static BYTES: LazyLock<Type> = LazyLock::new(|| Type::primitive("bytes"));

/// Fixed, process-wide table of common primitive types addressed by small integer ids.
#[derive(Debug)]
pub struct WellKnownTypes {
    by_id: Vec<Type>,
    by_type: HashMap<Type, u32>,
}

impl WellKnownTypes {
    fn new(by_id: Vec<Type>) -> Self {
        let by_type = by_id
            .iter()
            .enumerate()
            .map(|(id, ty)| (ty.clone(), id as u32))
            .collect();
        Self { by_id, by_type }
    }

    pub fn get(&self, id: u32) -> Option<&Type> {
        self.by_id.get(id as usize)
    }

    pub fn id_of(&self, ty: &Type) -> Option<u32> {
        self.by_type.get(ty).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Type)> {
        self.by_id.iter().enumerate().map(|(id, ty)| (id as u32, ty))
    }
}

/// Returns the shared well-known type table.
pub fn well_known_types() -> &'static WellKnownTypes {
    &WELL_KNOWN
}

// Ids are part of the wire format and must never be reordered.
macro_rules! well_known {
    ($($id:literal => $fn_name:ident : $name:literal),* $(,)?) => {
        static WELL_KNOWN: LazyLock<WellKnownTypes> =
            LazyLock::new(|| WellKnownTypes::new(vec![$(Type::primitive($name)),*]));

        impl Type {
            $(
                #[doc = concat!("The well-known `", $name, "` type (id ", $id, ").")]
                pub fn $fn_name() -> Type {
                    WELL_KNOWN.by_id[$id].clone()
                }
            )*
        }
    };
}

well_known! {
    0 => void: "void",
    1 => int32: "i32",
    2 => string: "string",
    3 => boolean: "bool",
    4 => int16: "i16",
    5 => int64: "i64",
    6 => int8: "i8",
    7 => uint32: "u32",
    8 => uint16: "u16",
    9 => uint64: "u64",
    10 => uint8: "u8",
    11 => float32: "f32",
    12 => float64: "f64",
    13 => decimal: "decimal",
    14 => char: "char",
    15 => guid: "guid",
    16 => datetime: "datetime",
    17 => duration: "duration",
}

/// Decides whether a type named in a stream may be materialized.
///
/// Returning `Some(false)` rejects the type; `None` abstains.
pub trait TypeFilter: Send + Sync {
    fn is_type_allowed(&self, ty: &Type) -> Option<bool>;
}

impl<F> TypeFilter for F
where
    F: Fn(&Type) -> Option<bool> + Send + Sync,
{
    fn is_type_allowed(&self, ty: &Type) -> Option<bool> {
        self(ty)
    }
}

/// The runtime type named by a field header.
///
/// A name that does not resolve is kept rather than rejected, so a field of an unknown type can
/// still be skipped. Reading its value fails.
#[derive(Clone, Debug, PartialEq)]
pub enum CarriedType {
    Resolved(Type),
    Unresolved { name: String, rejected: bool },
}

impl CarriedType {
    /// # Errors
    /// `UnknownTypeName`, or `TypeNotAllowed` if a filter rejected the name.
    pub fn resolved(&self) -> Result<&Type> {
        match self {
            CarriedType::Resolved(ty) => Ok(ty),
            CarriedType::Unresolved { name, rejected: false } => Err(Error::UnknownTypeName {
                name: name.clone(),
            }),
            CarriedType::Unresolved { name, rejected: true } => Err(Error::TypeNotAllowed {
                name: name.clone(),
            }),
        }
    }
}

/// Maps type names read from a stream back to registered types.
///
/// Only registered names, plus arrays and constructions over them, resolve. Every component of
/// a resolved type is checked against the configured filters.
pub struct TypeResolver {
    named: HashMap<String, Type>,
    parsed: DashMap<String, Type>,
    filters: Vec<Arc<dyn TypeFilter>>,
}

impl TypeResolver {
    pub fn new(types: impl IntoIterator<Item = Type>, filters: Vec<Arc<dyn TypeFilter>>) -> Self {
        let mut named: HashMap<String, Type> = well_known_types()
            .iter()
            .map(|(_, ty)| (ty.name().to_string(), ty.clone()))
            .collect();
        named.insert(OBJECT.name().to_string(), OBJECT.clone());
        named.insert(BYTES.name().to_string(), BYTES.clone());
        for ty in types {
            named.insert(ty.name().to_string(), ty);
        }
        Self {
            named,
            parsed: DashMap::new(),
            filters,
        }
    }

    /// Resolves `name` and checks it against the type filters.
    ///
    /// # Errors
    /// `UnknownTypeName` if the name does not resolve, `TypeNotAllowed` if a filter rejects it.
    pub fn resolve(&self, name: &str) -> Result<Type> {
        let ty = match self.named.get(name) {
            Some(ty) => ty.clone(),
            None => match self.parsed.get(name) {
                Some(ty) => ty.clone(),
                None => {
                    let ty = self.parse(name).ok_or_else(|| Error::UnknownTypeName {
                        name: name.to_string(),
                    })?;
                    self.parsed.insert(name.to_string(), ty.clone());
                    ty
                }
            },
        };
        if !self.is_allowed(&ty) {
            return Err(Error::TypeNotAllowed {
                name: name.to_string(),
            });
        }
        Ok(ty)
    }

    pub fn is_allowed(&self, ty: &Type) -> bool {
        let permitted = !self
            .filters
            .iter()
            .any(|filter| filter.is_type_allowed(ty) == Some(false));
        permitted
            && match ty.kind() {
                TypeKind::Constructed {
                    definition,
                    arguments,
                } => self.is_allowed(definition) && arguments.iter().all(|a| self.is_allowed(a)),
                TypeKind::Array { element, .. } => self.is_allowed(element),
                _ => true,
            }
    }

    fn parse(&self, name: &str) -> Option<Type> {
        let name = name.trim();
        if let Some(ty) = self.named.get(name) {
            return Some(ty.clone());
        }
        if let Some(prefix) = name.strip_suffix(']') {
            let open = prefix.rfind('[')?;
            let commas = &prefix[open + 1..];
            if !commas.chars().all(|c| c == ',') {
                return None;
            }
            let element = self.parse(&prefix[..open])?;
            return Some(Type::array(&element, commas.len() + 1));
        }
        if let Some(prefix) = name.strip_suffix('>') {
            let open = prefix.find('<')?;
            let definition = self.named.get(prefix[..open].trim())?;
            let arguments = split_arguments(&prefix[open + 1..])?
                .into_iter()
                .map(|arg| self.parse(arg))
                .collect::<Option<Vec<_>>>()?;
            return Type::constructed(definition, arguments).ok();
        }
        None
    }
}

/// Splits `a,b<c,d>,e[,]` at top-level commas.
fn split_arguments(list: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '<' | '[' => depth += 1,
            '>' | ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(&list[start..]);
    if parts.iter().any(|p| p.trim().is_empty()) {
        return None;
    }
    Some(parts)
}
