//! Codec resolution.
//!
//! [`CodecProvider`] maps a runtime [`Type`] to the codec that handles it, trying in order:
//!
//! 1. reject shapes that can never be serialized (open generics, pointers, by-refs)
//! 2. an exact registration, or a generic codec factory for a constructed type
//! 3. a registered partial or value serializer, wrapped in a framing codec
//! 4. arrays, by rank
//! 5. generalized codecs, by predicate
//! 6. the abstract-type codec for interfaces, abstract classes and `object`
//!
//! Resolved codecs are cached. Concurrent first lookups may build a codec twice, but every
//! caller observes the one that reached the cache first.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::debug;

use crate::codec::{
    Activator, DefaultActivator, Described, ErasedCodec, FieldCodec, Object, ObjectValue,
    PartialSerializer, Shared,
    TypedCodec, ValueSerializer,
};
use crate::collections::{
    dictionary_definition, list_definition, ArrayCodec, DictionaryCodec, ListCodec,
    MultiDimensionalArrayCodec,
};
use crate::core::{
    BoolCodec, BytesCodec, CharCodec, DurationCodec, Float32Codec, Float64Codec, IntegerCodec,
    StringCodec,
};
use crate::object::{AbstractTypeCodec, ConcreteTypeCodec, EnumCodecs, ValueSerializerCodec};
use crate::session::TypeCodec;
use crate::types::{Type, TypeFilter, TypeKind, TypeResolver};
use crate::{Error, Result};

/// A codec that decides by predicate which types it handles.
pub trait GeneralizedCodec: Send + Sync {
    fn is_supported_type(&self, ty: &Type) -> bool;

    fn codec_for(&self, ty: &Type) -> Arc<dyn FieldCodec<Object>>;
}

/// Supplies generalized codecs. Sources are asked once, on first use.
pub trait GeneralizedCodecSource: Send + Sync {
    fn generalized_codecs(&self) -> Vec<Arc<dyn GeneralizedCodec>>;
}

impl<F> GeneralizedCodecSource for F
where
    F: Fn() -> Vec<Arc<dyn GeneralizedCodec>> + Send + Sync,
{
    fn generalized_codecs(&self) -> Vec<Arc<dyn GeneralizedCodec>> {
        self()
    }
}

/// Builds the codec for one construction of a generic definition.
pub type GenericCodecFactory =
    Arc<dyn Fn(&Type) -> Result<Arc<dyn FieldCodec<Object>>> + Send + Sync>;

type CodecFactory = Arc<dyn Fn() -> CodecEntry + Send + Sync>;

/// A resolved codec in whichever conventions are available for it.
#[derive(Clone)]
enum CodecEntry {
    /// `typed` holds an `Arc<dyn FieldCodec<T>>` where `TypeId::of::<T>() == value_type`.
    Typed {
        value_type: TypeId,
        typed: Arc<dyn Any + Send + Sync>,
        erased: Arc<dyn FieldCodec<Object>>,
    },
    Erased(Arc<dyn FieldCodec<Object>>),
}

impl CodecEntry {
    fn typed<T: ObjectValue>(ty: &Type, codec: Arc<dyn FieldCodec<T>>) -> Self {
        let erased: Arc<dyn FieldCodec<Object>> = Arc::new(
            ErasedCodec::new(ty.clone(), codec.clone()),
        );
        CodecEntry::Typed {
            value_type: TypeId::of::<T>(),
            typed: Arc::new(codec),
            erased,
        }
    }

    fn erased(&self) -> Arc<dyn FieldCodec<Object>> {
        match self {
            CodecEntry::Typed { erased, .. } | CodecEntry::Erased(erased) => erased.clone(),
        }
    }

    fn downcast<T: 'static>(&self) -> Option<Arc<dyn FieldCodec<T>>> {
        match self {
            CodecEntry::Typed { value_type, typed, .. } if *value_type == TypeId::of::<T>() => {
                typed.downcast_ref::<Arc<dyn FieldCodec<T>>>().cloned()
            }
            _ => None,
        }
    }
}

/// Resolves and caches codecs. Immutable once built; share it behind an `Arc`.
pub struct CodecProvider {
    codecs: HashMap<Type, CodecEntry>,
    generic_codecs: HashMap<Type, GenericCodecFactory>,
    serializers: HashMap<Type, CodecFactory>,
    partial_serializers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    sources: Vec<Arc<dyn GeneralizedCodecSource>>,
    generalized: OnceLock<Vec<Arc<dyn GeneralizedCodec>>>,
    resolved: DashMap<Type, CodecEntry>,
    adapted: DashMap<(Type, TypeId), Arc<dyn Any + Send + Sync>>,
    type_codec: TypeCodec,
}

impl CodecProvider {
    /// A builder pre-populated with the built-in codecs.
    pub fn builder() -> CodecProviderBuilder {
        CodecProviderBuilder::new()
    }

    /// The typed codec for `T`, adapting a type-erased codec if that is all there is.
    ///
    /// # Errors
    /// `CodecNotFound` or `UnsupportedType` if nothing handles `T::static_type()`.
    pub fn codec<T: ObjectValue>(&self) -> Result<Arc<dyn FieldCodec<T>>> {
        let ty = T::static_type();
        let entry = self.resolve(&ty)?;
        if let Some(codec) = entry.downcast::<T>() {
            return Ok(codec);
        }

        let key = (ty, TypeId::of::<T>());
        if let Some(adapted) = self.adapted.get(&key) {
            if let Some(codec) = adapted.downcast_ref::<Arc<dyn FieldCodec<T>>>() {
                return Ok(codec.clone());
            }
        }
        let codec: Arc<dyn FieldCodec<T>> = Arc::new(TypedCodec::<T>::new(entry.erased()));
        let stored = self
            .adapted
            .entry(key)
            .or_insert_with(|| Arc::new(codec.clone()) as Arc<dyn Any + Send + Sync>)
            .clone();
        Ok(stored
            .downcast_ref::<Arc<dyn FieldCodec<T>>>()
            .cloned()
            .unwrap_or(codec))
    }

    /// The type-erased codec for `ty`.
    pub fn object_codec(&self, ty: &Type) -> Result<Arc<dyn FieldCodec<Object>>> {
        self.resolve(ty).map(|entry| entry.erased())
    }

    /// Like [`object_codec`](Self::object_codec), but `None` instead of `CodecNotFound`.
    pub fn try_object_codec(&self, ty: &Type) -> Result<Option<Arc<dyn FieldCodec<Object>>>> {
        match self.resolve(ty) {
            Ok(entry) => Ok(Some(entry.erased())),
            Err(Error::CodecNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The registered partial serializer for `T`, for use by derived types' serializers.
    ///
    /// # Errors
    /// `SerializerNotFound` if none was registered.
    pub fn partial_serializer<T: Described + 'static>(
        &self,
    ) -> Result<Arc<dyn PartialSerializer<T>>> {
        self.partial_serializers
            .get(&TypeId::of::<T>())
            .and_then(|serializer| serializer.downcast_ref::<Arc<dyn PartialSerializer<T>>>())
            .cloned()
            .ok_or_else(|| Error::SerializerNotFound {
                ty: T::described_type(),
            })
    }

    pub fn type_codec(&self) -> &TypeCodec {
        &self.type_codec
    }

    /// Whether some codec handles `ty`.
    pub fn is_supported(&self, ty: &Type) -> bool {
        self.resolve(ty).is_ok()
    }

    fn resolve(&self, ty: &Type) -> Result<CodecEntry> {
        if let Some(entry) = self.resolved.get(ty) {
            return Ok(entry.clone());
        }
        let entry = self.create(ty)?;
        Ok(self.resolved.entry(ty.clone()).or_insert(entry).clone())
    }

    fn create(&self, ty: &Type) -> Result<CodecEntry> {
        let reason = match ty.kind() {
            TypeKind::GenericDefinition { .. } => Some("open generic type definition"),
            TypeKind::Pointer(_) => Some("pointer type"),
            TypeKind::ByRef(_) => Some("by-ref type"),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(Error::UnsupportedType { ty: ty.clone(), reason });
        }

        if let Some(entry) = self.codecs.get(ty) {
            debug!(ty = %ty, "resolved registered codec");
            return Ok(entry.clone());
        }
        if let Some(definition) = ty.generic_definition_of() {
            if let Some(factory) = self.generic_codecs.get(definition) {
                debug!(ty = %ty, "constructed generic codec");
                return factory(ty).map(CodecEntry::Erased);
            }
        }

        if let Some(factory) = self.serializers.get(ty) {
            debug!(ty = %ty, "synthesized serializer codec");
            return Ok(factory());
        }

        if let TypeKind::Array { element, rank } = ty.kind() {
            debug!(ty = %ty, rank, "resolved array codec");
            let codec: Arc<dyn FieldCodec<Object>> = if *rank == 1 {
                Arc::new(ArrayCodec::new(element))
            } else {
                Arc::new(MultiDimensionalArrayCodec::new(element, *rank))
            };
            return Ok(CodecEntry::Erased(codec));
        }

        let generalized = self.generalized.get_or_init(|| {
            self.sources
                .iter()
                .flat_map(|source| source.generalized_codecs())
                .collect()
        });
        if let Some(codec) = generalized.iter().find(|codec| codec.is_supported_type(ty)) {
            debug!(ty = %ty, "resolved generalized codec");
            return Ok(CodecEntry::Erased(codec.codec_for(ty)));
        }

        if ty.is_abstract() {
            debug!(ty = %ty, "resolved abstract type codec");
            return Ok(CodecEntry::Erased(Arc::new(AbstractTypeCodec::new(ty.clone()))));
        }

        Err(Error::CodecNotFound { ty: ty.clone() })
    }
}

impl std::fmt::Debug for CodecProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecProvider")
            .field("codecs", &self.codecs.len())
            .field("serializers", &self.serializers.len())
            .field("resolved", &self.resolved.len())
            .finish_non_exhaustive()
    }
}

/// Registers codecs, serializers and types, then freezes them into a [`CodecProvider`].
///
/// ```
/// use senax_wire::CodecProvider;
///
/// let provider = CodecProvider::builder().build();
/// assert!(provider.codec::<String>().is_ok());
/// ```
pub struct CodecProviderBuilder {
    types: Vec<Type>,
    codecs: HashMap<Type, CodecEntry>,
    generic_codecs: HashMap<Type, GenericCodecFactory>,
    serializers: HashMap<Type, CodecFactory>,
    partial_serializers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    sources: Vec<Arc<dyn GeneralizedCodecSource>>,
    filters: Vec<Arc<dyn TypeFilter>>,
}

impl CodecProviderBuilder {
    fn new() -> Self {
        let builder = Self {
            types: Vec::new(),
            codecs: HashMap::new(),
            generic_codecs: HashMap::new(),
            serializers: HashMap::new(),
            partial_serializers: HashMap::new(),
            sources: Vec::new(),
            filters: Vec::new(),
        };
        let builder = builder
            .add_codec::<bool>(BoolCodec)
            .add_codec::<i8>(IntegerCodec::new())
            .add_codec::<i16>(IntegerCodec::new())
            .add_codec::<i32>(IntegerCodec::new())
            .add_codec::<i64>(IntegerCodec::new())
            .add_codec::<u8>(IntegerCodec::new())
            .add_codec::<u16>(IntegerCodec::new())
            .add_codec::<u32>(IntegerCodec::new())
            .add_codec::<u64>(IntegerCodec::new())
            .add_codec::<f32>(Float32Codec)
            .add_codec::<f64>(Float64Codec)
            .add_codec::<char>(CharCodec)
            .add_codec::<String>(StringCodec)
            .add_codec::<bytes::Bytes>(BytesCodec)
            .add_codec::<std::time::Duration>(DurationCodec)
            .add_generic_codec(&list_definition(), |ty: &Type| {
                Ok(Arc::new(ListCodec::new(ty)?) as Arc<dyn FieldCodec<Object>>)
            })
            .add_generic_codec(&dictionary_definition(), |ty: &Type| {
                Ok(Arc::new(DictionaryCodec::new(ty)?) as Arc<dyn FieldCodec<Object>>)
            })
            .add_generalized_source(|| vec![Arc::new(EnumCodecs) as Arc<dyn GeneralizedCodec>]);
        crate::features::register(builder)
    }

    /// Makes `ty` resolvable by name when it appears in a stream.
    pub fn add_type(mut self, ty: Type) -> Self {
        self.types.push(ty);
        self
    }

    /// Registers a typed codec for `T::static_type()`, replacing any earlier registration.
    pub fn add_codec<T: ObjectValue>(mut self, codec: impl FieldCodec<T> + 'static) -> Self {
        let ty = T::static_type();
        let codec: Arc<dyn FieldCodec<T>> = Arc::new(codec);
        self.codecs.insert(ty.clone(), CodecEntry::typed(&ty, codec));
        self.types.push(ty);
        self
    }

    /// Registers a type-erased codec for `ty`.
    pub fn add_object_codec(mut self, ty: Type, codec: impl FieldCodec<Object> + 'static) -> Self {
        self.codecs.insert(ty.clone(), CodecEntry::Erased(Arc::new(codec)));
        self.types.push(ty);
        self
    }

    /// Registers a factory for every construction of the generic `definition`.
    pub fn add_generic_codec<F>(mut self, definition: &Type, factory: F) -> Self
    where
        F: Fn(&Type) -> Result<Arc<dyn FieldCodec<Object>>> + Send + Sync + 'static,
    {
        self.generic_codecs.insert(definition.clone(), Arc::new(factory));
        self.types.push(definition.clone());
        self
    }

    /// Registers the partial serializer and activator of reference type `T`.
    pub fn add_serializer<T: Described + Send + Sync + 'static>(
        mut self,
        serializer: impl PartialSerializer<T> + 'static,
        activator: impl Activator<T> + 'static,
    ) -> Self {
        let ty = T::described_type();
        let serializer: Arc<dyn PartialSerializer<T>> = Arc::new(serializer);
        let activator: Arc<dyn Activator<T>> = Arc::new(activator);
        self.partial_serializers
            .insert(TypeId::of::<T>(), Arc::new(serializer.clone()));
        let codec_type = ty.clone();
        self.serializers.insert(
            ty.clone(),
            Arc::new(move || {
                let codec: Arc<dyn FieldCodec<Option<Shared<T>>>> =
                    Arc::new(ConcreteTypeCodec::new(serializer.clone(), activator.clone()));
                CodecEntry::typed(&codec_type, codec)
            }),
        );
        self.types.push(ty);
        self
    }

    /// Registers a partial serializer for `T`, activating instances through [`Default`].
    pub fn add_default_serializer<T: Described + Default + Send + Sync + 'static>(
        self,
        serializer: impl PartialSerializer<T> + 'static,
    ) -> Self {
        self.add_serializer(serializer, DefaultActivator::<T>::new())
    }

    /// Registers the serializer of value type `T`.
    pub fn add_value_serializer<T: ObjectValue + Default>(
        mut self,
        serializer: impl ValueSerializer<T> + 'static,
    ) -> Self {
        let ty = T::static_type();
        let serializer: Arc<dyn ValueSerializer<T>> = Arc::new(serializer);
        let codec_type = ty.clone();
        self.serializers.insert(
            ty.clone(),
            Arc::new(move || {
                let codec: Arc<dyn FieldCodec<T>> = Arc::new(
                    ValueSerializerCodec::new(serializer.clone()),
                );
                CodecEntry::typed(&codec_type, codec)
            }),
        );
        self.types.push(ty);
        self
    }

    pub fn add_generalized_source(mut self, source: impl GeneralizedCodecSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Adds a filter consulted whenever a type name is read from a stream.
    pub fn add_type_filter(mut self, filter: impl TypeFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn build(self) -> Arc<CodecProvider> {
        debug!(
            codecs = self.codecs.len(),
            serializers = self.serializers.len(),
            types = self.types.len(),
            "building codec provider"
        );
        let resolver = TypeResolver::new(self.types, self.filters);
        Arc::new(CodecProvider {
            codecs: self.codecs,
            generic_codecs: self.generic_codecs,
            serializers: self.serializers,
            partial_serializers: self.partial_serializers,
            sources: self.sources,
            generalized: OnceLock::new(),
            resolved: DashMap::new(),
            adapted: DashMap::new(),
            type_codec: TypeCodec::new(resolver),
        })
    }
}

impl Default for CodecProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
