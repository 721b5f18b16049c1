//! Closed-world type registry.
//!
//! A [`Registry`] maps stable payload names to decode thunks. Only registered
//! names can be encoded or decoded: a repository wired with an incomplete
//! list fails every save or load that touches a missing type, rather than
//! guessing at the shape of unknown bytes.
//!
//! ```
//! use chronicle_core::{codec::DomainEvent, registry::Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Opened {
//!     owner: String,
//! }
//!
//! impl DomainEvent for Opened {
//!     const KIND: &'static str = "opened";
//! }
//!
//! let registry: Registry<Opened> = Registry::default().with::<Opened>();
//! let bytes = registry.encode("opened", &Opened { owner: "ada".into() }).unwrap();
//! let decoded = registry.decode("opened", &bytes).unwrap();
//! assert_eq!(decoded.owner, "ada");
//! assert!(registry.decode("closed", &bytes).is_err());
//! ```

use std::{collections::HashMap, fmt};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::codec::{Codec, DomainEvent, EventSet, JsonCodec};

/// Errors raised while encoding or decoding through a [`Registry`].
#[derive(Debug, Error)]
pub enum RegistryError<CodecError>
where
    CodecError: std::error::Error + 'static,
{
    /// The name was never registered.
    #[error("type `{name}` is not registered")]
    NotRegistered { name: String },
    /// The codec could not serialize the value.
    #[error("failed to encode `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: CodecError,
    },
    /// The stored bytes are malformed for the registered type.
    #[error("failed to decode `{name}`: {source}")]
    Decode {
        name: String,
        #[source]
        source: CodecError,
    },
}

type DecodeFn<T, C> = fn(&C, &[u8]) -> Result<T, <C as Codec>::Error>;

/// Name and decode thunk for one registered payload type.
pub struct TypeDescriptor<T, C: Codec> {
    name: &'static str,
    decode: DecodeFn<T, C>,
}

impl<T, C: Codec> TypeDescriptor<T, C> {
    /// Describe payload type `P`, decoded as `P` and converted into `T`.
    #[must_use]
    pub fn of<P>() -> Self
    where
        P: DomainEvent + DeserializeOwned + Into<T>,
    {
        Self {
            name: P::KIND,
            decode: decode_as::<P, T, C>,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Decode bytes into a fresh value of the described type.
    ///
    /// # Errors
    ///
    /// Returns the codec's error for malformed payloads.
    pub fn decode(&self, codec: &C, data: &[u8]) -> Result<T, C::Error> {
        (self.decode)(codec, data)
    }
}

fn decode_as<P, T, C>(codec: &C, data: &[u8]) -> Result<T, C::Error>
where
    P: DeserializeOwned + Into<T>,
    C: Codec,
{
    codec.deserialize::<P>(data).map(Into::into)
}

impl<T, C: Codec> Clone for TypeDescriptor<T, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, C: Codec> Copy for TypeDescriptor<T, C> {}

impl<T, C: Codec> fmt::Debug for TypeDescriptor<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registered payload types decoding into `T`, serialized with codec `C`.
pub struct Registry<T, C: Codec = JsonCodec> {
    codec: C,
    types: HashMap<&'static str, TypeDescriptor<T, C>>,
}

impl<T, C: Codec + Default> Default for Registry<T, C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<T, C: Codec> Registry<T, C> {
    /// Create an empty registry using `codec`.
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            types: HashMap::new(),
        }
    }

    /// Register payload type `P` (builder form).
    #[must_use]
    pub fn with<P>(mut self) -> Self
    where
        P: DomainEvent + DeserializeOwned + Into<T>,
    {
        self.register::<P>();
        self
    }

    /// Register payload type `P`.
    ///
    /// Registering a name again replaces the earlier descriptor, so `P`,
    /// `Box<P>` and `Arc<P>` all share one entry.
    pub fn register<P>(&mut self) -> &mut Self
    where
        P: DomainEvent + DeserializeOwned + Into<T>,
    {
        let descriptor = TypeDescriptor::of::<P>();
        if self.types.insert(descriptor.name, descriptor).is_some() {
            tracing::trace!(name = descriptor.name, "replaced registered type");
        }
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// Encode `value` under a registered `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown names and
    /// [`RegistryError::Encode`] when the codec fails.
    pub fn encode<V>(&self, name: &str, value: &V) -> Result<Vec<u8>, RegistryError<C::Error>>
    where
        V: Serialize + ?Sized,
    {
        self.ensure_registered(name)?;
        self.codec
            .serialize(value)
            .map_err(|source| RegistryError::Encode {
                name: name.to_string(),
                source,
            })
    }

    /// Decode bytes stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown names and
    /// [`RegistryError::Decode`] for malformed payloads.
    pub fn decode(&self, name: &str, data: &[u8]) -> Result<T, RegistryError<C::Error>> {
        let descriptor = self
            .types
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })?;
        descriptor
            .decode(&self.codec, data)
            .map_err(|source| RegistryError::Decode {
                name: name.to_string(),
                source,
            })
    }

    fn ensure_registered(&self, name: &str) -> Result<(), RegistryError<C::Error>> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(RegistryError::NotRegistered {
                name: name.to_string(),
            })
        }
    }
}

impl<T: EventSet, C: Codec> Registry<T, C> {
    /// Name and encode one variant of an event set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] when the variant's payload was
    /// never registered and [`RegistryError::Encode`] when the codec fails.
    pub fn encode_event(
        &self,
        event: &T,
    ) -> Result<(&'static str, Vec<u8>), RegistryError<C::Error>> {
        let name = event.kind();
        self.ensure_registered(name)?;
        let data = event
            .encode(&self.codec)
            .map_err(|source| RegistryError::Encode {
                name: name.to_string(),
                source,
            })?;
        Ok((name, data))
    }
}

impl<T, C: Codec + fmt::Debug> fmt::Debug for Registry<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("codec", &self.codec)
            .field("names", &self.names())
            .finish()
    }
}
