//! Serialization seam and event naming.
//!
//! A [`Codec`] turns values into bytes and back. [`DomainEvent`] gives every
//! payload type a stable name, and [`EventSet`] is implemented by an
//! aggregate's closed sum of event payloads so the repository can name and
//! encode whichever variant a command produced.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

/// Serialization strategy for event and snapshot payloads.
pub trait Codec: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize a value into bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the value cannot be serialized.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized;

    /// Deserialize bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the bytes are malformed or do not
    /// match the shape of `T`.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}

/// A payload type with a stable, registered name.
///
/// The name is what gets persisted next to the encoded bytes, so it must not
/// change once events of this type have been stored. `#[derive(DomainEvent)]`
/// uses the kebab-case type name unless `#[event(kind = "...")]` overrides it.
///
/// The name belongs to the underlying type: `Box<T>`, `Arc<T>` and `&T` all
/// report `T::KIND`.
pub trait DomainEvent {
    const KIND: &'static str;
}

impl<T: DomainEvent + ?Sized> DomainEvent for &T {
    const KIND: &'static str = T::KIND;
}

impl<T: DomainEvent + ?Sized> DomainEvent for Box<T> {
    const KIND: &'static str = T::KIND;
}

impl<T: DomainEvent + ?Sized> DomainEvent for Arc<T> {
    const KIND: &'static str = T::KIND;
}

/// Closed sum type of the events an aggregate can record.
///
/// Each variant wraps one [`DomainEvent`] payload. `kind` reports the
/// payload's registered name and `encode` serializes the payload alone, so
/// the stored bytes decode straight back into the payload type.
///
/// `#[derive(EventSet)]` generates this for enums of newtype variants:
///
/// ```ignore
/// #[derive(Clone, Debug, EventSet)]
/// enum AccountEvent {
///     Opened(AccountOpened),
///     Deposited(FundsDeposited),
/// }
/// ```
pub trait EventSet: Send + Sync + 'static {
    /// Registered name of the wrapped payload.
    fn kind(&self) -> &'static str;

    /// Encode the wrapped payload.
    ///
    /// # Errors
    ///
    /// Returns the codec's error when the payload cannot be serialized.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error>;
}
