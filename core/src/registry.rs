//! Allowlist registry mapping stable type keys to event types.
//!
//! The registry is populated once at startup and read-only afterwards; share
//! it as an `Arc<TypeRegistry>` for unsynchronized concurrent lookups. It is
//! consulted twice: at capture time to stamp outgoing records (an
//! unregistered event fails the capture, and with it the business
//! transaction), and at dispatch time to refuse relaying records whose key is
//! no longer registered.

use std::any::TypeId;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The type key has not been registered. Registration is explicit; this
    /// is a configuration error, not a runtime condition to retry.
    #[error("Type key '{0}' is not registered in the outbox type registry")]
    UnregisteredKey(String),

    /// The Rust type has not been registered.
    #[error("Type '{0}' is not registered in the outbox type registry")]
    UnregisteredType(&'static str),
}

/// Compile-time metadata for a registrable event type.
///
/// # Example
///
/// ```
/// use outbox_relay_core::registry::EventType;
///
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl EventType for OrderPlaced {
///     const TYPE_KEY: &'static str = "orders.order-placed";
/// }
/// ```
pub trait EventType {
    /// Stable key identifying this event type on the wire and in the store.
    const TYPE_KEY: &'static str;

    /// Payload schema version stamped onto captured records.
    const SCHEMA_VERSION: i32 = 1;
}

#[derive(Debug, Clone)]
struct Registration {
    type_key: String,
    schema_version: i32,
    type_name: &'static str,
}

/// Explicit allowlist of event types the relay may capture and dispatch.
///
/// Bidirectional: resolves a string key to its registration and a concrete
/// Rust type to its key. Unknown keys are refused on both paths.
///
/// # Example
///
/// ```
/// use outbox_relay_core::registry::{EventType, TypeRegistry};
///
/// struct OrderPlaced;
///
/// impl EventType for OrderPlaced {
///     const TYPE_KEY: &'static str = "orders.order-placed";
/// }
///
/// let mut registry = TypeRegistry::new();
/// registry.register::<OrderPlaced>();
///
/// assert!(registry.is_registered("orders.order-placed"));
/// assert!(!registry.is_registered("orders.order-cancelled"));
/// ```
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_key: HashMap<String, TypeId>,
    by_type: HashMap<TypeId, Registration>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event type under its [`EventType::TYPE_KEY`].
    ///
    /// Re-registering the same type replaces the prior entry. Returns `&mut
    /// Self` so registrations chain during startup.
    pub fn register<T: EventType + 'static>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<T>();
        self.by_key.insert(T::TYPE_KEY.to_string(), type_id);
        self.by_type.insert(
            type_id,
            Registration {
                type_key: T::TYPE_KEY.to_string(),
                schema_version: T::SCHEMA_VERSION,
                type_name: std::any::type_name::<T>(),
            },
        );
        self
    }

    /// Whether `type_key` is in the allowlist.
    #[must_use]
    pub fn is_registered(&self, type_key: &str) -> bool {
        self.by_key.contains_key(type_key)
    }

    /// Schema version registered for `type_key`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredKey`] for unknown keys.
    pub fn schema_version(&self, type_key: &str) -> Result<i32, RegistryError> {
        self.by_key
            .get(type_key)
            .and_then(|type_id| self.by_type.get(type_id))
            .map(|r| r.schema_version)
            .ok_or_else(|| RegistryError::UnregisteredKey(type_key.to_string()))
    }

    /// Type key registered for the concrete type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if `T` was never
    /// registered.
    pub fn key_of<T: 'static>(&self) -> Result<&str, RegistryError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|r| r.type_key.as_str())
            .ok_or_else(|| RegistryError::UnregisteredType(std::any::type_name::<T>()))
    }

    /// Registered Rust type name for `type_key`, for diagnostics.
    #[must_use]
    pub fn type_name_of(&self, type_key: &str) -> Option<&'static str> {
        self.by_key
            .get(type_key)
            .and_then(|type_id| self.by_type.get(type_id))
            .map(|r| r.type_name)
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
