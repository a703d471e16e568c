use std::any::{type_name, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::BucketError;
use crate::provider::PersistenceProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyId {
    Type(TypeId),
    Name(&'static str),
}

/// Token identifying a provider, either by its Rust type
///  or by a static name when one type backs several providers
#[derive(Clone, Copy)]
pub struct ProviderKey {
    id: KeyId,
    name: &'static str,
}

impl ProviderKey {
    pub fn of<P: PersistenceProvider>() -> Self {
        Self {
            id: KeyId::Type(TypeId::of::<P>()),
            name: type_name::<P>(),
        }
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            id: KeyId::Name(name),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ProviderKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProviderKey {}

impl Hash for ProviderKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderKey({})", self.name)
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Capability handing out provider instances to buckets.
///
/// Implementations should return the same instance for the same key
///  every time, buckets rely on that to batch ids per provider.
pub trait ProviderResolver {
    fn resolve(&self, key: ProviderKey) -> Result<Rc<dyn PersistenceProvider>, BucketError>;
}

type Factory = Box<dyn Fn() -> Rc<dyn PersistenceProvider>>;

/// A [`ProviderResolver`] backed by registered factories and instances.
///  Factories run at most once, on first resolution, and the
///  instance is cached as a singleton for every later caller.
#[derive(Default)]
pub struct ProviderContainer {
    factories: RefCell<HashMap<ProviderKey, Factory>>,
    instances: RefCell<HashMap<ProviderKey, Rc<dyn PersistenceProvider>>>,
}

impl ProviderContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lazily built provider under its type key
    pub fn register<P, F>(&self, factory: F) -> &Self
    where
        P: PersistenceProvider,
        F: Fn() -> P + 'static,
    {
        self.register_as(ProviderKey::of::<P>(), factory)
    }

    /// Register a lazily built provider under an explicit key
    pub fn register_as<P, F>(&self, key: ProviderKey, factory: F) -> &Self
    where
        P: PersistenceProvider,
        F: Fn() -> P + 'static,
    {
        self.instances.borrow_mut().remove(&key);
        self.factories
            .borrow_mut()
            .insert(
                key,
                Box::new(move || -> Rc<dyn PersistenceProvider> { Rc::new(factory()) }),
            );
        self
    }

    /// Register an already constructed provider under its type key
    pub fn insert<P: PersistenceProvider>(&self, instance: Rc<P>) -> &Self {
        self.insert_as(ProviderKey::of::<P>(), instance)
    }

    /// Register an already constructed provider under an explicit key
    pub fn insert_as<P: PersistenceProvider>(&self, key: ProviderKey, instance: Rc<P>) -> &Self {
        self.factories.borrow_mut().remove(&key);
        self.instances.borrow_mut().insert(key, instance);
        self
    }

    pub fn contains(&self, key: ProviderKey) -> bool {
        self.instances.borrow().contains_key(&key) || self.factories.borrow().contains_key(&key)
    }
}

impl fmt::Debug for ProviderContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContainer")
            .field("factories", &self.factories.borrow().keys().collect::<Vec<_>>())
            .field("instances", &self.instances.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderResolver for ProviderContainer {
    fn resolve(&self, key: ProviderKey) -> Result<Rc<dyn PersistenceProvider>, BucketError> {
        if let Some(instance) = self.instances.borrow().get(&key) {
            return Ok(instance.clone());
        }

        let factory = self
            .factories
            .borrow_mut()
            .remove(&key)
            .ok_or(BucketError::UnknownProvider(key.name()))?;
        tracing::debug!("instantiating persistence provider {}", key);
        // borrows are released so a factory may itself use the container
        let instance = factory();
        self.instances.borrow_mut().insert(key, instance.clone());
        Ok(instance)
    }
}
