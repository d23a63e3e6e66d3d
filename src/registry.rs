use indexmap::IndexMap;

use crate::resources::ResourceKind;

/// One value of a [`ContextResourceRegistry`], flattened with its keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry<T> {
    pub context_name: String,
    pub resource_name: ResourceKind,
    pub value: T,
}

/// Store keyed by `(context, resource kind)`.
///
/// Iteration follows the order in which keys were first inserted; overwriting
/// a value keeps its position.
#[derive(Debug, Clone)]
pub struct ContextResourceRegistry<T> {
    entries: IndexMap<(String, ResourceKind), T>,
}

impl<T> Default for ContextResourceRegistry<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<T> ContextResourceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn set(&mut self, context_name: &str, resource_name: ResourceKind, value: T) -> Option<T> {
        self.entries
            .insert((context_name.to_string(), resource_name), value)
    }

    pub fn get(&self, context_name: &str, resource_name: ResourceKind) -> Option<&T> {
        self.entries.get(&(context_name.to_string(), resource_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResourceKind, &T)> {
        self.entries
            .iter()
            .map(|((context, resource), value)| (context.as_str(), *resource, value))
    }

    pub fn get_all(&self) -> Vec<RegistryEntry<T>>
    where
        T: Clone,
    {
        self.iter()
            .map(|(context_name, resource_name, value)| RegistryEntry {
                context_name: context_name.to_string(),
                resource_name,
                value: value.clone(),
            })
            .collect()
    }

    pub fn get_for_resource(&self, resource_name: ResourceKind) -> Vec<RegistryEntry<T>>
    where
        T: Clone,
    {
        self.get_all()
            .into_iter()
            .filter(|entry| entry.resource_name == resource_name)
            .collect()
    }

    pub fn remove(&mut self, context_name: &str, resource_name: ResourceKind) -> Option<T> {
        // shift_remove keeps the relative order of the remaining entries
        self.entries
            .shift_remove(&(context_name.to_string(), resource_name))
    }

    /// Drops every entry of a context and returns the removed values.
    pub fn remove_context(&mut self, context_name: &str) -> Vec<T> {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(context, _)| context == context_name)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.shift_remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
