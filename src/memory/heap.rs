//! Content-Addressed Heap
//!
//! Every registered object gets an address of the form `{hash}_{salt}`
//! where `hash` is the MD5 of the class name and field values, and `salt`
//! counts how many objects with the same hash were allocated before it.
//! Structurally identical objects therefore get distinct, reproducible
//! addresses in allocation order.
//!
//! The heap also keeps the address translation table mapping
//! `address.methodOffset` locations to opaque visual node ids. It is filled
//! lazily as methods are first observed; looking up a location that was
//! never registered is a page fault.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::instance::Instance;
use crate::error::RuntimeError;

/// Location of a method on a heap object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Heap address of the object
    pub object: String,
    /// Offset of the method within the object's class
    pub offset: u32,
}

impl Address {
    pub fn new(object: impl Into<String>, offset: u32) -> Self {
        Self {
            object: object.into(),
            offset,
        }
    }

    /// Key used by the translation table.
    pub fn location(&self) -> String {
        format!("{}.{}", self.object, self.offset)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.offset)
    }
}

/// Inspection view of one heap object.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HeapEntry {
    pub address: String,
    pub class_name: String,
    pub fields: Value,
}

/// Sole owner of simulated object instances.
#[derive(Debug, Default)]
pub struct Heap {
    /// Registered objects in allocation order
    entries: Vec<(String, Box<dyn Instance>)>,
    /// Index into `entries` by address
    index: HashMap<String, usize>,
    /// Allocations seen so far per content hash
    salts: HashMap<String, u64>,
    /// `address.methodOffset` → visual node id
    address_translation: HashMap<String, String>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the next address for an instance without storing it.
    ///
    /// The address is a snapshot: mutating the object and allocating again
    /// yields a different hash, so callers capture it once at construction.
    pub fn allocate(&mut self, instance: &dyn Instance) -> String {
        let hash = content_hash(instance);
        let salt = self.salts.entry(hash.clone()).or_insert(0);
        *salt += 1;
        format!("{}_{}", hash, salt)
    }

    /// Allocates an address for the instance and takes ownership of it.
    pub fn register_instance(&mut self, instance: Box<dyn Instance>) -> String {
        let address = self.allocate(instance.as_ref());
        debug!(
            "Registered {} instance at {}",
            instance.class_name(),
            address
        );
        self.index.insert(address.clone(), self.entries.len());
        self.entries.push((address.clone(), instance));
        address
    }

    /// Registers an instance under a fixed address, bypassing hashing.
    #[cfg(test)]
    pub(crate) fn register_instance_at(&mut self, address: &str, instance: Box<dyn Instance>) {
        self.index.insert(address.to_string(), self.entries.len());
        self.entries.push((address.to_string(), instance));
    }

    /// Gets a registered instance by address.
    pub fn get(&self, address: &str) -> Option<&dyn Instance> {
        self.index
            .get(address)
            .map(|&i| self.entries[i].1.as_ref())
    }

    /// Lists all objects in allocation order.
    pub fn list(&self) -> Vec<HeapEntry> {
        self.entries
            .iter()
            .map(|(address, instance)| HeapEntry {
                address: address.clone(),
                class_name: instance.class_name().to_string(),
                fields: instance.field_snapshot(),
            })
            .collect()
    }

    /// Resolves a method location to its visual node id.
    pub fn translate_address(&self, address: &Address) -> Result<&str, RuntimeError> {
        let location = address.location();
        self.address_translation
            .get(&location)
            .map(String::as_str)
            .ok_or(RuntimeError::PageFault { location })
    }

    pub fn can_translate_address(&self, address: &Address) -> bool {
        self.address_translation.contains_key(&address.location())
    }

    pub fn set_address_translation(&mut self, address: &Address, node_id: impl Into<String>) {
        self.address_translation
            .insert(address.location(), node_id.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every object, salt counter and translation.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.salts.clear();
        self.address_translation.clear();
    }
}

/// MD5 over the class name followed by the serialized field snapshot.
fn content_hash(instance: &dyn Instance) -> String {
    let mut hasher = Md5::new();
    hasher.update(instance.class_name().as_bytes());
    hasher.update(instance.field_snapshot().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ObjectInstance;
    use proptest::prelude::*;

    fn hash_prefix(address: &str) -> &str {
        address.rsplit_once('_').map(|(hash, _)| hash).unwrap()
    }

    #[test]
    fn test_identical_objects_get_salted_addresses() {
        let mut heap = Heap::new();
        let first = heap.register_instance(Box::new(ObjectInstance::new("Db").with_field("n", 1)));
        let second = heap.register_instance(Box::new(ObjectInstance::new("Db").with_field("n", 1)));

        assert_ne!(first, second);
        assert_eq!(hash_prefix(&first), hash_prefix(&second));
        assert!(first.ends_with("_1"));
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn test_different_content_different_hash() {
        let mut heap = Heap::new();
        let a = heap.register_instance(Box::new(ObjectInstance::new("Db").with_field("n", 1)));
        let b = heap.register_instance(Box::new(ObjectInstance::new("Db").with_field("n", 2)));
        let c = heap.register_instance(Box::new(ObjectInstance::new("Cache").with_field("n", 1)));

        assert_ne!(hash_prefix(&a), hash_prefix(&b));
        assert_ne!(hash_prefix(&a), hash_prefix(&c));
        assert!(b.ends_with("_1"));
    }

    #[test]
    fn test_hash_is_md5_hex() {
        let mut heap = Heap::new();
        let address = heap.allocate(&ObjectInstance::new("Db"));
        let hash = hash_prefix(&address);
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_addresses_reproducible_across_heaps() {
        let mut left = Heap::new();
        let mut right = Heap::new();
        for _ in 0..3 {
            let a = left.register_instance(Box::new(ObjectInstance::new("Api")));
            let b = right.register_instance(Box::new(ObjectInstance::new("Api")));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_list_and_get() {
        let mut heap = Heap::new();
        let address = heap.register_instance(Box::new(ObjectInstance::new("Api").with_field("port", 80)));

        let entries = heap.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, address);
        assert_eq!(entries[0].class_name, "Api");
        assert_eq!(heap.get(&address).unwrap().class_name(), "Api");
        assert!(heap.get("missing_1").is_none());
    }

    #[test]
    fn test_translate_address() {
        let mut heap = Heap::new();
        let address = Address::new("abc_1", 2);

        assert!(!heap.can_translate_address(&address));
        assert_eq!(
            heap.translate_address(&address),
            Err(RuntimeError::PageFault {
                location: "abc_1.2".to_string()
            })
        );

        heap.set_address_translation(&address, "Api.handle");
        assert!(heap.can_translate_address(&address));
        assert_eq!(heap.translate_address(&address).unwrap(), "Api.handle");
    }

    #[test]
    fn test_reset_clears_salts_and_translations() {
        let mut heap = Heap::new();
        let first = heap.register_instance(Box::new(ObjectInstance::new("Api")));
        heap.set_address_translation(&Address::new(first.clone(), 0), "Api.a");

        heap.reset();
        assert!(heap.is_empty());
        assert!(!heap.can_translate_address(&Address::new(first.clone(), 0)));

        let again = heap.register_instance(Box::new(ObjectInstance::new("Api")));
        assert_eq!(first, again);
    }

    proptest! {
        #[test]
        fn prop_salts_count_up_in_allocation_order(count in 1usize..20, value in 0i64..5) {
            let mut heap = Heap::new();
            let addresses: Vec<String> = (0..count)
                .map(|_| heap.register_instance(Box::new(ObjectInstance::new("Node").with_field("v", value))))
                .collect();

            for (i, address) in addresses.iter().enumerate() {
                prop_assert_eq!(hash_prefix(address), hash_prefix(&addresses[0]));
                let expected_suffix = format!("_{}", i + 1);
                prop_assert!(address.ends_with(&expected_suffix));
            }
        }
    }
}
