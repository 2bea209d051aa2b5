use crate::registry::Environment;
use crate::{CodecError, RegistryError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased value stored inside a port.
pub type Datum = Arc<dyn Any + Send + Sync>;

/// Operations a registered data type provides to the runtime.
///
/// Dropping a [`Datum`] replaces the explicit free operation; everything
/// else the runtime needs to copy, persist or compare a value goes through
/// this trait.
pub trait DataType: Send + Sync {
    /// Registry key (e.g. "int", "string", "graph_object")
    fn name(&self) -> &str;

    /// Rust type of the values this descriptor accepts.
    fn value_type_id(&self) -> TypeId;

    /// Produce an independent copy of `value`.
    fn clone_value(&self, value: &(dyn Any + Send + Sync)) -> Result<Datum, CodecError>;

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, env: &Arc<Environment>, bytes: &[u8]) -> Result<Datum, CodecError>;

    /// Value equality, used to compare graphs after a round trip.
    fn equals(&self, a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool;
}

/// Data type backed by serde: any cloneable, comparable, serializable `T`.
pub struct SerdeType<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeType<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> SerdeType<T>
where
    T: Any + Send + Sync,
{
    fn downcast<'a>(&self, value: &'a (dyn Any + Send + Sync)) -> Result<&'a T, CodecError> {
        value.downcast_ref::<T>().ok_or_else(|| CodecError::Value {
            type_name: self.name.clone(),
            message: "value has an unexpected Rust type".to_string(),
        })
    }
}

impl<T> DataType for SerdeType<T>
where
    T: Any + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn value_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn clone_value(&self, value: &(dyn Any + Send + Sync)) -> Result<Datum, CodecError> {
        Ok(Arc::new(self.downcast(value)?.clone()))
    }

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self.downcast(value)?)?)
    }

    fn deserialize(&self, _env: &Arc<Environment>, bytes: &[u8]) -> Result<Datum, CodecError> {
        let value: T = serde_json::from_slice(bytes)?;
        Ok(Arc::new(value))
    }

    fn equals(&self, a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

struct TypeEntry {
    hash: u32,
    ops: Box<dyn DataType>,
}

/// Shared handle to a registered data type.
#[derive(Clone)]
pub struct TypeInfo(Arc<TypeEntry>);

impl TypeInfo {
    pub fn new(ops: impl DataType + 'static) -> Self {
        let hash = fnv1a_32(ops.name());
        Self(Arc::new(TypeEntry {
            hash,
            ops: Box::new(ops),
        }))
    }

    pub fn name(&self) -> &str {
        self.0.ops.name()
    }

    pub fn hash(&self) -> u32 {
        self.0.hash
    }

    pub fn ops(&self) -> &dyn DataType {
        self.0.ops.as_ref()
    }

    pub fn accepts(&self, value: &(dyn Any + Send + Sync)) -> bool {
        let value: &dyn Any = value;
        value.type_id() == self.0.ops.value_type_id()
    }

    pub fn ptr_eq(&self, other: &TypeInfo) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeInfo").field(&self.name()).finish()
    }
}

/// A value together with its type descriptor.
///
/// Cloning a `Data` shares the underlying value (reference semantics); use
/// [`Data::duplicate`] for an independent copy through the type's clone op.
#[derive(Clone)]
pub struct Data {
    value: Datum,
    ty: TypeInfo,
}

impl Data {
    pub fn new<T: Any + Send + Sync>(ty: TypeInfo, value: T) -> Result<Self, RegistryError> {
        Self::from_parts(ty, Arc::new(value))
    }

    pub fn from_parts(ty: TypeInfo, value: Datum) -> Result<Self, RegistryError> {
        if !ty.accepts(value.as_ref()) {
            return Err(RegistryError::TypeMismatch(ty.name().to_string()));
        }
        Ok(Self { value, ty })
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.ty
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn raw(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }

    /// Take the value out, cloning only when it is still shared.
    pub fn into_inner<T: Any + Clone + Send + Sync>(self) -> Option<T> {
        let value = self.value.downcast::<T>().ok()?;
        Some(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Independent copy through the type's clone operation.
    pub fn duplicate(&self) -> Result<Data, CodecError> {
        let value = self.ty.ops().clone_value(self.value.as_ref())?;
        Ok(Self {
            value,
            ty: self.ty.clone(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        self.ty.ops().serialize(self.value.as_ref())
    }

    /// True if both handles point at the same stored value.
    pub fn ptr_eq(&self, other: &Data) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// True if no other handle shares this value.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.value) == 1
    }

    /// Compare values of the same named type using the type's equality.
    pub fn equals(&self, other: &Data) -> bool {
        self.type_name() == other.type_name()
            && self.ty.ops().equals(self.value.as_ref(), other.value.as_ref())
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

/// 32-bit FNV-1a, used to speed up name lookups.
pub(crate) fn fnv1a_32(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_type() -> TypeInfo {
        TypeInfo::new(SerdeType::<i32>::new("int"))
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let result = Data::new(int_type(), "text".to_string());
        assert!(matches!(result, Err(RegistryError::TypeMismatch(name)) if name == "int"));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let data = Data::new(int_type(), 7i32).unwrap();
        let copy = data.duplicate().unwrap();

        assert!(!copy.ptr_eq(&data));
        assert!(copy.equals(&data));
        assert_eq!(copy.get::<i32>(), Some(&7));
    }

    #[test]
    fn test_shared_clone_is_reference() {
        let data = Data::new(int_type(), 7i32).unwrap();
        let shared = data.clone();

        assert!(shared.ptr_eq(&data));
        assert!(!data.is_unique());
        assert_eq!(shared.into_inner::<i32>(), Some(7));
        assert!(data.is_unique());
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
    }
}
