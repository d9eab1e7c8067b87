use std::{
    collections::HashMap,
    fmt::Display,
    hash::BuildHasher,
};

use base64::{
    DecodeError,
    Engine,
    engine::general_purpose::STANDARD,
};
use indexmap::IndexMap;
use thiserror::Error;

/// A sequence of values.
pub type Array = Vec<Variant>;

/// A mapping of string keys to values.
///
/// Equality of two objects does not depend on insertion order.
pub type Object = IndexMap<String, Variant>;

/// A byte sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Blob(Vec<u8>);

/// Error for a blob string that is not valid base64.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobDecodeError {
    #[error("invalid base64 length")]
    BadLength,
    #[error("invalid base64 padding")]
    BadPadding,
    #[error("invalid base64 character")]
    BadChar,
}

impl From<DecodeError> for BlobDecodeError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::InvalidLength(_) => Self::BadLength,
            DecodeError::InvalidPadding | DecodeError::InvalidLastSymbol(_, _) => Self::BadPadding,
            DecodeError::InvalidByte(_, _) => Self::BadChar,
        }
    }
}

impl Blob {
    /// Creates a new blob from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decodes a blob from standard base64.
    pub fn from_base64(text: &str) -> Result<Self, BlobDecodeError> {
        Ok(Self(STANDARD.decode(text)?))
    }

    /// Encodes the blob as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Blob {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// The runtime type of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Null,
    Bool,
    Int,
    UInt,
    Real,
    String,
    Blob,
    Array,
    Object,
}

impl VariantKind {
    /// A human-readable name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "integer",
            Self::UInt => "unsigned integer",
            Self::Real => "real",
            Self::String => "string",
            Self::Blob => "blob",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A dynamically-typed value, carried in every WAMP payload.
///
/// Numeric variants compare equal to each other when they represent the same number, so
/// `Variant::Int(3)`, `Variant::UInt(3)`, and `Variant::Real(3.0)` are all equal.
#[derive(Debug, Clone, Default)]
pub enum Variant {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    String(String),
    Blob(Blob),
    Array(Array),
    Object(Object),
}

const TWO_POW_53: i64 = 1 << 53;
const TWO_POW_63_F64: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64_F64: f64 = 18_446_744_073_709_551_616.0;

fn real_to_i64(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= -TWO_POW_63_F64 && value < TWO_POW_63_F64 {
        Some(value as i64)
    } else {
        None
    }
}

fn real_to_u64(value: f64) -> Option<u64> {
    if value.fract() == 0.0 && value >= 0.0 && value < TWO_POW_64_F64 {
        Some(value as u64)
    } else {
        None
    }
}

impl Variant {
    /// The runtime type of the value.
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Null => VariantKind::Null,
            Self::Bool(_) => VariantKind::Bool,
            Self::Int(_) => VariantKind::Int,
            Self::UInt(_) => VariantKind::UInt,
            Self::Real(_) => VariantKind::Real,
            Self::String(_) => VariantKind::String,
            Self::Blob(_) => VariantKind::Blob,
            Self::Array(_) => VariantKind::Array,
            Self::Object(_) => VariantKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Checks if the value is a signed or unsigned integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_) | Self::UInt(_))
    }

    /// Checks if the value is any numeric type.
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::UInt(_) | Self::Real(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(val) => Some(*val),
            _ => None,
        }
    }

    /// The value as an [`i64`], if it can be represented without loss.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(val) => Some(*val),
            Self::UInt(val) => i64::try_from(*val).ok(),
            Self::Real(val) => real_to_i64(*val),
            _ => None,
        }
    }

    /// The value as a [`u64`], if it can be represented without loss.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(val) => u64::try_from(*val).ok(),
            Self::UInt(val) => Some(*val),
            Self::Real(val) => real_to_u64(*val),
            _ => None,
        }
    }

    /// The value as an [`f64`], if it can be represented without loss.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(val) if val.unsigned_abs() <= TWO_POW_53 as u64 => Some(*val as f64),
            Self::UInt(val) if *val <= TWO_POW_53 as u64 => Some(*val as f64),
            Self::Real(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Self::Array(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Self::Object(val) => Some(val),
            _ => None,
        }
    }

    /// Looks up a key, if the value is an object.
    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.as_object().and_then(|object| object.get(key))
    }

    /// Looks up an index, if the value is an array.
    pub fn at(&self, index: usize) -> Option<&Variant> {
        self.as_array().and_then(|array| array.get(index))
    }

    /// Takes the value out, leaving null in its place.
    pub fn take(&mut self) -> Variant {
        std::mem::take(self)
    }

    /// Converts the value into a user type.
    pub fn convert<T>(self) -> Result<T, crate::ConversionError>
    where
        T: crate::FromVariant,
    {
        T::from_variant(self)
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Int(a), Self::UInt(b)) | (Self::UInt(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::Int(a), Self::Real(b)) | (Self::Real(b), Self::Int(a)) => {
                real_to_i64(*b).is_some_and(|b| b == *a)
            }
            (Self::UInt(a), Self::Real(b)) | (Self::Real(b), Self::UInt(a)) => {
                real_to_u64(*b).is_some_and(|b| b == *a)
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(val) => write!(f, "{val}"),
            Self::Int(val) => write!(f, "{val}"),
            Self::UInt(val) => write!(f, "{val}"),
            Self::Real(val) => write!(f, "{val}"),
            Self::String(val) => write!(f, "{val:?}"),
            Self::Blob(val) => write!(f, "<blob of {} bytes>", val.len()),
            Self::Array(val) => {
                write!(f, "[")?;
                for (i, element) in val.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Self::Object(val) => {
                write!(f, "{{")?;
                for (i, (key, element)) in val.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{key:?}:{element}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

macro_rules! variant_from_signed {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::Int(value as i64)
                }
            }
        )*
    };
}

macro_rules! variant_from_unsigned {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::UInt(value as u64)
                }
            }
        )*
    };
}

variant_from_signed!(i8, i16, i32, i64, isize);
variant_from_unsigned!(u8, u16, u32, u64, usize);

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Self::Real(value as f64)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Blob> for Variant {
    fn from(value: Blob) -> Self {
        Self::Blob(value)
    }
}

impl<T> From<Vec<T>> for Variant
where
    T: Into<Variant>,
{
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<Object> for Variant {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl<T, S> From<HashMap<String, T, S>> for Variant
where
    T: Into<Variant>,
    S: BuildHasher,
{
    fn from(value: HashMap<String, T, S>) -> Self {
        Self::Object(
            value
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        )
    }
}

impl<T> From<Option<T>> for Variant
where
    T: Into<Variant>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

impl FromIterator<Variant> for Variant {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        Self::Array(iter.into_iter().collect())
    }
}

impl FromIterator<(String, Variant)> for Variant {
    fn from_iter<I: IntoIterator<Item = (String, Variant)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod variant_test {
    use crate::{
        Blob,
        BlobDecodeError,
        Object,
        Variant,
        VariantKind,
    };

    #[test]
    fn compares_numbers_across_types() {
        assert_eq!(Variant::Int(3), Variant::UInt(3));
        assert_eq!(Variant::UInt(3), Variant::Real(3.0));
        assert_eq!(Variant::Real(3.0), Variant::Int(3));
        assert_ne!(Variant::Int(-1), Variant::UInt(u64::MAX));
        assert_ne!(Variant::Real(3.5), Variant::Int(3));
        assert_ne!(Variant::Int(1), Variant::Bool(true));
        assert_ne!(Variant::String("1".to_owned()), Variant::Int(1));
    }

    #[test]
    fn compares_objects_without_order() {
        let a = Object::from_iter([
            ("a".to_owned(), Variant::Int(1)),
            ("b".to_owned(), Variant::Bool(true)),
        ]);
        let b = Object::from_iter([
            ("b".to_owned(), Variant::Bool(true)),
            ("a".to_owned(), Variant::UInt(1)),
        ]);
        assert_eq!(Variant::Object(a), Variant::Object(b));
    }

    #[test]
    fn converts_numbers_losslessly() {
        assert_eq!(Variant::Real(42.0).as_i64(), Some(42));
        assert_eq!(Variant::Real(42.5).as_i64(), None);
        assert_eq!(Variant::Int(-3).as_u64(), None);
        assert_eq!(Variant::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Variant::UInt(7).as_f64(), Some(7.0));
        assert_eq!(Variant::Int(i64::MAX).as_f64(), None);
        assert_eq!(Variant::String("x".to_owned()).as_i64(), None);
    }

    #[test]
    fn reports_kind() {
        assert_eq!(Variant::Null.kind(), VariantKind::Null);
        assert_eq!(Variant::from(vec![1, 2]).kind(), VariantKind::Array);
        assert_eq!(Variant::from(Blob::new(vec![1])).kind(), VariantKind::Blob);
        assert_eq!(Variant::from(Some("a")).kind(), VariantKind::String);
        assert_eq!(Variant::from(None::<i64>).kind(), VariantKind::Null);
    }

    #[test]
    fn decodes_base64_blobs() {
        assert_eq!(
            Blob::from_base64("AQID"),
            Ok(Blob::new(vec![1, 2, 3]))
        );
        assert_eq!(Blob::from_base64("QUJDR"), Err(BlobDecodeError::BadLength));
        assert_eq!(Blob::from_base64("QQ"), Err(BlobDecodeError::BadPadding));
        assert_eq!(Blob::from_base64("QQ!="), Err(BlobDecodeError::BadChar));
    }
}
