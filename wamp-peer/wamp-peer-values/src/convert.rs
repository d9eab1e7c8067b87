use std::{
    collections::HashMap,
    fmt::Display,
    hash::BuildHasher,
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    Array,
    Blob,
    Object,
    Variant,
    VariantKind,
};

/// One step into a nested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Key(key) => write!(f, ".{key}"),
        }
    }
}

/// An error resulting from converting between a [`Variant`] and a Rust type.
///
/// The error records the path to the offending element, so that a failure deep inside an argument
/// list can be traced back to the argument index or object key that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConversionError {
    path: Vec<PathSegment>,
    message: String,
}

impl ConversionError {
    pub fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// An error for a value of the wrong runtime type.
    pub fn type_mismatch(expected: &str, found: VariantKind) -> Self {
        Self::new(format!("expected {expected}, found {found}"))
    }

    /// Annotates the error as occurring inside the element at the given index.
    pub fn at_index(mut self, index: usize) -> Self {
        self.path.insert(0, PathSegment::Index(index));
        self
    }

    /// Annotates the error as occurring inside the member at the given key.
    pub fn at_key<S>(mut self, key: S) -> Self
    where
        S: Into<String>,
    {
        self.path.insert(0, PathSegment::Key(key.into()));
        self
    }

    /// The path to the offending element, outermost first.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            return write!(f, "{}", self.message);
        }
        write!(f, "at ")?;
        for segment in &self.path {
            write!(f, "{segment}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Trait for converting a Rust object into a [`Variant`].
pub trait IntoVariant {
    fn into_variant(self) -> Result<Variant, ConversionError>;
}

/// Trait for converting a Rust object out of a [`Variant`].
pub trait FromVariant: Sized {
    fn from_variant(value: Variant) -> Result<Self, ConversionError>;
}

macro_rules! infallible_into_variant {
    ($($ty:ty),*) => {
        $(
            impl IntoVariant for $ty {
                fn into_variant(self) -> Result<Variant, ConversionError> {
                    Ok(Variant::from(self))
                }
            }
        )*
    };
}

infallible_into_variant!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String, Blob
);

impl IntoVariant for &str {
    fn into_variant(self) -> Result<Variant, ConversionError> {
        Ok(Variant::from(self))
    }
}

impl IntoVariant for Variant {
    fn into_variant(self) -> Result<Variant, ConversionError> {
        Ok(self)
    }
}

impl<T> IntoVariant for Vec<T>
where
    T: IntoVariant,
{
    fn into_variant(self) -> Result<Variant, ConversionError> {
        self.into_iter()
            .enumerate()
            .map(|(i, value)| value.into_variant().map_err(|err| err.at_index(i)))
            .collect::<Result<Array, _>>()
            .map(Variant::Array)
    }
}

impl<T> IntoVariant for IndexMap<String, T>
where
    T: IntoVariant,
{
    fn into_variant(self) -> Result<Variant, ConversionError> {
        self.into_iter()
            .map(|(key, value)| match value.into_variant() {
                Ok(value) => Ok((key, value)),
                Err(err) => Err(err.at_key(key)),
            })
            .collect::<Result<Object, _>>()
            .map(Variant::Object)
    }
}

impl<T, S> IntoVariant for HashMap<String, T, S>
where
    T: IntoVariant,
    S: BuildHasher,
{
    fn into_variant(self) -> Result<Variant, ConversionError> {
        self.into_iter()
            .map(|(key, value)| match value.into_variant() {
                Ok(value) => Ok((key, value)),
                Err(err) => Err(err.at_key(key)),
            })
            .collect::<Result<Object, _>>()
            .map(Variant::Object)
    }
}

impl<T> IntoVariant for Option<T>
where
    T: IntoVariant,
{
    fn into_variant(self) -> Result<Variant, ConversionError> {
        match self {
            Some(value) => value.into_variant(),
            None => Ok(Variant::Null),
        }
    }
}

impl FromVariant for Variant {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl FromVariant for bool {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Bool(value) => Ok(value),
            _ => Err(ConversionError::type_mismatch("bool", value.kind())),
        }
    }
}

macro_rules! from_variant_integer {
    ($($ty:ty),*) => {
        $(
            impl FromVariant for $ty {
                fn from_variant(value: Variant) -> Result<Self, ConversionError> {
                    let converted = match &value {
                        Variant::Int(_) | Variant::UInt(_) | Variant::Real(_) => {
                            match value.as_i64() {
                                Some(int) => <$ty>::try_from(int).ok(),
                                None => value.as_u64().and_then(|uint| <$ty>::try_from(uint).ok()),
                            }
                        }
                        _ => return Err(ConversionError::type_mismatch("integer", value.kind())),
                    };
                    converted.ok_or_else(|| {
                        ConversionError::new(format!(
                            "{value} is out of range for {}",
                            std::stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

from_variant_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromVariant for f64 {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Real(value) => Ok(value),
            Variant::Int(_) | Variant::UInt(_) => value.as_f64().ok_or_else(|| {
                ConversionError::new(format!("{value} cannot be represented as a real"))
            }),
            _ => Err(ConversionError::type_mismatch("real", value.kind())),
        }
    }
}

impl FromVariant for f32 {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        f64::from_variant(value).map(|value| value as f32)
    }
}

impl FromVariant for String {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::String(value) => Ok(value),
            _ => Err(ConversionError::type_mismatch("string", value.kind())),
        }
    }
}

impl FromVariant for Blob {
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Blob(value) => Ok(value),
            _ => Err(ConversionError::type_mismatch("blob", value.kind())),
        }
    }
}

impl<T> FromVariant for Vec<T>
where
    T: FromVariant,
{
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Array(array) => array
                .into_iter()
                .enumerate()
                .map(|(i, value)| T::from_variant(value).map_err(|err| err.at_index(i)))
                .collect(),
            _ => Err(ConversionError::type_mismatch("array", value.kind())),
        }
    }
}

impl<T> FromVariant for IndexMap<String, T>
where
    T: FromVariant,
{
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Object(object) => object
                .into_iter()
                .map(|(key, value)| match T::from_variant(value) {
                    Ok(value) => Ok((key, value)),
                    Err(err) => Err(err.at_key(key)),
                })
                .collect(),
            _ => Err(ConversionError::type_mismatch("object", value.kind())),
        }
    }
}

impl<T, S> FromVariant for HashMap<String, T, S>
where
    T: FromVariant,
    S: BuildHasher + Default,
{
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Object(object) => object
                .into_iter()
                .map(|(key, value)| match T::from_variant(value) {
                    Ok(value) => Ok((key, value)),
                    Err(err) => Err(err.at_key(key)),
                })
                .collect(),
            _ => Err(ConversionError::type_mismatch("object", value.kind())),
        }
    }
}

impl<T> FromVariant for Option<T>
where
    T: FromVariant,
{
    fn from_variant(value: Variant) -> Result<Self, ConversionError> {
        match value {
            Variant::Null => Ok(None),
            value => T::from_variant(value).map(Some),
        }
    }
}

/// Trait for converting a positional argument list into a tuple of Rust values.
///
/// Arguments beyond the length of the tuple are ignored.
pub trait FromArgs: Sized {
    fn from_args(args: Array) -> Result<Self, ConversionError>;
}

macro_rules! from_args_tuple {
    ($len:expr; $($ty:ident $index:tt),+) => {
        impl<$($ty),+> FromArgs for ($($ty,)+)
        where
            $($ty: FromVariant,)+
        {
            fn from_args(args: Array) -> Result<Self, ConversionError> {
                if args.len() < $len {
                    return Err(ConversionError::new(format!(
                        "expected at least {} arguments, found {}",
                        $len,
                        args.len()
                    )));
                }
                let mut args = args.into_iter();
                Ok(($(
                    $ty::from_variant(args.next().unwrap_or_default())
                        .map_err(|err| err.at_index($index))?,
                )+))
            }
        }
    };
}

from_args_tuple!(1; A 0);
from_args_tuple!(2; A 0, B 1);
from_args_tuple!(3; A 0, B 1, C 2);
from_args_tuple!(4; A 0, B 1, C 2, D 3);
from_args_tuple!(5; A 0, B 1, C 2, D 3, E 4);
from_args_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
