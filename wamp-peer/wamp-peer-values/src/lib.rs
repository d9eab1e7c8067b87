mod convert;
mod serde_impl;
mod variant;

pub use convert::{
    ConversionError,
    FromArgs,
    FromVariant,
    IntoVariant,
    PathSegment,
};
pub use serde_impl::{
    BLOB_PREFIX,
    EXPECTED_STRING_KEY,
};
pub use variant::{
    Array,
    Blob,
    BlobDecodeError,
    Object,
    Variant,
    VariantKind,
};
pub use wamp_peer_values_proc_macro::{
    VariantList,
    VariantObject,
};
