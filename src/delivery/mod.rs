//! Secure delivery of stored objects.
//!
//! A [`DeliveryGateway`] turns `(storage path, caller)` into a short-lived
//! signed URL after consulting an [`Authorizer`]. [`SigningStorage`] is the
//! built-in backend: it signs links to files under the storage root and
//! verifies them when they are fetched from `/objects/...`.

mod authz;
mod gateway;
mod storage;
mod transform;

pub use authz::{
    authorizer_from_config, AccessGrant, Authorizer, AuthzError, HttpAuthorizer, OwnerPolicy,
    PUBLIC_PREFIX,
};
pub use gateway::{DeliveryError, DeliveryGateway, DeliveryRequest, DeliveryUrl};
pub use storage::{
    InvalidPath, LinkError, SignedUrl, SigningStorage, StorageBackend, StorageError, StoragePath,
};
pub use transform::{OutputFormat, ResizeMode, TransformError, TransformOptions};
