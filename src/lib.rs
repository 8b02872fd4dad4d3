// Armature REST - declarative REST clients for Armature applications
//
// Annotate a trait with `#[rest_client]`, describe its endpoints, and get a
// client with retry, circuit breaking and service-account authentication.

// Re-export the client runtime
pub use armature_rest_client::*;

// Re-export the client crate itself for generated code and advanced use
pub use armature_rest_client as client;

// Prelude for common imports
pub mod prelude {
    pub use armature_rest_client::prelude::*;
    pub use armature_rest_client::{
        CallObserver, CallRecord, ServiceAccount, TokenProvider, async_trait,
    };
}
