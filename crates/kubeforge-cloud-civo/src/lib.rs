//! Civo backend for kubeforge
//!
//! Provides HA clusters built from Civo instances and Civo's managed k3s
//! clusters. Authenticates with `CIVO_TOKEN`, falling back to the token saved
//! with `kubeforge credentials civo`.

pub mod api;
pub mod backend;
pub mod error;

pub use api::CivoApi;
pub use backend::{CivoBackend, TOKEN_ENV};
pub use error::{CivoError, Result};
