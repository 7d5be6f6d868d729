//! # virtrigaud-proto
//!
//! Generated Rust code for the `ProviderService` gRPC contract: the
//! southbound wire protocol between the control plane and a remote provider
//! worker (spec.md §4.1, §6).

pub mod generated {
    pub mod virtrigaud {
        pub mod provider {
            pub mod v1 {
                include!("generated/virtrigaud.provider.v1.rs");
            }
        }
    }
}

pub mod provider {
    pub use crate::generated::virtrigaud::provider::v1::*;
    pub use crate::generated::virtrigaud::provider::v1::provider_service_server::{
        ProviderService, ProviderServiceServer,
    };
    pub use crate::generated::virtrigaud::provider::v1::provider_service_client::ProviderServiceClient;
}

pub use provider::{ProviderService, ProviderServiceClient, ProviderServiceServer};
