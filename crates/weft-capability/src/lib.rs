pub mod http;
pub mod local;
pub mod registry;

pub use http::HttpCapability;
pub use local::FnCapability;
pub use registry::CapabilityRegistry;
