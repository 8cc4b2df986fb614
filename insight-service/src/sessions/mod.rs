mod registry;

pub use registry::{
    BusyPolicy, NewSession, RegistryConfig, RegistryError, SessionGuard, SessionRegistry,
};
