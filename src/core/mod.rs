pub mod config;
pub mod credentials;

pub use config::{AppConfig, ChatConfig};
pub use credentials::{
    CredentialStore, EnvCredentialStore, SharedCredentialStore, StaticCredentialStore,
};
