mod env_vars;
mod uplink_config;

pub use env_vars::{expand_env_vars, expand_path};

pub use uplink_config::{
    load_or_create_config, IdentitySection, QueueSection, ServerSection, TriggerSection,
    UplinkConfig, UploadSection,
};
