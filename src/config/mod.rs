mod server;

pub use server::{
    ConfigFile, MAX_VM_TIMEOUT, MIN_VM_TIMEOUT, RuntimeOptions, ServerConfig, clamp_vm_timeout,
};
