pub mod config;
pub mod manager;
pub mod ssh;
pub mod ssh_config;
pub mod state;
pub mod upload;
pub mod vagrant;
pub mod vagrantfile;

pub use config::{PortForward, VmConfig};
pub use manager::VmManager;
pub use state::VmState;
