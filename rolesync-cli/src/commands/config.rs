//! Configuration commands

use rolesync_core::RolesyncConfig;

pub fn handle_config_command() {
    println!("# rolesync configuration");
    println!("# Search order: $ROLESYNC_CONFIG, /etc/rolesync/config.toml, ./rolesync.toml");
    println!();
    print!("{}", RolesyncConfig::generate_sample());
}
