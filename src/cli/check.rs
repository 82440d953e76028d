//! `tether check`: validate configuration and print the effective policy

use crate::app::{AppConfig, Settings};
use anyhow::Result;

pub fn run(config: &AppConfig, settings: &Settings, dump: bool) -> Result<bool> {
    let policy = &settings.policy;
    println!("Configuration OK\n");
    println!("workspace        {}", policy.confinement_root().display());
    if policy.is_open() {
        println!("operators        (none: every operator is allowed)");
    } else {
        println!("operators        {}", policy.operator_count());
    }
    println!(
        "blocked commands {}",
        policy.denylisted_commands().collect::<Vec<_>>().join(", ")
    );
    println!(
        "blocked paths    {}",
        policy
            .denylisted_path_prefixes()
            .iter()
            .map(|p| p.display())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "tool             {} {}",
        settings.exec.program,
        settings.exec.prompt_args.join(" ")
    );
    println!(
        "interactive      {} via {}",
        settings.interactive.session_name, settings.tmux_binary
    );
    println!("audit dir        {}", settings.audit_dir.display());
    println!("session pins     {}", settings.bindings_path.display());

    if dump {
        println!("\n{}", config.to_toml()?);
    }
    Ok(true)
}
