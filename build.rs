//! Embeds the git revision as GIT_HASH so the gateway can log which build a
//! portal is running. Image builds without a checkout can pass it in via
//! RPM_GATEWAY_GIT_HASH.

use std::env;
use std::process::Command;

fn git_short_hash() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!hash.is_empty()).then_some(hash)
}

fn main() {
    let git_hash = env::var("RPM_GATEWAY_GIT_HASH")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(git_short_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={git_hash}");
    println!("cargo:rerun-if-env-changed=RPM_GATEWAY_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
