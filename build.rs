// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=STEREO_CAMERA_VERSION");

    // Packagers may pin the version string
    let version = std::env::var("STEREO_CAMERA_VERSION").unwrap_or_else(|_| describe_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `<crate version>-<short hash>` when built from a git checkout, plain crate version otherwise.
fn describe_version() -> String {
    let pkg = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    let hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());

    match hash {
        Some(hash) if !hash.is_empty() => format!("{}-{}", pkg, hash),
        _ => pkg,
    }
}
