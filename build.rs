use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Runs `git` with `args` and returns trimmed stdout, or `None` outside a checkout.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|text| text.trim().to_string())
}

fn commit_label() -> String {
    let Some(sha) = git(&["rev-parse", "--short=10", "HEAD"]).filter(|sha| !sha.is_empty()) else {
        return "unknown".to_string();
    };
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|changes| !changes.is_empty());
    if dirty { format!("{sha}-dirty") } else { sha }
}

fn build_timestamp() -> String {
    // Reproducible builds pin the timestamp.
    match env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) if !epoch.trim().is_empty() => epoch.trim().to_string(),
        _ => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs().to_string())
            .unwrap_or_else(|_| "0".to_string()),
    }
}

fn main() {
    for watched in [".git/HEAD", ".git/refs/heads", ".git/index"] {
        println!("cargo:rerun-if-changed={watched}");
    }
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    println!("cargo:rustc-env=MR_GIT_SHA={}", commit_label());
    println!("cargo:rustc-env=MR_BUILD_TS={}", build_timestamp());
}
