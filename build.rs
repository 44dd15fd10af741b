use std::process::Command;
fn main() {
    // runs git describe --always --dirty, outside of a checkout the revision stays unknown
    let git_hash = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "UNKNOWN".into());
    println!("cargo:rustc-env=GIT_HASH={git_hash}");
}
