//! Build script for overlay-fw
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `overlay-fw version`.

fn main() {
    // Packagers may pin the directory holding iptables/ip6tables
    println!("cargo:rerun-if-env-changed=OVERLAY_FW_SYSTEM_IPTABLES_DIR");

    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
