//! Build script for compile-time configuration injection.
//!
//! Set environment variables before building to configure the firmware:
//!
//!   NODE_SSID=MyWiFi \
//!   NODE_PASSWORD=secret123 \
//!   NODE_CONTROLLER_HOST=192.168.1.10 \
//!   NODE_CONTROLLER_PORT=8099 \
//!   NODE_BOARD_NAME="East Entrance" \
//!   NODE_TZ_OFFSET_MIN=-360 \
//!   cargo build --release

fn main() {
    // Re-run build script if these environment variables change
    println!("cargo::rerun-if-env-changed=NODE_SSID");
    println!("cargo::rerun-if-env-changed=NODE_PASSWORD");
    println!("cargo::rerun-if-env-changed=NODE_CONTROLLER_HOST");
    println!("cargo::rerun-if-env-changed=NODE_CONTROLLER_PORT");
    println!("cargo::rerun-if-env-changed=NODE_BOARD_NAME");
    println!("cargo::rerun-if-env-changed=NODE_TZ_OFFSET_MIN");
    println!("cargo::rerun-if-env-changed=NODE_NTP_HOST");
    println!("cargo::rerun-if-env-changed=NODE_DOOR1_NAME");
    println!("cargo::rerun-if-env-changed=NODE_DOOR2_NAME");
}
