use std::process::Command;

#[test]
fn headless_smoke() {
    let bin = env!("CARGO_BIN_EXE_fleetsim-app");
    let mut cmd = Command::new(bin);
    cmd.env("FLEETSIM_HEADLESS", "1")
        .env("FLEETSIM_SEED", "7")
        .env("FLEETSIM_WAYPOINTS", "8")
        .env("TERM", "xterm-256color")
        .env("RUST_LOG", "off");

    let status = cmd.status().expect("failed to run fleetsim-app binary");
    assert!(status.success(), "headless run failed");
}
