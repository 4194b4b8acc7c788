// ctf-shm-transport - Build Script
//
// Generates the build-time transport configuration into $OUT_DIR/config.rs.
// Every parameter can be overridden through a CTF_* environment variable.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

struct Param {
    env: &'static str,
    name: &'static str,
    ty: &'static str,
    default: u64,
    power_of_two: bool,
    min: u64,
}

const PARAMS: &[Param] = &[
    Param { env: "CTF_CORES_ROWS", name: "CORES_ROWS", ty: "usize", default: 4, power_of_two: false, min: 1 },
    Param { env: "CTF_CORES_COLS", name: "CORES_COLS", ty: "usize", default: 4, power_of_two: false, min: 1 },
    Param { env: "CTF_PACKET_SIZE", name: "PACKET_SIZE", ty: "usize", default: 256, power_of_two: true, min: 4 },
    Param { env: "CTF_RINGBUF_SIZE", name: "RINGBUF_SIZE", ty: "usize", default: 4, power_of_two: true, min: 2 },
    Param { env: "CTF_BACKEND_CHECK_TIMEOUT", name: "BACKEND_CHECK_TIMEOUT", ty: "u64", default: 10_000_000, power_of_two: false, min: 0 },
    Param { env: "CTF_CONSUMER_POLL_DELAY_US", name: "CONSUMER_POLL_DELAY_US", ty: "u64", default: 5000, power_of_two: false, min: 0 },
];

const SMEM_NAME_ENV: &str = "CTF_SMEM_NAME";
const SMEM_NAME_DEFAULT: &str = "ctf-tracing";

fn param_value(param: &Param) -> u64 {
    println!("cargo:rerun-if-env-changed={}", param.env);

    let value = match env::var(param.env) {
        Ok(raw) => raw
            .trim()
            .replace('_', "")
            .parse::<u64>()
            .unwrap_or_else(|_| panic!("{}: '{}' is not an unsigned integer", param.env, raw)),
        Err(_) => param.default,
    };

    if value < param.min {
        panic!("{}: {} is below the minimum of {}", param.env, value, param.min);
    }
    if param.power_of_two && !value.is_power_of_two() {
        panic!("{}: {} must be a power of two", param.env, value);
    }

    value
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Get git version info
    let version = env!("CARGO_PKG_VERSION");
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=VERSION_STRING=ctf-shm-transport v{}-g{}", version, git_hash);

    let mut generated = String::from("// @generated by build.rs. Do not edit.\n\n");

    for param in PARAMS {
        let value = param_value(param);
        generated.push_str(&format!(
            "/// Build-time parameter (override with `{}`).\npub const {}: {} = {};\n\n",
            param.env, param.name, param.ty, value
        ));
    }

    println!("cargo:rerun-if-env-changed={}", SMEM_NAME_ENV);
    let smem_name = env::var(SMEM_NAME_ENV).unwrap_or_else(|_| SMEM_NAME_DEFAULT.to_string());
    if smem_name.is_empty() || smem_name.contains('/') {
        panic!("{}: '{}' is not a valid region name", SMEM_NAME_ENV, smem_name);
    }
    generated.push_str(&format!(
        "/// Shared-memory region name (override with `{}`).\npub const SMEM_NAME: &str = {:?};\n",
        SMEM_NAME_ENV, smem_name
    ));

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::write(out_dir.join("config.rs"), generated).expect("failed to write generated config");

    // Rebuild if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
}
