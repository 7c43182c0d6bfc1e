//! Stage commands and their output parsers.
//!
//! Parsers are pure so every stage can be checked against captured output.

use std::collections::BTreeMap;

const GIB: u64 = 1024 * 1024 * 1024;
const GB: u64 = 1_000_000_000;

/// Prints logical CPUs, then `MemTotal` in kB.
pub const COMPUTE_COMMAND: &str = "nproc && awk '/^MemTotal:/{print $2}' /proc/meminfo";

/// One line per block device: name and size in bytes.
pub const DISK_COMMAND: &str = "lsblk -b -d -n -o NAME,SIZE";

/// One line per mount: target and filesystem type.
pub const MOUNT_COMMAND: &str = "findmnt -r -n -o TARGET,FSTYPE";

/// Total swap in MB.
pub const SWAP_COMMAND: &str = "free -m | awk '/^Swap:/{print $2}'";

/// Prints the name of every command in `names` that is not on PATH.
pub fn missing_commands_command(names: &[String]) -> String {
    format!(
        "for c in {}; do command -v \"$c\" >/dev/null 2>&1 || echo \"$c\"; done",
        names.join(" ")
    )
}

/// `sysctl` prints `name = value` per parameter.
pub fn kernel_params_command<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    let names: Vec<&str> = names.into_iter().map(String::as_str).collect();
    format!("sysctl {}", names.join(" "))
}

/// Observed (cores, memory GB), memory rounded to the nearest GB.
///
/// `MemTotal` excludes what the kernel reserves at boot, so it sits a few
/// percent under the installed size; counted in decimal GB it still meets
/// the declared figure.
pub fn parse_compute(stdout: &str) -> Result<(u32, u32), String> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let cores = lines
        .next()
        .ok_or("missing cpu count")?
        .parse::<u32>()
        .map_err(|e| format!("bad cpu count: {e}"))?;
    let kb = lines
        .next()
        .ok_or("missing memory size")?
        .parse::<u64>()
        .map_err(|e| format!("bad memory size: {e}"))?;
    let gb = kb.saturating_mul(1024).saturating_add(GB / 2) / GB;
    Ok((cores, u32::try_from(gb).unwrap_or(u32::MAX)))
}

/// Block device name to capacity in GB.
pub fn parse_disks(stdout: &str) -> Result<BTreeMap<String, u32>, String> {
    let mut disks = BTreeMap::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(size)) = (fields.next(), fields.next()) else {
            return Err(format!("malformed lsblk line {line:?}"));
        };
        let bytes: u64 = size
            .parse()
            .map_err(|e| format!("bad size for {name}: {e}"))?;
        disks.insert(name.to_string(), u32::try_from(bytes / GIB).unwrap_or(u32::MAX));
    }
    Ok(disks)
}

/// Mount target to filesystem type.
pub fn parse_mounts(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

pub fn parse_swap_mb(stdout: &str) -> Result<u64, String> {
    stdout
        .trim()
        .parse()
        .map_err(|e| format!("bad swap size {:?}: {e}", stdout.trim()))
}

pub fn parse_missing_commands(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// `name = value` lines into a map. Values keep inner whitespace, as in
/// `net.ipv4.ip_local_port_range = 32768	60999`.
pub fn parse_sysctl(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Device name as `lsblk` prints it.
pub fn device_name(name: &str) -> &str {
    name.strip_prefix("/dev/").unwrap_or(name)
}
