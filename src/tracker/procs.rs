//! Process enumeration and in-container file reads.
//!
//! Both operations shell out to `ps` — in the host namespace directly, or
//! through a chroot into the host root mount when the agent itself runs in
//! a container. Rows are attributed to containers by the devices cgroup
//! extracted from the `cgroup` output column.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use super::{ContainerTracker, Error, Result};

/// Columns requested from `ps` for the full process listing.
const PROCESS_LIST_FORMAT: &str = "user,pid,ppid,stime,pcpu,pmem,rss,vsz,stat,time,comm,cgroup";
const PROCESS_LIST_FIELDS: usize = 12;

/// Columns requested when only pid attribution is needed.
const PID_LIST_FORMAT: &str = "pid,cgroup";
const PID_LIST_FIELDS: usize = 2;

static CGROUP_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"devices[^:]*:(.*?)[,;$]").unwrap());

/// One row of the process listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessInfo {
    pub user: String,
    pub pid: i32,
    pub ppid: i32,
    pub start_time: String,
    pub percent_cpu: f32,
    pub percent_memory: f32,
    /// Resident set size, in bytes.
    pub rss: u64,
    /// Virtual size, in bytes.
    pub virtual_size: u64,
    pub status: String,
    pub running_time: String,
    pub cmd: String,
    /// Cgroup the process belongs to. Only populated by the root tracker.
    pub cgroup_path: String,
}

/// Extracts the devices cgroup from a `ps` cgroup column value.
///
/// Falls back to `/` when the devices hierarchy is absent; it might not be
/// enabled on the host.
fn cgroup_path_from(cgroups: &str) -> String {
    if cgroups == "-" {
        return "/".to_owned();
    }
    match CGROUP_PATH_PATTERN.captures(cgroups) {
        Some(captures) => captures[1].to_owned(),
        None => {
            log::trace!("failed to get devices cgroup path from {cgroups:?}");
            "/".to_owned()
        }
    }
}

/// Runs `ps -e -o <format>`, chrooted into the host root mount when not in
/// the host namespace.
fn ps_output(in_host_namespace: bool, format: &str) -> Result<String> {
    let mut command = if in_host_namespace {
        Command::new("ps")
    } else {
        let mut command = Command::new("/usr/sbin/chroot");
        command.arg("/rootfs").arg("ps");
        command
    };
    command.arg("-e").arg("-o").arg(format);

    let program = command.get_program().to_string_lossy().into_owned();
    let output = command.output().map_err(|err| Error::PsCommand {
        command: program.clone(),
        message: err.to_string(),
    })?;
    if !output.status.success() {
        return Err(Error::PsCommand {
            command: program,
            message: format!("exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_i32(field: &'static str, value: &str) -> Result<i32> {
    value.parse().map_err(|source| Error::PsIntField {
        field,
        value: value.to_owned(),
        source,
    })
}

fn parse_f32(field: &'static str, value: &str) -> Result<f32> {
    value.parse().map_err(|source| Error::PsFloatField {
        field,
        value: value.to_owned(),
        source,
    })
}

fn parse_kib(field: &'static str, value: &str) -> Result<u64> {
    let kib: u64 = value.parse().map_err(|source| Error::PsIntField {
        field,
        value: value.to_owned(),
        source,
    })?;
    Ok(kib * 1024)
}

/// Parses the full `ps` listing for the container named `name`.
///
/// The root tracker reports every process and populates its cgroup path;
/// other trackers report only rows whose cgroup equals their name. The
/// agent's own `ps` invocation is dropped when running inside the agent's
/// container.
fn parse_process_list(
    name: &str,
    agent_container: &str,
    in_host_namespace: bool,
    out: &str,
) -> Result<Vec<ProcessInfo>> {
    let is_root = name == "/";
    let mut processes = Vec::new();
    for line in out.lines().skip(1) {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < PROCESS_LIST_FIELDS {
            return Err(Error::PsFields {
                expected: PROCESS_LIST_FIELDS,
                found: fields.len(),
                line: line.to_owned(),
            });
        }

        let cgroup = cgroup_path_from(fields[11]);
        // Drop the ps command this listing just ran from the agent's own
        // container.
        if !in_host_namespace && agent_container == cgroup && fields[10] == "ps" {
            continue;
        }

        if !is_root && name != cgroup {
            continue;
        }
        processes.push(ProcessInfo {
            user: fields[0].to_owned(),
            pid: parse_i32("pid", fields[1])?,
            ppid: parse_i32("ppid", fields[2])?,
            start_time: fields[3].to_owned(),
            percent_cpu: parse_f32("cpu percent", fields[4])?,
            percent_memory: parse_f32("memory percent", fields[5])?,
            rss: parse_kib("rss", fields[6])?,
            virtual_size: parse_kib("virtual size", fields[7])?,
            status: fields[8].to_owned(),
            running_time: fields[9].to_owned(),
            cmd: fields[10].to_owned(),
            cgroup_path: if is_root { cgroup } else { String::new() },
        });
    }
    Ok(processes)
}

/// Pids of processes whose cgroup equals `name`.
fn parse_container_pids(name: &str, out: &str) -> Result<Vec<String>> {
    let mut pids = Vec::new();
    for line in out.lines().skip(1) {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < PID_LIST_FIELDS {
            return Err(Error::PsFields {
                expected: PID_LIST_FIELDS,
                found: fields.len(),
                line: line.to_owned(),
            });
        }
        if cgroup_path_from(fields[1]) == name {
            pids.push(fields[0].to_owned());
        }
    }
    Ok(pids)
}

impl ContainerTracker {
    /// Lists the processes attributed to this container.
    ///
    /// `agent_container` is the cgroup the monitoring agent itself runs in,
    /// used to drop the agent's own `ps` invocation from the listing.
    pub fn process_list(
        &self,
        agent_container: &str,
        in_host_namespace: bool,
    ) -> Result<Vec<ProcessInfo>> {
        let out = ps_output(in_host_namespace, PROCESS_LIST_FORMAT)?;
        parse_process_list(
            &self.inner.reference.name,
            agent_container,
            in_host_namespace,
            &out,
        )
    }

    /// Reads a file from inside the container root.
    ///
    /// Enumerates the container's pids and tries
    /// `{rootfs}/proc/{pid}/root/{relative_path}` for each, returning the
    /// first successful read.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::FileNotFound`] when no process path yields the
    /// file.
    pub fn read_file(&self, relative_path: &str, in_host_namespace: bool) -> Result<Vec<u8>> {
        let out = ps_output(in_host_namespace, PID_LIST_FORMAT)?;
        let pids = parse_container_pids(&self.inner.reference.name, &out)?;

        let rootfs = if in_host_namespace { "/" } else { "/rootfs" };
        for pid in pids {
            let path = PathBuf::from(rootfs)
                .join("proc")
                .join(&pid)
                .join("root")
                .join(relative_path.trim_start_matches('/'));
            log::trace!("trying path {:?}", path);
            if let Ok(data) = std::fs::read(&path) {
                return Ok(data);
            }
        }
        // No process path could be read. Declare the file non-existent.
        Err(Error::FileNotFound {
            path: relative_path.to_owned(),
        })
    }
}
