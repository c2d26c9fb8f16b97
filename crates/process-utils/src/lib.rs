//! Small process-related helpers shared across the workspace.
//!
//! Besides the Windows no-window spawning helpers, this crate implements the
//! kill-tree policy used for every child the streaming bridge launches: a
//! player or transcoder is torn down together with all of its descendants.

use std::collections::HashMap;
use std::ffi::OsStr;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Collect every descendant of `root`, deepest generation first.
///
/// The root itself is not included. Processes that exit while the table is
/// being walked are simply missing from the result.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let children = child_links(&system);

    descendants_from_links(Pid::from_u32(root), &children)
        .into_iter()
        .map(|pid| pid.as_u32())
        .collect()
}

/// Parent to children links. Linux tasks are listed as processes; they are skipped.
fn child_links(system: &System) -> HashMap<Pid, Vec<Pid>> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }
    children
}

fn descendants_from_links(root: Pid, children: &HashMap<Pid, Vec<Pid>>) -> Vec<Pid> {
    // Breadth-first walk; reversing yields deepest generations first.
    let mut order = Vec::new();
    let mut frontier = vec![root];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if *kid != root && !order.contains(kid) {
                    order.push(*kid);
                    frontier.push(*kid);
                }
            }
        }
    }
    order.reverse();
    order
}

/// Kill `root` and its entire descendant tree.
///
/// Descendants are killed before their parents so that no orphan gets
/// re-parented out of reach. Returns the number of processes signalled.
pub fn kill_tree(root: u32) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let children = child_links(&system);

    let root_pid = Pid::from_u32(root);
    let mut victims = descendants_from_links(root_pid, &children);
    victims.push(root_pid);

    let mut killed = 0;
    for pid in victims {
        match system.process(pid) {
            Some(process) if process.kill() => {
                debug!(pid = pid.as_u32(), "Killed process");
                killed += 1;
            }
            Some(_) => warn!(pid = pid.as_u32(), "Failed to signal process"),
            None => {}
        }
    }
    killed
}
