//! Process-tree inspection and termination.
//!
//! Reads `/proc` to find descendants of a process and delivers SIGKILL via
//! the system `kill` utility. Both are best effort: a process that exits
//! between inspection and signal delivery is simply skipped.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

/// Returns every descendant of `root`, deepest first.
///
/// The root itself is not included. On systems without `/proc` this returns
/// an empty list and callers fall back to the process-group kill.
pub fn descendants(root: u32) -> Vec<u32> {
    descendants_in(Path::new("/proc"), root)
}

fn descendants_in(proc_root: &Path, root: u32) -> Vec<u32> {
    let children = child_map(proc_root);

    // Breadth-first walk, then reverse so leaves come first.
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if kid != root && !order.contains(&kid) {
                    order.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }

    order.reverse();
    order
}

/// Maps each parent pid to its direct children.
fn child_map(proc_root: &Path) -> HashMap<u32, Vec<u32>> {
    let mut map: HashMap<u32, Vec<u32>> = HashMap::new();

    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return map;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_ppid(&stat) {
            map.entry(ppid).or_default().push(pid);
        }
    }

    for kids in map.values_mut() {
        kids.sort_unstable();
    }
    map
}

/// Extracts the parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesized and may itself contain spaces or
/// parentheses, so fields are read after the last `)`.
pub fn parse_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Sends SIGKILL to every process in group `pgid`.
pub async fn kill_group(pgid: u32) {
    let target = format!("-{}", pgid);
    send_kill(&["-KILL", "--", &target]).await;
}

/// Sends SIGKILL to each pid in order.
pub async fn kill_pids(pids: &[u32]) {
    if pids.is_empty() {
        return;
    }
    let mut args = vec!["-KILL".to_string(), "--".to_string()];
    args.extend(pids.iter().map(|p| p.to_string()));
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    send_kill(&refs).await;
}

async fn send_kill(args: &[&str]) {
    match Command::new("kill").args(args).output().await {
        Ok(output) if output.status.success() => {
            debug!(args = ?args, "Delivered SIGKILL");
        }
        Ok(output) => {
            // Usually "No such process": the target already exited.
            debug!(
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "kill reported failure"
            );
        }
        Err(e) => warn!(error = %e, "Failed to run kill"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc(entries: &[(u32, u32)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for &(pid, ppid) in entries {
            let pdir = dir.path().join(pid.to_string());
            std::fs::create_dir(&pdir).unwrap();
            std::fs::write(
                pdir.join("stat"),
                format!("{} (worker (x)) S {} {} 0 0", pid, ppid, pid),
            )
            .unwrap();
        }
        std::fs::create_dir(dir.path().join("self")).unwrap();
        dir
    }

    #[test]
    fn test_parse_ppid_handles_odd_names() {
        assert_eq!(parse_ppid("42 (sh) S 7 42 42 0"), Some(7));
        assert_eq!(parse_ppid("42 (a) b) (c) R 9 1 1"), Some(9));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[test]
    fn test_descendants_are_deepest_first() {
        // 10 -> 11 -> 13, 10 -> 12, 20 unrelated
        let proc_dir = fake_proc(&[(10, 1), (11, 10), (12, 10), (13, 11), (20, 1)]);
        let found = descendants_in(proc_dir.path(), 10);

        assert_eq!(found.len(), 3);
        assert!(!found.contains(&20));
        assert!(!found.contains(&10));
        let pos = |p: u32| found.iter().position(|&x| x == p).unwrap();
        assert!(pos(13) < pos(11));
    }

    #[test]
    fn test_missing_proc_root_yields_nothing() {
        assert!(descendants_in(Path::new("/definitely/not/here"), 1).is_empty());
    }
}
