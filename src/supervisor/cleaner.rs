//! Process cleaner: run inside the pod before the dev container replaces
//! the original, to stop anything that would hold the work-dir open.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};

use super::{Error, Result};

/// Names exempt from termination regardless of process tree position.
const ALLOWLIST: &[&str] = &["okteto-remote", "syncthing", "okteto-supervisor", "supervisor"];

#[derive(Clone, Debug)]
struct ProcessEntry {
    pid: i32,
    ppid: i32,
    command: String,
}

/// Lists processes via `ps` and terminates those that are neither PID 1,
/// the cleaner's own PID/PPID, an allowlisted name, nor a descendant of
/// `screen`/`tmux`. PID 1 is always preserved.
pub async fn clean(client: kube::Client, namespace: &str, pod_name: &str, container: &str) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let output = exec_capture(&pods, pod_name, container, &["ps", "-eo", "pid,ppid,comm"]).await?;
    let processes = parse_ps(&output);

    let own_pid = std::process::id() as i32;
    let own_ppid = exec_capture(&pods, pod_name, container, &["sh", "-c", "echo $PPID"])
        .await
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .unwrap_or(own_pid);

    let screen_descendants = descendants_of_named(&processes, &["screen", "tmux"]);

    for proc in &processes {
        if proc.pid == 1 {
            continue;
        }
        if proc.pid == own_pid || proc.pid == own_ppid {
            continue;
        }
        if ALLOWLIST.contains(&proc.command.as_str()) {
            continue;
        }
        if screen_descendants.contains(&proc.pid) {
            continue;
        }

        let kill = format!("kill {}", proc.pid);
        let _ = exec_capture(&pods, pod_name, container, &["sh", "-c", &kill]).await;
    }

    Ok(())
}

fn parse_ps(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            let command = fields.next()?.to_string();
            Some(ProcessEntry { pid, ppid, command })
        })
        .collect()
}

fn descendants_of_named(processes: &[ProcessEntry], names: &[&str]) -> std::collections::HashSet<i32> {
    let roots: Vec<i32> = processes
        .iter()
        .filter(|p| names.contains(&p.command.as_str()))
        .map(|p| p.pid)
        .collect();

    let mut descendants: std::collections::HashSet<i32> = roots.iter().copied().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for proc in processes {
            if descendants.contains(&proc.ppid) && !descendants.contains(&proc.pid) {
                descendants.insert(proc.pid);
                changed = true;
            }
        }
    }
    descendants
}

async fn exec_capture(pods: &Api<Pod>, pod_name: &str, container: &str, command: &[&str]) -> Result<String> {
    use futures::StreamExt;

    let params = AttachParams::default().container(container).stdout(true).stderr(false);
    let mut attached = pods
        .exec(pod_name, command, &params)
        .await
        .map_err(|e| Error::CleanerFailed(e.to_string()))?;

    let mut stdout = attached
        .stdout()
        .ok_or_else(|| Error::CleanerFailed("no stdout stream from exec".to_string()))?;

    let mut output = String::new();
    use tokio::io::AsyncReadExt;
    stdout.read_to_string(&mut output).await.map_err(Error::Io)?;
    attached.join().await.map_err(|e| Error::CleanerFailed(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: i32, ppid: i32, command: &str) -> ProcessEntry {
        ProcessEntry { pid, ppid, command: command.to_string() }
    }

    #[test]
    fn finds_transitive_descendants_of_screen() {
        let processes = vec![
            entry(1, 0, "sh"),
            entry(10, 1, "screen"),
            entry(11, 10, "bash"),
            entry(12, 11, "vim"),
            entry(20, 1, "node"),
        ];
        let descendants = descendants_of_named(&processes, &["screen", "tmux"]);
        assert!(descendants.contains(&10));
        assert!(descendants.contains(&11));
        assert!(descendants.contains(&12));
        assert!(!descendants.contains(&20));
    }

    #[test]
    fn parses_ps_output() {
        let output = "PID PPID COMMAND\n1 0 sh\n42 1 syncthing\n";
        let processes = parse_ps(output);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[1].command, "syncthing");
    }
}
