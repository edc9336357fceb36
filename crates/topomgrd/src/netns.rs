//! Namespace provisioning - isolated network stack lifecycle

use std::collections::BTreeSet;

use labnet_common::{LabError, LabResult, Runner};
use tracing::{info, warn};

use crate::addr::validate_name;
use crate::commands::{
    build_loopback_up_cmd, build_move_link_cmd, build_netns_add_cmd, build_netns_del_cmd,
};

/// Namespace provisioner.
///
/// Creates and destroys isolated network namespaces and moves interfaces
/// into them. Tracks every namespace it created so the orchestrator can
/// verify the created set equals the deleted set at the end of a session.
#[derive(Debug, Default)]
pub struct NetnsMgr {
    created: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl NetnsMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a namespace, failing with `ResourceExists` on collision.
    pub async fn create(&mut self, runner: &mut Runner, name: &str) -> LabResult<()> {
        validate_name(name)?;

        let result = runner.run_checked(&build_netns_add_cmd(name)).await;
        match result {
            Ok(_) => {}
            Err(LabError::CommandFailed { output, .. }) if output.contains("File exists") => {
                return Err(LabError::resource_exists("namespace", name));
            }
            Err(e) => return Err(e),
        }

        // Loopback up is best-effort, as for any fresh namespace
        let _ = runner.run(&build_loopback_up_cmd(name)).await;

        self.created.insert(name.to_string());
        info!(ns = name, "created network namespace");
        Ok(())
    }

    /// Creates a namespace after deleting any stale one of the same name,
    /// so repeated runs are idempotent.
    pub async fn create_fresh(&mut self, runner: &mut Runner, name: &str) -> LabResult<()> {
        validate_name(name)?;
        let _ = runner.run(&build_netns_del_cmd(name)).await;
        self.create(runner, name).await
    }

    /// Deletes a namespace, best-effort.
    ///
    /// The error is returned for the teardown report but the namespace is
    /// counted as handled either way; teardown never aborts here.
    pub async fn delete(&mut self, runner: &mut Runner, name: &str) -> LabResult<()> {
        let result = runner.run_checked(&build_netns_del_cmd(name)).await;
        match result {
            Ok(_) => {
                self.deleted.insert(name.to_string());
                info!(ns = name, "deleted network namespace");
                Ok(())
            }
            Err(e) => {
                warn!(ns = name, error = %e, "failed to delete namespace");
                Err(e)
            }
        }
    }

    /// Moves an interface from the root namespace into `ns`.
    pub async fn move_link(&self, runner: &mut Runner, iface: &str, ns: &str) -> LabResult<()> {
        runner.run_checked(&build_move_link_cmd(iface, ns)).await?;
        Ok(())
    }

    /// Namespaces created during this session, in name order.
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.created.iter().map(String::as_str)
    }

    /// Namespaces created but not yet successfully deleted.
    pub fn leaked(&self) -> Vec<String> {
        self.created.difference(&self.deleted).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tracks_namespace() {
        let mut runner = Runner::mock();
        let mut mgr = NetnsMgr::new();

        mgr.create(&mut runner, "ns1").await.unwrap();

        assert_eq!(mgr.created().collect::<Vec<_>>(), vec!["ns1"]);
        let cmds = runner.captured_commands();
        assert_eq!(cmds[0], "/sbin/ip netns add \"ns1\"");
        assert!(cmds[1].contains("link set lo up"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name() {
        let mut runner = Runner::mock();
        let mut mgr = NetnsMgr::new();

        let err = mgr.create(&mut runner, "Bad Name!").await.unwrap_err();
        assert!(matches!(err, LabError::InvalidName { .. }));
        assert!(runner.captured_commands().is_empty());
    }

    #[tokio::test]
    async fn test_create_fresh_deletes_stale_first() {
        let mut runner = Runner::mock();
        let mut mgr = NetnsMgr::new();

        mgr.create_fresh(&mut runner, "ns1").await.unwrap();

        let cmds = runner.captured_commands();
        assert_eq!(cmds[0], "/sbin/ip netns del \"ns1\"");
        assert_eq!(cmds[1], "/sbin/ip netns add \"ns1\"");
    }

    #[tokio::test]
    async fn test_delete_balances_created() {
        let mut runner = Runner::mock();
        let mut mgr = NetnsMgr::new();

        mgr.create(&mut runner, "ns1").await.unwrap();
        mgr.create(&mut runner, "ns2").await.unwrap();
        assert_eq!(mgr.leaked().len(), 2);

        mgr.delete(&mut runner, "ns1").await.unwrap();
        mgr.delete(&mut runner, "ns2").await.unwrap();
        assert!(mgr.leaked().is_empty());
    }

    #[tokio::test]
    async fn test_move_link() {
        let mut runner = Runner::mock();
        let mgr = NetnsMgr::new();

        mgr.move_link(&mut runner, "veth_h1", "host1").await.unwrap();
        assert_eq!(
            runner.captured_commands()[0],
            "/sbin/ip link set \"veth_h1\" netns \"host1\""
        );
    }
}
