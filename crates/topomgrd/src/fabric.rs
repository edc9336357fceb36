//! Link fabric - veth pairs, GRETAP tunnels, and bridges

use labnet_common::{LabError, LabResult, Runner};
use tracing::{debug, info, warn};

use crate::addr::validate_name;
use crate::commands::{
    build_addr_add_cmd, build_bridge_add_cmd, build_bridge_enslave_cmd, build_gretap_add_cmd,
    build_group_fwd_mask_cmd, build_link_del_cmd, build_link_mtu_cmd, build_link_show_up_cmd,
    build_link_up_cmd, build_veth_add_cmd,
};
use crate::types::{LinkKind, LinkSpec};

/// Link fabric builder.
///
/// Creates veth pairs, GRETAP tunnel endpoints, and bridges, and records
/// every created link so teardown can unwind them in reverse order.
#[derive(Debug, Default)]
pub struct FabricMgr {
    links: Vec<LinkSpec>,
}

impl FabricMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a veth pair in the root namespace.
    ///
    /// A stale interface with the primary name is deleted first so
    /// repeated runs are idempotent; a collision that survives the
    /// pre-delete is surfaced as `ResourceExists`.
    pub async fn create_veth_pair(
        &mut self,
        runner: &mut Runner,
        name_a: &str,
        name_b: &str,
    ) -> LabResult<LinkSpec> {
        validate_name(name_a)?;
        validate_name(name_b)?;

        // Pre-emptive delete-if-exists
        let _ = runner.run(&build_link_del_cmd(None, name_a)).await;

        match runner.run_checked(&build_veth_add_cmd(name_a, name_b)).await {
            Ok(_) => {}
            Err(LabError::CommandFailed { output, .. }) if output.contains("File exists") => {
                return Err(LabError::resource_exists("link", name_a));
            }
            Err(e) => return Err(e),
        }

        let link = LinkSpec::new(LinkKind::Veth, name_a).with_peer(name_b);
        self.links.push(link.clone());
        debug!(local = name_a, peer = name_b, "created veth pair");
        Ok(link)
    }

    /// Creates one GRETAP endpoint inside a router namespace.
    ///
    /// Local/remote pairing across sites comes from the orchestrator's
    /// pairing table; this only wires one end.
    pub async fn create_gretap(
        &mut self,
        runner: &mut Runner,
        ns: &str,
        iface: &str,
        local_ip: &str,
        remote_ip: &str,
        mac: &str,
    ) -> LabResult<LinkSpec> {
        validate_name(iface)?;

        let _ = runner.run(&build_link_del_cmd(Some(ns), iface)).await;
        runner
            .run_checked(&build_gretap_add_cmd(Some(ns), iface, local_ip, remote_ip, mac))
            .await?;

        let link = LinkSpec::new(LinkKind::Gretap, iface).in_namespace(ns);
        self.links.push(link.clone());
        info!(ns, iface, local_ip, remote_ip, "created gretap endpoint");
        Ok(link)
    }

    /// Creates a software bridge and enslaves `members`.
    ///
    /// With `fwd_mask` set, the bridge forwards the matching
    /// normally-filtered control-plane group addresses (the LAN scenario
    /// needs 802.1X PAE frames to cross).
    pub async fn create_bridge(
        &mut self,
        runner: &mut Runner,
        ns: Option<&str>,
        name: &str,
        members: &[&str],
        fwd_mask: Option<u16>,
    ) -> LabResult<LinkSpec> {
        validate_name(name)?;

        let _ = runner.run(&build_link_del_cmd(ns, name)).await;
        runner.run_checked(&build_bridge_add_cmd(ns, name)).await?;

        if let Some(mask) = fwd_mask {
            runner
                .run_checked(&build_group_fwd_mask_cmd(ns, name, mask))
                .await?;
        }

        for member in members {
            runner
                .run_checked(&build_bridge_enslave_cmd(ns, member, name))
                .await?;
        }
        runner.run_checked(&build_link_up_cmd(ns, name)).await?;

        let link = LinkSpec::new(LinkKind::Bridge, name);
        let link = match ns {
            Some(ns) => link.in_namespace(ns),
            None => link,
        };
        self.links.push(link.clone());
        info!(bridge = name, members = members.len(), "created bridge");
        Ok(link)
    }

    /// Registers an overlay link created elsewhere (the MACsec device)
    /// so teardown unwinds it with the rest of the fabric.
    pub fn register(&mut self, link: LinkSpec) {
        self.links.push(link);
    }

    /// Records that a link's primary endpoint now lives in `ns`, so
    /// teardown deletes it there instead of the root namespace.
    ///
    /// Must be called after moving a registered endpoint; an unregistered
    /// name (e.g. the peer end of a veth pair) is a no-op.
    pub fn relocate(&mut self, iface: &str, ns: &str) {
        if let Some(link) = self.links.iter_mut().find(|l| l.endpoint_a == iface) {
            link.owning_ns = Some(ns.to_string());
        }
    }

    /// Enslaves an interface to an existing bridge.
    pub async fn enslave(
        &self,
        runner: &mut Runner,
        ns: Option<&str>,
        iface: &str,
        bridge: &str,
    ) -> LabResult<()> {
        runner
            .run_checked(&build_bridge_enslave_cmd(ns, iface, bridge))
            .await?;
        Ok(())
    }

    pub async fn link_up(&self, runner: &mut Runner, ns: Option<&str>, iface: &str) -> LabResult<()> {
        runner.run_checked(&build_link_up_cmd(ns, iface)).await?;
        Ok(())
    }

    pub async fn set_mtu(
        &self,
        runner: &mut Runner,
        ns: Option<&str>,
        iface: &str,
        mtu: u32,
    ) -> LabResult<()> {
        runner.run_checked(&build_link_mtu_cmd(ns, iface, mtu)).await?;
        Ok(())
    }

    pub async fn add_address(
        &self,
        runner: &mut Runner,
        ns: Option<&str>,
        iface: &str,
        cidr: &str,
    ) -> LabResult<()> {
        runner.run_checked(&build_addr_add_cmd(ns, iface, cidr)).await?;
        Ok(())
    }

    /// Returns true if the interface exists and is administratively up.
    pub async fn link_is_up(
        &self,
        runner: &mut Runner,
        ns: Option<&str>,
        iface: &str,
    ) -> LabResult<bool> {
        let result = runner.run(&build_link_show_up_cmd(ns, iface)).await?;
        Ok(result.success())
    }

    /// Links created so far, in creation order.
    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    /// Deletes links of `kind` in reverse creation order, best-effort.
    ///
    /// Returns one error string per failed deletion; failures never stop
    /// the remaining deletions.
    pub async fn teardown_kind(&mut self, runner: &mut Runner, kind: LinkKind) -> Vec<String> {
        let mut errors = Vec::new();
        let mut remaining = Vec::with_capacity(self.links.len());

        for link in std::mem::take(&mut self.links).into_iter().rev() {
            if link.kind != kind {
                remaining.push(link);
                continue;
            }
            let cmd = build_link_del_cmd(link.owning_ns.as_deref(), &link.endpoint_a);
            if let Err(e) = runner.run_checked(&cmd).await {
                // Only execution failures may be swallowed here; anything
                // else is a sequencing bug
                debug_assert!(e.is_teardown_tolerable(), "teardown sequencing bug: {e}");
                warn!(link = %link.endpoint_a, error = %e, "failed to delete link");
                errors.push(format!("{}: {e}", link.endpoint_a));
            } else {
                debug!(link = %link.endpoint_a, kind = %link.kind, "deleted link");
            }
        }

        // Preserve creation order for the links that stay
        remaining.reverse();
        self.links = remaining;
        errors
    }
}
