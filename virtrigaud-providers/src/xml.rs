//! libvirt domain XML generation from a provider `CreateParams`.

use virtrigaud_provider::types::{CreateParams, DiskSpec, NetworkSpec};

/// Builds the libvirt domain XML for a VM about to be defined. UEFI vs BIOS
/// is carried on the image rather than `CreateParams` today, so this builder
/// always emits a UEFI domain; callers that need BIOS compatibility should
/// extend `CreateParams` rather than guess from the image name.
pub struct DomainXmlBuilder<'a> {
    id: &'a str,
    params: &'a CreateParams,
    disk_paths: &'a [String],
    cdrom_path: Option<&'a str>,
}

impl<'a> DomainXmlBuilder<'a> {
    pub fn new(id: &'a str, params: &'a CreateParams, disk_paths: &'a [String]) -> Self {
        Self { id, params, disk_paths, cdrom_path: None }
    }

    /// Attaches a cloud-init NoCloud ISO as a read-only cdrom device.
    pub fn with_cdrom(mut self, iso_path: &'a str) -> Self {
        self.cdrom_path = Some(iso_path);
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::new();

        xml.push_str(&format!(
            "<domain type='kvm'>\n  <name>{}</name>\n  <uuid>{}</uuid>\n  <memory unit='MiB'>{}</memory>\n  <vcpu placement='static'>{}</vcpu>\n",
            self.params.name, self.id, self.params.memory_mib, self.params.vcpus
        ));

        xml.push_str(&format!(
            "  <os>\n    <type arch='x86_64' machine='q35'>hvm</type>\n    <loader readonly='yes' type='pflash'>/usr/share/OVMF/OVMF_CODE.fd</loader>\n    <nvram>/var/lib/libvirt/qemu/nvram/{}_VARS.fd</nvram>\n  </os>\n",
            self.params.name
        ));

        xml.push_str("  <features>\n    <acpi/>\n    <apic/>\n  </features>\n  <cpu mode='host-passthrough'/>\n");
        xml.push_str("  <on_poweroff>destroy</on_poweroff>\n  <on_reboot>restart</on_reboot>\n  <on_crash>destroy</on_crash>\n");

        xml.push_str("  <devices>\n    <emulator>/usr/bin/qemu-system-x86_64</emulator>\n");
        xml.push_str(&self.build_disks());
        xml.push_str(&self.build_cdrom());
        xml.push_str(&self.build_nics());
        xml.push_str("    <serial type='pty'>\n      <target port='0'/>\n    </serial>\n    <console type='pty'>\n      <target type='serial' port='0'/>\n    </console>\n");
        xml.push_str("    <graphics type='vnc' port='-1' autoport='yes' listen='127.0.0.1'>\n      <listen type='address' address='127.0.0.1'/>\n    </graphics>\n");
        xml.push_str("    <video>\n      <model type='vga' vram='16384' heads='1' primary='yes'/>\n    </video>\n");
        xml.push_str("  </devices>\n</domain>\n");

        xml
    }

    fn build_disks(&self) -> String {
        let mut xml = String::new();
        for (i, (disk, path)) in self.spec_disks().iter().zip(self.disk_paths.iter()).enumerate() {
            let dev = format!("vd{}", (b'a' + i as u8) as char);
            let bus = disk.bus.as_deref().unwrap_or("virtio");
            xml.push_str(&format!(
                "    <disk type='file' device='disk'>\n      <driver name='qemu' type='qcow2' cache='none' io='native'/>\n      <source file='{path}'/>\n      <target dev='{dev}' bus='{bus}'/>\n    </disk>\n"
            ));
        }
        xml
    }

    fn spec_disks(&self) -> &[DiskSpec] {
        &self.params.disks
    }

    fn build_cdrom(&self) -> String {
        let Some(iso_path) = self.cdrom_path else {
            return String::new();
        };
        let dev = format!("sd{}", (b'a' + self.disk_paths.len() as u8) as char);
        format!(
            "    <disk type='file' device='cdrom'>\n      <driver name='qemu' type='raw'/>\n      <source file='{iso_path}'/>\n      <target dev='{dev}' bus='sata'/>\n      <readonly/>\n    </disk>\n"
        )
    }

    fn build_nics(&self) -> String {
        let mut xml = String::new();
        for nic in self.spec_networks() {
            let mac = nic
                .mac_address
                .as_ref()
                .map(|m| format!("      <mac address='{m}'/>\n"))
                .unwrap_or_default();
            let model = nic.nic_model.as_deref().unwrap_or("virtio");
            xml.push_str(&format!(
                "    <interface type='bridge'>\n      <source bridge='{}'/>\n{mac}      <model type='{model}'/>\n    </interface>\n",
                nic.name
            ));
        }
        xml
    }

    fn spec_networks(&self) -> &[NetworkSpec] {
        &self.params.networks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_provider::types::DiskSpec;

    #[test]
    fn basic_xml_generation() {
        let params = CreateParams {
            name: "test-vm".into(),
            vcpus: 4,
            memory_mib: 4096,
            disks: vec![DiskSpec { name: "root".into(), size_gib: 20, bus: None }],
            ..Default::default()
        };
        let paths = vec!["/var/lib/virtrigaud/images/test-vm-root.qcow2".to_string()];
        let xml = DomainXmlBuilder::new("uuid-1", &params, &paths).build();

        assert!(xml.contains("<name>test-vm</name>"));
        assert!(xml.contains("<memory unit='MiB'>4096</memory>"));
        assert!(xml.contains("<vcpu placement='static'>4</vcpu>"));
        assert!(xml.contains("test-vm-root.qcow2"));
    }

    #[test]
    fn nic_with_mac() {
        let params = CreateParams {
            name: "net-vm".into(),
            vcpus: 1,
            memory_mib: 512,
            networks: vec![NetworkSpec {
                name: "br0".into(),
                mac_address: Some("52:54:00:12:34:56".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let xml = DomainXmlBuilder::new("uuid-2", &params, &[]).build();

        assert!(xml.contains("source bridge='br0'"));
        assert!(xml.contains("address='52:54:00:12:34:56'"));
    }

    #[test]
    fn cdrom_attached_after_disks_when_requested() {
        let params = CreateParams {
            name: "ci-vm".into(),
            vcpus: 1,
            memory_mib: 512,
            disks: vec![DiskSpec { name: "root".into(), size_gib: 10, bus: None }],
            ..Default::default()
        };
        let paths = vec!["/var/lib/virtrigaud/images/ci-vm-root.qcow2".to_string()];
        let xml = DomainXmlBuilder::new("uuid-3", &params, &paths)
            .with_cdrom("/var/lib/virtrigaud/images/ci-vm/cloud-init.iso")
            .build();

        assert!(xml.contains("device='cdrom'"));
        assert!(xml.contains("cloud-init.iso"));
        assert!(xml.contains("dev='sdb'"));
    }

    #[test]
    fn no_cdrom_device_when_not_requested() {
        let params = CreateParams { name: "plain-vm".into(), vcpus: 1, memory_mib: 512, ..Default::default() };
        let xml = DomainXmlBuilder::new("uuid-4", &params, &[]).build();
        assert!(!xml.contains("device='cdrom'"));
    }
}
