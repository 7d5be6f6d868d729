//! Disk image management via `qemu-img` — shared by the Libvirt/KVM back-end
//! and by export/import handling on any back-end that stores disks as local
//! qcow2/raw files.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, instrument};
use virtrigaud_provider::error::ProviderError;
use virtrigaud_provider::types::DiskInfo;

pub const DEFAULT_STORAGE_PATH: &str = "/var/lib/virtrigaud/images";

#[derive(Clone)]
pub struct DiskImageManager {
    base_path: PathBuf,
    qemu_img_path: String,
}

impl DiskImageManager {
    pub fn new() -> Self {
        Self { base_path: PathBuf::from(DEFAULT_STORAGE_PATH), qemu_img_path: "qemu-img".to_string() }
    }

    pub fn with_path(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into(), qemu_img_path: "qemu-img".to_string() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn ensure_storage_dir(&self) -> Result<(), ProviderError> {
        if !self.base_path.exists() {
            std::fs::create_dir_all(&self.base_path)
                .map_err(|e| ProviderError::Internal(format!("creating storage dir: {e}")))?;
            info!(path = %self.base_path.display(), "created storage directory");
        }
        Ok(())
    }

    pub fn disk_path(&self, vm_id: &str, disk_name: &str) -> PathBuf {
        self.base_path.join(format!("{vm_id}/{disk_name}.qcow2"))
    }

    #[instrument(skip(self), fields(path = %path.display(), size_gib = %size_gib))]
    pub fn create_image(&self, path: &Path, size_gib: u64, format: &str) -> Result<(), ProviderError> {
        if path.exists() {
            return Err(ProviderError::AlreadyExists(format!("disk image already exists: {}", path.display())));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProviderError::Internal(format!("creating parent dir: {e}")))?;
        }

        let size = format!("{size_gib}G");
        let output = Command::new(&self.qemu_img_path)
            .args(["create", "-f", format, path.to_str().unwrap_or_default(), &size])
            .output()
            .map_err(|e| ProviderError::Internal(format!("executing qemu-img: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("qemu-img create failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        info!(path = %path.display(), format, "disk image created");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn create_from_backing(&self, path: &Path, backing_path: &Path, format: &str) -> Result<(), ProviderError> {
        if path.exists() {
            return Err(ProviderError::AlreadyExists(format!("disk image already exists: {}", path.display())));
        }
        if !backing_path.exists() {
            return Err(ProviderError::InvalidSpec(format!("backing file does not exist: {}", backing_path.display())));
        }

        let output = Command::new(&self.qemu_img_path)
            .args([
                "create",
                "-f",
                format,
                "-F",
                format,
                "-b",
                backing_path.to_str().unwrap_or_default(),
                path.to_str().unwrap_or_default(),
            ])
            .output()
            .map_err(|e| ProviderError::Internal(format!("executing qemu-img: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("qemu-img create failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn resize_disk(&self, path: &Path, new_size_gib: u64) -> Result<(), ProviderError> {
        if !path.exists() {
            return Err(ProviderError::NotFound(format!("disk image does not exist: {}", path.display())));
        }
        let size = format!("{new_size_gib}G");
        let output = Command::new(&self.qemu_img_path)
            .args(["resize", path.to_str().unwrap_or_default(), &size])
            .output()
            .map_err(|e| ProviderError::Internal(format!("executing qemu-img: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("qemu-img resize failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get_disk_info(&self, path: &Path) -> Result<DiskInfo, ProviderError> {
        debug!("getting disk info");
        if !path.exists() {
            return Err(ProviderError::NotFound(format!("disk image does not exist: {}", path.display())));
        }

        let output = Command::new(&self.qemu_img_path)
            .args(["info", "--output=json", path.to_str().unwrap_or_default()])
            .output()
            .map_err(|e| ProviderError::Internal(format!("executing qemu-img: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("qemu-img info failed: {}", String::from_utf8_lossy(&output.stderr))));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info: serde_json::Value =
            serde_json::from_str(&stdout).map_err(|e| ProviderError::Internal(format!("parsing qemu-img output: {e}")))?;

        Ok(DiskInfo {
            format: info["format"].as_str().unwrap_or("unknown").to_string(),
            virtual_size_bytes: info["virtual-size"].as_u64().unwrap_or(0),
            actual_size_bytes: info["actual-size"].as_u64().unwrap_or(0),
            path: path.to_string_lossy().to_string(),
            backing_file: info["backing-filename"].as_str().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self))]
    pub fn convert_disk(&self, src_path: &Path, dst_path: &Path, dst_format: &str) -> Result<(), ProviderError> {
        if !src_path.exists() {
            return Err(ProviderError::NotFound(format!("source disk image does not exist: {}", src_path.display())));
        }
        let output = Command::new(&self.qemu_img_path)
            .args(["convert", "-O", dst_format, src_path.to_str().unwrap_or_default(), dst_path.to_str().unwrap_or_default()])
            .output()
            .map_err(|e| ProviderError::Internal(format!("executing qemu-img: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("qemu-img convert failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(())
    }

    pub fn delete_disk(&self, path: &Path) -> Result<(), ProviderError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| ProviderError::Internal(format!("deleting disk image: {e}")))?;
        }
        Ok(())
    }

    pub fn delete_vm_disks(&self, vm_id: &str) -> Result<(), ProviderError> {
        let vm_dir = self.base_path.join(vm_id);
        if vm_dir.exists() {
            std::fs::remove_dir_all(&vm_dir).map_err(|e| ProviderError::Internal(format!("deleting VM disk directory: {e}")))?;
        }
        Ok(())
    }
}

impl Default for DiskImageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_path_layout() {
        let manager = DiskImageManager::with_path("/var/lib/virtrigaud/images");
        let path = manager.disk_path("vm-123", "root");
        assert_eq!(path, PathBuf::from("/var/lib/virtrigaud/images/vm-123/root.qcow2"));
    }
}
