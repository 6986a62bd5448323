// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use rescue_types::DeviceDescriptor;

use crate::RescueError;

#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    /// Enumerate every block device on the host. An empty host is `Ok(vec![])`.
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, RescueError>;

    async fn describe_device(&self, identifier: &str) -> Result<DeviceDescriptor, RescueError> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|device| device.matches(identifier))
            .ok_or_else(|| RescueError::NotFound(identifier.to_string()))
    }
}
