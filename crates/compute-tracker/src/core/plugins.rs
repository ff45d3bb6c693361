//! Extensible resource plugins.

use log::warn;

use crate::core::host_record::HostResourceRecord;

/// A named resource handler that appends computed stats to the host record.
///
/// Plugins run during reconciliation, after driver stats are merged, so a
/// plugin may overwrite a same-named driver key by explicitly setting it.
pub trait ResourcePlugin: Send + Sync {
    fn name(&self) -> &str;
    fn write_resources(&self, record: &mut HostResourceRecord) -> Result<(), String>;
}

/// Registry of enabled plugins, applied in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn ResourcePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configured plugin names.
    pub fn from_names(names: &[String]) -> Self {
        let mut registry = Self::new();
        for name in names {
            registry.register(resource_plugin_resolver(name));
        }
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn ResourcePlugin>) {
        self.plugins.push(plugin);
    }

    /// Runs every plugin against the record. A failing plugin's contribution
    /// is dropped entirely and the remaining plugins still run.
    pub fn write_all(&self, record: &mut HostResourceRecord) {
        for plugin in &self.plugins {
            let mut scratch = record.clone();
            match plugin.write_resources(&mut scratch) {
                Ok(()) => *record = scratch,
                Err(reason) => {
                    warn!("resource plugin {} failed: {}", plugin.name(), reason);
                }
            }
        }
    }
}

pub fn resource_plugin_resolver(name: &str) -> Box<dyn ResourcePlugin> {
    match name {
        "vcpu" => Box::new(VcpuPlugin::new()),
        _ => panic!("Can't resolve resource plugin: {}", name),
    }
}

/// Built-in plugin reporting vCPU capacity and usage as stats.
pub struct VcpuPlugin;

impl VcpuPlugin {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for VcpuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePlugin for VcpuPlugin {
    fn name(&self) -> &str {
        "vcpu"
    }

    fn write_resources(&self, record: &mut HostResourceRecord) -> Result<(), String> {
        record
            .stats
            .insert("num_vcpus".to_string(), record.vcpus_total.to_string());
        record
            .stats
            .insert("num_vcpus_used".to_string(), record.vcpus_used.to_string());
        Ok(())
    }
}
