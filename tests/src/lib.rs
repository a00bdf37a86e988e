//! Cross-crate tests of the provisioning pipeline, driven by the scripted
//! executor from `rackctl-core`.

#[cfg(test)]
mod pipeline;
