//! Engine-local instance updates.
//!
//! Modify-info never touches infrastructure: it patches instance
//! attributes in place. The helpers here are also used by the coordinator's
//! bookkeeping when instantiate or change-vnfpkg carry configurable
//! properties and extensions.

use std::collections::BTreeMap;

use serde_json::Value;
use vnflcm_model::{
    json_merge_patch, KeyValuePairs, ModifyInfoRequest, VimConnectionInfo, VnfInstance,
};

use crate::descriptor::Vnfd;
use crate::error::LcmError;

/// Merge-patch `patch` into an optional object. An empty result is `None`.
pub fn merge_kv(base: Option<&KeyValuePairs>, patch: &KeyValuePairs) -> Option<KeyValuePairs> {
    let base = base.cloned().map(Value::Object).unwrap_or(Value::Null);
    match json_merge_patch(&base, &Value::Object(patch.clone())) {
        Value::Object(map) if !map.is_empty() => Some(map),
        _ => None,
    }
}

/// Copy the package identity of `vnfd` onto the instance.
pub fn apply_vnfd_identity(inst: &mut VnfInstance, vnfd: &Vnfd) {
    inst.vnfd_id = vnfd.vnfd_id.clone();
    inst.vnf_provider = vnfd.provider.clone();
    inst.vnf_product_name = vnfd.product_name.clone();
    inst.vnf_software_version = vnfd.software_version.clone();
    inst.vnfd_version = vnfd.descriptor_version.clone();
}

/// Fill in the descriptor's default properties. Values already on the
/// instance take precedence over the defaults.
pub fn apply_default_properties(inst: &mut VnfInstance, vnfd: &Vnfd) {
    let defaults = &vnfd.default_properties;
    let fill = |current: &mut Option<KeyValuePairs>, default: &Option<KeyValuePairs>| {
        if let Some(default) = default {
            let merged = match current.as_ref() {
                Some(cur) => merge_kv(Some(default), cur),
                None => Some(default.clone()),
            };
            *current = merged;
        }
    };
    fill(
        &mut inst.vnf_configurable_properties,
        &defaults.vnf_configurable_properties,
    );
    fill(&mut inst.metadata, &defaults.metadata);
    fill(&mut inst.extensions, &defaults.extensions);
}

fn merge_vim_info(
    current: &BTreeMap<String, VimConnectionInfo>,
    patch: &KeyValuePairs,
) -> Result<BTreeMap<String, VimConnectionInfo>, LcmError> {
    let base = serde_json::to_value(current)
        .map_err(|e| LcmError::Validation(format!("vimConnectionInfo: {}", e)))?;
    let merged = json_merge_patch(&base, &Value::Object(patch.clone()));
    serde_json::from_value(merged)
        .map_err(|e| LcmError::Validation(format!("vimConnectionInfo: {}", e)))
}

/// Apply a modify-info request to `inst`.
///
/// `new_vnfd` is the descriptor named by `req.vnfd_id` when that differs
/// from the instance's current one. The instance is left untouched when
/// the request is rejected.
pub fn apply_modify_info(
    inst: &mut VnfInstance,
    req: &ModifyInfoRequest,
    new_vnfd: Option<&Vnfd>,
) -> Result<(), LcmError> {
    let metadata = match &req.metadata {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            return Err(LcmError::Validation(
                "metadata must be a JSON object".to_string(),
            ))
        }
    };
    let vim_connection_info = req
        .vim_connection_info
        .as_ref()
        .map(|patch| merge_vim_info(&inst.vim_connection_info, patch))
        .transpose()?;
    for modification in &req.vnfc_info_modifications {
        let known = inst
            .instantiated_vnf_info
            .as_ref()
            .is_some_and(|info| info.vnfc_info.iter().any(|v| v.id == modification.id));
        if !known {
            return Err(LcmError::Validation(format!(
                "vnfcInfo {} does not exist",
                modification.id
            )));
        }
    }

    if let Some(name) = &req.vnf_instance_name {
        inst.vnf_instance_name = Some(name.clone());
    }
    if let Some(description) = &req.vnf_instance_description {
        inst.vnf_instance_description = Some(description.clone());
    }
    if let Some(vnfd) = new_vnfd {
        apply_vnfd_identity(inst, vnfd);
        apply_default_properties(inst, vnfd);
    }
    if let Some(props) = &req.vnf_configurable_properties {
        inst.vnf_configurable_properties =
            merge_kv(inst.vnf_configurable_properties.as_ref(), props);
    }
    if let Some(metadata) = metadata {
        inst.metadata = merge_kv(inst.metadata.as_ref(), metadata);
    }
    if let Some(extensions) = &req.extensions {
        inst.extensions = merge_kv(inst.extensions.as_ref(), extensions);
    }
    if let Some(vims) = vim_connection_info {
        inst.vim_connection_info = vims;
    }
    if let Some(info) = inst.instantiated_vnf_info.as_mut() {
        for modification in &req.vnfc_info_modifications {
            if let Some(vnfc) = info.vnfc_info.iter_mut().find(|v| v.id == modification.id) {
                vnfc.vnfc_configurable_properties = merge_kv(
                    vnfc.vnfc_configurable_properties.as_ref(),
                    &modification.vnfc_configurable_properties,
                );
            }
        }
    }
    Ok(())
}
