//! Job folder layout (spec.md §6 "Job layout on disk"). Grounded in
//! NVFlare's `tool/job/job_cli.py`/`private/fed/server/job_meta_validator.py`
//! `meta.json` schema, parsed with the teacher's DTO + `deny_unknown_fields`
//! discipline (`api/workflow_dto.rs`).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::model::DeployMap;
use crate::resource::ResourceRequest;

/// `meta.json`'s submitter-facing fields. Status-related fields
/// (`job_id`, `status`, timestamps, `submitter_*`) are server-populated
/// and read-only to the submitter, so they live on `crate::job::Job`
/// instead of here (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobMeta {
    pub name: String,
    pub deploy_map: DeployMap,
    pub min_clients: usize,
    #[serde(default)]
    pub required_sites: HashSet<String>,
    #[serde(default)]
    pub resource_spec: HashMap<String, ResourceRequest>,
    pub config_fed_server: Option<String>,
    pub config_fed_client: Option<String>,
}

/// Parses `<job_folder>/meta.json`. Fails if a required field is
/// missing or the folder doesn't contain one `app_<name>/` directory per
/// `deploy_map` key (spec.md §6 layout diagram).
pub fn parse_job_folder(folder: &Path) -> Result<JobMeta> {
    let meta_path = folder.join("meta.json");
    let data = std::fs::read_to_string(&meta_path).map_err(Error::IoError)?;
    let meta: JobMeta = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    for app_name in meta.deploy_map.keys() {
        let app_dir = folder.join(format!("app_{}", app_name));
        if !app_dir.is_dir() {
            return Err(Error::Config(format!("job folder missing '{}' for app '{}'", app_dir.display(), app_name)));
        }
    }
    Ok(meta)
}

/// Packs every `app_<app_name>/custom/` tree named in `deploy_map` into
/// the job's content blob (spec.md §3 "a job also owns a content blob
/// (the app payload)"; §6 layout diagram: "custom/ user code &
/// resources"). The wire encoding of `deploy_app`'s bytes is
/// unspecified by spec.md §6, so this packs `{relative_path ->
/// file_bytes}` with `serde_json` rather than pulling in a dedicated
/// archive crate. A `custom/` directory that doesn't exist for a given
/// app contributes no files — not every app ships custom code.
pub fn pack_app_content(folder: &Path, deploy_map: &DeployMap) -> Result<Vec<u8>> {
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    for app_name in deploy_map.keys() {
        let custom_dir = folder.join(format!("app_{}", app_name)).join("custom");
        if custom_dir.is_dir() {
            collect_custom_files(&custom_dir, &custom_dir, app_name, &mut files)?;
        }
    }
    serde_json::to_vec(&files).map_err(|e| Error::Other(format!("failed to pack app content: {}", e)))
}

fn collect_custom_files(root: &Path, dir: &Path, app_name: &str, out: &mut HashMap<String, Vec<u8>>) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(Error::IoError)? {
        let entry = entry.map_err(Error::IoError)?;
        let path = entry.path();
        if path.is_dir() {
            collect_custom_files(root, &path, app_name, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            let key = format!("{}/custom/{}", app_name, relative);
            out.insert(key, std::fs::read(&path).map_err(Error::IoError)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_json_rejects_unknown_fields() {
        let raw = r#"{
            "name": "demo", "deploy_map": {}, "min_clients": 1,
            "config_fed_server": null, "config_fed_client": null,
            "totally_unexpected": true
        }"#;
        let err = serde_json::from_str::<JobMeta>(raw);
        assert!(err.is_err());
    }

    #[test]
    fn meta_json_defaults_required_sites_and_resource_spec() {
        let raw = r#"{
            "name": "demo", "deploy_map": {"app": ["server", "A"]}, "min_clients": 1,
            "config_fed_server": null, "config_fed_client": null
        }"#;
        let meta: JobMeta = serde_json::from_str(raw).unwrap();
        assert!(meta.required_sites.is_empty());
        assert!(meta.resource_spec.is_empty());
    }

    #[test]
    fn parse_job_folder_rejects_missing_app_dir() {
        let dir = std::env::temp_dir().join(format!("flare-core-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("meta.json"),
            r#"{"name":"demo","deploy_map":{"app":["server","A"]},"min_clients":1,"config_fed_server":null,"config_fed_client":null}"#,
        )
        .unwrap();

        let err = parse_job_folder(&dir);
        assert!(err.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
