use serde_json::{Map, Value};

use super::types::REGISTRY_SCHEMA_VERSION;

/// Bring a registry document written by an older launcher up to the current
/// schema. Returns `true` when anything changed.
///
/// Older documents have no `schemaVersion`, store the Odoo port as `port`
/// or `odoo_port` and the database port as `db_port` (sometimes `false`).
pub fn migrate_registry_value(doc: &mut Value, default_database_port: u16) -> bool {
    let Some(root) = doc.as_object_mut() else {
        *doc = Value::Object(Map::new());
        return migrate_registry_value(doc, default_database_port);
    };

    let version = root
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let mut changed = false;

    if !root.get("instances").is_some_and(Value::is_array) {
        root.insert("instances".to_string(), Value::Array(Vec::new()));
        changed = true;
    }

    if version < u64::from(REGISTRY_SCHEMA_VERSION) {
        if let Some(Value::Array(instances)) = root.get_mut("instances") {
            for entry in instances.iter_mut() {
                if let Some(fields) = entry.as_object_mut() {
                    migrate_entry(fields, default_database_port);
                }
            }
        }
        log::info!(
            "Migrating instance registry from schema {} to {}",
            version,
            REGISTRY_SCHEMA_VERSION
        );
        root.insert(
            "schemaVersion".to_string(),
            Value::from(REGISTRY_SCHEMA_VERSION),
        );
        changed = true;
    }

    changed
}

fn migrate_entry(fields: &mut Map<String, Value>, default_database_port: u16) {
    if !fields.contains_key("applicationPort") {
        let legacy = ["odoo_port", "port"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_u64));
        if let Some(port) = legacy {
            fields.insert("applicationPort".to_string(), Value::from(port));
        }
    }

    if !fields.contains_key("databasePort") {
        let port = fields
            .get("db_port")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(default_database_port));
        fields.insert("databasePort".to_string(), Value::from(port));
    }

    if !fields.get("status").is_some_and(Value::is_string) {
        fields.insert("status".to_string(), Value::from("stopped"));
    }

    for key in ["odoo_port", "port", "db_port"] {
        fields.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::Registry;

    #[test]
    fn legacy_entries_are_normalised() {
        let mut doc = json!({
            "instances": [
                {"name": "a", "version": "16.0", "path": "/x/a", "port": 8069, "status": "stopped"},
                {"name": "b", "version": "17.0", "path": "/x/b", "odoo_port": 8070, "db_port": 5434},
                {"name": "c", "version": "17.0", "path": "/x/c", "odoo_port": 8071, "db_port": false}
            ]
        });
        assert!(migrate_registry_value(&mut doc, 5433));

        let registry: Registry = serde_json::from_value(doc).unwrap();
        assert_eq!(registry.schema_version, REGISTRY_SCHEMA_VERSION);
        let ports: Vec<(u16, u16)> = registry
            .instances
            .iter()
            .map(|i| (i.application_port, i.database_port))
            .collect();
        assert_eq!(ports, vec![(8069, 5433), (8070, 5434), (8071, 5433)]);
    }

    #[test]
    fn current_documents_are_untouched() {
        let mut doc = json!({"schemaVersion": 2, "instances": []});
        let before = doc.clone();
        assert!(!migrate_registry_value(&mut doc, 5433));
        assert_eq!(doc, before);
    }

    #[test]
    fn non_object_document_is_reset() {
        let mut doc = json!([1, 2, 3]);
        assert!(migrate_registry_value(&mut doc, 5433));
        assert_eq!(doc["instances"], json!([]));
    }
}
