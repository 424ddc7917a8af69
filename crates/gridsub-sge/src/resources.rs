//! Helpers for `-l key=value` resource requests.

use std::collections::HashMap;

/// Do these resource requests look usable?
///
/// Entries without an `=` are ignored rather than rejected, so any list is
/// accepted as long as its `k=v` entries are non-empty. qsub reports
/// genuinely malformed requests itself.
pub fn valid_resources(res_defs: &[String]) -> bool {
    res_defs
        .iter()
        .filter(|r| r.contains('='))
        .all(|r| !r.is_empty())
}

/// Map `key=value` strings to key -> value. Entries without `=` are skipped.
pub fn resource_dict(res: &[String]) -> HashMap<String, String> {
    res.iter()
        .filter_map(|r| r.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Keys from `res_list` that are not already present in `res_defs`, in order.
pub fn filter_on_resource_dict(
    res_list: &[String],
    res_defs: Option<&HashMap<String, String>>,
) -> Vec<String> {
    match res_defs {
        Some(defs) => res_list
            .iter()
            .filter(|r| !defs.contains_key(r.as_str()))
            .cloned()
            .collect(),
        None => res_list.to_vec(),
    }
}
