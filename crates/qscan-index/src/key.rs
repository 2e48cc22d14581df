//! Stringifies [`IndexRule::normalized_key`]'s tuple into the `text` form
//! the `index_rule_registry` table stores, so the registry can dedupe
//! rules by field-set-and-direction independent of declaration order.

use qscan_schemas::{IndexRule, SortDirection};

pub fn normalized_key_string(rule: &IndexRule) -> String {
    let (_, fields) = rule.normalized_key();
    let parts: Vec<String> = fields
        .iter()
        .map(|(field, dir)| {
            let dir = match dir {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            format!("{field}:{dir}")
        })
        .collect();
    parts.join(",")
}
