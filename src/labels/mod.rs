mod registry;
mod rules;

pub use registry::{
    create_label, delete_label, find_id_by_name, index_by_id, move_label, recolor_label,
    rename_label, sort_labels_by_name, SortDirection,
};
pub use rules::{clear_rules, delete_rule, upsert_rule};
