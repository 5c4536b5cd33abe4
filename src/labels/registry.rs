use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{DomainRule, Label, LabelColor, SyncSettings, PALETTE};

const SLUG_MAX_LEN: usize = 20;
const PLACEHOLDER_ID: &str = "label";

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("label {0} does not exist")]
    NotFound(String),
    #[error("the last remaining label cannot be deleted")]
    LastLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

pub fn index_by_id(labels: &[Label]) -> HashMap<&str, &Label> {
    labels.iter().map(|l| (l.id.as_str(), l)).collect()
}

/// Case-insensitive exact match on trimmed names; first hit wins.
pub fn find_id_by_name(labels: &[Label], name: &str) -> Option<String> {
    let target = name.trim().to_lowercase();
    labels
        .iter()
        .find(|l| l.name.trim().to_lowercase() == target)
        .map(|l| l.id.clone())
}

pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = NON_SLUG.replace_all(&lowered, "-");
    collapsed
        .trim_matches('-')
        .chars()
        .take(SLUG_MAX_LEN)
        .collect()
}

pub fn create_label(name: &str, existing: &[Label]) -> Label {
    let base = match slugify(name) {
        slug if slug.is_empty() => PLACEHOLDER_ID.to_string(),
        slug => slug,
    };
    let id = unique_id(&base, existing);
    Label {
        id,
        name: name.trim().to_string(),
        color: pick_next_color(existing),
    }
}

fn unique_id(base: &str, existing: &[Label]) -> String {
    let taken: HashSet<&str> = existing.iter().map(|l| l.id.as_str()).collect();
    let mut id = base.to_string();
    let mut counter = 1;
    while taken.contains(id.as_str()) {
        id = format!("{base}-{counter}");
        counter += 1;
    }
    id
}

/// First palette color nobody uses yet; once every color is taken the
/// palette cycles by label count.
pub fn pick_next_color(existing: &[Label]) -> LabelColor {
    let used: HashSet<LabelColor> = existing.iter().map(|l| l.color).collect();
    PALETTE
        .iter()
        .copied()
        .find(|c| !used.contains(c))
        .unwrap_or(PALETTE[existing.len() % PALETTE.len()])
}

/// Removes a label and retargets everything that pointed at it. If the
/// default label itself goes away, the first remaining label becomes the
/// default.
pub fn delete_label(sync: &mut SyncSettings, id: &str) -> Result<Label, LabelError> {
    let position = sync
        .labels
        .iter()
        .position(|l| l.id == id)
        .ok_or_else(|| LabelError::NotFound(id.to_string()))?;
    if sync.labels.len() <= 1 {
        return Err(LabelError::LastLabel);
    }

    let removed = sync.labels.remove(position);
    if sync.default_label_id == id {
        sync.default_label_id = sync.labels[0].id.clone();
    }
    for rule in sync.domain_rules.values_mut() {
        if rule.label_id == id {
            *rule = DomainRule::new(sync.default_label_id.clone());
        }
    }
    Ok(removed)
}

/// Empty names are ignored and leave the label untouched.
pub fn rename_label(labels: &mut [Label], id: &str, name: &str) -> Result<bool, LabelError> {
    let trimmed = name.trim();
    let label = labels
        .iter_mut()
        .find(|l| l.id == id)
        .ok_or_else(|| LabelError::NotFound(id.to_string()))?;
    if trimmed.is_empty() {
        return Ok(false);
    }
    label.name = trimmed.to_string();
    Ok(true)
}

pub fn recolor_label(labels: &mut [Label], id: &str, color: LabelColor) -> Result<(), LabelError> {
    let label = labels
        .iter_mut()
        .find(|l| l.id == id)
        .ok_or_else(|| LabelError::NotFound(id.to_string()))?;
    label.color = color;
    Ok(())
}

pub fn sort_labels_by_name(labels: &mut [Label], direction: SortDirection) {
    labels.sort_by(|a, b| {
        let ord = a.name.to_lowercase().cmp(&b.name.to_lowercase());
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

/// Moves the label `from` into the slot currently held by `to`.
pub fn move_label(labels: &mut Vec<Label>, from: &str, to: &str) -> Result<(), LabelError> {
    if from == to {
        return Ok(());
    }
    let from_index = labels
        .iter()
        .position(|l| l.id == from)
        .ok_or_else(|| LabelError::NotFound(from.to_string()))?;
    let to_index = labels
        .iter()
        .position(|l| l.id == to)
        .ok_or_else(|| LabelError::NotFound(to.to_string()))?;
    let moved = labels.remove(from_index);
    labels.insert(to_index, moved);
    Ok(())
}
