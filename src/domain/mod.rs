pub mod label;
pub mod log_entry;
pub mod provider;
pub mod settings;
pub mod tab;

pub use label::{DomainRule, DomainRules, Label, LabelColor, PALETTE};
pub use log_entry::ClassificationLogEntry;
pub use provider::ProviderKind;
pub use settings::{LocalSettings, ProxySettings, SyncSettings, CUSTOM_PROMPT_MAX};
pub use tab::{GroupId, TabGroup, TabId, TabSnapshot, TabStatus, WindowId};
