//! Push notification templates.
//!
//! Loaded once at startup from `{dir}/push/{notification_type}/{language}.json`
//! files shaped `{"title": "...", "body": "..."}`. Placeholders look like
//! `{{.Name}}` and are filled from a string map.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::notification::types::NotificationType;
use crate::{Error, Result};

/// Placeholder values for [`NotificationTemplate`] rendering.
pub type TemplateData<'a> = HashMap<&'static str, &'a str>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationTemplate {
    pub title: String,
    pub body: String,
}

impl NotificationTemplate {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Title, rendered when `data` is given and returned verbatim otherwise.
    pub fn title(&self, data: Option<&TemplateData<'_>>) -> String {
        data.map_or_else(|| self.title.clone(), |data| render(&self.title, data))
    }

    /// Body, rendered when `data` is given and returned verbatim otherwise.
    pub fn body(&self, data: Option<&TemplateData<'_>>) -> String {
        data.map_or_else(|| self.body.clone(), |data| render(&self.body, data))
    }
}

/// Immutable template lookup by notification type and language.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<NotificationType, BTreeMap<String, NotificationTemplate>>,
}

impl TemplateStore {
    /// Load every template under `{dir}/push`.
    ///
    /// A notification type without a directory simply has no templates.
    /// Unreadable or malformed files are configuration errors.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut store = Self::default();
        for notification_type in NotificationType::all() {
            let type_dir = dir.join("push").join(notification_type.as_ref());
            if !type_dir.is_dir() {
                debug!(
                    notification_type = %notification_type,
                    path = %type_dir.display(),
                    "No push templates for notification type"
                );
                continue;
            }

            for entry in std::fs::read_dir(&type_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(language) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let content = std::fs::read_to_string(&path)?;
                let template: NotificationTemplate =
                    serde_json::from_str(&content).map_err(|e| {
                        Error::config(format!("invalid template {}: {}", path.display(), e))
                    })?;
                store.insert(notification_type, language, template);
            }
        }

        debug!(
            templates = store.templates.values().map(BTreeMap::len).sum::<usize>(),
            "Push templates loaded"
        );
        Ok(store)
    }

    pub fn insert(
        &mut self,
        notification_type: NotificationType,
        language: impl Into<String>,
        template: NotificationTemplate,
    ) {
        self.templates
            .entry(notification_type)
            .or_default()
            .insert(language.into(), template);
    }

    pub fn with(
        mut self,
        notification_type: NotificationType,
        language: &str,
        template: NotificationTemplate,
    ) -> Self {
        self.insert(notification_type, language, template);
        self
    }

    pub fn get(
        &self,
        notification_type: NotificationType,
        language: &str,
    ) -> Option<&NotificationTemplate> {
        self.templates
            .get(&notification_type)
            .and_then(|by_language| by_language.get(language))
    }

    /// Like [`get`](Self::get), logging the miss.
    pub fn find(
        &self,
        notification_type: NotificationType,
        language: &str,
    ) -> Option<&NotificationTemplate> {
        let template = self.get(notification_type, language);
        if template.is_none() {
            warn!(
                notification_type = %notification_type,
                language,
                "Language was not found in the push templates"
            );
        }
        template
    }

    /// Languages with a template for `notification_type`, sorted.
    pub fn languages(
        &self,
        notification_type: NotificationType,
    ) -> impl Iterator<Item = (&str, &NotificationTemplate)> {
        self.templates
            .get(&notification_type)
            .into_iter()
            .flat_map(|by_language| by_language.iter().map(|(l, t)| (l.as_str(), t)))
    }
}

/// Replace `{{.Name}}` placeholders. Unknown names render empty.
fn render(text: &str, data: &TemplateData<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim().trim_start_matches('.');
        if let Some(value) = data.get(name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
